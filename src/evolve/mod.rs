//! Search engine: genome operations and the admission-gated
//! generation loop.

mod engine;
mod rng;

pub use engine::{Candidate, EvolutionEngine};
pub use rng::GenomeRng;
