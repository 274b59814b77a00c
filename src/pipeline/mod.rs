//! Admission pipeline: evaluation, scoring, and gating.
//!
//! Candidates flow through a fixed gate sequence:
//!
//! 1. **Hard constraints** - ceilings that reject regardless of score
//! 2. **Score** - weighted piecewise normalization against thresholds
//! 3. **Drift** - mean relative deviation from the baseline anchor
//! 4. **Diversity** - MinHash near-duplicate collapse within the batch
//!
//! A rejection stops the sequence for that candidate, but every gated
//! candidate is persisted with its trace regardless of outcome.

mod admission;
mod diversity;
mod drift;
mod evaluator;
mod judge;

pub use admission::{AdmissionController, GateInput};
pub use diversity::{
    BatchMember, BatchVerdict, DiversityGate, MinHasher, ngram_overlap, param_tokens,
    signature_similarity,
};
pub use drift::{DriftDetector, DriftOutcome, compute_drift};
pub use evaluator::{EvalError, Evaluation, Evaluator, SimulatedEvaluator, TargetSpec};
pub use judge::{Judge, Verdict};
