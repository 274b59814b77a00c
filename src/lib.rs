//! Evogate - Admission-gated evolutionary search over experiment
//! configurations.
//!
//! This crate runs a seeded genetic optimizer (or a deterministic grid
//! sweep) over a declared parameter space, judges each candidate's raw
//! metrics into a normalized score, and forces every candidate through
//! a fixed gate sequence before it can influence anything: hard
//! constraints, score threshold, drift against a rolling baseline, and
//! batch diversity. Every gated candidate is persisted to an
//! append-only lineage store with its full gate trace.
//!
//! # Architecture
//!
//! The crate is split into four modules:
//!
//! - `schema`: Configuration, candidate, and report types
//! - `pipeline`: Judge, drift, diversity, and admission gates
//! - `evolve`: Genome operations and the generation loop
//! - `store`: Append-only lineage persistence
//!
//! # Example
//!
//! ```rust,no_run
//! use evogate::{
//!     evolve::EvolutionEngine,
//!     pipeline::SimulatedEvaluator,
//!     schema::PipelineConfig,
//!     store::LineageStore,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create configuration
//! let config = PipelineConfig::example();
//!
//! // Evaluate against a deterministic stand-in system
//! let evaluator = SimulatedEvaluator::centered_on(&config.params);
//!
//! // Run the admission-gated search
//! let store = LineageStore::open("lineage")?;
//! let mut engine = EvolutionEngine::new(config, evaluator, store)?;
//! let summary = engine.run()?;
//!
//! println!(
//!     "admitted {} candidates over {} generations",
//!     summary.admitted, summary.generations
//! );
//! # Ok(())
//! # }
//! ```

pub mod evolve;
pub mod pipeline;
pub mod schema;
pub mod store;

// Re-export commonly used types
pub use evolve::EvolutionEngine;
pub use pipeline::{Evaluator, Judge, SimulatedEvaluator};
pub use schema::{AdmissionDecision, CandidatePack, Decision, PipelineConfig, RunSummary};
pub use store::{LineageStore, StoreError};
