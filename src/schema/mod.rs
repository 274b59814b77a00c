//! Schema module - Configuration and data-model types for the pipeline.

mod candidate;
mod config;
mod report;

pub use candidate::*;
pub use config::*;
pub use report::*;
