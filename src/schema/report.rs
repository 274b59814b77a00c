//! Run reporting: per-generation outcomes and end-of-run summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Decision, Genome};

/// Outcome of one genome within a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenomeOutcome {
    /// The genome, carrying its fitness once judged.
    pub genome: Genome,
    /// Pack key for gated candidates. `None` when evaluation failed.
    pub run_id: Option<String>,
    /// Terminal gate decision, if the candidate reached the gates.
    pub decision: Option<Decision>,
    /// Evaluator failure message for candidates that never reached them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Record of a single generation. Every genome of the generation appears
/// here, including rejected and failed ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Generation index, starting at zero.
    pub index: u32,
    /// Per-genome outcomes.
    pub outcomes: Vec<GenomeOutcome>,
    /// Best combined score among judged candidates.
    pub best_score: f64,
    /// Mean combined score among judged candidates.
    pub mean_score: f64,
    /// Score variance among judged candidates.
    pub score_variance: f64,
    /// Candidates in this population holding an admitted decision,
    /// carried elites included.
    pub admitted: usize,
}

/// Full run history. Never truncated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationHistory {
    pub generations: Vec<GenerationRecord>,
}

/// Reason a run stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached the configured generation budget.
    MaxGenerations,
    /// Fitness variance stayed under the convergence epsilon for the
    /// configured number of generations.
    Converged,
    /// A grid sweep consumed its lattice.
    SweepExhausted,
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Pipeline invocation id.
    pub episode_id: String,
    /// Content hash of the generator configuration.
    pub generator_sha: String,
    /// Content hash of the judge configuration.
    pub judge_sha: String,
    /// Why the run stopped.
    pub stop_reason: StopReason,
    /// Generations actually run.
    pub generations: u32,
    /// Evaluator invocations across the run.
    pub total_evaluations: u64,
    /// Newly admitted candidates across the run.
    pub admitted: usize,
    /// Best admitted candidate, if any generation admitted one.
    pub best: Option<BestCandidate>,
    /// Complete per-generation history.
    pub history: GenerationHistory,
}

/// Snapshot of the best admitted candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestCandidate {
    pub genome_id: u64,
    pub run_id: String,
    pub score: f64,
    pub params: BTreeMap<String, f64>,
}
