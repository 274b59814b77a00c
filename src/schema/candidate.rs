//! Data model for candidates moving through the admission pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A point in parameter space produced by the generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genome {
    /// Unique identifier within the run.
    pub id: u64,
    /// Generation this genome was created in.
    pub generation: u32,
    /// Parameter values, keyed by name.
    pub params: BTreeMap<String, f64>,
    /// Parent genome ids. Empty for sampled genomes, two for crossover
    /// offspring.
    pub parent_ids: Vec<u64>,
    /// Combined score once judged. `None` until then.
    pub fitness: Option<f64>,
}

/// Immutable measurement produced by one evaluator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Genome the measurement belongs to.
    pub genome_id: u64,
    /// Raw metric values, keyed by name.
    pub raw_metrics: BTreeMap<String, f64>,
    /// Optional text output for output-space diversity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// When the evaluation completed.
    pub timestamp: DateTime<Utc>,
}

/// A judged candidate ready for gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// Genome the score belongs to.
    pub genome_id: u64,
    /// Persistence key for this candidate's pack.
    pub run_id: String,
    /// Weighted combined score in [0, 1].
    pub normalized_score: f64,
    /// Per-metric contributions.
    pub metric_breakdown: Vec<MetricScore>,
    /// Content hash of the judge configuration that produced the score.
    pub judge_version: String,
}

/// Per-metric contribution to the combined score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricScore {
    /// Metric name.
    pub name: String,
    /// Raw value as reported by the evaluator.
    pub raw: f64,
    /// Normalized score in [0, 1].
    pub score: f64,
    /// Weight in the combined score.
    pub weight: f64,
    /// Weighted contribution.
    pub weighted: f64,
}

/// Terminal admission state of a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Admitted,
    HardFailed,
    ScoreRejected,
    DriftRejected,
    DiversityRejected,
}

/// Admission gates, in evaluation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateName {
    HardConstraint,
    Score,
    Drift,
    Diversity,
}

/// One gate evaluation in a candidate's trace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateCheck {
    /// Which gate ran.
    pub gate: GateName,
    /// Whether the candidate passed it.
    pub passed: bool,
}

/// Outcome of gating one candidate.
///
/// The trace lists only the gates that actually ran; a rejection
/// truncates it at the gate that fired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Genome the decision applies to.
    pub candidate_id: u64,
    /// Terminal state.
    pub decision: Decision,
    /// Gates evaluated, in order.
    pub gate_trace: Vec<GateCheck>,
    /// Human-readable causes. Empty for admitted candidates.
    pub reasons: Vec<String>,
}

/// Rolling EMA anchor for one metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnchorEntry {
    /// Exponential moving average of the metric.
    pub mean: f64,
    /// Run that last moved this anchor.
    pub reference_run_id: String,
    /// When the anchor last moved.
    pub timestamp: DateTime<Utc>,
}

/// Baseline anchors, keyed by metric name.
pub type BaselineAnchor = BTreeMap<String, AnchorEntry>;

/// Append-only audit artifact for one gated candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidatePack {
    /// Persistence key, unique per candidate.
    pub run_id: String,
    /// Pipeline invocation the candidate belongs to.
    pub episode_id: String,
    /// Generation index.
    pub generation: u32,
    /// Genome id.
    pub genome_id: u64,
    /// Parent genome ids.
    pub parent_ids: Vec<u64>,
    /// Parameter values.
    pub params: BTreeMap<String, f64>,
    /// Raw metrics from the evaluator.
    pub raw_metrics: BTreeMap<String, f64>,
    /// Weighted combined score.
    pub normalized_score: f64,
    /// Gates evaluated, in order.
    pub gate_trace: Vec<GateCheck>,
    /// Terminal state.
    pub decision: Decision,
    /// Content hash of the generator configuration.
    pub generator_sha: String,
    /// Content hash of the judge configuration.
    pub judge_sha: String,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

/// SHA-256 hex digest of a value's JSON encoding.
///
/// Map-valued fields serialize in key order, so the digest is stable
/// across runs for identical content.
pub fn content_sha<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(format!("{:x}", hasher.finalize()))
}
