//! Configuration types for admission-gated search runs.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Identifier for this invocation. Derived from the seed when absent.
    #[serde(default)]
    pub episode_id: Option<String>,
    /// Parameter space the generator explores.
    pub params: Vec<ParamSpec>,
    /// Candidate generator.
    #[serde(default)]
    pub search: SearchStrategy,
    /// Population and termination settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Scoring weights and thresholds.
    pub judge: JudgeConfig,
    /// Score gate and ranking settings.
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Drift gate settings.
    #[serde(default)]
    pub drift: DriftConfig,
    /// Diversity gate settings.
    #[serde(default)]
    pub diversity: DiversityConfig,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

/// Declared bounds and type for one searchable parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name, unique within the space.
    pub name: String,
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
    /// Value type.
    #[serde(default)]
    pub kind: ParamKind,
}

/// Parameter value type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ParamKind {
    #[default]
    Float,
    /// Stored as `f64` but rounded to a whole number whenever sampled
    /// or mutated. Bounds must be integral.
    Int,
}

/// Candidate generator selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SearchStrategy {
    /// Genetic algorithm with tournament selection and elitism.
    Genetic(GeneticConfig),
    /// Deterministic walk over an evenly spaced lattice of the bounds.
    GridSweep(SweepConfig),
}

impl Default for SearchStrategy {
    fn default() -> Self {
        Self::Genetic(GeneticConfig::default())
    }
}

/// Genetic algorithm settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticConfig {
    /// Mutation probability per parameter (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Number of admitted individuals carried unchanged into the next
    /// generation.
    #[serde(default = "default_elite_count")]
    pub elite_count: usize,
    /// Tournament size for parent selection.
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            mutation_rate: default_mutation_rate(),
            elite_count: default_elite_count(),
            tournament_size: default_tournament_size(),
        }
    }
}

fn default_mutation_rate() -> f64 {
    0.15
}
fn default_elite_count() -> usize {
    2
}
fn default_tournament_size() -> usize {
    3
}

/// Grid sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Lattice points per parameter axis.
    #[serde(default = "default_points_per_param")]
    pub points_per_param: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            points_per_param: default_points_per_param(),
        }
    }
}

fn default_points_per_param() -> usize {
    5
}

/// Population and termination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of candidates per generation.
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Generation budget.
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Early-stop threshold on fitness variance.
    #[serde(default = "default_convergence_epsilon")]
    pub convergence_epsilon: f64,
    /// Consecutive low-variance generations required before stopping.
    #[serde(default = "default_convergence_patience")]
    pub convergence_patience: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            generations: default_generations(),
            convergence_epsilon: default_convergence_epsilon(),
            convergence_patience: default_convergence_patience(),
        }
    }
}

fn default_population_size() -> usize {
    32
}
fn default_generations() -> usize {
    25
}
fn default_convergence_epsilon() -> f64 {
    1e-4
}
fn default_convergence_patience() -> usize {
    3
}

/// Scoring configuration: weighted metrics with piecewise thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Judged metrics. Weights must sum to 1.0.
    pub metrics: Vec<MetricJudge>,
}

/// Thresholds and weight for a single judged metric. All judged metrics
/// are lower-is-better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricJudge {
    /// Metric name as reported by the evaluator.
    pub name: String,
    /// Weight in the combined score.
    pub weight: f64,
    /// Comparison semantics for the hard-fail ceiling.
    #[serde(default)]
    pub kind: MetricKind,
    /// Raw values at or below this land in the near-flat top segment.
    pub t_excellent: f64,
    /// Raw values above this decay toward zero.
    pub t_poor: f64,
    /// Score at `t_excellent`.
    #[serde(default = "default_s_excellent")]
    pub s_excellent: f64,
    /// Score at `t_poor`.
    #[serde(default = "default_s_poor")]
    pub s_poor: f64,
    /// Hard-fail ceiling. Breaching it rejects the candidate regardless
    /// of the combined score.
    #[serde(default)]
    pub hard_fail: Option<f64>,
}

/// Hard-fail comparison semantics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MetricKind {
    /// Rates; the ceiling fails at `raw >= hard_fail`.
    #[default]
    ErrorLike,
    /// Unbounded lower-is-better values; the ceiling fails at
    /// `raw > hard_fail`.
    LatencyLike,
}

fn default_s_excellent() -> f64 {
    0.9
}
fn default_s_poor() -> f64 {
    0.5
}

/// Score gate and ranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Minimum combined score for admission.
    #[serde(default = "default_admit_threshold")]
    pub admit_threshold: f64,
    /// Raw metric used to break score ties when ranking (lower wins).
    #[serde(default)]
    pub tie_break_metric: Option<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            admit_threshold: default_admit_threshold(),
            tie_break_metric: None,
        }
    }
}

fn default_admit_threshold() -> f64 {
    0.78
}

/// Drift gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Maximum mean relative deviation from the baseline anchor.
    #[serde(default = "default_kl_tau")]
    pub kl_tau: f64,
    /// EMA momentum for anchor updates from admitted candidates.
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    /// Division guard for near-zero anchor means.
    #[serde(default = "default_drift_epsilon")]
    pub epsilon: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            kl_tau: default_kl_tau(),
            momentum: default_momentum(),
            epsilon: default_drift_epsilon(),
        }
    }
}

fn default_kl_tau() -> f64 {
    0.3
}
fn default_momentum() -> f64 {
    0.9
}
fn default_drift_epsilon() -> f64 {
    1e-9
}

/// Diversity gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiversityConfig {
    /// Minimum batch diversity. Pairs whose dissimilarity falls under it
    /// are near-duplicates.
    #[serde(default = "default_diversity_tau")]
    pub diversity_tau: f64,
    /// MinHash signature length.
    #[serde(default = "default_num_hashes")]
    pub num_hashes: usize,
    /// Seed for the signature hash family. Fixed so that decisions are a
    /// pure function of configuration.
    #[serde(default = "default_signature_seed")]
    pub signature_seed: u64,
    /// Quantization buckets per parameter when tokenizing.
    #[serde(default = "default_param_buckets")]
    pub param_buckets: usize,
    /// Word n-gram size for transcript overlap.
    #[serde(default = "default_ngram")]
    pub ngram: usize,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            diversity_tau: default_diversity_tau(),
            num_hashes: default_num_hashes(),
            signature_seed: default_signature_seed(),
            param_buckets: default_param_buckets(),
            ngram: default_ngram(),
        }
    }
}

fn default_diversity_tau() -> f64 {
    0.2
}
fn default_num_hashes() -> usize {
    128
}
fn default_signature_seed() -> u64 {
    0x9e37_79b9_7f4a_7c15
}
fn default_param_buckets() -> usize {
    64
}
fn default_ngram() -> usize {
    2
}

/// Configuration validation errors. All of these abort a run before any
/// candidate is evaluated.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No parameters declared")]
    NoParams,
    #[error("Duplicate parameter name: {0}")]
    DuplicateParam(String),
    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(String),
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("No judged metrics specified")]
    NoMetrics,
    #[error("Invalid metric weight: {0}")]
    InvalidWeight(String),
    #[error("Metric weights sum to {0}, expected 1.0")]
    WeightSum(f64),
    #[error("Invalid metric thresholds: {0}")]
    InvalidThresholds(String),
    #[error("Invalid gate setting: {0}")]
    InvalidGate(String),
    #[error("Config serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PipelineConfig {
    /// Validate the full configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.params.is_empty() {
            return Err(ConfigError::NoParams);
        }
        let mut seen = std::collections::BTreeSet::new();
        for spec in &self.params {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateParam(spec.name.clone()));
            }
            if !spec.min.is_finite() || !spec.max.is_finite() || spec.min > spec.max {
                return Err(ConfigError::InvalidBounds(format!(
                    "{}: [{}, {}]",
                    spec.name, spec.min, spec.max
                )));
            }
            if spec.kind == ParamKind::Int && (spec.min.fract() != 0.0 || spec.max.fract() != 0.0) {
                return Err(ConfigError::InvalidBounds(format!(
                    "{}: integer parameter requires integral bounds",
                    spec.name
                )));
            }
        }

        if self.population.size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }
        if self.population.generations == 0 {
            return Err(ConfigError::InvalidGate("generations must be at least 1".into()));
        }
        if self.population.convergence_epsilon <= 0.0 {
            return Err(ConfigError::InvalidGate(
                "convergence_epsilon must be positive".into(),
            ));
        }
        if self.population.convergence_patience == 0 {
            return Err(ConfigError::InvalidGate(
                "convergence_patience must be at least 1".into(),
            ));
        }

        self.judge.validate()?;

        match &self.search {
            SearchStrategy::Genetic(genetic) => {
                if !(0.0..=1.0).contains(&genetic.mutation_rate) {
                    return Err(ConfigError::InvalidGate(format!(
                        "mutation_rate {} outside [0, 1]",
                        genetic.mutation_rate
                    )));
                }
                if genetic.elite_count >= self.population.size {
                    return Err(ConfigError::InvalidGate(format!(
                        "elite_count {} must be below population size {}",
                        genetic.elite_count, self.population.size
                    )));
                }
                if genetic.tournament_size == 0 {
                    return Err(ConfigError::InvalidGate(
                        "tournament_size must be at least 1".into(),
                    ));
                }
            }
            SearchStrategy::GridSweep(sweep) => {
                if sweep.points_per_param == 0 {
                    return Err(ConfigError::InvalidGate(
                        "points_per_param must be at least 1".into(),
                    ));
                }
            }
        }

        if !(0.0..=1.0).contains(&self.admission.admit_threshold) {
            return Err(ConfigError::InvalidGate(format!(
                "admit_threshold {} outside [0, 1]",
                self.admission.admit_threshold
            )));
        }
        if self.drift.kl_tau <= 0.0 {
            return Err(ConfigError::InvalidGate("kl_tau must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.drift.momentum) {
            return Err(ConfigError::InvalidGate(format!(
                "momentum {} outside [0, 1)",
                self.drift.momentum
            )));
        }
        if self.drift.epsilon <= 0.0 {
            return Err(ConfigError::InvalidGate("drift epsilon must be positive".into()));
        }
        if self.diversity.diversity_tau <= 0.0 || self.diversity.diversity_tau >= 1.0 {
            return Err(ConfigError::InvalidGate(format!(
                "diversity_tau {} outside (0, 1)",
                self.diversity.diversity_tau
            )));
        }
        if self.diversity.num_hashes == 0
            || self.diversity.param_buckets == 0
            || self.diversity.ngram == 0
        {
            return Err(ConfigError::InvalidGate(
                "num_hashes, param_buckets, and ngram must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// A ready-to-run configuration for trials and documentation.
    pub fn example() -> Self {
        Self {
            episode_id: None,
            params: vec![
                ParamSpec {
                    name: "learning_rate".into(),
                    min: 0.001,
                    max: 0.1,
                    kind: ParamKind::Float,
                },
                ParamSpec {
                    name: "batch_size".into(),
                    min: 8.0,
                    max: 128.0,
                    kind: ParamKind::Int,
                },
                ParamSpec {
                    name: "temperature".into(),
                    min: 0.0,
                    max: 2.0,
                    kind: ParamKind::Float,
                },
            ],
            search: SearchStrategy::default(),
            population: PopulationConfig::default(),
            judge: JudgeConfig {
                metrics: vec![
                    MetricJudge {
                        name: "error_rate".into(),
                        weight: 0.7,
                        kind: MetricKind::ErrorLike,
                        t_excellent: 0.1,
                        t_poor: 0.4,
                        s_excellent: default_s_excellent(),
                        s_poor: default_s_poor(),
                        hard_fail: Some(0.6),
                    },
                    MetricJudge {
                        name: "latency_ms".into(),
                        weight: 0.3,
                        kind: MetricKind::LatencyLike,
                        t_excellent: 120.0,
                        t_poor: 400.0,
                        s_excellent: default_s_excellent(),
                        s_poor: default_s_poor(),
                        hard_fail: Some(1500.0),
                    },
                ],
            },
            admission: AdmissionConfig {
                admit_threshold: default_admit_threshold(),
                tie_break_metric: Some("latency_ms".into()),
            },
            drift: DriftConfig::default(),
            diversity: DiversityConfig::default(),
            random_seed: Some(42),
        }
    }
}

impl JudgeConfig {
    /// Validate weights and thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.is_empty() {
            return Err(ConfigError::NoMetrics);
        }
        let mut total = 0.0;
        for metric in &self.metrics {
            if metric.weight < 0.0 {
                return Err(ConfigError::InvalidWeight(format!(
                    "{} weight {} must be non-negative",
                    metric.name, metric.weight
                )));
            }
            total += metric.weight;
            if metric.t_excellent < 0.0 || metric.t_poor <= metric.t_excellent {
                return Err(ConfigError::InvalidThresholds(format!(
                    "{}: require 0 <= t_excellent < t_poor",
                    metric.name
                )));
            }
            if metric.s_excellent > 1.0 || metric.s_poor < 0.0 || metric.s_poor >= metric.s_excellent
            {
                return Err(ConfigError::InvalidThresholds(format!(
                    "{}: require 0 <= s_poor < s_excellent <= 1",
                    metric.name
                )));
            }
        }
        if (total - 1.0).abs() > 1e-6 {
            return Err(ConfigError::WeightSum(total));
        }
        Ok(())
    }
}
