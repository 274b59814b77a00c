//! Evaluator seam between the pipeline and the system under test.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::ParamSpec;

/// Raw measurements from one trial of a parameter set.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Metric values, keyed by name.
    pub metrics: BTreeMap<String, f64>,
    /// Optional text output, consumed by output-space diversity.
    pub transcript: Option<String>,
}

/// Evaluation failure. The candidate is excluded from its generation's
/// ranking; the generation continues without it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    #[error("evaluation failed: {0}")]
    Failed(String),
    #[error("evaluation timed out after {0} ms")]
    TimedOut(u64),
}

/// Runs one candidate's parameters against the system under test.
///
/// Implementations must be thread-safe: generations fan out across a
/// rayon pool.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, params: &BTreeMap<String, f64>) -> Result<Evaluation, EvalError>;
}

/// Target and tolerance scale for one simulated parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Parameter value contributing zero error.
    pub value: f64,
    /// Deviation producing one unit of squared error.
    pub scale: f64,
}

/// Deterministic stand-in evaluator: a quadratic error bowl around a
/// target point, plus an affine latency model.
///
/// Useful for trials and tests. Production deployments inject their own
/// [`Evaluator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedEvaluator {
    /// Per-parameter targets. Parameters without one contribute nothing.
    pub targets: BTreeMap<String, TargetSpec>,
    /// Scale from mean squared deviation to error rate.
    #[serde(default = "default_error_scale")]
    pub error_scale: f64,
    /// Latency in milliseconds at the target point.
    #[serde(default = "default_base_latency")]
    pub base_latency_ms: f64,
}

fn default_error_scale() -> f64 {
    0.25
}
fn default_base_latency() -> f64 {
    80.0
}

impl SimulatedEvaluator {
    /// Targets at each parameter's midpoint with a quarter-range
    /// tolerance, so candidates near the center of the space score well.
    pub fn centered_on(specs: &[ParamSpec]) -> Self {
        let targets = specs
            .iter()
            .map(|spec| {
                let scale = ((spec.max - spec.min) / 4.0).max(1e-9);
                let target = TargetSpec {
                    value: (spec.min + spec.max) / 2.0,
                    scale,
                };
                (spec.name.clone(), target)
            })
            .collect();
        Self {
            targets,
            error_scale: default_error_scale(),
            base_latency_ms: default_base_latency(),
        }
    }
}

impl Evaluator for SimulatedEvaluator {
    fn evaluate(&self, params: &BTreeMap<String, f64>) -> Result<Evaluation, EvalError> {
        let mut sq_sum = 0.0;
        let mut abs_sum = 0.0;
        let mut counted = 0usize;
        for (name, value) in params {
            if let Some(target) = self.targets.get(name) {
                let dev = (value - target.value) / target.scale;
                sq_sum += dev * dev;
                abs_sum += dev.abs();
                counted += 1;
            }
        }
        let n = counted.max(1) as f64;
        let error_rate = (self.error_scale * sq_sum / n).min(1.0);
        let latency_ms = self.base_latency_ms * (1.0 + abs_sum / n);

        let mut metrics = BTreeMap::new();
        metrics.insert("error_rate".to_string(), error_rate);
        metrics.insert("latency_ms".to_string(), latency_ms);
        Ok(Evaluation {
            metrics,
            transcript: None,
        })
    }
}
