//! Distributional drift gate against the rolling baseline anchor.

use std::collections::BTreeMap;

use log::debug;

use crate::schema::{AnchorEntry, BaselineAnchor, CandidatePack, DriftConfig};

/// Mean relative deviation of a candidate's metrics from the anchor,
/// taken over the metrics both sides report.
///
/// Returns `None` when the anchor shares no metrics with the candidate.
pub fn compute_drift(
    raw_metrics: &BTreeMap<String, f64>,
    baseline: &BaselineAnchor,
    epsilon: f64,
) -> Option<f64> {
    let mut total = 0.0;
    let mut count = 0usize;
    for (name, anchor) in baseline {
        if let Some(value) = raw_metrics.get(name) {
            total += (value - anchor.mean).abs() / anchor.mean.abs().max(epsilon);
            count += 1;
        }
    }
    if count == 0 { None } else { Some(total / count as f64) }
}

/// Result of one drift check.
#[derive(Debug, Clone, Copy)]
pub struct DriftOutcome {
    /// Mean relative deviation. `None` without a comparable baseline.
    pub drift: Option<f64>,
    /// Whether the candidate passed the gate.
    pub passed: bool,
}

/// Drift gate: passes candidates whose metrics stay near the anchor.
///
/// The anchor moves only on admissions, as an exponential moving
/// average per metric, so rejected candidates can never pull it.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    config: DriftConfig,
}

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    /// Tolerance the gate enforces.
    pub fn kl_tau(&self) -> f64 {
        self.config.kl_tau
    }

    /// Evaluate the gate for one candidate.
    pub fn check(&self, raw_metrics: &BTreeMap<String, f64>, baseline: &BaselineAnchor) -> DriftOutcome {
        match compute_drift(raw_metrics, baseline, self.config.epsilon) {
            None => {
                debug!("no baseline established; drift gate passes trivially");
                DriftOutcome {
                    drift: None,
                    passed: true,
                }
            }
            Some(drift) => DriftOutcome {
                drift: Some(drift),
                passed: drift <= self.config.kl_tau,
            },
        }
    }

    /// Fold an admitted candidate's metrics into the anchor. Metrics the
    /// anchor has not seen yet are inserted at their observed value.
    pub fn apply_admitted(&self, baseline: &mut BaselineAnchor, pack: &CandidatePack) {
        let m = self.config.momentum;
        for (name, value) in &pack.raw_metrics {
            match baseline.get_mut(name) {
                Some(entry) => {
                    entry.mean = m * entry.mean + (1.0 - m) * value;
                    entry.reference_run_id = pack.run_id.clone();
                    entry.timestamp = pack.timestamp;
                }
                None => {
                    baseline.insert(
                        name.clone(),
                        AnchorEntry {
                            mean: *value,
                            reference_run_id: pack.run_id.clone(),
                            timestamp: pack.timestamp,
                        },
                    );
                }
            }
        }
    }
}
