//! Ordered admission gates with short-circuit decisions and full traces.

use std::collections::BTreeMap;

use log::debug;

use crate::schema::{
    AdmissionConfig, AdmissionDecision, BaselineAnchor, CandidatePack, Decision, GateCheck,
    GateName, ParamSpec, PipelineConfig, ScoredCandidate,
};

use super::diversity::{BatchMember, DiversityGate, param_tokens};
use super::drift::DriftDetector;

/// One judged candidate entering the gates.
#[derive(Debug, Clone)]
pub struct GateInput {
    /// The judged artifact: combined score, breakdown, judge version.
    pub scored: ScoredCandidate,
    /// Parameter assignment, for parameter-space diversity.
    pub params: BTreeMap<String, f64>,
    /// Raw measurements, for the drift gate.
    pub raw_metrics: BTreeMap<String, f64>,
    /// Hard-constraint breach flag from the judge.
    pub hard_fail: bool,
    /// Hard-constraint violations. Empty when `hard_fail` is false.
    pub hard_reasons: Vec<String>,
    /// Optional evaluator transcript, for output-space diversity.
    pub transcript: Option<String>,
}

/// Runs candidates through the gate sequence and issues decisions.
///
/// Gate order is fixed: hard constraints, score, drift, diversity. A
/// rejection stops the sequence, so a candidate's trace lists exactly
/// the gates that ran. Decisions are a pure function of the batch, the
/// baseline anchor, and the configuration.
pub struct AdmissionController {
    admission: AdmissionConfig,
    drift: DriftDetector,
    diversity: DiversityGate,
    params: Vec<ParamSpec>,
    param_buckets: usize,
}

impl AdmissionController {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            admission: config.admission.clone(),
            drift: DriftDetector::new(config.drift.clone()),
            diversity: DiversityGate::new(config.diversity.clone()),
            params: config.params.clone(),
            param_buckets: config.diversity.param_buckets,
        }
    }

    /// Gate a batch. The result is index-aligned with the input.
    pub fn decide_batch(
        &self,
        batch: &[GateInput],
        baseline: &BaselineAnchor,
    ) -> Vec<AdmissionDecision> {
        let mut decisions: Vec<AdmissionDecision> = Vec::with_capacity(batch.len());
        let mut survivors: Vec<usize> = Vec::new();

        for (idx, input) in batch.iter().enumerate() {
            let mut gate_trace = Vec::new();
            let mut reasons = Vec::new();

            let hard_passed = !input.hard_fail;
            gate_trace.push(GateCheck {
                gate: GateName::HardConstraint,
                passed: hard_passed,
            });
            if !hard_passed {
                reasons.extend(input.hard_reasons.iter().cloned());
                decisions.push(AdmissionDecision {
                    candidate_id: input.scored.genome_id,
                    decision: Decision::HardFailed,
                    gate_trace,
                    reasons,
                });
                continue;
            }

            let score_passed = input.scored.normalized_score >= self.admission.admit_threshold;
            gate_trace.push(GateCheck {
                gate: GateName::Score,
                passed: score_passed,
            });
            if !score_passed {
                reasons.push(format!(
                    "score {:.4} below admit threshold {:.4}",
                    input.scored.normalized_score, self.admission.admit_threshold
                ));
                decisions.push(AdmissionDecision {
                    candidate_id: input.scored.genome_id,
                    decision: Decision::ScoreRejected,
                    gate_trace,
                    reasons,
                });
                continue;
            }

            let outcome = self.drift.check(&input.raw_metrics, baseline);
            gate_trace.push(GateCheck {
                gate: GateName::Drift,
                passed: outcome.passed,
            });
            if !outcome.passed {
                if let Some(drift) = outcome.drift {
                    reasons.push(format!(
                        "drift {:.4} exceeds tolerance {:.4}",
                        drift,
                        self.drift.kl_tau()
                    ));
                }
                decisions.push(AdmissionDecision {
                    candidate_id: input.scored.genome_id,
                    decision: Decision::DriftRejected,
                    gate_trace,
                    reasons,
                });
                continue;
            }

            survivors.push(idx);
            decisions.push(AdmissionDecision {
                candidate_id: input.scored.genome_id,
                decision: Decision::Admitted,
                gate_trace,
                reasons,
            });
        }

        // The diversity gate only sees candidates that cleared the
        // per-candidate gates.
        if !survivors.is_empty() {
            let members: Vec<BatchMember> = survivors
                .iter()
                .map(|&idx| {
                    let input = &batch[idx];
                    BatchMember {
                        genome_id: input.scored.genome_id,
                        score: input.scored.normalized_score,
                        tokens: param_tokens(&input.params, &self.params, self.param_buckets),
                        transcript: input.transcript.clone(),
                    }
                })
                .collect();

            let verdict = self.diversity.filter_batch(&members);
            debug!(
                "batch diversity {:.4}, {} near-duplicate(s) rejected",
                verdict.batch_diversity,
                verdict.rejected.len()
            );

            for &idx in &survivors {
                let rejected = verdict.rejected.contains(&batch[idx].scored.genome_id);
                let decision = &mut decisions[idx];
                decision.gate_trace.push(GateCheck {
                    gate: GateName::Diversity,
                    passed: !rejected,
                });
                if rejected {
                    decision.decision = Decision::DiversityRejected;
                    decision.reasons.push(format!(
                        "near-duplicate of a better batch sibling (batch diversity {:.4})",
                        verdict.batch_diversity
                    ));
                }
            }
        }

        decisions
    }

    /// Fold an admitted candidate's metrics into the anchor.
    pub fn absorb_admitted(&self, baseline: &mut BaselineAnchor, pack: &CandidatePack) {
        self.drift.apply_admitted(baseline, pack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Judge;
    use crate::schema::{AnchorEntry, PipelineConfig};
    use chrono::Utc;

    fn controller() -> (AdmissionController, Judge, PipelineConfig) {
        let config = PipelineConfig::example();
        let controller = AdmissionController::new(&config);
        let judge = Judge::new(config.judge.clone()).unwrap();
        (controller, judge, config)
    }

    fn input_for(
        judge: &Judge,
        config: &PipelineConfig,
        genome_id: u64,
        frac: f64,
        error_rate: f64,
        latency_ms: f64,
    ) -> GateInput {
        let mut raw_metrics = BTreeMap::new();
        raw_metrics.insert("error_rate".to_string(), error_rate);
        raw_metrics.insert("latency_ms".to_string(), latency_ms);
        let verdict = judge.score(&raw_metrics);
        let params = config
            .params
            .iter()
            .map(|s| (s.name.clone(), s.min + (s.max - s.min) * frac))
            .collect();
        GateInput {
            scored: ScoredCandidate {
                genome_id,
                run_id: format!("test-g0-c{genome_id}"),
                normalized_score: verdict.score,
                metric_breakdown: verdict.breakdown,
                judge_version: judge.sha().to_string(),
            },
            params,
            raw_metrics,
            hard_fail: verdict.hard_fail,
            hard_reasons: verdict.reasons,
            transcript: None,
        }
    }

    fn anchor(error_rate: f64, latency_ms: f64) -> BaselineAnchor {
        let mut baseline = BaselineAnchor::new();
        for (name, mean) in [("error_rate", error_rate), ("latency_ms", latency_ms)] {
            baseline.insert(
                name.to_string(),
                AnchorEntry {
                    mean,
                    reference_run_id: "seed".to_string(),
                    timestamp: Utc::now(),
                },
            );
        }
        baseline
    }

    #[test]
    fn test_admitted_trace_covers_all_gates() {
        let (controller, judge, config) = controller();
        let batch = vec![input_for(&judge, &config, 0, 0.5, 0.05, 90.0)];
        let decisions = controller.decide_batch(&batch, &BaselineAnchor::new());
        assert_eq!(decisions[0].decision, Decision::Admitted);
        assert_eq!(decisions[0].gate_trace.len(), 4);
        assert!(decisions[0].gate_trace.iter().all(|check| check.passed));
        assert!(decisions[0].reasons.is_empty());
    }

    #[test]
    fn test_hard_fail_wins_over_excellent_score() {
        // Hard ceiling on latency despite an excellent error rate.
        let (controller, judge, config) = controller();
        let batch = vec![input_for(&judge, &config, 0, 0.5, 0.01, 2000.0)];
        let decisions = controller.decide_batch(&batch, &BaselineAnchor::new());
        assert_eq!(decisions[0].decision, Decision::HardFailed);
        assert_eq!(decisions[0].gate_trace.len(), 1);
        assert_eq!(decisions[0].gate_trace[0].gate, GateName::HardConstraint);
        assert!(!decisions[0].reasons.is_empty());
    }

    #[test]
    fn test_score_rejection_truncates_trace() {
        let (controller, judge, config) = controller();
        let batch = vec![input_for(&judge, &config, 0, 0.5, 0.38, 390.0)];
        let decisions = controller.decide_batch(&batch, &BaselineAnchor::new());
        assert_eq!(decisions[0].decision, Decision::ScoreRejected);
        assert_eq!(decisions[0].gate_trace.len(), 2);
        assert!(decisions[0].gate_trace[1].gate == GateName::Score);
        assert!(!decisions[0].gate_trace[1].passed);
    }

    #[test]
    fn test_drift_rejection_names_the_deviation() {
        let (controller, judge, config) = controller();
        // Good score but metrics far from the anchor.
        let batch = vec![input_for(&judge, &config, 0, 0.5, 0.02, 90.0)];
        let baseline = anchor(0.30, 300.0);
        let decisions = controller.decide_batch(&batch, &baseline);
        assert_eq!(decisions[0].decision, Decision::DriftRejected);
        assert_eq!(decisions[0].gate_trace.len(), 3);
        assert!(decisions[0].reasons[0].contains("drift"));
    }

    #[test]
    fn test_empty_baseline_admits_within_tolerance() {
        let (controller, judge, config) = controller();
        let batch = vec![input_for(&judge, &config, 0, 0.5, 0.02, 90.0)];
        let decisions = controller.decide_batch(&batch, &BaselineAnchor::new());
        assert_eq!(decisions[0].decision, Decision::Admitted);
    }

    #[test]
    fn test_identical_params_keep_higher_scorer() {
        let (controller, judge, config) = controller();
        // Same parameters, slightly different measurements.
        let better = input_for(&judge, &config, 3, 0.5, 0.02, 85.0);
        let worse = input_for(&judge, &config, 7, 0.5, 0.06, 110.0);
        let decisions = controller.decide_batch(&[better, worse], &BaselineAnchor::new());
        assert_eq!(decisions[0].decision, Decision::Admitted);
        assert_eq!(decisions[1].decision, Decision::DiversityRejected);
        assert_eq!(decisions[1].gate_trace.len(), 4);
        assert!(!decisions[1].gate_trace[3].passed);
    }

    #[test]
    fn test_rejected_candidates_skip_diversity() {
        let (controller, judge, config) = controller();
        let hard_failed = input_for(&judge, &config, 0, 0.5, 0.7, 90.0);
        let admitted = input_for(&judge, &config, 1, 0.5, 0.02, 90.0);
        let decisions = controller.decide_batch(&[hard_failed, admitted], &BaselineAnchor::new());
        assert_eq!(decisions[0].gate_trace.len(), 1);
        assert_eq!(decisions[1].gate_trace.len(), 4);
    }

    #[test]
    fn test_decisions_are_repeatable() {
        let (controller, judge, config) = controller();
        let batch = vec![
            input_for(&judge, &config, 0, 0.2, 0.05, 100.0),
            input_for(&judge, &config, 1, 0.5, 0.30, 350.0),
            input_for(&judge, &config, 2, 0.8, 0.65, 90.0),
        ];
        let baseline = anchor(0.06, 110.0);
        let first = controller.decide_batch(&batch, &baseline);
        let second = controller.decide_batch(&batch, &baseline);
        assert_eq!(first, second);
    }
}
