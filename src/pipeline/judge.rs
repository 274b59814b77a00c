//! Score normalization and hard-constraint screening.

use std::collections::BTreeMap;

use log::debug;

use crate::schema::{ConfigError, JudgeConfig, MetricJudge, MetricKind, MetricScore, content_sha};

/// Normalizes raw metrics into a weighted combined score in [0, 1].
///
/// Each metric maps through a piecewise-linear curve: nearly flat close
/// to `t_excellent`, a steeper drop toward `t_poor`, then a decay that
/// reaches zero at twice `t_poor`. Hard ceilings are checked
/// independently of the score.
#[derive(Debug, Clone)]
pub struct Judge {
    config: JudgeConfig,
    sha: String,
}

/// Outcome of judging one candidate's raw metrics.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Weighted combined score in [0, 1].
    pub score: f64,
    /// True when any hard ceiling was breached or a judged metric was
    /// missing or non-finite.
    pub hard_fail: bool,
    /// Per-metric contributions.
    pub breakdown: Vec<MetricScore>,
    /// Hard-constraint violations. Empty when `hard_fail` is false.
    pub reasons: Vec<String>,
}

impl Judge {
    /// Create a judge, validating thresholds and hashing the config.
    pub fn new(config: JudgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sha = content_sha(&config)?;
        Ok(Self { config, sha })
    }

    /// Content hash of the judge configuration.
    pub fn sha(&self) -> &str {
        &self.sha
    }

    /// Score one candidate's raw metrics.
    pub fn score(&self, raw_metrics: &BTreeMap<String, f64>) -> Verdict {
        let mut breakdown = Vec::with_capacity(self.config.metrics.len());
        let mut reasons = Vec::new();
        let mut combined = 0.0;

        for metric in &self.config.metrics {
            let raw = raw_metrics.get(&metric.name).copied();
            let Some(raw) = raw.filter(|v| v.is_finite()) else {
                reasons.push(format!("metric {} missing or non-finite", metric.name));
                breakdown.push(MetricScore {
                    name: metric.name.clone(),
                    raw: f64::NAN,
                    score: 0.0,
                    weight: metric.weight,
                    weighted: 0.0,
                });
                continue;
            };

            if let Some(ceiling) = metric.hard_fail {
                let breached = match metric.kind {
                    MetricKind::ErrorLike => raw >= ceiling,
                    MetricKind::LatencyLike => raw > ceiling,
                };
                if breached {
                    reasons.push(format!(
                        "{} = {raw} breaches hard ceiling {ceiling}",
                        metric.name
                    ));
                }
            }

            let score = piecewise(raw, metric);
            combined += score * metric.weight;
            breakdown.push(MetricScore {
                name: metric.name.clone(),
                raw,
                score,
                weight: metric.weight,
                weighted: score * metric.weight,
            });
        }

        let hard_fail = !reasons.is_empty();
        if hard_fail {
            debug!("hard constraint breach: {}", reasons.join("; "));
        }

        Verdict {
            score: combined,
            hard_fail,
            breakdown,
            reasons,
        }
    }
}

/// Piecewise-linear normalization of a lower-is-better raw value.
fn piecewise(raw: f64, metric: &MetricJudge) -> f64 {
    let raw = raw.max(0.0);
    if raw <= metric.t_excellent {
        if metric.t_excellent <= 0.0 {
            return 1.0;
        }
        let t = raw / metric.t_excellent;
        1.0 + (metric.s_excellent - 1.0) * t
    } else if raw <= metric.t_poor {
        let t = (raw - metric.t_excellent) / (metric.t_poor - metric.t_excellent);
        metric.s_excellent + (metric.s_poor - metric.s_excellent) * t
    } else {
        let t = (raw - metric.t_poor) / metric.t_poor;
        (metric.s_poor * (1.0 - t)).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PipelineConfig;

    fn single_metric_judge() -> Judge {
        let config = JudgeConfig {
            metrics: vec![MetricJudge {
                name: "error_rate".into(),
                weight: 1.0,
                kind: MetricKind::ErrorLike,
                t_excellent: 0.1,
                t_poor: 0.4,
                s_excellent: 0.9,
                s_poor: 0.5,
                hard_fail: None,
            }],
        };
        Judge::new(config).unwrap()
    }

    fn score_of(judge: &Judge, raw: f64) -> f64 {
        let mut metrics = BTreeMap::new();
        metrics.insert("error_rate".to_string(), raw);
        judge.score(&metrics).score
    }

    #[test]
    fn test_piecewise_segments() {
        let judge = single_metric_judge();
        assert!((score_of(&judge, 0.0) - 1.0).abs() < 1e-12);
        assert!((score_of(&judge, 0.05) - 0.95).abs() < 1e-12);
        assert!((score_of(&judge, 0.1) - 0.9).abs() < 1e-12);
        assert!((score_of(&judge, 0.25) - 0.7).abs() < 1e-12);
        assert!((score_of(&judge, 0.4) - 0.5).abs() < 1e-12);
        assert!((score_of(&judge, 0.6) - 0.25).abs() < 1e-12);
        assert_eq!(score_of(&judge, 0.8), 0.0);
        assert_eq!(score_of(&judge, 5.0), 0.0);
    }

    #[test]
    fn test_monotone_nonincreasing() {
        let judge = single_metric_judge();
        let mut last = f64::INFINITY;
        for i in 0..200 {
            let score = score_of(&judge, i as f64 * 0.005);
            assert!(score <= last + 1e-12);
            last = score;
        }
    }

    #[test]
    fn test_excellent_region_sits_high() {
        // Scenario: an error rate of 0.18 against a 0.2 excellence
        // threshold should still score above 0.85.
        let config = JudgeConfig {
            metrics: vec![MetricJudge {
                name: "error_rate".into(),
                weight: 1.0,
                kind: MetricKind::ErrorLike,
                t_excellent: 0.2,
                t_poor: 0.5,
                s_excellent: 0.9,
                s_poor: 0.5,
                hard_fail: None,
            }],
        };
        let judge = Judge::new(config).unwrap();
        assert!(score_of(&judge, 0.18) > 0.85);
    }

    #[test]
    fn test_weighted_combination() {
        let config = PipelineConfig::example();
        let judge = Judge::new(config.judge).unwrap();
        let mut metrics = BTreeMap::new();
        metrics.insert("error_rate".to_string(), 0.0);
        metrics.insert("latency_ms".to_string(), 0.0);
        let verdict = judge.score(&metrics);
        assert!((verdict.score - 1.0).abs() < 1e-12);
        assert_eq!(verdict.breakdown.len(), 2);
        let total: f64 = verdict.breakdown.iter().map(|m| m.weighted).sum();
        assert!((total - verdict.score).abs() < 1e-12);
    }

    #[test]
    fn test_hard_ceiling_error_like_inclusive() {
        let config = JudgeConfig {
            metrics: vec![MetricJudge {
                name: "error_rate".into(),
                weight: 1.0,
                kind: MetricKind::ErrorLike,
                t_excellent: 0.1,
                t_poor: 0.4,
                s_excellent: 0.9,
                s_poor: 0.5,
                hard_fail: Some(0.5),
            }],
        };
        let judge = Judge::new(config).unwrap();
        let mut metrics = BTreeMap::new();
        metrics.insert("error_rate".to_string(), 0.5);
        assert!(judge.score(&metrics).hard_fail);
        metrics.insert("error_rate".to_string(), 0.499);
        assert!(!judge.score(&metrics).hard_fail);
    }

    #[test]
    fn test_hard_ceiling_latency_like_exclusive() {
        let config = JudgeConfig {
            metrics: vec![MetricJudge {
                name: "latency_ms".into(),
                weight: 1.0,
                kind: MetricKind::LatencyLike,
                t_excellent: 100.0,
                t_poor: 400.0,
                s_excellent: 0.9,
                s_poor: 0.5,
                hard_fail: Some(1000.0),
            }],
        };
        let judge = Judge::new(config).unwrap();
        let mut metrics = BTreeMap::new();
        metrics.insert("latency_ms".to_string(), 1000.0);
        assert!(!judge.score(&metrics).hard_fail);
        metrics.insert("latency_ms".to_string(), 1000.1);
        assert!(judge.score(&metrics).hard_fail);
    }

    #[test]
    fn test_missing_metric_hard_fails() {
        let judge = single_metric_judge();
        let verdict = judge.score(&BTreeMap::new());
        assert!(verdict.hard_fail);
        assert!(!verdict.reasons.is_empty());
    }

    #[test]
    fn test_nan_metric_hard_fails() {
        let judge = single_metric_judge();
        let mut metrics = BTreeMap::new();
        metrics.insert("error_rate".to_string(), f64::NAN);
        assert!(judge.score(&metrics).hard_fail);
    }

    #[test]
    fn test_sha_tracks_config() {
        let a = single_metric_judge();
        let b = single_metric_judge();
        assert_eq!(a.sha(), b.sha());

        let mut config = JudgeConfig {
            metrics: vec![MetricJudge {
                name: "error_rate".into(),
                weight: 1.0,
                kind: MetricKind::ErrorLike,
                t_excellent: 0.1,
                t_poor: 0.4,
                s_excellent: 0.9,
                s_poor: 0.5,
                hard_fail: None,
            }],
        };
        config.metrics[0].t_excellent = 0.15;
        let changed = Judge::new(config).unwrap();
        assert_ne!(changed.sha(), a.sha());
    }
}
