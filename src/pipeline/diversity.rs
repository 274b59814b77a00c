//! Batch diversity gate.
//!
//! Parameter assignments are quantized into `name#bucket` tokens and
//! sketched with MinHash; pairwise Jaccard similarity is estimated from
//! signature slot agreement. When evaluator transcripts are present,
//! word n-gram overlap guards the output space as well.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};

use log::debug;
use rand::prelude::*;

use crate::schema::{DiversityConfig, ParamSpec};

/// MinHash signature family. Coefficients are fixed by the config seed,
/// never by the engine RNG, so signatures depend on configuration alone.
#[derive(Debug, Clone)]
pub struct MinHasher {
    a: Vec<u64>,
    b: Vec<u64>,
}

impl MinHasher {
    pub fn new(num_hashes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        // Odd multipliers keep the maps bijective on u64.
        let a = (0..num_hashes).map(|_| rng.r#gen::<u64>() | 1).collect();
        let b = (0..num_hashes).map(|_| rng.r#gen::<u64>()).collect();
        Self { a, b }
    }

    /// Signature of a token set: per-slot minimum over the hashed tokens.
    pub fn signature(&self, tokens: &[String]) -> Vec<u64> {
        let hashed: Vec<u64> = tokens
            .iter()
            .map(|token| {
                let mut h = DefaultHasher::new();
                token.hash(&mut h);
                h.finish()
            })
            .collect();

        self.a
            .iter()
            .zip(&self.b)
            .map(|(&a, &b)| {
                hashed
                    .iter()
                    .map(|&h| a.wrapping_mul(h).wrapping_add(b))
                    .min()
                    .unwrap_or(u64::MAX)
            })
            .collect()
    }
}

/// Estimated Jaccard similarity: fraction of agreeing signature slots.
pub fn signature_similarity(a: &[u64], b: &[u64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let matches = a.iter().zip(b).filter(|(x, y)| x == y).count();
    matches as f64 / a.len() as f64
}

/// Discretized `name#bucket` tokens for a parameter assignment.
pub fn param_tokens(
    params: &BTreeMap<String, f64>,
    specs: &[ParamSpec],
    buckets: usize,
) -> Vec<String> {
    specs
        .iter()
        .filter_map(|spec| {
            let value = params.get(&spec.name)?;
            let range = spec.max - spec.min;
            let bucket = if range <= 0.0 || buckets < 2 {
                0
            } else {
                let t = ((value - spec.min) / range).clamp(0.0, 1.0);
                ((t * buckets as f64) as usize).min(buckets - 1)
            };
            Some(format!("{}#{bucket}", spec.name))
        })
        .collect()
}

/// Lowercased word n-grams of a transcript. Falls back to single words
/// when the text is shorter than `n`.
fn ngrams(text: &str, n: usize) -> BTreeSet<String> {
    let words: Vec<String> = text.split_whitespace().map(|w| w.to_lowercase()).collect();
    if words.len() < n.max(1) {
        return words.into_iter().collect();
    }
    words.windows(n.max(1)).map(|w| w.join(" ")).collect()
}

/// Mean fraction of each transcript's n-grams shared with its siblings.
/// `None` when fewer than two transcripts carry any content.
pub fn ngram_overlap(transcripts: &[&str], n: usize) -> Option<f64> {
    if transcripts.len() < 2 {
        return None;
    }
    let grams: Vec<BTreeSet<String>> = transcripts.iter().map(|t| ngrams(t, n)).collect();
    let mut total = 0.0;
    let mut counted = 0usize;
    for (i, own) in grams.iter().enumerate() {
        if own.is_empty() {
            continue;
        }
        let shared = own
            .iter()
            .filter(|gram| {
                grams
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && other.contains(*gram))
            })
            .count();
        total += shared as f64 / own.len() as f64;
        counted += 1;
    }
    if counted < 2 {
        None
    } else {
        Some(total / counted as f64)
    }
}

/// One candidate's view for the batch diversity check.
#[derive(Debug, Clone)]
pub struct BatchMember {
    pub genome_id: u64,
    pub score: f64,
    pub tokens: Vec<String>,
    pub transcript: Option<String>,
}

/// Result of filtering a batch.
#[derive(Debug, Clone)]
pub struct BatchVerdict {
    /// One minus mean pairwise similarity, taking the lower of the
    /// parameter-space and output-space readings when both exist.
    pub batch_diversity: f64,
    /// Genome ids rejected as near-duplicates, ascending.
    pub rejected: Vec<u64>,
}

/// Diversity gate over a batch of admissible candidates.
#[derive(Debug, Clone)]
pub struct DiversityGate {
    config: DiversityConfig,
    hasher: MinHasher,
}

impl DiversityGate {
    pub fn new(config: DiversityConfig) -> Self {
        let hasher = MinHasher::new(config.num_hashes, config.signature_seed);
        Self { config, hasher }
    }

    /// Collapse near-duplicate clusters, keeping each cluster's top
    /// scorer.
    ///
    /// Pairs whose estimated dissimilarity falls under `diversity_tau`
    /// are near-duplicates; clusters form transitively and every member
    /// but the best scorer is rejected. If the whole batch is
    /// homogeneous without any pairwise cluster (identical transcripts
    /// over distinct parameters, for instance), only the single best
    /// candidate survives.
    pub fn filter_batch(&self, members: &[BatchMember]) -> BatchVerdict {
        if members.len() < 2 {
            return BatchVerdict {
                batch_diversity: 1.0,
                rejected: Vec::new(),
            };
        }

        let signatures: Vec<Vec<u64>> = members
            .iter()
            .map(|m| self.hasher.signature(&m.tokens))
            .collect();

        let n = members.len();
        let mut parent: Vec<usize> = (0..n).collect();
        let mut sim_sum = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let sim = signature_similarity(&signatures[i], &signatures[j]);
                sim_sum += sim;
                if 1.0 - sim < self.config.diversity_tau {
                    union(&mut parent, i, j);
                }
            }
        }
        let pairs = (n * (n - 1) / 2) as f64;
        let param_diversity = 1.0 - sim_sum / pairs;

        let transcripts: Vec<&str> = members
            .iter()
            .filter_map(|m| m.transcript.as_deref())
            .collect();
        let output_diversity =
            ngram_overlap(&transcripts, self.config.ngram).map(|overlap| 1.0 - overlap);

        let batch_diversity = match output_diversity {
            Some(od) => param_diversity.min(od),
            None => param_diversity,
        };

        // Keep the best member of each cluster.
        let mut rejected = Vec::new();
        let mut best: HashMap<usize, usize> = HashMap::new();
        for i in 0..n {
            let root = find(&mut parent, i);
            match best.get(&root).copied() {
                Some(current) => {
                    if prefer(&members[i], &members[current]) {
                        rejected.push(members[current].genome_id);
                        best.insert(root, i);
                    } else {
                        rejected.push(members[i].genome_id);
                    }
                }
                None => {
                    best.insert(root, i);
                }
            }
        }

        // Homogeneous batch with no pairwise cluster: collapse to the
        // single best candidate.
        if rejected.is_empty() && batch_diversity < self.config.diversity_tau {
            let mut keep = 0usize;
            for i in 1..n {
                if prefer(&members[i], &members[keep]) {
                    keep = i;
                }
            }
            for (i, member) in members.iter().enumerate() {
                if i != keep {
                    rejected.push(member.genome_id);
                }
            }
            debug!(
                "batch diversity {batch_diversity:.4} under tolerance; collapsing to genome {}",
                members[keep].genome_id
            );
        }

        rejected.sort_unstable();
        BatchVerdict {
            batch_diversity,
            rejected,
        }
    }
}

/// Ranking within a cluster: score first, lowest genome id on ties.
fn prefer(a: &BatchMember, b: &BatchMember) -> bool {
    match a.score.partial_cmp(&b.score) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Less) => false,
        _ => a.genome_id < b.genome_id,
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(pairs: &[(&str, usize)]) -> Vec<String> {
        pairs.iter().map(|(n, b)| format!("{n}#{b}")).collect()
    }

    fn member(genome_id: u64, score: f64, tokens: Vec<String>) -> BatchMember {
        BatchMember {
            genome_id,
            score,
            tokens,
            transcript: None,
        }
    }

    #[test]
    fn test_identical_tokens_fully_similar() {
        let hasher = MinHasher::new(128, 7);
        let t = tokens(&[("a", 3), ("b", 10), ("c", 0)]);
        let s1 = hasher.signature(&t);
        let s2 = hasher.signature(&t);
        assert_eq!(signature_similarity(&s1, &s2), 1.0);
    }

    #[test]
    fn test_disjoint_tokens_dissimilar() {
        let hasher = MinHasher::new(128, 7);
        let s1 = hasher.signature(&tokens(&[("a", 1), ("b", 2), ("c", 3)]));
        let s2 = hasher.signature(&tokens(&[("a", 40), ("b", 50), ("c", 60)]));
        assert!(signature_similarity(&s1, &s2) < 0.2);
    }

    #[test]
    fn test_signatures_depend_on_seed_only() {
        let t = tokens(&[("a", 3), ("b", 10)]);
        let s1 = MinHasher::new(64, 99).signature(&t);
        let s2 = MinHasher::new(64, 99).signature(&t);
        let s3 = MinHasher::new(64, 100).signature(&t);
        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
    }

    #[test]
    fn test_param_tokens_quantize() {
        let specs = vec![crate::schema::ParamSpec {
            name: "x".into(),
            min: 0.0,
            max: 1.0,
            kind: crate::schema::ParamKind::Float,
        }];
        let mut low = BTreeMap::new();
        low.insert("x".to_string(), 0.0);
        let mut high = BTreeMap::new();
        high.insert("x".to_string(), 1.0);
        let mut near_low = BTreeMap::new();
        near_low.insert("x".to_string(), 0.003);

        assert_ne!(param_tokens(&low, &specs, 64), param_tokens(&high, &specs, 64));
        assert_eq!(
            param_tokens(&low, &specs, 64),
            param_tokens(&near_low, &specs, 64)
        );
    }

    #[test]
    fn test_singleton_batch_passes() {
        let gate = DiversityGate::new(DiversityConfig::default());
        let batch = vec![member(0, 0.9, tokens(&[("a", 1)]))];
        let verdict = gate.filter_batch(&batch);
        assert_eq!(verdict.batch_diversity, 1.0);
        assert!(verdict.rejected.is_empty());
    }

    #[test]
    fn test_duplicate_pair_keeps_higher_scorer() {
        let gate = DiversityGate::new(DiversityConfig::default());
        let t = tokens(&[("a", 3), ("b", 10), ("c", 0)]);
        let batch = vec![member(0, 0.80, t.clone()), member(1, 0.90, t)];
        let verdict = gate.filter_batch(&batch);
        assert_eq!(verdict.rejected, vec![0]);
    }

    #[test]
    fn test_duplicate_tie_keeps_lowest_id() {
        let gate = DiversityGate::new(DiversityConfig::default());
        let t = tokens(&[("a", 3), ("b", 10), ("c", 0)]);
        let batch = vec![member(4, 0.85, t.clone()), member(9, 0.85, t)];
        let verdict = gate.filter_batch(&batch);
        assert_eq!(verdict.rejected, vec![9]);
    }

    #[test]
    fn test_collapse_spares_the_distinct_member() {
        // Four identical candidates and one distinct: the duplicates
        // collapse to their best scorer, the distinct one survives.
        let gate = DiversityGate::new(DiversityConfig::default());
        let dupe = tokens(&[("a", 3), ("b", 10), ("c", 0)]);
        let distinct = tokens(&[("a", 40), ("b", 55), ("c", 62)]);
        let batch = vec![
            member(0, 0.80, dupe.clone()),
            member(1, 0.84, dupe.clone()),
            member(2, 0.91, dupe.clone()),
            member(3, 0.82, dupe),
            member(4, 0.79, distinct),
        ];
        let verdict = gate.filter_batch(&batch);
        assert_eq!(verdict.rejected, vec![0, 1, 3]);
    }

    #[test]
    fn test_fully_homogeneous_batch_keeps_single_best() {
        let gate = DiversityGate::new(DiversityConfig::default());
        let t = tokens(&[("a", 3), ("b", 10)]);
        let batch = vec![
            member(0, 0.80, t.clone()),
            member(1, 0.95, t.clone()),
            member(2, 0.85, t),
        ];
        let verdict = gate.filter_batch(&batch);
        assert_eq!(verdict.rejected, vec![0, 2]);
    }

    #[test]
    fn test_output_collapse_keeps_single_best() {
        // Distinct parameters but identical transcripts: the output
        // space is degenerate, so the batch collapses.
        let gate = DiversityGate::new(DiversityConfig::default());
        let transcript = Some("the plan converged to the same answer".to_string());
        let batch = vec![
            BatchMember {
                genome_id: 0,
                score: 0.81,
                tokens: tokens(&[("a", 1), ("b", 2)]),
                transcript: transcript.clone(),
            },
            BatchMember {
                genome_id: 1,
                score: 0.92,
                tokens: tokens(&[("a", 30), ("b", 44)]),
                transcript: transcript.clone(),
            },
            BatchMember {
                genome_id: 2,
                score: 0.86,
                tokens: tokens(&[("a", 60), ("b", 12)]),
                transcript,
            },
        ];
        let verdict = gate.filter_batch(&batch);
        assert!(verdict.batch_diversity < 0.2);
        assert_eq!(verdict.rejected, vec![0, 2]);
    }

    #[test]
    fn test_distinct_batch_unfiltered() {
        let gate = DiversityGate::new(DiversityConfig::default());
        let batch = vec![
            member(0, 0.80, tokens(&[("a", 1), ("b", 2), ("c", 3)])),
            member(1, 0.85, tokens(&[("a", 20), ("b", 31), ("c", 42)])),
            member(2, 0.90, tokens(&[("a", 55), ("b", 8), ("c", 61)])),
        ];
        let verdict = gate.filter_batch(&batch);
        assert!(verdict.rejected.is_empty());
        assert!(verdict.batch_diversity > 0.5);
    }

    #[test]
    fn test_ngram_overlap_bounds() {
        let same = "alpha beta gamma delta";
        let overlap = ngram_overlap(&[same, same], 2).unwrap();
        assert!((overlap - 1.0).abs() < 1e-12);

        let other = "epsilon zeta eta theta";
        let overlap = ngram_overlap(&[same, other], 2).unwrap();
        assert_eq!(overlap, 0.0);
    }

    #[test]
    fn test_ngram_overlap_needs_two_transcripts() {
        assert!(ngram_overlap(&["alpha beta"], 2).is_none());
        assert!(ngram_overlap(&[], 2).is_none());
    }
}
