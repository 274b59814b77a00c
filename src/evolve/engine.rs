//! Search engine: the generation loop around the admission pipeline.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::Utc;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::pipeline::{AdmissionController, EvalError, Evaluation, Evaluator, GateInput, Judge};
use crate::schema::{
    BaselineAnchor, BestCandidate, CandidatePack, ConfigError, Decision, EvaluationResult,
    GenerationHistory, GenerationRecord, GeneticConfig, Genome, GenomeOutcome, ParamKind,
    ParamSpec, PipelineConfig, PopulationConfig, RunSummary, ScoredCandidate, SearchStrategy,
    StopReason, SweepConfig, content_sha,
};
use crate::store::{LineageStore, StoreError};

use super::rng::GenomeRng;

/// A candidate individual tracked by the engine.
///
/// Evaluation, judging, and gating each happen at most once per
/// candidate; elites carry their fields unchanged into later
/// generations.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The genome, carrying its fitness once judged.
    pub genome: Genome,
    /// Pack key, assigned at evaluation time.
    pub run_id: Option<String>,
    /// Measurement record from the evaluator.
    pub result: Option<EvaluationResult>,
    /// Terminal gate decision.
    pub decision: Option<Decision>,
    /// Evaluator failure, mutually exclusive with a result.
    pub error: Option<String>,
}

impl Candidate {
    fn fresh(genome: Genome) -> Self {
        Self {
            genome,
            run_id: None,
            result: None,
            decision: None,
            error: None,
        }
    }
}

/// Everything that determines which genomes the generator will propose.
#[derive(Serialize)]
struct GeneratorFingerprint<'a> {
    params: &'a [ParamSpec],
    search: &'a SearchStrategy,
    population: &'a PopulationConfig,
}

/// Admission-gated search engine.
///
/// Each generation is evaluated in parallel, judged, run through the
/// admission gates, and persisted to the lineage store before the next
/// generation is bred.
pub struct EvolutionEngine<E> {
    config: PipelineConfig,
    episode_id: String,
    generator_sha: String,
    rng: GenomeRng,
    evaluator: E,
    judge: Judge,
    controller: AdmissionController,
    store: LineageStore,
    baseline: BaselineAnchor,
    population: Vec<Candidate>,
    history: GenerationHistory,
    generation: u32,
    next_id: u64,
    sweep_cursor: usize,
    calm_generations: usize,
    total_evaluations: u64,
    admitted_total: usize,
}

impl<E: Evaluator> EvolutionEngine<E> {
    /// Create an engine, validating the configuration up front.
    pub fn new(config: PipelineConfig, evaluator: E, store: LineageStore) -> Result<Self, ConfigError> {
        config.validate()?;
        let judge = Judge::new(config.judge.clone())?;
        let generator_sha = content_sha(&GeneratorFingerprint {
            params: &config.params,
            search: &config.search,
            population: &config.population,
        })?;
        let seed = config.random_seed.unwrap_or_else(rand::random);
        let episode_id = config
            .episode_id
            .clone()
            .unwrap_or_else(|| format!("ep-{seed:016x}"));
        let controller = AdmissionController::new(&config);

        Ok(Self {
            episode_id,
            generator_sha,
            rng: GenomeRng::new(seed),
            evaluator,
            judge,
            controller,
            store,
            baseline: BaselineAnchor::new(),
            population: Vec::new(),
            history: GenerationHistory::default(),
            generation: 0,
            next_id: 0,
            sweep_cursor: 0,
            calm_generations: 0,
            total_evaluations: 0,
            admitted_total: 0,
            config,
        })
    }

    /// Run the search until a stop criterion fires.
    pub fn run(&mut self) -> Result<RunSummary, StoreError> {
        self.baseline = self.store.load_baseline()?;
        info!(
            "episode {} starting: {} params, population {}, budget {} generations, {} baseline anchor(s)",
            self.episode_id,
            self.config.params.len(),
            self.config.population.size,
            self.config.population.generations,
            self.baseline.len()
        );

        self.populate_initial();

        let stop_reason = loop {
            self.evaluate_generation();
            self.gate_generation()?;
            self.record_generation();

            if let Some(reason) = self.should_stop() {
                break reason;
            }
            if !self.advance_population() {
                break StopReason::SweepExhausted;
            }
            self.generation += 1;
        };

        self.store.snapshot_baseline(&self.episode_id, &self.baseline)?;
        info!(
            "episode {} stopped ({:?}): {} generation(s), {} evaluation(s), {} admitted",
            self.episode_id,
            stop_reason,
            self.history.generations.len(),
            self.total_evaluations,
            self.admitted_total
        );

        Ok(self.summarize(stop_reason))
    }

    /// Baseline anchor as of the latest gated generation.
    pub fn baseline(&self) -> &BaselineAnchor {
        &self.baseline
    }

    /// Episode identifier.
    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    /// Per-generation history so far.
    pub fn history(&self) -> &GenerationHistory {
        &self.history
    }

    fn populate_initial(&mut self) {
        self.population.clear();
        self.history = GenerationHistory::default();
        self.generation = 0;
        self.sweep_cursor = 0;
        self.calm_generations = 0;

        match self.config.search.clone() {
            SearchStrategy::Genetic(_) => {
                for _ in 0..self.config.population.size {
                    let id = self.next_id;
                    self.next_id += 1;
                    let genome = self.rng.random_genome(id, 0, &self.config.params);
                    self.population.push(Candidate::fresh(genome));
                }
            }
            SearchStrategy::GridSweep(sweep) => {
                self.population = self.next_sweep_slice(&sweep, 0);
            }
        }
    }

    /// Evaluate every candidate that has no measurement yet. Failures
    /// are recorded on the candidate and do not stop the generation.
    fn evaluate_generation(&mut self) {
        let pending: Vec<usize> = self
            .population
            .iter()
            .enumerate()
            .filter(|(_, c)| c.result.is_none() && c.error.is_none())
            .map(|(i, _)| i)
            .collect();

        let evaluator = &self.evaluator;
        let population = &self.population;
        let results: Vec<(usize, Result<Evaluation, EvalError>)> = pending
            .par_iter()
            .map(|&i| (i, evaluator.evaluate(&population[i].genome.params)))
            .collect();

        for (i, result) in results {
            self.total_evaluations += 1;
            let genome_id = self.population[i].genome.id;
            let run_id = format!(
                "{}-g{}-c{}",
                self.episode_id, self.population[i].genome.generation, genome_id
            );
            let candidate = &mut self.population[i];
            match result {
                Ok(evaluation) => {
                    candidate.run_id = Some(run_id);
                    candidate.result = Some(EvaluationResult {
                        genome_id,
                        raw_metrics: evaluation.metrics,
                        transcript: evaluation.transcript,
                        timestamp: Utc::now(),
                    });
                }
                Err(err) => {
                    warn!("genome {genome_id} evaluation failed: {err}");
                    candidate.error = Some(err.to_string());
                }
            }
        }
    }

    /// Judge, gate, persist, and fold admissions into the baseline.
    fn gate_generation(&mut self) -> Result<(), StoreError> {
        let mut gated: Vec<usize> = Vec::new();
        let mut batch: Vec<GateInput> = Vec::new();
        for (i, candidate) in self.population.iter().enumerate() {
            if candidate.decision.is_some() || candidate.error.is_some() {
                continue;
            }
            let Some(result) = &candidate.result else {
                continue;
            };
            let verdict = self.judge.score(&result.raw_metrics);
            gated.push(i);
            batch.push(GateInput {
                scored: ScoredCandidate {
                    genome_id: candidate.genome.id,
                    run_id: candidate.run_id.clone().unwrap_or_default(),
                    normalized_score: verdict.score,
                    metric_breakdown: verdict.breakdown,
                    judge_version: self.judge.sha().to_string(),
                },
                params: candidate.genome.params.clone(),
                raw_metrics: result.raw_metrics.clone(),
                hard_fail: verdict.hard_fail,
                hard_reasons: verdict.reasons,
                transcript: result.transcript.clone(),
            });
        }

        // Fitness lands on the genome before gating, so rejected
        // candidates still rank in the breeding pool.
        for (k, &i) in gated.iter().enumerate() {
            self.population[i].genome.fitness = Some(batch[k].scored.normalized_score);
        }

        let decisions = self.controller.decide_batch(&batch, &self.baseline);

        let mut admitted = Vec::new();
        for (k, &i) in gated.iter().enumerate() {
            let decision = &decisions[k];
            self.population[i].decision = Some(decision.decision);
            if decision.decision != Decision::Admitted {
                debug!(
                    "genome {} {:?}: {}",
                    decision.candidate_id,
                    decision.decision,
                    decision.reasons.join("; ")
                );
            }

            let candidate = &self.population[i];
            let pack = CandidatePack {
                run_id: batch[k].scored.run_id.clone(),
                episode_id: self.episode_id.clone(),
                generation: candidate.genome.generation,
                genome_id: candidate.genome.id,
                parent_ids: candidate.genome.parent_ids.clone(),
                params: candidate.genome.params.clone(),
                raw_metrics: batch[k].raw_metrics.clone(),
                normalized_score: batch[k].scored.normalized_score,
                gate_trace: decision.gate_trace.clone(),
                decision: decision.decision,
                generator_sha: self.generator_sha.clone(),
                judge_sha: batch[k].scored.judge_version.clone(),
                timestamp: Utc::now(),
            };

            // A conflicting write loses this pack but never the run.
            match self.store.persist(&pack) {
                Ok(()) => {}
                Err(StoreError::Conflict { run_id }) => {
                    error!("lineage conflict for {run_id}; decision kept, write skipped");
                }
                Err(err) => return Err(err),
            }

            if decision.decision == Decision::Admitted {
                admitted.push(pack);
            }
        }

        // The anchor moves per admission, in ascending genome id.
        admitted.sort_by_key(|pack| pack.genome_id);
        for pack in &admitted {
            self.controller.absorb_admitted(&mut self.baseline, pack);
            self.store.save_baseline(&self.baseline)?;
        }
        self.admitted_total += admitted.len();

        Ok(())
    }

    /// Append the full outcome of the current generation to the history.
    fn record_generation(&mut self) {
        let outcomes: Vec<GenomeOutcome> = self
            .population
            .iter()
            .map(|c| GenomeOutcome {
                genome: c.genome.clone(),
                run_id: c.run_id.clone(),
                decision: c.decision,
                error: c.error.clone(),
            })
            .collect();

        let scores: Vec<f64> = self
            .population
            .iter()
            .filter_map(|c| c.genome.fitness)
            .collect();
        let (best, mean, variance) = score_stats(&scores);
        let admitted = self
            .population
            .iter()
            .filter(|c| c.decision == Some(Decision::Admitted))
            .count();

        if scores.len() >= 2 && variance < self.config.population.convergence_epsilon {
            self.calm_generations += 1;
        } else {
            self.calm_generations = 0;
        }

        info!(
            "generation {}: best {:.4}, mean {:.4}, admitted {}/{}",
            self.generation,
            best,
            mean,
            admitted,
            self.population.len()
        );

        self.history.generations.push(GenerationRecord {
            index: self.generation,
            outcomes,
            best_score: best,
            mean_score: mean,
            score_variance: variance,
            admitted,
        });
    }

    fn should_stop(&self) -> Option<StopReason> {
        if (self.generation as usize) + 1 >= self.config.population.generations {
            return Some(StopReason::MaxGenerations);
        }
        if self.calm_generations >= self.config.population.convergence_patience {
            return Some(StopReason::Converged);
        }
        None
    }

    /// Build the next generation. Returns false when a sweep has
    /// consumed its lattice.
    fn advance_population(&mut self) -> bool {
        match self.config.search.clone() {
            SearchStrategy::Genetic(genetic) => {
                self.step_genetic(&genetic);
                true
            }
            SearchStrategy::GridSweep(sweep) => {
                let slice = self.next_sweep_slice(&sweep, self.generation + 1);
                if slice.is_empty() {
                    return false;
                }
                self.population = slice;
                true
            }
        }
    }

    fn step_genetic(&mut self, genetic: &GeneticConfig) {
        let mut ranked: Vec<usize> = (0..self.population.len())
            .filter(|&i| self.population[i].genome.fitness.is_some())
            .collect();
        ranked.sort_by(|&a, &b| self.rank_order(a, b));

        let next_generation = self.generation + 1;
        let mut next: Vec<Candidate> = Vec::with_capacity(self.config.population.size);

        // Elites come from admitted candidates only; a generation with
        // no admissions carries nothing forward.
        let elites: Vec<usize> = ranked
            .iter()
            .copied()
            .filter(|&i| self.population[i].decision == Some(Decision::Admitted))
            .take(genetic.elite_count)
            .collect();
        for &i in &elites {
            next.push(self.population[i].clone());
        }

        while next.len() < self.config.population.size {
            if ranked.is_empty() {
                // Nothing scored this generation; resample.
                let id = self.next_id;
                self.next_id += 1;
                let genome = self.rng.random_genome(id, next_generation, &self.config.params);
                next.push(Candidate::fresh(genome));
                continue;
            }

            let p1 = self.tournament(&ranked, genetic.tournament_size);
            let p2 = self.tournament(&ranked, genetic.tournament_size);
            let id = self.next_id;
            self.next_id += 1;
            let mut child = self.rng.crossover(
                id,
                next_generation,
                &self.population[p1].genome,
                &self.population[p2].genome,
                &self.config.params,
            );
            self.rng.mutate(&mut child, genetic.mutation_rate, &self.config.params);
            next.push(Candidate::fresh(child));
        }

        self.population = next;
    }

    /// Tournament selection over ranked indices: sample k, keep the
    /// best-ranked.
    fn tournament(&mut self, ranked: &[usize], size: usize) -> usize {
        let mut best: Option<usize> = None;
        for _ in 0..size.max(1) {
            let pick = ranked[self.rng.index(ranked.len())];
            best = match best {
                None => Some(pick),
                Some(current) => {
                    if self.rank_order(pick, current) == Ordering::Less {
                        Some(pick)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best.unwrap_or(0)
    }

    /// Ranking comparator over population indices: score descending,
    /// tie-break metric ascending, genome id ascending.
    fn rank_order(&self, a: usize, b: usize) -> Ordering {
        let ca = &self.population[a];
        let cb = &self.population[b];
        let fa = ca.genome.fitness.unwrap_or(f64::NEG_INFINITY);
        let fb = cb.genome.fitness.unwrap_or(f64::NEG_INFINITY);
        match fb.partial_cmp(&fa) {
            Some(Ordering::Equal) | None => {}
            Some(order) => return order,
        }
        if let Some(metric) = &self.config.admission.tie_break_metric {
            let ta = ca
                .result
                .as_ref()
                .and_then(|r| r.raw_metrics.get(metric))
                .copied()
                .unwrap_or(f64::INFINITY);
            let tb = cb
                .result
                .as_ref()
                .and_then(|r| r.raw_metrics.get(metric))
                .copied()
                .unwrap_or(f64::INFINITY);
            match ta.partial_cmp(&tb) {
                Some(Ordering::Equal) | None => {}
                Some(order) => return order,
            }
        }
        ca.genome.id.cmp(&cb.genome.id)
    }

    /// Next population-sized slice of the sweep lattice. Empty when the
    /// lattice is exhausted.
    fn next_sweep_slice(&mut self, sweep: &SweepConfig, generation: u32) -> Vec<Candidate> {
        let axes = self.config.params.len() as u32;
        let total = sweep.points_per_param.checked_pow(axes).unwrap_or(usize::MAX);
        let mut slice = Vec::new();
        while slice.len() < self.config.population.size && self.sweep_cursor < total {
            let genome = self.lattice_genome(self.sweep_cursor, sweep.points_per_param, generation);
            self.sweep_cursor += 1;
            slice.push(Candidate::fresh(genome));
        }
        slice
    }

    /// Genome at one lattice index, decoded in mixed radix over the
    /// parameter axes.
    fn lattice_genome(&mut self, index: usize, points: usize, generation: u32) -> Genome {
        let mut rest = index;
        let mut params = BTreeMap::new();
        for spec in &self.config.params {
            let step = rest % points;
            rest /= points;
            let t = if points > 1 {
                step as f64 / (points - 1) as f64
            } else {
                0.5
            };
            let mut value = spec.min + t * (spec.max - spec.min);
            if spec.kind == ParamKind::Int {
                value = value.round();
            }
            params.insert(spec.name.clone(), value);
        }
        let id = self.next_id;
        self.next_id += 1;
        Genome {
            id,
            generation,
            params,
            parent_ids: Vec::new(),
            fitness: None,
        }
    }

    fn summarize(&self, stop_reason: StopReason) -> RunSummary {
        let mut best: Option<BestCandidate> = None;
        for record in &self.history.generations {
            for outcome in &record.outcomes {
                if outcome.decision != Some(Decision::Admitted) {
                    continue;
                }
                let Some(score) = outcome.genome.fitness else {
                    continue;
                };
                let better = match &best {
                    None => true,
                    Some(b) => {
                        score > b.score || (score == b.score && outcome.genome.id < b.genome_id)
                    }
                };
                if better {
                    best = Some(BestCandidate {
                        genome_id: outcome.genome.id,
                        run_id: outcome.run_id.clone().unwrap_or_default(),
                        score,
                        params: outcome.genome.params.clone(),
                    });
                }
            }
        }

        RunSummary {
            episode_id: self.episode_id.clone(),
            generator_sha: self.generator_sha.clone(),
            judge_sha: self.judge.sha().to_string(),
            stop_reason,
            generations: self.history.generations.len() as u32,
            total_evaluations: self.total_evaluations,
            admitted: self.admitted_total,
            best,
            history: self.history.clone(),
        }
    }
}

/// Best, mean, and variance of a score slice. Zeroes when empty.
fn score_stats(scores: &[f64]) -> (f64, f64, f64) {
    if scores.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let best = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
    (best, mean, variance)
}
