//! Quick search throughput test

use std::time::Instant;

use evogate::{
    evolve::EvolutionEngine,
    pipeline::SimulatedEvaluator,
    schema::{ParamKind, ParamSpec, PipelineConfig},
    store::LineageStore,
};

fn main() {
    println!("=== Search Performance Test ===\n");

    // Test different population sizes
    for population in [8, 16, 32, 64] {
        let mut config = PipelineConfig::example();
        config.population.size = population;
        config.population.generations = 10;
        config.random_seed = Some(42);
        config.episode_id = Some(format!("perf-pop{}", population));

        println!("Population: {}", population);
        let (summary, elapsed) = run_once(config);

        let evals_per_sec = summary.total_evaluations as f64 / elapsed.max(1e-9);
        println!("  Generations:    {}", summary.generations);
        println!("  Evaluations:    {}", summary.total_evaluations);
        println!("  Admitted:       {}", summary.admitted);
        println!("  Elapsed:        {:.2}s", elapsed);
        println!("  Evals/sec:      {:.1}", evals_per_sec);
        match &summary.best {
            Some(best) => println!("  Best score:     {:.4}", best.score),
            None => println!("  Best score:     n/a"),
        }
        println!();
    }

    println!("=== Scalability Test (fixed population of 16) ===\n");

    // Test different search space widths
    for num_params in [2, 4, 8, 16] {
        let mut config = PipelineConfig::example();
        config.params = (0..num_params)
            .map(|i| ParamSpec {
                name: format!("p{}", i),
                min: 0.0,
                max: 1.0,
                kind: ParamKind::Float,
            })
            .collect();
        config.population.size = 16;
        config.population.generations = 5;
        config.random_seed = Some(42);
        config.episode_id = Some(format!("perf-dim{}", num_params));

        let (summary, elapsed) = run_once(config);

        let evals_per_sec = summary.total_evaluations as f64 / elapsed.max(1e-9);
        println!(
            "{} params: {} evals in {:.2}s ({:.1} evals/sec, best {:.4})",
            num_params,
            summary.total_evaluations,
            elapsed,
            evals_per_sec,
            summary.best.as_ref().map(|b| b.score).unwrap_or(f64::NAN)
        );
    }
}

fn run_once(config: PipelineConfig) -> (evogate::schema::RunSummary, f64) {
    let dir = tempfile::tempdir().unwrap();
    let store = LineageStore::open(dir.path()).unwrap();
    let evaluator = SimulatedEvaluator::centered_on(&config.params);

    let start = Instant::now();
    let mut engine = EvolutionEngine::new(config, evaluator, store).unwrap();
    let summary = engine.run().unwrap();
    (summary, start.elapsed().as_secs_f64())
}
