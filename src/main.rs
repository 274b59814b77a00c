//! Evogate CLI - Run admission-gated searches from JSON configuration.

use std::fs;
use std::time::Instant;

use evogate::{
    evolve::EvolutionEngine,
    pipeline::SimulatedEvaluator,
    schema::PipelineConfig,
    store::LineageStore,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [store_dir]", args[0]);
        eprintln!();
        eprintln!("Run an admission-gated search from JSON configuration,");
        eprintln!("persisting candidate packs under store_dir (default: lineage).");
        eprintln!();
        eprintln!("Other modes:");
        eprintln!("  --example                     Print an example configuration");
        eprintln!("  --compare <store_dir> <run>   Compare a run against its baseline");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    if args[1] == "--compare" {
        if args.len() < 4 {
            eprintln!("Usage: {} --compare <store_dir> <run_id>", args[0]);
            std::process::exit(1);
        }
        run_compare(&args[2], &args[3]);
        return;
    }

    let store_dir = args.get(2).map(String::as_str).unwrap_or("lineage");

    // Load configuration
    let config_str = fs::read_to_string(&args[1]).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });
    let config: PipelineConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    let store = LineageStore::open(store_dir).unwrap_or_else(|e| {
        eprintln!("Error opening store {}: {}", store_dir, e);
        std::process::exit(1);
    });

    println!("Evogate Search");
    println!("==============");
    println!("Parameters: {}", config.params.len());
    println!(
        "Population: {} x {} generations",
        config.population.size, config.population.generations
    );
    println!("Judged metrics: {}", config.judge.metrics.len());
    println!("Store: {}", store_dir);
    println!();

    let evaluator = SimulatedEvaluator::centered_on(&config.params);
    let mut engine = EvolutionEngine::new(config, evaluator, store).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    });

    println!("Running search...");
    let start = Instant::now();
    let summary = engine.run().unwrap_or_else(|e| {
        eprintln!("Run failed: {}", e);
        std::process::exit(1);
    });
    let elapsed = start.elapsed();

    println!();
    println!("Episode {} stopped: {:?}", summary.episode_id, summary.stop_reason);
    for record in &summary.history.generations {
        println!(
            "  gen {:>3}: best={:.4} mean={:.4} admitted={}/{}",
            record.index,
            record.best_score,
            record.mean_score,
            record.admitted,
            record.outcomes.len()
        );
    }
    println!();
    println!(
        "Evaluations: {} ({} admitted)",
        summary.total_evaluations, summary.admitted
    );
    match &summary.best {
        Some(best) => {
            println!(
                "Best admitted: genome {} (run {}) score {:.4}",
                best.genome_id, best.run_id, best.score
            );
            for (name, value) in &best.params {
                println!("  {} = {:.6}", name, value);
            }
        }
        None => println!("No candidate admitted."),
    }
    println!(
        "Time: {:.2}s ({:.1} evaluations/s)",
        elapsed.as_secs_f32(),
        summary.total_evaluations as f32 / elapsed.as_secs_f32().max(1e-6)
    );
}

fn run_compare(store_dir: &str, run_id: &str) {
    let store = LineageStore::open(store_dir).unwrap_or_else(|e| {
        eprintln!("Error opening store {}: {}", store_dir, e);
        std::process::exit(1);
    });
    let comparison = store.compare(run_id).unwrap_or_else(|e| {
        eprintln!("Comparison failed: {}", e);
        std::process::exit(1);
    });

    println!("Run {}", comparison.run_id);
    for (name, value) in &comparison.current {
        match comparison.delta.get(name) {
            Some(delta) => println!("  {}: {:.6} (baseline delta {:+.6})", name, value, delta),
            None => println!("  {}: {:.6} (no baseline)", name, value),
        }
    }
}

fn print_example_config() {
    let config = PipelineConfig::example();
    println!("Example configuration (config.json):");
    println!("{}", serde_json::to_string_pretty(&config).unwrap());
}
