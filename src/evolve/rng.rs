//! Seeded RNG wrapper for genome sampling, crossover, and mutation.

use rand::prelude::*;

use crate::schema::{Genome, ParamKind, ParamSpec};

/// Fraction of a parameter's declared range used as the mutation sigma.
const MUTATION_SIGMA: f64 = 0.1;

/// Random number generator wrapper for genome operations.
pub struct GenomeRng {
    rng: StdRng,
}

impl GenomeRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Sample a genome uniformly within the declared bounds.
    pub fn random_genome(&mut self, id: u64, generation: u32, specs: &[ParamSpec]) -> Genome {
        let params = specs
            .iter()
            .map(|spec| (spec.name.clone(), self.uniform(spec)))
            .collect();
        Genome {
            id,
            generation,
            params,
            parent_ids: Vec::new(),
            fitness: None,
        }
    }

    fn uniform(&mut self, spec: &ParamSpec) -> f64 {
        let value = if spec.min < spec.max {
            self.rng.gen_range(spec.min..=spec.max)
        } else {
            spec.min
        };
        quantize(value, spec)
    }

    /// Uniform crossover: a fair coin per parameter picks the donor.
    pub fn crossover(
        &mut self,
        id: u64,
        generation: u32,
        parent1: &Genome,
        parent2: &Genome,
        specs: &[ParamSpec],
    ) -> Genome {
        let params = specs
            .iter()
            .map(|spec| {
                let donor = if self.rng.gen_bool(0.5) { parent1 } else { parent2 };
                let value = donor.params.get(&spec.name).copied().unwrap_or(spec.min);
                (spec.name.clone(), value)
            })
            .collect();
        Genome {
            id,
            generation,
            params,
            parent_ids: vec![parent1.id, parent2.id],
            fitness: None,
        }
    }

    /// Mutate each parameter with probability `rate`.
    pub fn mutate(&mut self, genome: &mut Genome, rate: f64, specs: &[ParamSpec]) {
        for spec in specs {
            if self.rng.r#gen::<f64>() < rate
                && let Some(value) = genome.params.get_mut(&spec.name)
            {
                *value = self.gaussian_mutate(*value, spec);
            }
        }
    }

    /// Gaussian mutation: noise with sigma at a tenth of the declared
    /// range, clamped back into bounds.
    pub fn gaussian_mutate(&mut self, value: f64, spec: &ParamSpec) -> f64 {
        let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
        let mutated = value + noise * MUTATION_SIGMA * (spec.max - spec.min);
        quantize(mutated.clamp(spec.min, spec.max), spec)
    }

    /// Uniform index into a collection of the given length.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

/// Round integer-typed parameters to whole numbers. Bounds of integer
/// parameters are validated to be integral, so rounding stays in range.
fn quantize(value: f64, spec: &ParamSpec) -> f64 {
    match spec.kind {
        ParamKind::Float => value,
        ParamKind::Int => value.round(),
    }
}
