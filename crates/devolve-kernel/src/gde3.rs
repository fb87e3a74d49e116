// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GDE3: generalized differential evolution for multi-objective problems.
//!
//! Each generation builds trial vectors through mutation + binomial
//! crossover, keeps whichever of parent/trial dominates (or both when
//! neither does), and shrinks the grown population back to size by crowding
//! distance. The non-dominated front of the final population is the result.

use rand::Rng;

use crate::error::KernelError;
use crate::pareto;
use crate::traits::{Algorithm, MutationContext, Problem, ProgressSink, Variant};
use crate::types::{DeConfig, ProgressSnapshot, Vector};

/// The GDE3 algorithm.
#[derive(Debug, Default)]
pub struct Gde3;

fn validate(config: &DeConfig) -> Result<(), KernelError> {
    if config.generations == 0 {
        return Err(KernelError::InvalidConfig {
            field: "generations",
            message: "must be at least 1",
        });
    }
    if config.population_size < 4 {
        return Err(KernelError::InvalidConfig {
            field: "population_size",
            message: "must be at least 4",
        });
    }
    if config.dimensions_size < 2 {
        return Err(KernelError::InvalidConfig {
            field: "dimensions_size",
            message: "must be at least 2",
        });
    }
    if config.floor >= config.ceil {
        return Err(KernelError::InvalidConfig {
            field: "floor",
            message: "must be strictly below ceil",
        });
    }
    if !(0.0..=1.0).contains(&config.gde3.cr) {
        return Err(KernelError::InvalidConfig {
            field: "gde3.cr",
            message: "must be within [0, 1]",
        });
    }
    if config.gde3.f <= 0.0 || config.gde3.f > 2.0 {
        return Err(KernelError::InvalidConfig {
            field: "gde3.f",
            message: "must be within (0, 2]",
        });
    }
    Ok(())
}

impl Algorithm for Gde3 {
    fn name(&self) -> &'static str {
        "gde3"
    }

    fn run(
        &self,
        problem: &dyn Problem,
        variant: &dyn Variant,
        config: &DeConfig,
        sink: &mut dyn ProgressSink,
    ) -> Result<Vec<Vector>, KernelError> {
        validate(config)?;

        let mut rng = rand::thread_rng();
        let dims = config.dimensions_size as usize;
        let objectives = config.objectives_size as usize;
        let pop_size = config.population_size as usize;

        // Uniform random initialization over [floor, ceil]^dims
        let mut population: Vec<Vector> = Vec::with_capacity(pop_size);
        for _ in 0..pop_size {
            let elements = (0..dims)
                .map(|_| rng.gen_range(config.floor..=config.ceil))
                .collect();
            let mut vector = Vector::new(elements);
            problem.evaluate(&mut vector, objectives)?;
            population.push(vector);
        }

        for generation in 1..=config.generations {
            let front = pareto::rank_zero(&population);
            let best = front.first().cloned();

            let mut next = Vec::with_capacity(population.len() * 2);
            for target in 0..population.len() {
                let ctx = MutationContext {
                    target,
                    weight: config.gde3.f,
                    dimensions: dims,
                    best: best.as_ref(),
                };
                let mutant = variant.mutate(&mut rng, &population, &ctx)?;

                // Binomial crossover; the lucky index always takes the mutant
                // so the trial never equals its parent.
                let lucky = rng.gen_range(0..dims);
                let mut trial_elements = population[target].elements.clone();
                for d in 0..dims {
                    if d == lucky || rng.r#gen::<f64>() < config.gde3.cr {
                        trial_elements[d] = mutant[d].clamp(config.floor, config.ceil);
                    }
                }
                let mut trial = Vector::new(trial_elements);
                problem.evaluate(&mut trial, objectives)?;

                let parent = &population[target];
                if pareto::dominates(&trial, parent) {
                    next.push(trial);
                } else if pareto::dominates(parent, &trial) {
                    next.push(parent.clone());
                } else {
                    next.push(parent.clone());
                    next.push(trial);
                }
            }

            pareto::reduce_by_crowding_distance(&mut next, pop_size);
            population = next;

            sink.on_generation(ProgressSnapshot {
                current_generation: generation,
                total_generations: config.generations,
                pareto: pareto::rank_zero(&population),
            })?;
        }

        Ok(pareto::rank_zero(&population))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::Zdt1;
    use crate::traits::NoopSink;
    use crate::variants::Rand1;

    fn small_config() -> DeConfig {
        DeConfig {
            executions: 1,
            generations: 10,
            population_size: 20,
            dimensions_size: 10,
            objectives_size: 2,
            floor: 0.0,
            ceil: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_returns_front_within_bounds() {
        let front = Gde3
            .run(&Zdt1, &Rand1, &small_config(), &mut NoopSink)
            .unwrap();
        assert!(!front.is_empty());
        for vector in &front {
            assert_eq!(vector.elements.len(), 10);
            assert_eq!(vector.objectives.len(), 2);
            for x in &vector.elements {
                assert!((0.0..=1.0).contains(x), "element out of bounds: {}", x);
            }
        }
    }

    #[test]
    fn test_front_is_mutually_non_dominated() {
        let front = Gde3
            .run(&Zdt1, &Rand1, &small_config(), &mut NoopSink)
            .unwrap();
        for (i, a) in front.iter().enumerate() {
            for (j, b) in front.iter().enumerate() {
                if i != j {
                    assert!(!pareto::dominates(a, b));
                }
            }
        }
    }

    struct CountingSink {
        generations: Vec<u32>,
        cancel_after: Option<u32>,
    }

    impl ProgressSink for CountingSink {
        fn on_generation(&mut self, snapshot: ProgressSnapshot) -> Result<(), KernelError> {
            self.generations.push(snapshot.current_generation);
            if let Some(limit) = self.cancel_after
                && snapshot.current_generation >= limit
            {
                return Err(KernelError::Cancelled);
            }
            Ok(())
        }
    }

    #[test]
    fn test_sink_sees_generations_in_order() {
        let mut sink = CountingSink {
            generations: vec![],
            cancel_after: None,
        };
        Gde3.run(&Zdt1, &Rand1, &small_config(), &mut sink).unwrap();
        assert_eq!(sink.generations, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancelled_sink_aborts_run() {
        let mut sink = CountingSink {
            generations: vec![],
            cancel_after: Some(3),
        };
        let err = Gde3
            .run(&Zdt1, &Rand1, &small_config(), &mut sink)
            .unwrap_err();
        assert_eq!(err, KernelError::Cancelled);
        assert_eq!(sink.generations.len(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = small_config();
        config.generations = 0;
        assert!(matches!(
            Gde3.run(&Zdt1, &Rand1, &config, &mut NoopSink).unwrap_err(),
            KernelError::InvalidConfig {
                field: "generations",
                ..
            }
        ));

        let mut config = small_config();
        config.floor = 1.0;
        config.ceil = 0.0;
        assert!(Gde3.run(&Zdt1, &Rand1, &config, &mut NoopSink).is_err());

        let mut config = small_config();
        config.gde3.cr = 1.5;
        assert!(Gde3.run(&Zdt1, &Rand1, &config, &mut NoopSink).is_err());
    }
}
