// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DE mutation variants.

use rand::{Rng, RngCore};

use crate::error::KernelError;
use crate::traits::{MutationContext, Variant};
use crate::types::Vector;

/// Draw `count` distinct indices from `0..len`, all different from
/// `exclude`.
fn distinct_indices(
    rng: &mut dyn RngCore,
    len: usize,
    exclude: usize,
    count: usize,
) -> Result<Vec<usize>, KernelError> {
    if len <= count {
        return Err(KernelError::InvalidConfig {
            field: "population_size",
            message: "too small for the selected mutation variant",
        });
    }
    let mut picked = Vec::with_capacity(count);
    while picked.len() < count {
        let candidate = rng.gen_range(0..len);
        if candidate != exclude && !picked.contains(&candidate) {
            picked.push(candidate);
        }
    }
    Ok(picked)
}

/// DE/rand/1: `a + F * (b - c)` with three distinct random members.
#[derive(Debug, Default)]
pub struct Rand1;

impl Variant for Rand1 {
    fn name(&self) -> &'static str {
        "rand1"
    }

    fn description(&self) -> &'static str {
        "rand/1 mutation: a + F*(b - c) over three distinct random members"
    }

    fn mutate(
        &self,
        rng: &mut dyn RngCore,
        population: &[Vector],
        ctx: &MutationContext<'_>,
    ) -> Result<Vec<f64>, KernelError> {
        let idx = distinct_indices(rng, population.len(), ctx.target, 3)?;
        let (a, b, c) = (&population[idx[0]], &population[idx[1]], &population[idx[2]]);

        let mut mutant = Vec::with_capacity(ctx.dimensions);
        for d in 0..ctx.dimensions {
            mutant.push(a.elements[d] + ctx.weight * (b.elements[d] - c.elements[d]));
        }
        Ok(mutant)
    }
}

/// DE/best/1: `best + F * (a - b)` anchored on the current best member.
#[derive(Debug, Default)]
pub struct Best1;

impl Variant for Best1 {
    fn name(&self) -> &'static str {
        "best1"
    }

    fn description(&self) -> &'static str {
        "best/1 mutation: best + F*(a - b) anchored on the current front"
    }

    fn mutate(
        &self,
        rng: &mut dyn RngCore,
        population: &[Vector],
        ctx: &MutationContext<'_>,
    ) -> Result<Vec<f64>, KernelError> {
        let best = ctx.best.ok_or(KernelError::InvalidConfig {
            field: "variant",
            message: "best1 requires a current best vector",
        })?;
        let idx = distinct_indices(rng, population.len(), ctx.target, 2)?;
        let (a, b) = (&population[idx[0]], &population[idx[1]]);

        let mut mutant = Vec::with_capacity(ctx.dimensions);
        for d in 0..ctx.dimensions {
            mutant.push(best.elements[d] + ctx.weight * (a.elements[d] - b.elements[d]));
        }
        Ok(mutant)
    }
}
