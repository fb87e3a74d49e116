// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dominance tests and crowding-distance reduction for minimization
//! problems.

use crate::types::Vector;

/// True if `a` weakly dominates `b`: no objective worse, at least one
/// strictly better. Vectors with mismatched objective counts never dominate
/// each other.
pub fn dominates(a: &Vector, b: &Vector) -> bool {
    if a.objectives.len() != b.objectives.len() || a.objectives.is_empty() {
        return false;
    }
    let mut strictly_better = false;
    for (x, y) in a.objectives.iter().zip(b.objectives.iter()) {
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Extract the non-dominated (rank-zero) front of a population.
pub fn rank_zero(population: &[Vector]) -> Vec<Vector> {
    population
        .iter()
        .enumerate()
        .filter(|(i, candidate)| {
            !population
                .iter()
                .enumerate()
                .any(|(j, other)| *i != j && dominates(other, candidate))
        })
        .map(|(_, v)| v.clone())
        .collect()
}

/// Assign crowding distances in place.
///
/// Boundary points per objective get infinite distance; interior points
/// accumulate the normalized span of their neighbors.
pub fn assign_crowding_distance(population: &mut [Vector]) {
    let n = population.len();
    if n == 0 {
        return;
    }
    for v in population.iter_mut() {
        v.crowding_distance = 0.0;
    }
    let objectives = population[0].objectives.len();

    let mut order: Vec<usize> = (0..n).collect();
    for m in 0..objectives {
        order.sort_by(|&a, &b| {
            population[a].objectives[m]
                .partial_cmp(&population[b].objectives[m])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let min = population[order[0]].objectives[m];
        let max = population[order[n - 1]].objectives[m];
        let span = max - min;

        population[order[0]].crowding_distance = f64::INFINITY;
        population[order[n - 1]].crowding_distance = f64::INFINITY;

        if span <= f64::EPSILON {
            continue;
        }
        for w in 1..n.saturating_sub(1) {
            let prev = population[order[w - 1]].objectives[m];
            let next = population[order[w + 1]].objectives[m];
            population[order[w]].crowding_distance += (next - prev) / span;
        }
    }
}

/// Reduce `population` to at most `target` members, preferring the most
/// spread-out vectors. Used by GDE3 after a generation grows the population.
pub fn reduce_by_crowding_distance(population: &mut Vec<Vector>, target: usize) {
    if population.len() <= target {
        return;
    }
    assign_crowding_distance(population);
    population.sort_by(|a, b| {
        b.crowding_distance
            .partial_cmp(&a.crowding_distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    population.truncate(target);
}
