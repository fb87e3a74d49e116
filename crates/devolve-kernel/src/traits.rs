// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kernel contracts.
//!
//! These traits are the seams between the control plane and the numerics:
//! the executor only ever sees `Arc<dyn Algorithm>` (and friends) resolved
//! through the registries.

use rand::RngCore;

use crate::error::KernelError;
use crate::types::{DeConfig, ProgressSnapshot, Vector};

/// An optimization problem: evaluates a candidate's objective values.
pub trait Problem: Send + Sync {
    /// Registry name, e.g. `"zdt1"`.
    fn name(&self) -> &'static str;

    /// Human-readable description for listing endpoints.
    fn description(&self) -> &'static str;

    /// Fill `vector.objectives` with `objectives_count` values computed
    /// from `vector.elements`.
    fn evaluate(&self, vector: &mut Vector, objectives_count: usize) -> Result<(), KernelError>;
}

/// Inputs to one mutation step.
pub struct MutationContext<'a> {
    /// Index of the target vector within the population.
    pub target: usize,
    /// Differential weight (`F`).
    pub weight: f64,
    /// Decision-space dimensionality.
    pub dimensions: usize,
    /// Current best non-dominated vector, when the variant needs one.
    pub best: Option<&'a Vector>,
}

/// A DE mutation strategy: produces a mutant's decision-space elements.
pub trait Variant: Send + Sync {
    /// Registry name, e.g. `"rand1"`.
    fn name(&self) -> &'static str;

    /// Human-readable description for listing endpoints.
    fn description(&self) -> &'static str;

    /// Produce the mutant elements for the given target.
    fn mutate(
        &self,
        rng: &mut dyn RngCore,
        population: &[Vector],
        ctx: &MutationContext<'_>,
    ) -> Result<Vec<f64>, KernelError>;
}

/// Receives one snapshot per generation.
///
/// Returning [`KernelError::Cancelled`] aborts the run; the algorithm must
/// surface that error unchanged from its own return path. Sinks are also the
/// natural place for rate limiting: a sink that chooses not to forward a
/// snapshot simply returns `Ok(())`.
pub trait ProgressSink: Send {
    /// Called after every generation with the current front.
    fn on_generation(&mut self, snapshot: ProgressSnapshot) -> Result<(), KernelError>;
}

/// A complete DE algorithm.
pub trait Algorithm: Send + Sync {
    /// Registry name, e.g. `"gde3"`.
    fn name(&self) -> &'static str;

    /// Run one execution and return the non-dominated front of the final
    /// population.
    fn run(
        &self,
        problem: &dyn Problem,
        variant: &dyn Variant,
        config: &DeConfig,
        sink: &mut dyn ProgressSink,
    ) -> Result<Vec<Vector>, KernelError>;
}

/// A sink that forwards nothing and never cancels. Useful for tests and for
/// callers that only want the final front.
#[derive(Debug, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_generation(&mut self, _snapshot: ProgressSnapshot) -> Result<(), KernelError> {
        Ok(())
    }
}
