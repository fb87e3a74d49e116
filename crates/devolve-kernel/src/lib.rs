// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Devolve Kernel - multi-objective differential evolution
//!
//! The kernel is deliberately narrow: an [`Algorithm`] is invoked with a
//! [`Problem`], a mutation [`Variant`], a [`DeConfig`] and a
//! [`ProgressSink`], and returns the non-dominated front of its final
//! population. Cooperative cancellation flows through the sink: when the
//! sink returns [`KernelError::Cancelled`] after a generation, the run
//! unwinds with that error and no result.
//!
//! Reference implementations:
//! - algorithm `gde3` (generalized DE for multi-objective problems),
//! - problems `zdt1`, `zdt2`, `zdt3`,
//! - variants `rand1`, `best1`.
//!
//! All of them are plain synchronous CPU-bound code; callers that run jobs
//! on an async runtime are expected to wrap `run` in a blocking task.

#![deny(missing_docs)]

pub mod error;
/// GDE3 algorithm implementation.
pub mod gde3;
/// Dominance tests and crowding-distance reduction.
pub mod pareto;
/// Benchmark problems.
pub mod problems;
/// Name-keyed registries for algorithms, problems and variants.
pub mod registry;
/// Kernel contracts: `Algorithm`, `Problem`, `Variant`, `ProgressSink`.
pub mod traits;
/// Core value types: vectors, populations, run configuration.
pub mod types;
/// Mutation variants.
pub mod variants;

pub use error::KernelError;
pub use gde3::Gde3;
pub use pareto::{dominates, rank_zero};
pub use registry::{AlgorithmRegistry, EntryInfo, ProblemRegistry, VariantRegistry};
pub use traits::{Algorithm, MutationContext, Problem, ProgressSink, Variant};
pub use types::{DeConfig, Gde3Params, ProgressSnapshot, Vector};
