// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error type shared across the kernel.

use thiserror::Error;

/// Errors produced by algorithms, problems and variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// The progress sink signalled cancellation; the run produced no result.
    #[error("run cancelled")]
    Cancelled,

    /// A configuration field is out of range for the selected algorithm.
    #[error("invalid configuration: {field}: {message}")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why the value is rejected.
        message: &'static str,
    },

    /// A vector has fewer dimensions than the problem requires.
    #[error("problem '{problem}' requires at least {min_dimensions} dimensions")]
    DimensionMismatch {
        /// The problem name.
        problem: &'static str,
        /// Minimum dimension count.
        min_dimensions: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(KernelError::Cancelled.to_string(), "run cancelled");
        assert_eq!(
            KernelError::InvalidConfig {
                field: "population_size",
                message: "must be at least 4"
            }
            .to_string(),
            "invalid configuration: population_size: must be at least 4"
        );
    }
}
