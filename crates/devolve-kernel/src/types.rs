// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Core value types for DE runs.

use serde::{Deserialize, Serialize};

/// One candidate solution: decision-space elements plus objective values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    /// Decision-space coordinates.
    pub elements: Vec<f64>,
    /// Objective values filled in by [`crate::Problem::evaluate`].
    #[serde(default)]
    pub objectives: Vec<f64>,
    /// Crowding distance, meaningful only during reduction. Never
    /// serialized: boundary vectors hold `f64::INFINITY`, which JSON
    /// cannot represent.
    #[serde(skip)]
    pub crowding_distance: f64,
}

impl Vector {
    /// Create a vector from decision-space elements.
    pub fn new(elements: Vec<f64>) -> Self {
        Self {
            elements,
            objectives: Vec::new(),
            crowding_distance: 0.0,
        }
    }
}

/// GDE3-specific control parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gde3Params {
    /// Crossover rate in `[0, 1]`.
    pub cr: f64,
    /// Differential weight in `(0, 2]`.
    pub f: f64,
    /// Probability used by percentile-based selection variants.
    pub p: f64,
}

impl Default for Gde3Params {
    fn default() -> Self {
        Self {
            cr: 0.9,
            f: 0.5,
            p: 0.1,
        }
    }
}

/// Run configuration for a DE job.
///
/// Unknown fields in serialized form are ignored so stored configs stay
/// readable across field additions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeConfig {
    /// Number of independent runs merged into the final front.
    pub executions: u32,
    /// Generations per run.
    pub generations: u32,
    /// Population size, held constant across generations.
    pub population_size: u32,
    /// Decision-space dimensionality.
    pub dimensions_size: u32,
    /// Number of objectives.
    pub objectives_size: u32,
    /// Lower bound for every decision variable.
    pub floor: f64,
    /// Upper bound for every decision variable.
    pub ceil: f64,
    /// GDE3 parameters.
    pub gde3: Gde3Params,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            executions: 1,
            generations: 100,
            population_size: 50,
            dimensions_size: 30,
            objectives_size: 2,
            floor: 0.0,
            ceil: 1.0,
            gde3: Gde3Params::default(),
        }
    }
}

/// Snapshot handed to the progress sink after each generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Generation just finished (1-based).
    pub current_generation: u32,
    /// Total generations configured for this run.
    pub total_generations: u32,
    /// Current non-dominated front.
    pub pareto: Vec<Vector>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DeConfig::default();
        assert_eq!(config.executions, 1);
        assert_eq!(config.population_size, 50);
        assert_eq!(config.gde3.cr, 0.9);
    }

    #[test]
    fn test_config_unknown_fields_ignored() {
        let json = r#"{"generations": 10, "population_size": 20, "future_field": true}"#;
        let config: DeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.generations, 10);
        assert_eq!(config.population_size, 20);
        // Omitted fields fall back to defaults
        assert_eq!(config.dimensions_size, 30);
    }

    #[test]
    fn test_vector_serde_round_trip() {
        let v = Vector {
            elements: vec![0.1, 0.2],
            objectives: vec![0.1, 5.0],
            crowding_distance: 0.0,
        };
        let json = serde_json::to_string(&v).unwrap();
        let back: Vector = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn test_boundary_vector_stays_serializable() {
        // Crowding reduction leaves boundary vectors at infinity, which
        // serde_json would emit as null. The field must never reach the
        // wire or the cache.
        let v = Vector {
            elements: vec![0.1],
            objectives: vec![0.2, 0.3],
            crowding_distance: f64::INFINITY,
        };
        let json = serde_json::to_string(&v).unwrap();
        assert!(!json.contains("null"));
        assert!(!json.contains("crowding_distance"));
        let back: Vector = serde_json::from_str(&json).unwrap();
        assert_eq!(back.crowding_distance, 0.0);
        assert_eq!(back.objectives, v.objectives);
    }
}
