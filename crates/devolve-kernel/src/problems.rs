// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ZDT benchmark problems (bi-objective, minimization, domain `[0, 1]^n`).

use crate::error::KernelError;
use crate::traits::Problem;
use crate::types::Vector;

fn g_value(elements: &[f64]) -> f64 {
    let n = elements.len();
    let sum: f64 = elements[1..].iter().sum();
    1.0 + 9.0 * sum / (n as f64 - 1.0)
}

fn check_dimensions(name: &'static str, vector: &Vector) -> Result<(), KernelError> {
    if vector.elements.len() < 2 {
        return Err(KernelError::DimensionMismatch {
            problem: name,
            min_dimensions: 2,
        });
    }
    Ok(())
}

/// ZDT1: convex Pareto front.
#[derive(Debug, Default)]
pub struct Zdt1;

impl Problem for Zdt1 {
    fn name(&self) -> &'static str {
        "zdt1"
    }

    fn description(&self) -> &'static str {
        "ZDT1 bi-objective benchmark with a convex Pareto front"
    }

    fn evaluate(&self, vector: &mut Vector, objectives_count: usize) -> Result<(), KernelError> {
        check_dimensions(self.name(), vector)?;
        let f1 = vector.elements[0];
        let g = g_value(&vector.elements);
        let h = 1.0 - (f1 / g).sqrt();
        vector.objectives = vec![f1, g * h];
        vector.objectives.truncate(objectives_count.max(2));
        Ok(())
    }
}

/// ZDT2: non-convex Pareto front.
#[derive(Debug, Default)]
pub struct Zdt2;

impl Problem for Zdt2 {
    fn name(&self) -> &'static str {
        "zdt2"
    }

    fn description(&self) -> &'static str {
        "ZDT2 bi-objective benchmark with a non-convex Pareto front"
    }

    fn evaluate(&self, vector: &mut Vector, objectives_count: usize) -> Result<(), KernelError> {
        check_dimensions(self.name(), vector)?;
        let f1 = vector.elements[0];
        let g = g_value(&vector.elements);
        let h = 1.0 - (f1 / g).powi(2);
        vector.objectives = vec![f1, g * h];
        vector.objectives.truncate(objectives_count.max(2));
        Ok(())
    }
}

/// ZDT3: disconnected Pareto front.
#[derive(Debug, Default)]
pub struct Zdt3;

impl Problem for Zdt3 {
    fn name(&self) -> &'static str {
        "zdt3"
    }

    fn description(&self) -> &'static str {
        "ZDT3 bi-objective benchmark with a disconnected Pareto front"
    }

    fn evaluate(&self, vector: &mut Vector, objectives_count: usize) -> Result<(), KernelError> {
        check_dimensions(self.name(), vector)?;
        let f1 = vector.elements[0];
        let g = g_value(&vector.elements);
        let ratio = f1 / g;
        let h = 1.0 - ratio.sqrt() - ratio * (10.0 * std::f64::consts::PI * f1).sin();
        vector.objectives = vec![f1, g * h];
        vector.objectives.truncate(objectives_count.max(2));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zdt1_optimal_point() {
        // On the Pareto-optimal front x[1..] = 0, so g = 1 and f2 = 1 - sqrt(f1).
        let mut v = Vector::new(vec![0.25, 0.0, 0.0, 0.0]);
        Zdt1.evaluate(&mut v, 2).unwrap();
        assert!((v.objectives[0] - 0.25).abs() < 1e-12);
        assert!((v.objectives[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zdt1_g_penalty() {
        // Non-zero tail variables push g above 1 and worsen f2.
        let mut optimal = Vector::new(vec![0.5, 0.0, 0.0]);
        let mut penalized = Vector::new(vec![0.5, 0.5, 0.5]);
        Zdt1.evaluate(&mut optimal, 2).unwrap();
        Zdt1.evaluate(&mut penalized, 2).unwrap();
        assert!(penalized.objectives[1] > optimal.objectives[1]);
    }

    #[test]
    fn test_zdt2_optimal_point() {
        // g = 1 on the front, so f2 = 1 - f1^2.
        let mut v = Vector::new(vec![0.5, 0.0, 0.0]);
        Zdt2.evaluate(&mut v, 2).unwrap();
        assert!((v.objectives[1] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_zdt3_evaluates() {
        let mut v = Vector::new(vec![0.3, 0.1, 0.2]);
        Zdt3.evaluate(&mut v, 2).unwrap();
        assert_eq!(v.objectives.len(), 2);
        assert_eq!(v.objectives[0], 0.3);
    }

    #[test]
    fn test_dimension_check() {
        let mut v = Vector::new(vec![0.5]);
        let err = Zdt1.evaluate(&mut v, 2).unwrap_err();
        assert!(matches!(err, KernelError::DimensionMismatch { .. }));
    }
}
