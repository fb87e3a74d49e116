// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Name-keyed registries for algorithms, problems and variants.
//!
//! Entries are `Arc`-shared so resolved instances can travel into worker
//! tasks without re-resolving. Names are stable identifiers used on the
//! wire; listing order is alphabetical.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::gde3::Gde3;
use crate::problems::{Zdt1, Zdt2, Zdt3};
use crate::traits::{Algorithm, Problem, Variant};
use crate::variants::{Best1, Rand1};

/// Name and description of a registry entry, for listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Stable registry name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

/// Registry of supported algorithms.
#[derive(Clone, Default)]
pub struct AlgorithmRegistry {
    entries: BTreeMap<&'static str, Arc<dyn Algorithm>>,
}

impl AlgorithmRegistry {
    /// Registry pre-populated with the built-in algorithms.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(Gde3));
        registry
    }

    /// Add an algorithm. Re-registering a name replaces the entry.
    pub fn register(&mut self, algorithm: Arc<dyn Algorithm>) {
        self.entries.insert(algorithm.name(), algorithm);
    }

    /// Whether `name` resolves to a registered algorithm.
    pub fn is_supported(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Resolve an algorithm by name.
    pub fn create(&self, name: &str) -> Option<Arc<dyn Algorithm>> {
        self.entries.get(name).cloned()
    }

    /// Alphabetical list of registered names.
    pub fn list(&self) -> Vec<String> {
        self.entries.keys().map(|k| k.to_string()).collect()
    }
}

/// Registry of supported problems.
#[derive(Clone, Default)]
pub struct ProblemRegistry {
    entries: BTreeMap<&'static str, Arc<dyn Problem>>,
}

impl ProblemRegistry {
    /// Registry pre-populated with the built-in problems.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(Zdt1));
        registry.register(Arc::new(Zdt2));
        registry.register(Arc::new(Zdt3));
        registry
    }

    /// Add a problem. Re-registering a name replaces the entry.
    pub fn register(&mut self, problem: Arc<dyn Problem>) {
        self.entries.insert(problem.name(), problem);
    }

    /// Whether `name` resolves to a registered problem.
    pub fn is_supported(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Resolve a problem by name.
    pub fn create(&self, name: &str) -> Option<Arc<dyn Problem>> {
        self.entries.get(name).cloned()
    }

    /// Alphabetical name/description listing.
    pub fn list_metadata(&self) -> Vec<EntryInfo> {
        self.entries
            .values()
            .map(|p| EntryInfo {
                name: p.name().to_string(),
                description: p.description().to_string(),
            })
            .collect()
    }
}

/// Registry of supported mutation variants.
#[derive(Clone, Default)]
pub struct VariantRegistry {
    entries: BTreeMap<&'static str, Arc<dyn Variant>>,
}

impl VariantRegistry {
    /// Registry pre-populated with the built-in variants.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(Rand1));
        registry.register(Arc::new(Best1));
        registry
    }

    /// Add a variant. Re-registering a name replaces the entry.
    pub fn register(&mut self, variant: Arc<dyn Variant>) {
        self.entries.insert(variant.name(), variant);
    }

    /// Whether `name` resolves to a registered variant.
    pub fn is_supported(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Resolve a variant by name.
    pub fn create(&self, name: &str) -> Option<Arc<dyn Variant>> {
        self.entries.get(name).cloned()
    }

    /// Alphabetical name/description listing.
    pub fn list_metadata(&self) -> Vec<EntryInfo> {
        self.entries
            .values()
            .map(|v| EntryInfo {
                name: v.name().to_string(),
                description: v.description().to_string(),
            })
            .collect()
    }
}
