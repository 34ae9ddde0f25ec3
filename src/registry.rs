use crate::effectiveness;
use crate::types::PointRecord;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Per-point mutable counters. A fresh point expects one person so that the
/// effectiveness denominator starts valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub observed: u32,
    pub expected: u32,
}

impl Default for Counters {
    fn default() -> Self {
        Counters {
            observed: 0,
            expected: 1,
        }
    }
}

impl Counters {
    /// A point with both counters at zero was never populated and renders in
    /// the neutral no-data style instead of the critical tier.
    pub fn has_any_data(&self) -> bool {
        self.observed > 0 || self.expected > 0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown meeting point '{0}'")]
    UnknownPoint(String),
}

/// The canonical in-memory table of meeting points. `name` is the primary
/// key; duplicates are collapsed first-seen-wins at load time. The registry
/// exclusively owns counter state; municipality assignment is derived
/// elsewhere and never stored here.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    points: Vec<PointRecord>,
    counters: BTreeMap<String, Counters>,
}

impl Registry {
    /// Builds a registry snapshot from raw rows. Rows with non-finite
    /// coordinates are dropped, then duplicates by name are collapsed
    /// keeping the first occurrence. Zero valid rows is a valid, empty
    /// registry, not an error.
    pub fn load(rows: impl IntoIterator<Item = PointRecord>) -> Registry {
        let mut points: Vec<PointRecord> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for row in rows {
            if !row.latitude.is_finite() || !row.longitude.is_finite() {
                continue;
            }
            if seen.insert(row.name.clone()) {
                points.push(row);
            }
        }
        let counters = points
            .iter()
            .map(|p| (p.name.clone(), Counters::default()))
            .collect();
        Registry { points, counters }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Points in load order with their counters.
    pub fn iter(&self) -> impl Iterator<Item = (&PointRecord, &Counters)> {
        self.points
            .iter()
            .map(|p| (p, &self.counters[p.name.as_str()]))
    }

    pub fn get(&self, name: &str) -> Option<(&PointRecord, &Counters)> {
        let point = self.points.iter().find(|p| p.name == name)?;
        Some((point, &self.counters[name]))
    }

    pub fn identity_set(&self) -> BTreeSet<String> {
        self.points.iter().map(|p| p.name.clone()).collect()
    }

    pub fn set_observed(&mut self, name: &str, value: u32) -> Result<(), RegistryError> {
        let counters = self
            .counters
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownPoint(name.to_string()))?;
        counters.observed = value;
        Ok(())
    }

    pub fn set_expected(&mut self, name: &str, value: u32) -> Result<(), RegistryError> {
        let counters = self
            .counters
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownPoint(name.to_string()))?;
        counters.expected = value;
        Ok(())
    }

    /// Recomputed on every read, never stored.
    pub fn effectiveness(&self, name: &str) -> Result<f64, RegistryError> {
        let counters = self
            .counters
            .get(name)
            .ok_or_else(|| RegistryError::UnknownPoint(name.to_string()))?;
        Ok(effectiveness::percentage(counters.observed, counters.expected))
    }

    /// Copies counters from an older registry for names present in both.
    /// Used when re-processing the same source so the operator's entries
    /// survive; the reconciler decides whether this is allowed.
    pub fn adopt_counters(&mut self, previous: &Registry) {
        for (name, counters) in &mut self.counters {
            if let Some(old) = previous.counters.get(name) {
                *counters = *old;
            }
        }
    }

    /// Restores counters from a persisted snapshot, ignoring names the
    /// current registry does not know.
    pub fn restore_counters(&mut self, saved: &BTreeMap<String, (u32, u32)>) {
        for (name, &(observed, expected)) in saved {
            if let Some(counters) = self.counters.get_mut(name) {
                *counters = Counters { observed, expected };
            }
        }
    }

    /// Flat counter view for persistence.
    pub fn counters_snapshot(&self) -> BTreeMap<String, (u32, u32)> {
        self.counters
            .iter()
            .map(|(name, c)| (name.clone(), (c.observed, c.expected)))
            .collect()
    }
}
