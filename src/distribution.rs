//! Weighted discrete distributions for per-request parameters.
//!
//! A [`WeightedTable`] keeps its entries in insertion order together with the
//! running sum of their weights. Entry `i` owns the half-open interval
//! `[w_0 + .. + w_{i-1}, w_0 + .. + w_i)` of `[0, weight_total)`, so a
//! uniform draw in that range selects each entry with probability
//! `weight / weight_total`.

use std::fmt::Display;

use rand::Rng;

use crate::error::ConfigError;

/// Weight given to the single entry of a synthesized default table.
pub const DEFAULT_WEIGHT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedEntry {
    pub value: u32,
    pub weight: u32,
}

impl Display for WeightedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "value={}, weight={}", self.value, self.weight)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightedTable {
    entries: Vec<WeightedEntry>,
    weight_total: u64,
}

impl WeightedTable {
    /// Allocates room for exactly `capacity` entries, reporting failure
    /// instead of aborting.
    pub fn with_capacity(table: &'static str, capacity: usize) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|source| ConfigError::Allocation { table, source })?;

        Ok(WeightedTable {
            entries,
            weight_total: 0,
        })
    }

    pub fn push(&mut self, value: u32, weight: u32) {
        self.entries.push(WeightedEntry { value, weight });
        self.weight_total += u64::from(weight);
    }

    /// Returns the table unchanged if it has entries, otherwise a table holding
    /// only `(value, DEFAULT_WEIGHT)`.
    pub fn or_default(mut self, value: u32) -> Self {
        if self.entries.is_empty() {
            self.push(value, DEFAULT_WEIGHT);
        }
        self
    }

    pub fn entries(&self) -> &[WeightedEntry] {
        &self.entries
    }

    pub fn weight_total(&self) -> u64 {
        self.weight_total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Finds the entry whose cumulative interval contains `draw`.
    ///
    /// Returns `None` when `draw >= weight_total`.
    pub fn select(&self, draw: u64) -> Option<&WeightedEntry> {
        if draw >= self.weight_total {
            return None;
        }

        let mut upper = 0;
        self.entries.iter().find(|entry| {
            upper += u64::from(entry.weight);
            draw < upper
        })
    }

    /// Draws an entry with probability proportional to its weight.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&WeightedEntry> {
        if self.weight_total == 0 {
            return None;
        }
        self.select(rng.gen_range(0..self.weight_total))
    }

    /// Releases the entry storage. Safe to call on an empty or already
    /// released table.
    pub fn release(&mut self) {
        self.entries = Vec::new();
        self.weight_total = 0;
    }
}
