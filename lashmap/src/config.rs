use crate::error::{LashError, Result};

/// Tuning knobs fixed when a table is opened.
///
/// Only `initial_buckets` matters for a fresh table; a reopened table keeps
/// the bucket count recorded in its header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskMapConfig {
    pub stripes: usize,
    pub initial_buckets: u64,
    pub load_threshold: f64,
    pub arena_initial_len: u64,
}

impl Default for DiskMapConfig {
    fn default() -> Self {
        Self {
            stripes: 256,
            initial_buckets: 256,
            load_threshold: 0.75,
            arena_initial_len: 1 << 20,
        }
    }
}

impl DiskMapConfig {
    pub fn with_stripes(mut self, stripes: usize) -> Self {
        self.stripes = stripes;
        self
    }

    pub fn with_initial_buckets(mut self, buckets: u64) -> Self {
        self.initial_buckets = buckets;
        self
    }

    pub fn with_load_threshold(mut self, threshold: f64) -> Self {
        self.load_threshold = threshold;
        self
    }

    pub fn with_arena_initial_len(mut self, len: u64) -> Self {
        self.arena_initial_len = len;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.stripes.is_power_of_two() {
            return Err(LashError::InvalidConfig(format!(
                "stripe count {} is not a power of two",
                self.stripes
            )));
        }
        if !self.initial_buckets.is_power_of_two() {
            return Err(LashError::InvalidConfig(format!(
                "initial bucket count {} is not a power of two",
                self.initial_buckets
            )));
        }
        // a bucket and its split partner must share a stripe
        if self.initial_buckets < self.stripes as u64 {
            return Err(LashError::InvalidConfig(format!(
                "initial bucket count {} is below the stripe count {}",
                self.initial_buckets, self.stripes
            )));
        }
        if !(self.load_threshold > 0.0 && self.load_threshold <= 1.0) {
            return Err(LashError::InvalidConfig(format!(
                "load threshold {} outside (0, 1]",
                self.load_threshold
            )));
        }
        Ok(())
    }
}
