//! Driver configuration
//!
//! Defaults match the OCTEON TX FPA; tests and the emulated device use the
//! builder methods to exercise other geometries.

use crate::error::{FpaError, Result};
use fpa_chip::pool::{CACHE_LINE_SIZE, MAX_OBJECT_SIZE, PF_PAGE_SIZE};

/// Pool geometry and control-word options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpaConfig {
    /// Object size and buffer offset granularity (power of two)
    pub cache_line: usize,

    /// Largest object size accepted by `create_pool`
    pub max_object_size: usize,

    /// Pool stack memory is rounded up to this (power of two)
    pub stack_page_size: usize,

    /// Request naturally aligned buffers in the pool control word
    pub natural_align: bool,
}

impl Default for FpaConfig {
    fn default() -> Self {
        Self {
            cache_line: CACHE_LINE_SIZE,
            max_object_size: MAX_OBJECT_SIZE,
            stack_page_size: PF_PAGE_SIZE,
            natural_align: true,
        }
    }
}

impl FpaConfig {
    /// Override the cache-line granularity.
    #[must_use]
    pub const fn with_cache_line(mut self, cache_line: usize) -> Self {
        self.cache_line = cache_line;
        self
    }

    /// Override the largest object size.
    #[must_use]
    pub const fn with_max_object_size(mut self, max_object_size: usize) -> Self {
        self.max_object_size = max_object_size;
        self
    }

    /// Override the pool stack rounding granularity.
    #[must_use]
    pub const fn with_stack_page_size(mut self, stack_page_size: usize) -> Self {
        self.stack_page_size = stack_page_size;
        self
    }

    /// Toggle natural alignment.
    #[must_use]
    pub const fn with_natural_align(mut self, natural_align: bool) -> Self {
        self.natural_align = natural_align;
        self
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] if a granularity is not a power
    /// of two or the maximum object size is smaller than one cache line.
    pub fn validate(&self) -> Result<()> {
        if !self.cache_line.is_power_of_two() {
            return Err(FpaError::invalid_argument(format!(
                "cache line {} is not a power of two",
                self.cache_line
            )));
        }
        if !self.stack_page_size.is_power_of_two() {
            return Err(FpaError::invalid_argument(format!(
                "stack page size {} is not a power of two",
                self.stack_page_size
            )));
        }
        if self.max_object_size < self.cache_line {
            return Err(FpaError::invalid_argument(format!(
                "max object size {} below one cache line",
                self.max_object_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = FpaConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.cache_line, 128);
        assert_eq!(cfg.max_object_size, 128 * 1024);
    }

    #[test]
    fn test_rejects_odd_granularity() {
        assert!(FpaConfig::default().with_cache_line(96).validate().is_err());
        assert!(FpaConfig::default().with_stack_page_size(3000).validate().is_err());
        assert!(FpaConfig::default().with_max_object_size(64).validate().is_err());
    }
}
