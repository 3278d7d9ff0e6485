// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Harness timing and tolerance configuration.

use crate::sparse::ConfigError;

/// Timing and tolerance settings for conformance runs.
#[derive(Debug, Clone, Copy)]
pub struct HarnessConfig {
    /// Untimed kernel invocations before timing.
    pub warmup: usize,
    /// Timed kernel invocations.
    pub repeats: usize,
    /// Compare against the dense reference.
    pub check_result: bool,
    /// Relative bound for float output.
    pub f32_max_ratio: f64,
    /// Absolute bound for float output. Float output fails only when both
    /// bounds are exceeded.
    pub f32_max_diff: f64,
    /// Largest tolerated per-element int8 difference.
    pub int8_max_abs_diff: i32,
    /// Minimum outlier budget for int8 output.
    pub int8_min_outliers: usize,
    /// Outlier budget as a fraction of the output size.
    pub int8_outlier_fraction: f64,
}

impl Default for HarnessConfig {
    /// One unwarmed, checked run per case.
    fn default() -> Self {
        Self {
            warmup: 0,
            repeats: 1,
            check_result: true,
            f32_max_ratio: 1e-4,
            f32_max_diff: 5e-5,
            int8_max_abs_diff: 1,
            int8_min_outliers: 10,
            int8_outlier_fraction: 0.01,
        }
    }
}

impl HarnessConfig {
    /// Warmed-up timing runs with checking kept on.
    #[must_use]
    pub fn benchmark() -> Self {
        Self {
            warmup: 10,
            repeats: 50,
            ..Self::default()
        }
    }

    /// Number of int8 elements allowed to differ by one.
    #[must_use]
    pub fn int8_outlier_budget(&self, numel: usize) -> usize {
        // Truncation matches an integer budget.
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let fraction = (self.int8_outlier_fraction * numel as f64) as usize;
        self.int8_min_outliers.max(fraction)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns error if no repetition is timed or a tolerance is negative
    /// or not finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repeats == 0 {
            return Err(ConfigError::NoRepeats);
        }
        for (name, value) in [
            ("f32_max_ratio", self.f32_max_ratio),
            ("f32_max_diff", self.f32_max_diff),
            ("int8_max_abs_diff", f64::from(self.int8_max_abs_diff)),
            ("int8_outlier_fraction", self.int8_outlier_fraction),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidTolerance(name, value));
            }
        }
        Ok(())
    }
}
