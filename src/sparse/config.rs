// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Configuration for sparse weight prepacking.
//!
//! The layout decision constant lives here as well. It is a tuned
//! heuristic: a matrix switches to the 2-row block layout when
//! `paired_nonzeros * BLOCK_RATIO_LHS >= active_pairs * BLOCK_RATIO_RHS`.

/// Output channels per block in the structured layout.
pub const BLOCK_ROWS: usize = 2;

/// Left-hand multiplier of the block-layout rule (applied to paired nonzeros).
pub const BLOCK_RATIO_LHS: usize = 5;

/// Right-hand multiplier of the block-layout rule (applied to active pairs).
pub const BLOCK_RATIO_RHS: usize = 9;

/// How the encoder chooses between element and block layouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LayoutPolicy {
    /// Pick the block layout when row pairs are filled densely enough.
    #[default]
    Auto,

    /// Always emit one entry per nonzero element.
    Unstructured,

    /// Always emit 2-row blocks. Requires more than one row.
    Block,
}

/// Configuration for [`profile_with_policy`](super::profile::profile_with_policy)
/// and [`encode`](super::encode::encode).
///
/// # Example
///
/// ```rust
/// use spmm_prepack::sparse::{EncoderConfig, LayoutPolicy};
///
/// let config = EncoderConfig::default();
/// assert_eq!(config.layout, LayoutPolicy::Auto);
///
/// let forced = EncoderConfig::forced_block();
/// assert!(forced.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    /// Layout selection policy.
    pub layout: LayoutPolicy,

    /// Size in bytes of one activation element. Advance deltas are
    /// `column_jump * output_width * element_size`.
    pub element_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            layout: LayoutPolicy::Auto,
            element_size: std::mem::size_of::<i8>(),
        }
    }
}

impl EncoderConfig {
    /// Configuration that always uses the element layout.
    #[must_use]
    pub fn forced_unstructured() -> Self {
        Self {
            layout: LayoutPolicy::Unstructured,
            ..Self::default()
        }
    }

    /// Configuration that always uses the 2-row block layout.
    #[must_use]
    pub fn forced_block() -> Self {
        Self {
            layout: LayoutPolicy::Block,
            ..Self::default()
        }
    }

    /// Byte stride between two consecutive input channels of the activation
    /// buffer, which is laid out `(in_channels, output_width)` row-major.
    /// `None` if the product overflows `usize`.
    #[must_use]
    pub const fn row_stride_bytes(&self, output_width: usize) -> Option<usize> {
        output_width.checked_mul(self.element_size)
    }

    /// Validate configuration parameters.
    ///
    /// # Errors
    ///
    /// Returns error if `element_size` is zero or not a power of 2.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.element_size.is_power_of_two() {
            return Err(ConfigError::InvalidElementSize(self.element_size));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Element size must be a nonzero power of 2.
    InvalidElementSize(usize),
    /// Block layout needs at least two rows.
    BlockNeedsPairs(usize),
    /// Harness tolerance must be finite and non-negative.
    InvalidTolerance(&'static str, f64),
    /// Harness must time at least one repetition.
    NoRepeats,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidElementSize(v) => write!(f, "element_size {v} must be a power of 2"),
            Self::BlockNeedsPairs(rows) => {
                write!(f, "block layout needs at least 2 rows, matrix has {rows}")
            }
            Self::InvalidTolerance(name, v) => {
                write!(f, "{name} {v} must be finite and non-negative")
            }
            Self::NoRepeats => write!(f, "repeats must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::SpmmError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}
