// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Error types for spmm-prepack.

use thiserror::Error;

/// Result type alias for spmm-prepack operations.
pub type Result<T> = std::result::Result<T, SpmmError>;

/// Errors that can occur while profiling, encoding or validating sparse weights.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SpmmError {
    /// Shape mismatch between an operand and the dimensions it was declared with.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Encoding was requested for a matrix without a single nonzero weight.
    #[error("weight matrix has no nonzero elements; skip the sparse kernel")]
    EmptyWeights,

    /// A caller-provided output buffer cannot hold the encoded data.
    #[error("{buffer} buffer too small: required {required}, got {actual}")]
    BufferTooSmall {
        /// Which buffer was undersized
        buffer: &'static str,
        /// Required length in elements
        required: usize,
        /// Provided length in elements
        actual: usize,
    },

    /// A pointer-advance delta does not fit the kernel's `i32` delta type.
    #[error("advance delta of {0} bytes does not fit in i32")]
    DeltaOverflow(i64),

    /// Encoded arrays are internally inconsistent.
    #[error("corrupt sparse encoding: {0}")]
    CorruptEncoding(String),

    /// Sparse kernel failure.
    #[error("kernel error: {0}")]
    Kernel(String),

    /// Kernel output deviates from the dense reference beyond tolerance.
    #[error("conformance mismatch in {case}:\n{report}")]
    Mismatch {
        /// Human-readable case description
        case: String,
        /// Diagnostic dump of the offending tensors
        report: String,
    },

    /// Candle error from the dense reference computation.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}
