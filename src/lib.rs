//! # spmm-prepack
//!
//! Prepacking of sparse int8 weight matrices for pointer-walking sparse
//! matrix-multiply kernels, plus a conformance harness that checks kernels
//! against a dense reference built on [Candle](https://github.com/huggingface/candle).
//!
//! - Sparsity profiling with a 2-row block vs. unstructured layout decision
//! - Encoding into packed values, cumulative group counts and folded
//!   pointer-advance deltas
//! - A [`kernels::SparseKernel`] capability trait with a portable CPU kernel
//! - A dense reference GEMM and a sweep-driven conformance harness
//!
//! ## Quick Start
//!
//! ```rust
//! use spmm_prepack::sparse::{encode, profile, DenseWeights, EncoderConfig};
//!
//! let data = vec![0i8, 3, 0, 0, -1, 0, 0, 2, 0, 0, 0, 5];
//! let weights = DenseWeights::new(&data, 3, 4)?;
//! let p = profile(&weights);
//! assert_eq!(p.zero_count, 8);
//!
//! let encoded = encode(&weights, 16, &p, &EncoderConfig::default())?;
//! assert_eq!(encoded.first_nonzero_column, 1);
//! assert_eq!(encoded.group_prefix_counts, vec![1, 3, 4]);
//! # Ok::<(), spmm_prepack::SpmmError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod activation;
pub mod error;
pub mod harness;
pub mod kernels;
pub mod quant;
pub mod reference;
pub mod sparse;

pub use error::{Result, SpmmError};
