// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Sparse int8 weight prepacking.
//!
//! Converts a dense `[out_channels, in_channels]` int8 weight matrix into the
//! three arrays a pointer-walking sparse kernel consumes.
//!
//! ## Layouts
//!
//! - **Unstructured**: one entry per nonzero element, grouped per row.
//! - **Block**: rows are paired; a column is kept when either row of the
//!   pair is nonzero there, and both rows' values are stored. An odd
//!   trailing row is encoded element by element after the pairs.
//!
//! ## Module Structure
//!
//! - [`config`] - Layout policy and the block-selection constants
//! - [`types`] - `DenseWeights`, `SparsityProfile`, `EncodedSparseWeights`
//! - [`profile`] - Zero counting and layout selection
//! - [`encode`] - Array emission and delta folding
//!
//! ## Usage
//!
//! ```rust
//! use spmm_prepack::sparse::{encode, profile, DenseWeights, EncoderConfig};
//!
//! let data = vec![0i8, 4, 0, -2, 0, 0, 1, 0];
//! let weights = DenseWeights::new(&data, 2, 4)?;
//! let p = profile(&weights);
//! if !p.is_empty() {
//!     let encoded = encode(&weights, 32, &p, &EncoderConfig::default())?;
//!     assert_eq!(encoded.values.len(), p.nonzero_count);
//! }
//! # Ok::<(), spmm_prepack::SpmmError>(())
//! ```

pub mod config;
pub mod encode;
pub mod profile;
pub mod types;

pub use config::{ConfigError, EncoderConfig, LayoutPolicy};
pub use encode::{encode, encode_into, EncodeBuffers};
pub use profile::{count_zeros, prefers_block_layout, profile, profile_with_policy};
pub use types::{DenseWeights, EncodedSparseWeights, SparseLayout, SparsityProfile};
