// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Sparsity profiling and layout selection.
//!
//! Rows are scanned four at a time, then two at a time, recording per
//! column whether each row is nonzero:
//!
//! ```text
//! paired_nonzeros += r0 + r1            (per row pair)
//! active_pairs    += r0 | r1
//! ```
//!
//! A trailing odd row is counted element by element and never joins a
//! pair. The block layout is selected when
//! `paired_nonzeros * 5 >= active_pairs * 9` and the matrix has more than
//! one row, meaning active pairs are on average at least 90% filled.

use crate::error::Result;

use super::config::{
    ConfigError, EncoderConfig, LayoutPolicy, BLOCK_RATIO_LHS, BLOCK_RATIO_RHS, BLOCK_ROWS,
};
use super::types::{DenseWeights, SparsityProfile};

/// Count zero-valued elements.
#[must_use]
pub fn count_zeros(weights: &DenseWeights<'_>) -> usize {
    weights.as_slice().iter().filter(|&&w| w == 0).count()
}

/// Pair statistics gathered in a single pass.
#[derive(Debug, Default, Clone, Copy)]
struct PairScan {
    paired_nonzeros: usize,
    active_pairs: usize,
    tail_nonzeros: usize,
}

fn scan_pairs(weights: &DenseWeights<'_>) -> PairScan {
    let (rows, cols) = weights.dims();
    let align4 = rows & !3;
    let align2 = rows & !1;
    let mut scan = PairScan::default();

    for oc in (0..align4).step_by(4) {
        let (r0, r1, r2, r3) = (
            weights.row(oc),
            weights.row(oc + 1),
            weights.row(oc + 2),
            weights.row(oc + 3),
        );
        for ic in 0..cols {
            let n0 = usize::from(r0[ic] != 0);
            let n1 = usize::from(r1[ic] != 0);
            let n2 = usize::from(r2[ic] != 0);
            let n3 = usize::from(r3[ic] != 0);
            scan.paired_nonzeros += n0 + n1 + n2 + n3;
            scan.active_pairs += (n0 | n1) + (n2 | n3);
        }
    }

    for oc in (align4..align2).step_by(2) {
        let (r0, r1) = (weights.row(oc), weights.row(oc + 1));
        for (&a, &b) in r0.iter().zip(r1) {
            let n0 = usize::from(a != 0);
            let n1 = usize::from(b != 0);
            scan.paired_nonzeros += n0 + n1;
            scan.active_pairs += n0 | n1;
        }
    }

    for oc in align2..rows {
        scan.tail_nonzeros += weights.row(oc).iter().filter(|&&w| w != 0).count();
    }

    scan
}

/// True if the pair statistics favour the 2-row block layout.
#[must_use]
pub const fn prefers_block_layout(paired_nonzeros: usize, active_pairs: usize, rows: usize) -> bool {
    paired_nonzeros * BLOCK_RATIO_LHS >= active_pairs * BLOCK_RATIO_RHS && rows > 1
}

/// Profile a weight matrix with the automatic layout rule.
///
/// Never fails; an all-zero matrix yields `nonzero_count == 0`, which the
/// caller must check before encoding.
#[must_use]
pub fn profile(weights: &DenseWeights<'_>) -> SparsityProfile {
    let scan = scan_pairs(weights);
    let use_block = prefers_block_layout(scan.paired_nonzeros, scan.active_pairs, weights.rows());
    build_profile(weights, scan, use_block)
}

/// Profile a weight matrix honouring an explicit layout policy.
///
/// # Errors
///
/// Returns an error if `config` is invalid, or if the block layout is
/// forced on a matrix with fewer than two rows.
pub fn profile_with_policy(
    weights: &DenseWeights<'_>,
    config: &EncoderConfig,
) -> Result<SparsityProfile> {
    config.validate()?;
    let rows = weights.rows();
    let scan = scan_pairs(weights);
    let use_block = match config.layout {
        LayoutPolicy::Auto => prefers_block_layout(scan.paired_nonzeros, scan.active_pairs, rows),
        LayoutPolicy::Unstructured => false,
        LayoutPolicy::Block => {
            if rows < BLOCK_ROWS {
                return Err(ConfigError::BlockNeedsPairs(rows).into());
            }
            true
        }
    };
    Ok(build_profile(weights, scan, use_block))
}

fn build_profile(weights: &DenseWeights<'_>, scan: PairScan, use_block: bool) -> SparsityProfile {
    let (rows, cols) = weights.dims();
    let element_nonzeros = scan.paired_nonzeros + scan.tail_nonzeros;

    let (nonzero_count, block_count, channel_group_count) = if use_block {
        (
            scan.active_pairs * BLOCK_ROWS + scan.tail_nonzeros,
            scan.active_pairs + scan.tail_nonzeros,
            rows.div_ceil(BLOCK_ROWS),
        )
    } else {
        (element_nonzeros, element_nonzeros, rows)
    };

    let profile = SparsityProfile {
        rows,
        cols,
        zero_count: rows * cols - element_nonzeros,
        nonzero_count,
        block_count,
        use_block_layout: use_block,
        channel_group_count,
        paired_nonzeros: scan.paired_nonzeros,
        active_pairs: scan.active_pairs,
    };

    tracing::debug!(
        rows,
        cols,
        zeros = profile.zero_count,
        active_pairs = profile.active_pairs,
        paired_nonzeros = profile.paired_nonzeros,
        layout = ?profile.layout(),
        "profiled sparse weights"
    );

    profile
}
