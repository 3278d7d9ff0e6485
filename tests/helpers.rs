//! Test utilities and fixtures for sparse prepacking integration tests.
//!
//! Provides weight pattern generation, a naive dense product for checking
//! kernel output, and invariant checks over encoded weights.

#![allow(dead_code)]

use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spmm_prepack::sparse::{
    count_zeros, encode, profile_with_policy, DenseWeights, EncodedSparseWeights, EncoderConfig,
    SparseLayout, SparsityProfile,
};

/// Weight patterns used across the integration tests.
#[derive(Debug, Clone, Copy)]
pub enum WeightPattern {
    /// Every element zero.
    AllZeros,
    /// Every element nonzero.
    Dense,
    /// Elements zeroed independently with the given probability.
    Scattered(f64),
    /// Row pairs zeroed together with the given probability.
    PairCorrelated(f64),
    /// One nonzero at `(row, col)`.
    Single { row: usize, col: usize },
}

/// A generated weight matrix.
#[derive(Debug, Clone)]
pub struct TestMatrix {
    /// Row-major data.
    pub data: Vec<i8>,
    /// Output channels.
    pub rows: usize,
    /// Input channels.
    pub cols: usize,
}

impl TestMatrix {
    /// Borrow as dense weights.
    pub fn weights(&self) -> DenseWeights<'_> {
        DenseWeights::new(&self.data, self.rows, self.cols).expect("valid test matrix")
    }
}

/// Fixture generators.
pub struct TestFixtures;

impl TestFixtures {
    /// Generate a matrix following `pattern`.
    pub fn matrix(rows: usize, cols: usize, pattern: WeightPattern, seed: u64) -> TestMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let nonzero = |rng: &mut StdRng| -> i8 {
            let v: i8 = rng.gen_range(1..=127);
            if rng.gen_bool(0.5) {
                -v
            } else {
                v
            }
        };

        let mut data = vec![0i8; rows * cols];
        match pattern {
            WeightPattern::AllZeros => {}
            WeightPattern::Dense => data.iter_mut().for_each(|w| *w = nonzero(&mut rng)),
            WeightPattern::Scattered(p) => {
                for w in &mut data {
                    if !rng.gen_bool(p) {
                        *w = nonzero(&mut rng);
                    }
                }
            }
            WeightPattern::PairCorrelated(p) => {
                for pair in (0..rows).step_by(2) {
                    for c in 0..cols {
                        if rng.gen_bool(p) {
                            continue;
                        }
                        data[pair * cols + c] = nonzero(&mut rng);
                        if pair + 1 < rows {
                            data[(pair + 1) * cols + c] = nonzero(&mut rng);
                        }
                    }
                }
            }
            WeightPattern::Single { row, col } => data[row * cols + col] = nonzero(&mut rng),
        }
        TestMatrix { data, rows, cols }
    }

    /// Random int8 activations `[k, n]`.
    pub fn activations(k: usize, n: usize, seed: u64) -> Vec<i8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..k * n).map(|_| rng.gen_range(-127..=127)).collect()
    }

    /// Profile and encode with a layout policy.
    pub fn encode(
        matrix: &TestMatrix,
        output_width: usize,
        config: &EncoderConfig,
    ) -> Result<(SparsityProfile, EncodedSparseWeights)> {
        let weights = matrix.weights();
        let profile = profile_with_policy(&weights, config)?;
        let encoded = encode(&weights, output_width, &profile, config)?;
        Ok((profile, encoded))
    }
}

/// Checks shared by several tests.
pub struct ValidationUtils;

impl ValidationUtils {
    /// Plain int32 product of `[m, k]` weights and `[k, n]` activations.
    pub fn dense_product(w: &[i8], x: &[i8], m: usize, k: usize, n: usize) -> Vec<i32> {
        let mut out = vec![0i32; m * n];
        for i in 0..m {
            for p in 0..k {
                let wv = i32::from(w[i * k + p]);
                if wv == 0 {
                    continue;
                }
                for j in 0..n {
                    out[i * n + j] += wv * i32::from(x[p * n + j]);
                }
            }
        }
        out
    }

    /// Columns visited per step by a row-major scan, in encoder order.
    pub fn expected_columns(matrix: &TestMatrix, layout: SparseLayout) -> Vec<usize> {
        let w = matrix.weights();
        let paired_rows = match layout {
            SparseLayout::Block => matrix.rows / 2 * 2,
            SparseLayout::Unstructured => 0,
        };
        let mut columns = Vec::new();
        for pair in (0..paired_rows).step_by(2) {
            for c in 0..matrix.cols {
                if w.get(pair, c) != 0 || w.get(pair + 1, c) != 0 {
                    columns.push(c);
                }
            }
        }
        for r in paired_rows..matrix.rows {
            for c in 0..matrix.cols {
                if w.get(r, c) != 0 {
                    columns.push(c);
                }
            }
        }
        columns
    }

    /// Count, prefix and zero invariants between a profile and its encoding.
    pub fn check_invariants(
        matrix: &TestMatrix,
        profile: &SparsityProfile,
        encoded: &EncodedSparseWeights,
    ) -> Result<()> {
        encoded.check_consistency()?;
        ensure!(
            profile.zero_count == count_zeros(&matrix.weights()),
            "zero count disagrees with a direct scan"
        );
        ensure!(
            encoded.values.len() == profile.nonzero_count,
            "values {} != profile {}",
            encoded.values.len(),
            profile.nonzero_count
        );
        ensure!(
            encoded.advance_deltas.len() == profile.block_count,
            "deltas {} != steps {}",
            encoded.advance_deltas.len(),
            profile.block_count
        );
        ensure!(
            encoded.group_prefix_counts.len() == profile.channel_group_count,
            "prefix entries {} != groups {}",
            encoded.group_prefix_counts.len(),
            profile.channel_group_count
        );
        ensure!(
            encoded
                .group_prefix_counts
                .windows(2)
                .all(|p| p[0] <= p[1]),
            "prefix counts decrease"
        );
        ensure!(
            encoded.step_count() == profile.block_count,
            "last prefix entry does not match the step count"
        );

        match encoded.layout {
            SparseLayout::Unstructured => {
                ensure!(
                    encoded.values.iter().all(|&v| v != 0),
                    "zero stored in unstructured layout"
                );
                ensure!(
                    encoded.step_count() == encoded.values.len(),
                    "unstructured steps and values differ"
                );
            }
            SparseLayout::Block => {
                let paired_steps = encoded
                    .group_prefix_counts
                    .get(encoded.paired_group_count().wrapping_sub(1))
                    .map_or(0, |&n| n as usize);
                for pair in encoded.values[..paired_steps * 2].chunks_exact(2) {
                    ensure!(pair != [0, 0], "block pair stored without a nonzero");
                }
                ensure!(
                    encoded.values[paired_steps * 2..].iter().all(|&v| v != 0),
                    "zero stored in the trailing row"
                );
            }
        }
        Ok(())
    }
}
