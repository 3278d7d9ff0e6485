// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Random operand synthesis for conformance cases.
//!
//! Values are drawn uniformly from `[-127, 127]`. A weight `v` is zeroed when
//! `(v + 128) / 255` falls below the target sparsity, and every weight is
//! zeroed at sparsity 1. For structured cases the decision is taken once per
//! row pair and column, so both rows of a pair are zeroed together; an odd
//! trailing row is thresholded per element.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Operands of one conformance case.
#[derive(Debug, Clone)]
pub struct Operands {
    /// Weights `[m, k]`.
    pub weights: Vec<i8>,
    /// Activations `[k, n]`.
    pub input: Vec<i8>,
    /// Bias `[m]` in real units, drawn from `[-1, 1]`.
    pub bias: Vec<f32>,
}

/// Generator seeded per case so runs are reproducible.
#[derive(Debug)]
pub struct Synthesizer {
    rng: StdRng,
}

impl Synthesizer {
    /// Seeded generator.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform int8 values in `[-127, 127]`.
    pub fn int8(&mut self, len: usize) -> Vec<i8> {
        (0..len).map(|_| self.rng.gen_range(-127..=127)).collect()
    }

    /// Uniform f32 values in `[-1, 1]`.
    pub fn bias(&mut self, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.rng.gen_range(-1.0..=1.0)).collect()
    }

    /// Draw all operands for an `m x k` by `k x n` product.
    pub fn operands(
        &mut self,
        m: usize,
        n: usize,
        k: usize,
        sparsity: f32,
        structured: bool,
    ) -> Operands {
        let mut weights = self.int8(m * k);
        if structured {
            sparsify_pairs(&mut weights, m, k, sparsity);
        } else {
            sparsify(&mut weights, sparsity);
        }
        Operands {
            weights,
            input: self.int8(k * n),
            bias: self.bias(m),
        }
    }
}

fn below_threshold(v: i8, sparsity: f32) -> bool {
    sparsity >= 1.0 || (f32::from(v) + 128.0) / 255.0 < sparsity
}

/// Zero elements independently.
pub fn sparsify(weights: &mut [i8], sparsity: f32) {
    for w in weights.iter_mut() {
        if below_threshold(*w, sparsity) {
            *w = 0;
        }
    }
}

/// Zero row pairs together, keyed on the upper row's value.
pub fn sparsify_pairs(weights: &mut [i8], rows: usize, cols: usize, sparsity: f32) {
    let paired_rows = rows / 2 * 2;
    for pair in (0..paired_rows).step_by(2) {
        for c in 0..cols {
            let upper = pair * cols + c;
            if below_threshold(weights[upper], sparsity) {
                weights[upper] = 0;
                weights[upper + cols] = 0;
            }
        }
    }
    sparsify(&mut weights[paired_rows * cols..], sparsity);
}
