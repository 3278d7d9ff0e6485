// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Output comparison and diagnostic dumps.

use std::fmt::Display;

use super::config::HarnessConfig;

const RATIO_EPS: f64 = 1e-6;

/// Worst element difference between two tensors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Comparison {
    /// Absolute difference at the element holding `max_ratio`.
    pub max_diff: f64,
    /// Largest difference relative to the expected value.
    pub max_ratio: f64,
}

/// Compare `actual` against `expected`.
///
/// `max_ratio` is the largest `|actual - expected| / (|expected| + 1e-6)`
/// over all elements. `max_diff` is taken at that same element, so a large
/// absolute error on a large expected value only fails when nothing else
/// is relatively worse.
#[must_use]
pub fn tensor_cmp<T: Copy + Into<f64>>(expected: &[T], actual: &[T]) -> Comparison {
    let mut cmp = Comparison::default();
    for (&e, &a) in expected.iter().zip(actual) {
        let (e, a) = (e.into(), a.into());
        let diff = (a - e).abs();
        let ratio = diff / (e.abs() + RATIO_EPS);
        if ratio > cmp.max_ratio {
            cmp.max_ratio = ratio;
            cmp.max_diff = diff;
        }
    }
    cmp
}

/// Element-wise `actual - expected`.
#[must_use]
pub fn tensor_diff<T: Copy + Into<f64>>(expected: &[T], actual: &[T]) -> Vec<f64> {
    expected
        .iter()
        .zip(actual)
        .map(|(&e, &a)| a.into() - e.into())
        .collect()
}

/// Float output passes unless both ratio and absolute difference are over.
#[must_use]
pub fn f32_within_tolerance(cmp: &Comparison, config: &HarnessConfig) -> bool {
    !(cmp.max_ratio.abs() > config.f32_max_ratio && cmp.max_diff.abs() > config.f32_max_diff)
}

/// Outcome of the int8 element check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Int8Check {
    /// Elements differing by a nonzero amount.
    pub outliers: usize,
    /// First element whose difference exceeds the per-element bound.
    pub first_violation: Option<usize>,
}

impl Int8Check {
    /// True when no element is over the bound and outliers stay in budget.
    #[must_use]
    pub fn passed(&self, budget: usize) -> bool {
        self.first_violation.is_none() && self.outliers < budget
    }
}

/// Count int8 elements that differ, and find the first one over the bound.
#[must_use]
pub fn int8_check(expected: &[i8], actual: &[i8], max_abs_diff: i32) -> Int8Check {
    let mut outliers = 0;
    let mut first_violation = None;
    for (idx, (&e, &a)) in expected.iter().zip(actual).enumerate() {
        let diff = (i32::from(a) - i32::from(e)).abs();
        if diff > max_abs_diff {
            first_violation = Some(idx);
            break;
        }
        if diff != 0 {
            outliers += 1;
        }
    }
    Int8Check {
        outliers,
        first_violation,
    }
}

/// Render a row-major `[rows, cols]` tensor one row per line.
#[must_use]
pub fn render_tensor<T: Display>(data: &[T], cols: usize) -> String {
    let mut out = String::new();
    if cols == 0 {
        return out;
    }
    for row in data.chunks(cols) {
        for (i, v) in row.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{v:>10.4}"));
        }
        out.push('\n');
    }
    out
}
