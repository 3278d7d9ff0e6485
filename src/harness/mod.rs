// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Conformance harness for sparse kernels.
//!
//! Each [`ConformanceCase`] synthesizes a weight matrix at a target sparsity,
//! profiles and encodes it, runs the float and int8 variants of a
//! [`SparseKernel`], and checks both against the dense [`ReferenceGemm`].
//!
//! ## Scales
//!
//! Operands use `scale_a = 1/127` per row, `scale_b = 1/127` and an output
//! scale `scale_c = k/127`. The float kernel receives the merged scale
//! `scale_a[row] * scale_b`; the int8 kernel receives merged scale, bias and
//! relu6 clip divided by `scale_c`.
//!
//! ## Tolerances
//!
//! - float: fails when max ratio and max diff both exceed their bounds
//! - int8: fails on any element off by more than one, or when the count of
//!   differing elements reaches `max(10, 1%)` of the output

pub mod compare;
pub mod config;
pub mod synth;

use std::fmt;
use std::time::Instant;

pub use compare::{int8_check, render_tensor, tensor_cmp, tensor_diff, Comparison, Int8Check};
pub use config::HarnessConfig;
pub use synth::{Operands, Synthesizer};

use crate::activation::{ActivationDescriptor, ActivationKind};
use crate::error::{Result, SpmmError};
use crate::kernels::{SparseKernel, SpmmArgs};
use crate::quant::INT8_MAX_ABS;
use crate::reference::{ReferenceGemm, ReferenceOperands};
use crate::sparse::{
    encode, profile_with_policy, DenseWeights, EncoderConfig, LayoutPolicy, SparseLayout,
};

/// One point of a conformance sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConformanceCase {
    /// Output channels.
    pub m: usize,
    /// Output width.
    pub n: usize,
    /// Input channels.
    pub k: usize,
    /// Add a per-channel bias.
    pub has_bias: bool,
    /// Zero weights in row pairs instead of independently.
    pub structured: bool,
    /// Layout selection passed to the profiler.
    pub layout: LayoutPolicy,
    /// Fused activation.
    pub activation: ActivationKind,
    /// Kernel threads. Block layout always runs with one.
    pub threads: usize,
    /// Target fraction of zero weights.
    pub sparsity: f32,
    /// Seed for operand synthesis.
    pub seed: u64,
}

impl ConformanceCase {
    /// Unbiased, unstructured identity case with automatic layout.
    #[must_use]
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self {
            m,
            n,
            k,
            has_bias: false,
            structured: false,
            layout: LayoutPolicy::Auto,
            activation: ActivationKind::Identity,
            threads: 1,
            sparsity: 0.5,
            seed: 0,
        }
    }

    /// `2 * m * n * k`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ops(&self) -> f64 {
        2.0 * self.m as f64 * self.n as f64 * self.k as f64
    }

    /// Check dimensions, thread count and sparsity.
    ///
    /// # Errors
    ///
    /// Returns [`SpmmError::InvalidConfig`] on a zero dimension, zero threads
    /// or a sparsity outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.m == 0 || self.n == 0 || self.k == 0 {
            return Err(SpmmError::InvalidConfig(format!(
                "case dimensions must be nonzero: {self}"
            )));
        }
        if self.threads == 0 {
            return Err(SpmmError::InvalidConfig("threads must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.sparsity) {
            return Err(SpmmError::InvalidConfig(format!(
                "sparsity {} outside [0, 1]",
                self.sparsity
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ConformanceCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "m={} n={} k={} bias={} structured={} layout={:?} act={} threads={} sparsity={}",
            self.m,
            self.n,
            self.k,
            self.has_bias,
            self.structured,
            self.layout,
            self.activation.name(),
            self.threads,
            self.sparsity
        )
    }
}

/// Wall-clock timing of the timed repetitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelTiming {
    /// Mean milliseconds per call.
    pub avg_ms: f64,
    /// Fastest call in milliseconds.
    pub min_ms: f64,
}

impl KernelTiming {
    /// Throughput at the mean time.
    #[must_use]
    pub fn mean_gops(&self, ops: f64) -> f64 {
        ops * 1e-6 / self.avg_ms
    }

    /// Throughput at the fastest time.
    #[must_use]
    pub fn max_gops(&self, ops: f64) -> f64 {
        ops * 1e-6 / self.min_ms
    }
}

/// Details of a passing case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseReport {
    /// Layout the profiler chose.
    pub layout: SparseLayout,
    /// Threads the kernel actually ran with.
    pub threads: usize,
    /// Float comparison, if checking was enabled.
    pub f32_cmp: Option<Comparison>,
    /// Int8 comparison, if checking was enabled.
    pub int8_check: Option<Int8Check>,
    /// Float kernel timing.
    pub f32_timing: KernelTiming,
    /// Int8 kernel timing.
    pub int8_timing: KernelTiming,
}

/// Result of a case that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseOutcome {
    /// Both kernel variants matched the reference.
    Passed(CaseReport),
    /// Every weight was zero, so the kernel was not invoked.
    SkippedEmpty,
}

/// Run one conformance case.
///
/// # Errors
///
/// Returns [`SpmmError::Mismatch`] with a tensor dump when a kernel output
/// is outside tolerance, and propagates configuration, encoding and kernel
/// errors.
pub fn run_case(
    case: &ConformanceCase,
    kernel: &dyn SparseKernel,
    config: &HarnessConfig,
) -> Result<CaseOutcome> {
    config.validate()?;
    case.validate()?;
    let ConformanceCase { m, n, k, .. } = *case;

    let operands =
        Synthesizer::new(case.seed).operands(m, n, k, case.sparsity, case.structured);
    let dense = DenseWeights::new(&operands.weights, m, k)?;
    let encoder_config = EncoderConfig {
        layout: case.layout,
        ..EncoderConfig::default()
    };
    let profile = profile_with_policy(&dense, &encoder_config)?;
    if profile.is_empty() {
        tracing::info!(case = %case, "all weights zero, kernel skipped");
        return Ok(CaseOutcome::SkippedEmpty);
    }
    let encoded = encode(&dense, n, &profile, &encoder_config)?;

    let threads = match encoded.layout {
        SparseLayout::Block => 1,
        SparseLayout::Unstructured => case.threads,
    };

    #[allow(clippy::cast_precision_loss)]
    let scale_c = k as f32 / INT8_MAX_ABS;
    let scale_a = vec![1.0 / INT8_MAX_ABS; m];
    let scale_b = 1.0 / INT8_MAX_ABS;
    let merged_f32: Vec<f32> = scale_a.iter().map(|s| s * scale_b).collect();
    let merged_i8: Vec<f32> = merged_f32.iter().map(|s| s / scale_c).collect();
    let bias_i8: Vec<f32> = operands.bias.iter().map(|b| b / scale_c).collect();
    let activation = ActivationDescriptor::new(case.activation);

    let f32_args = SpmmArgs {
        input: &operands.input,
        bias: case.has_bias.then_some(operands.bias.as_slice()),
        scales: &merged_f32,
        activation,
        threads,
    };
    let i8_args = SpmmArgs {
        bias: case.has_bias.then_some(bias_i8.as_slice()),
        scales: &merged_i8,
        activation: activation.rescaled(1.0 / scale_c),
        ..f32_args
    };

    let mut out_f32 = vec![0.0f32; m * n];
    let f32_timing = timed(config, || kernel.run_f32(&encoded, &f32_args, &mut out_f32))?;
    let mut out_i8 = vec![0i8; m * n];
    let int8_timing = timed(config, || kernel.run_i8(&encoded, &i8_args, &mut out_i8))?;

    let ops = case.ops();
    tracing::info!(
        kernel = kernel.name(),
        case = %case,
        layout = ?encoded.layout,
        threads,
        f32_avg_ms = f32_timing.avg_ms,
        f32_min_ms = f32_timing.min_ms,
        f32_mean_gops = f32_timing.mean_gops(ops),
        f32_max_gops = f32_timing.max_gops(ops),
        int8_avg_ms = int8_timing.avg_ms,
        int8_min_ms = int8_timing.min_ms,
        int8_mean_gops = int8_timing.mean_gops(ops),
        int8_max_gops = int8_timing.max_gops(ops),
        "sparse kernel timing"
    );

    let mut report = CaseReport {
        layout: encoded.layout,
        threads,
        f32_cmp: None,
        int8_check: None,
        f32_timing,
        int8_timing,
    };
    if !config.check_result {
        return Ok(CaseOutcome::Passed(report));
    }

    let reference = ReferenceGemm::new(m, n, k)
        .with_activation(activation)
        .compute(&ReferenceOperands {
            a: &operands.weights,
            b: &operands.input,
            scale_a: &scale_a,
            scale_b,
            bias: case.has_bias.then_some(operands.bias.as_slice()),
            scale_c,
        })?;

    let cmp = tensor_cmp(&reference.f32, &out_f32);
    tracing::info!(max_diff = cmp.max_diff, max_ratio = cmp.max_ratio, "fp32 compare result");
    if !compare::f32_within_tolerance(&cmp, config) {
        return Err(mismatch(case, "fp32", &reference.f32, &out_f32, n));
    }

    let check = int8_check(&reference.i8, &out_i8, config.int8_max_abs_diff);
    let budget = config.int8_outlier_budget(out_i8.len());
    tracing::info!(
        outliers = check.outliers,
        budget,
        "int8 compare result"
    );
    if let Some(idx) = check.first_violation {
        tracing::error!(
            index = idx,
            reference = reference.f32[idx],
            after_scale = reference.f32[idx] / scale_c,
            "int8 element off by more than {}",
            config.int8_max_abs_diff
        );
    }
    if !check.passed(budget) {
        return Err(mismatch(case, "int8", &reference.i8, &out_i8, n));
    }

    report.f32_cmp = Some(cmp);
    report.int8_check = Some(check);
    Ok(CaseOutcome::Passed(report))
}

fn timed<F>(config: &HarnessConfig, mut call: F) -> Result<KernelTiming>
where
    F: FnMut() -> Result<()>,
{
    for _ in 0..config.warmup {
        call()?;
    }
    let mut total = 0.0;
    let mut min_ms = f64::INFINITY;
    for _ in 0..config.repeats {
        let start = Instant::now();
        call()?;
        let ms = start.elapsed().as_secs_f64() * 1e3;
        total += ms;
        min_ms = min_ms.min(ms);
    }
    #[allow(clippy::cast_precision_loss)]
    let avg_ms = total / config.repeats as f64;
    Ok(KernelTiming { avg_ms, min_ms })
}

fn mismatch<T>(case: &ConformanceCase, what: &str, expected: &[T], actual: &[T], cols: usize) -> SpmmError
where
    T: Copy + Into<f64> + fmt::Display,
{
    let diff = tensor_diff(expected, actual);
    let report = format!(
        "{what} reference:\n{}{what} kernel:\n{}{what} diff:\n{}",
        render_tensor(expected, cols),
        render_tensor(actual, cols),
        render_tensor(&diff, cols),
    );
    tracing::error!(case = %case, report = %report, "{what} output outside tolerance");
    SpmmError::Mismatch {
        case: case.to_string(),
        report,
    }
}

/// Counts from a sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Cases whose outputs matched.
    pub passed: usize,
    /// Cases skipped because every weight was zero.
    pub skipped: usize,
}

/// A list of conformance cases run in order.
#[derive(Debug, Clone, Default)]
pub struct ConformanceSweep {
    cases: Vec<ConformanceCase>,
}

impl ConformanceSweep {
    /// Sweep over explicit cases.
    #[must_use]
    pub fn new(cases: Vec<ConformanceCase>) -> Self {
        Self { cases }
    }

    /// The full grid: m in {1, 16, 64, 128}, n in {1, 32, 128, 256},
    /// k in {1, 109, 512}, with and without bias and structured pruning,
    /// identity and relu, 1/2/4 threads, sparsity 0.5/0.7/0.8.
    #[must_use]
    pub fn full() -> Self {
        let mut cases = Vec::new();
        for m in [1, 16, 64, 128] {
            for n in [1, 32, 128, 256] {
                for k in [1, 109, 512] {
                    for has_bias in [false, true] {
                        for structured in [false, true] {
                            for activation in [ActivationKind::Identity, ActivationKind::Relu] {
                                for threads in [1, 2, 4] {
                                    for sparsity in [0.5, 0.7, 0.8] {
                                        cases.push(ConformanceCase {
                                            has_bias,
                                            structured,
                                            activation,
                                            threads,
                                            sparsity,
                                            seed: cases.len() as u64,
                                            ..ConformanceCase::new(m, n, k)
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Self { cases }
    }

    /// Small grid covering odd row counts and every activation.
    #[must_use]
    pub fn quick() -> Self {
        let activations = [
            ActivationKind::Identity,
            ActivationKind::Relu,
            ActivationKind::Relu6,
            ActivationKind::LeakyRelu,
        ];
        let mut cases = Vec::new();
        for m in [1, 16, 17] {
            for n in [1, 32] {
                for k in [1, 109] {
                    for has_bias in [false, true] {
                        for structured in [false, true] {
                            for activation in activations {
                                let seed = cases.len() as u64;
                                cases.push(ConformanceCase {
                                    has_bias,
                                    structured,
                                    activation,
                                    threads: if seed % 2 == 0 { 1 } else { 4 },
                                    sparsity: 0.7,
                                    seed,
                                    ..ConformanceCase::new(m, n, k)
                                });
                            }
                        }
                    }
                }
            }
        }
        Self { cases }
    }

    /// The cases in run order.
    #[must_use]
    pub fn cases(&self) -> &[ConformanceCase] {
        &self.cases
    }

    /// Run every case, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first case error.
    pub fn run(&self, kernel: &dyn SparseKernel, config: &HarnessConfig) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        for case in &self.cases {
            match run_case(case, kernel, config)? {
                CaseOutcome::Passed(_) => {
                    tracing::info!(case = %case, "passed");
                    summary.passed += 1;
                }
                CaseOutcome::SkippedEmpty => summary.skipped += 1,
            }
        }
        Ok(summary)
    }
}
