// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Portable CPU sparse kernel.
//!
//! Walks `values`, `group_prefix_counts` and `advance_deltas` the way a
//! SIMD kernel does, without ever materializing column indices:
//!
//! - `group_prefix_counts[g] - group_prefix_counts[g - 1]` steps per group
//! - the activation pointer for group `g` starts at the folded delta of the
//!   previous group's last step, relative to `first_nonzero_column`
//! - inside a group the pointer advances by one delta per step
//!
//! Unstructured variants split output rows across a rayon pool. Block
//! variants run on the calling thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{expect_layout, SparseKernel, SpmmArgs};
use crate::error::{Result, SpmmError};
use crate::quant::round_to_i8;
use crate::sparse::{EncodedSparseWeights, SparseLayout};

/// Reference CPU implementation of all four sparse kernel variants.
///
/// Thread pools are built lazily per thread count and reused.
#[derive(Default)]
pub struct CpuSparseKernel {
    pools: Mutex<HashMap<usize, Arc<ThreadPool>>>,
}

impl std::fmt::Debug for CpuSparseKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuSparseKernel").finish_non_exhaustive()
    }
}

impl CpuSparseKernel {
    /// Create a kernel with no pools built yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self, threads: usize) -> Result<Arc<ThreadPool>> {
        let mut pools = self
            .pools
            .lock()
            .map_err(|_| SpmmError::Kernel("thread pool cache poisoned".into()))?;
        if let Some(pool) = pools.get(&threads) {
            return Ok(Arc::clone(pool));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| SpmmError::Kernel(format!("failed to build thread pool: {e}")))?;
        let pool = Arc::new(pool);
        pools.insert(threads, Arc::clone(&pool));
        Ok(pool)
    }

    fn unstructured<T, F>(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [T],
        store: F,
    ) -> Result<()>
    where
        T: Send,
        F: Fn(f32) -> T + Sync,
    {
        expect_layout(weights, SparseLayout::Unstructured)?;
        args.validate(weights, out.len())?;
        check_int8_stride(weights)?;
        let width = weights.output_width;
        if width == 0 {
            return Ok(());
        }

        if args.threads == 1 {
            return out
                .chunks_mut(width)
                .enumerate()
                .try_for_each(|(row, out_row)| compute_group(weights, args, row, out_row, &store));
        }

        let pool = self.pool(args.threads)?;
        pool.install(|| {
            out.par_chunks_mut(width)
                .enumerate()
                .try_for_each(|(row, out_row)| compute_group(weights, args, row, out_row, &store))
        })
    }

    fn block<T, F>(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [T],
        store: F,
    ) -> Result<()>
    where
        F: Fn(f32) -> T,
    {
        expect_layout(weights, SparseLayout::Block)?;
        args.validate(weights, out.len())?;
        check_int8_stride(weights)?;
        let width = weights.output_width;
        if width == 0 {
            return Ok(());
        }
        if args.threads > 1 {
            tracing::debug!(
                threads = args.threads,
                "block sparse kernel runs on the calling thread"
            );
        }

        for group in 0..weights.group_count() {
            let rows = weights.group_rows(group);
            let out_rows = &mut out[rows.start * width..rows.end * width];
            compute_group(weights, args, group, out_rows, &store)?;
        }
        Ok(())
    }
}

/// The CPU kernel reads int8 activations, one byte per element.
fn check_int8_stride(weights: &EncodedSparseWeights) -> Result<()> {
    if weights.row_stride_bytes != weights.output_width {
        return Err(SpmmError::Kernel(format!(
            "row stride {} bytes does not match int8 activations of width {}",
            weights.row_stride_bytes, weights.output_width
        )));
    }
    Ok(())
}

/// Compute every output row of one group.
fn compute_group<T, F>(
    weights: &EncodedSparseWeights,
    args: &SpmmArgs<'_>,
    group: usize,
    out_rows: &mut [T],
    store: &F,
) -> Result<()>
where
    F: Fn(f32) -> T,
{
    let width = weights.output_width;
    let rows = weights.group_rows(group);
    let mut acc = vec![0i32; rows.len() * width];

    if let Some(mut offset) = weights.group_entry_offset(group) {
        #[allow(clippy::cast_possible_wrap)]
        let base = (weights.first_nonzero_column * weights.row_stride_bytes) as i64;
        let steps = weights.group_steps(group);

        for step in steps.clone() {
            let x = activation_row(args.input, base + offset, width)?;
            let first_value = weights.value_offset(step);

            for (lane, acc_row) in acc.chunks_exact_mut(width).enumerate() {
                let w = i32::from(weights.values[first_value + lane]);
                if w == 0 {
                    continue;
                }
                for (a, &xi) in acc_row.iter_mut().zip(x) {
                    *a += w * i32::from(xi);
                }
            }

            if step + 1 < steps.end {
                offset += i64::from(weights.advance_deltas[step]);
            }
        }
    }

    for ((oc, acc_row), out_row) in rows
        .zip(acc.chunks_exact(width))
        .zip(out_rows.chunks_exact_mut(width))
    {
        let scale = args.scales[oc];
        let bias = args.bias.map_or(0.0, |b| b[oc]);
        for (o, &a) in out_row.iter_mut().zip(acc_row) {
            // Accumulators stay far below 2^24 for int8 operands.
            #[allow(clippy::cast_precision_loss)]
            let y = a as f32 * scale + bias;
            *o = store(args.activation.apply(y));
        }
    }
    Ok(())
}

fn activation_row(input: &[i8], start: i64, width: usize) -> Result<&[i8]> {
    usize::try_from(start)
        .ok()
        .and_then(|s| input.get(s..s + width))
        .ok_or_else(|| {
            SpmmError::CorruptEncoding(format!(
                "activation offset {start} outside buffer of {} bytes",
                input.len()
            ))
        })
}

impl SparseKernel for CpuSparseKernel {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn unstructured_f32(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [f32],
    ) -> Result<()> {
        self.unstructured(weights, args, out, |y| y)
    }

    fn unstructured_i8(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [i8],
    ) -> Result<()> {
        self.unstructured(weights, args, out, round_to_i8)
    }

    fn block_f32(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [f32],
    ) -> Result<()> {
        self.block(weights, args, out, |y| y)
    }

    fn block_i8(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [i8],
    ) -> Result<()> {
        self.block(weights, args, out, round_to_i8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{ActivationDescriptor, ActivationKind};
    use crate::sparse::{encode, profile_with_policy, DenseWeights, EncoderConfig};

    /// Plain dense int32 product for comparison.
    fn dense_product(w: &[i8], x: &[i8], m: usize, k: usize, n: usize) -> Vec<i32> {
        let mut out = vec![0i32; m * n];
        for i in 0..m {
            for p in 0..k {
                for j in 0..n {
                    out[i * n + j] += i32::from(w[i * k + p]) * i32::from(x[p * n + j]);
                }
            }
        }
        out
    }

    fn sample(m: usize, k: usize, n: usize) -> (Vec<i8>, Vec<i8>) {
        let w: Vec<i8> = (0..m * k)
            .map(|i| if i % 3 == 1 { 0 } else { ((i * 7) % 11) as i8 - 5 })
            .collect();
        let x: Vec<i8> = (0..k * n).map(|i| ((i * 5) % 13) as i8 - 6).collect();
        (w, x)
    }

    fn run_f32(config: &EncoderConfig, threads: usize) -> Result<()> {
        let (m, k, n) = (5, 9, 4);
        let (w, x) = sample(m, k, n);
        let weights = DenseWeights::new(&w, m, k)?;
        let profile = profile_with_policy(&weights, config)?;
        let encoded = encode(&weights, n, &profile, config)?;

        let scales = vec![1.0f32; m];
        let args = SpmmArgs {
            input: &x,
            bias: None,
            scales: &scales,
            activation: ActivationDescriptor::default(),
            threads,
        };
        let mut out = vec![0.0f32; m * n];
        CpuSparseKernel::new().run_f32(&encoded, &args, &mut out)?;

        let expected = dense_product(&w, &x, m, k, n);
        for (o, e) in out.iter().zip(&expected) {
            #[allow(clippy::cast_precision_loss)]
            let e = *e as f32;
            assert!((o - e).abs() < 1e-4, "got {o}, expected {e}");
        }
        Ok(())
    }

    #[test]
    fn test_unstructured_matches_dense() -> Result<()> {
        run_f32(&EncoderConfig::forced_unstructured(), 1)
    }

    #[test]
    fn test_unstructured_multithreaded() -> Result<()> {
        run_f32(&EncoderConfig::forced_unstructured(), 3)
    }

    #[test]
    fn test_block_matches_dense() -> Result<()> {
        run_f32(&EncoderConfig::forced_block(), 1)
    }

    #[test]
    fn test_int8_output_with_bias_and_relu() -> Result<()> {
        let (m, k, n) = (4, 6, 3);
        let (w, x) = sample(m, k, n);
        let weights = DenseWeights::new(&w, m, k)?;
        let config = EncoderConfig::forced_unstructured();
        let profile = profile_with_policy(&weights, &config)?;
        let encoded = encode(&weights, n, &profile, &config)?;

        let scales = vec![0.5f32; m];
        let bias = vec![1.0f32, -1.0, 0.0, 2.0];
        let args = SpmmArgs {
            input: &x,
            bias: Some(&bias),
            scales: &scales,
            activation: ActivationDescriptor::new(ActivationKind::Relu),
            threads: 2,
        };
        let mut out = vec![0i8; m * n];
        CpuSparseKernel::new().run_i8(&encoded, &args, &mut out)?;

        let expected = dense_product(&w, &x, m, k, n);
        for (idx, (&o, &e)) in out.iter().zip(&expected).enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let y = (e as f32 * 0.5 + bias[idx / n]).max(0.0);
            assert_eq!(o, round_to_i8(y));
        }
        Ok(())
    }

    #[test]
    fn test_layout_mismatch_rejected() -> Result<()> {
        let (w, x) = sample(2, 3, 2);
        let weights = DenseWeights::new(&w, 2, 3)?;
        let config = EncoderConfig::forced_block();
        let profile = profile_with_policy(&weights, &config)?;
        let encoded = encode(&weights, 2, &profile, &config)?;

        let scales = vec![1.0f32; 2];
        let args = SpmmArgs {
            input: &x,
            bias: None,
            scales: &scales,
            activation: ActivationDescriptor::default(),
            threads: 1,
        };
        let mut out = vec![0.0f32; 4];
        let kernel = CpuSparseKernel::new();
        assert!(matches!(
            kernel.unstructured_f32(&encoded, &args, &mut out),
            Err(SpmmError::Kernel(_))
        ));
        Ok(())
    }

    #[test]
    fn test_operand_shape_checks() -> Result<()> {
        let (w, x) = sample(2, 3, 2);
        let weights = DenseWeights::new(&w, 2, 3)?;
        let config = EncoderConfig::forced_unstructured();
        let profile = profile_with_policy(&weights, &config)?;
        let encoded = encode(&weights, 2, &profile, &config)?;

        let scales = vec![1.0f32; 2];
        let short_input = &x[..5];
        let args = SpmmArgs {
            input: short_input,
            bias: None,
            scales: &scales,
            activation: ActivationDescriptor::default(),
            threads: 1,
        };
        let mut out = vec![0.0f32; 4];
        let kernel = CpuSparseKernel::new();
        assert!(matches!(
            kernel.run_f32(&encoded, &args, &mut out),
            Err(SpmmError::ShapeMismatch { .. })
        ));

        let args = SpmmArgs {
            input: &x,
            threads: 0,
            ..args
        };
        assert!(kernel.run_f32(&encoded, &args, &mut out).is_err());
        Ok(())
    }
}
