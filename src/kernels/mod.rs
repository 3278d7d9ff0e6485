// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Sparse kernel capability interface.
//!
//! A sparse kernel consumes [`EncodedSparseWeights`] together with a dense
//! int8 activation buffer laid out `(in_channels, output_width)` and writes
//! a `(out_channels, output_width)` result:
//!
//! ```text
//! out[oc, j] = act(sum_k W[oc, k] * X[k, j] * scale[oc] + bias[oc])
//! ```
//!
//! Implementations provide four variants, {unstructured, block} x
//! {f32 output, int8 output}. [`SparseKernel::run_f32`] and
//! [`SparseKernel::run_i8`] dispatch on the encoded layout.

pub mod cpu;

pub use cpu::CpuSparseKernel;

use crate::activation::ActivationDescriptor;
use crate::error::{Result, SpmmError};
use crate::sparse::{EncodedSparseWeights, SparseLayout};

/// Per-invocation operands besides the encoded weights.
#[derive(Debug, Clone, Copy)]
pub struct SpmmArgs<'a> {
    /// Dense activations `(in_channels, output_width)` row-major.
    pub input: &'a [i8],
    /// Optional per-output-channel bias, in output units.
    pub bias: Option<&'a [f32]>,
    /// Per-output-channel scale applied to the int32 accumulator.
    pub scales: &'a [f32],
    /// Fused activation.
    pub activation: ActivationDescriptor,
    /// Worker threads the kernel may use.
    pub threads: usize,
}

impl SpmmArgs<'_> {
    /// Check operand sizes against the encoded weights and the output length.
    ///
    /// # Errors
    ///
    /// Returns [`SpmmError::ShapeMismatch`] for any size disagreement,
    /// [`SpmmError::InvalidConfig`] for zero threads, and propagates
    /// [`EncodedSparseWeights::check_consistency`] failures.
    pub fn validate(&self, weights: &EncodedSparseWeights, out_len: usize) -> Result<()> {
        let (rows, cols) = weights.dims();
        let width = weights.output_width;

        if self.input.len() != cols * width {
            return Err(SpmmError::ShapeMismatch {
                expected: vec![cols, width],
                actual: vec![self.input.len()],
            });
        }
        if self.scales.len() != rows {
            return Err(SpmmError::ShapeMismatch {
                expected: vec![rows],
                actual: vec![self.scales.len()],
            });
        }
        if let Some(bias) = self.bias {
            if bias.len() != rows {
                return Err(SpmmError::ShapeMismatch {
                    expected: vec![rows],
                    actual: vec![bias.len()],
                });
            }
        }
        if out_len != rows * width {
            return Err(SpmmError::ShapeMismatch {
                expected: vec![rows, width],
                actual: vec![out_len],
            });
        }
        if self.threads == 0 {
            return Err(SpmmError::InvalidConfig("threads must be at least 1".into()));
        }
        weights.check_consistency()
    }
}

/// A sparse int8 matrix-multiply implementation.
pub trait SparseKernel: Send + Sync {
    /// Kernel name for logs.
    fn name(&self) -> &'static str;

    /// Element layout, f32 output.
    ///
    /// # Errors
    ///
    /// Returns error on operand mismatch or a corrupt encoding.
    fn unstructured_f32(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [f32],
    ) -> Result<()>;

    /// Element layout, int8 output. Scales, bias and activation clip are
    /// expected in units of the output scale.
    ///
    /// # Errors
    ///
    /// Returns error on operand mismatch or a corrupt encoding.
    fn unstructured_i8(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [i8],
    ) -> Result<()>;

    /// 2-row block layout, f32 output.
    ///
    /// # Errors
    ///
    /// Returns error on operand mismatch or a corrupt encoding.
    fn block_f32(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [f32],
    ) -> Result<()>;

    /// 2-row block layout, int8 output.
    ///
    /// # Errors
    ///
    /// Returns error on operand mismatch or a corrupt encoding.
    fn block_i8(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [i8],
    ) -> Result<()>;

    /// Dispatch the f32-output variant matching `weights.layout`.
    ///
    /// # Errors
    ///
    /// See the variant methods.
    fn run_f32(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [f32],
    ) -> Result<()> {
        match weights.layout {
            SparseLayout::Unstructured => self.unstructured_f32(weights, args, out),
            SparseLayout::Block => self.block_f32(weights, args, out),
        }
    }

    /// Dispatch the int8-output variant matching `weights.layout`.
    ///
    /// # Errors
    ///
    /// See the variant methods.
    fn run_i8(
        &self,
        weights: &EncodedSparseWeights,
        args: &SpmmArgs<'_>,
        out: &mut [i8],
    ) -> Result<()> {
        match weights.layout {
            SparseLayout::Unstructured => self.unstructured_i8(weights, args, out),
            SparseLayout::Block => self.block_i8(weights, args, out),
        }
    }
}

/// Reject a variant called with weights of the other layout.
pub(crate) fn expect_layout(weights: &EncodedSparseWeights, layout: SparseLayout) -> Result<()> {
    if weights.layout != layout {
        return Err(SpmmError::Kernel(format!(
            "{layout:?} kernel called with {:?} weights",
            weights.layout
        )));
    }
    Ok(())
}
