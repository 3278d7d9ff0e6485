// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Dense reference GEMM used as a conformance oracle.
//!
//! Operands are dequantized on the host, multiplied with candle on the CPU,
//! then bias and activation are applied and the result is requantized:
//!
//! ```text
//! C[m, n] = act(sum_k (A[m, k] * scale_a[m]) * (B[k, n] * scale_b) + bias[m])
//! C_q     = clamp(round(C / scale_c), -127, 127)
//! ```
//!
//! This is never on the inference path.

use candle_core::{Device, Tensor};

use crate::activation::ActivationDescriptor;
use crate::error::{Result, SpmmError};
use crate::quant::{dequantize_i8, quantize_f32};

/// Shape and fused-epilogue description of a reference GEMM.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceGemm {
    /// Output rows.
    pub m: usize,
    /// Output columns.
    pub n: usize,
    /// Reduction length.
    pub k: usize,
    /// `A` is stored `[k, m]` instead of `[m, k]`.
    pub trans_a: bool,
    /// `B` is stored `[n, k]` instead of `[k, n]`.
    pub trans_b: bool,
    /// Activation applied after bias.
    pub activation: ActivationDescriptor,
}

/// Quantized operands and scales for [`ReferenceGemm::compute`].
#[derive(Debug, Clone, Copy)]
pub struct ReferenceOperands<'a> {
    /// Left operand, int8.
    pub a: &'a [i8],
    /// Right operand, int8.
    pub b: &'a [i8],
    /// Scale of `A`, per tensor (length 1) or per output row (length `m`).
    pub scale_a: &'a [f32],
    /// Per-tensor scale of `B`.
    pub scale_b: f32,
    /// Optional per-row bias in real units.
    pub bias: Option<&'a [f32]>,
    /// Output quantization scale.
    pub scale_c: f32,
}

/// Float and requantized reference results, both `[m, n]` row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceOutput {
    /// Real-valued result.
    pub f32: Vec<f32>,
    /// Result quantized with `scale_c`.
    pub i8: Vec<i8>,
}

impl ReferenceGemm {
    /// Untransposed GEMM with identity activation.
    #[must_use]
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self {
            m,
            n,
            k,
            ..Self::default()
        }
    }

    /// Set the fused activation.
    #[must_use]
    pub fn with_activation(mut self, activation: ActivationDescriptor) -> Self {
        self.activation = activation;
        self
    }

    /// Set the transpose flags.
    #[must_use]
    pub fn with_transposes(mut self, trans_a: bool, trans_b: bool) -> Self {
        self.trans_a = trans_a;
        self.trans_b = trans_b;
        self
    }

    /// Compute the reference result.
    ///
    /// # Errors
    ///
    /// Returns [`SpmmError::ShapeMismatch`] when an operand length disagrees
    /// with the declared shape, [`SpmmError::InvalidConfig`] for a bad
    /// output scale, or a candle error from the matmul.
    pub fn compute(&self, ops: &ReferenceOperands<'_>) -> Result<ReferenceOutput> {
        let Self { m, n, k, .. } = *self;
        if let Some(bias) = ops.bias {
            if bias.len() != m {
                return Err(SpmmError::ShapeMismatch {
                    expected: vec![m],
                    actual: vec![bias.len()],
                });
            }
        }
        if m == 0 || n == 0 {
            return Ok(ReferenceOutput {
                f32: Vec::new(),
                i8: Vec::new(),
            });
        }

        let device = Device::Cpu;

        // Per-row scales index output rows, so A is brought to [m, k] first.
        let a_mk = if self.trans_a {
            check_len(ops.a, k, m)?;
            transpose(ops.a, k, m)
        } else {
            ops.a.to_vec()
        };
        let a = dequantize_i8(&a_mk, ops.scale_a, m, k)?;
        let a = Tensor::from_vec(a, (m, k), &device)?;

        let b = if self.trans_b {
            let b = dequantize_i8(ops.b, &[ops.scale_b], n, k)?;
            Tensor::from_vec(b, (n, k), &device)?.t()?.contiguous()?
        } else {
            let b = dequantize_i8(ops.b, &[ops.scale_b], k, n)?;
            Tensor::from_vec(b, (k, n), &device)?
        };

        let mut c = if k == 0 {
            Tensor::zeros((m, n), candle_core::DType::F32, &device)?
        } else {
            a.matmul(&b)?
        };
        if let Some(bias) = ops.bias {
            let bias = Tensor::from_slice(bias, (m, 1), &device)?;
            c = c.broadcast_add(&bias)?;
        }
        let c = self.activation.apply_tensor(&c)?;

        let f32 = c.flatten_all()?.to_vec1::<f32>()?;
        let i8 = quantize_f32(&f32, ops.scale_c)?;
        Ok(ReferenceOutput { f32, i8 })
    }
}

fn check_len(data: &[i8], rows: usize, cols: usize) -> Result<()> {
    if data.len() != rows * cols {
        return Err(SpmmError::ShapeMismatch {
            expected: vec![rows, cols],
            actual: vec![data.len()],
        });
    }
    Ok(())
}

/// Transpose a row-major `[rows, cols]` buffer into `[cols, rows]`.
fn transpose(data: &[i8], rows: usize, cols: usize) -> Vec<i8> {
    let mut out = vec![0i8; data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    out
}
