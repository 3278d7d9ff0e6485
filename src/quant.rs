// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Symmetric int8 quantization helpers.
//!
//! ```text
//! real  = q * scale
//! q     = clamp(round(real / scale), -127, 127)
//! ```
//!
//! -128 is never produced so the range stays symmetric.

use crate::error::{Result, SpmmError};

/// Largest magnitude an int8 value takes after quantization.
pub const INT8_MAX_ABS: f32 = 127.0;

/// Round half away from zero and saturate to `[-127, 127]`.
#[must_use]
pub fn round_to_i8(x: f32) -> i8 {
    // Clamped to the i8 range first; NaN maps to 0.
    #[allow(clippy::cast_possible_truncation)]
    {
        x.round().clamp(-INT8_MAX_ABS, INT8_MAX_ABS) as i8
    }
}

/// Dequantize a row-major `[rows, cols]` int8 buffer.
///
/// `scales` holds either a single per-tensor scale or one scale per row.
///
/// # Errors
///
/// Returns [`SpmmError::ShapeMismatch`] if `data` or `scales` do not match
/// the declared shape.
pub fn dequantize_i8(data: &[i8], scales: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>> {
    if data.len() != rows * cols {
        return Err(SpmmError::ShapeMismatch {
            expected: vec![rows, cols],
            actual: vec![data.len()],
        });
    }
    if scales.len() != 1 && scales.len() != rows {
        return Err(SpmmError::ShapeMismatch {
            expected: vec![rows],
            actual: vec![scales.len()],
        });
    }

    if cols == 0 {
        return Ok(Vec::new());
    }

    let out = data
        .chunks_exact(cols)
        .enumerate()
        .flat_map(|(row, values)| {
            let scale = if scales.len() == 1 { scales[0] } else { scales[row] };
            values.iter().map(move |&q| f32::from(q) * scale)
        })
        .collect();
    Ok(out)
}

/// Quantize f32 values with a single output scale.
///
/// # Errors
///
/// Returns [`SpmmError::InvalidConfig`] if `scale` is not finite and positive.
pub fn quantize_f32(data: &[f32], scale: f32) -> Result<Vec<i8>> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(SpmmError::InvalidConfig(format!(
            "output scale {scale} must be finite and positive"
        )));
    }
    Ok(data.iter().map(|&x| round_to_i8(x / scale)).collect())
}
