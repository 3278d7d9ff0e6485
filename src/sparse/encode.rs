// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Sparse weight encoding.
//!
//! Both layouts share one scan loop shape:
//!
//! 1. Walk groups (rows, or row pairs followed by an odd tail row) and
//!    their columns in order. Every kept step appends its value(s) and,
//!    except for the first step overall, a raw delta
//!    `(column - previous_column) * row_stride_bytes`.
//! 2. Fold: the delta at the last step of each group is replaced by the
//!    running sum of all raw deltas up to and including it.
//! 3. The final step's delta wraps back to `first_nonzero_column`.

use crate::error::{Result, SpmmError};

use super::config::{EncoderConfig, BLOCK_ROWS};
use super::types::{DenseWeights, EncodedSparseWeights, SparseLayout, SparsityProfile};

/// Owned output buffers sized for one profile.
#[derive(Debug, Clone, Default)]
pub struct EncodeBuffers {
    /// Packed values.
    pub values: Vec<i8>,
    /// Running step counts per group.
    pub group_prefix_counts: Vec<u32>,
    /// Byte deltas, one per step.
    pub advance_deltas: Vec<i32>,
}

impl EncodeBuffers {
    /// Allocate zeroed buffers of exactly the sizes `profile` requires.
    #[must_use]
    pub fn for_profile(profile: &SparsityProfile) -> Self {
        Self {
            values: vec![0; profile.nonzero_count],
            group_prefix_counts: vec![0; profile.channel_group_count],
            advance_deltas: vec![0; profile.block_count],
        }
    }
}

/// Tracks kept columns and writes raw deltas.
struct DeltaWriter<'b> {
    deltas: &'b mut [i32],
    stride: i64,
    written: usize,
    first_col: Option<usize>,
    last_col: usize,
}

impl<'b> DeltaWriter<'b> {
    fn new(deltas: &'b mut [i32], stride: i64) -> Self {
        Self {
            deltas,
            stride,
            written: 0,
            first_col: None,
            last_col: 0,
        }
    }

    fn visit(&mut self, col: usize) -> Result<()> {
        if self.first_col.is_some() {
            let slot = self.deltas.get_mut(self.written).ok_or_else(stale_profile)?;
            *slot = column_delta(col, self.last_col, self.stride)?;
            self.written += 1;
        } else {
            self.first_col = Some(col);
        }
        self.last_col = col;
        Ok(())
    }
}

fn column_delta(to: usize, from: usize, stride: i64) -> Result<i32> {
    // Columns are bounded by a slice length, so they fit i64.
    #[allow(clippy::cast_possible_wrap)]
    let jump = to as i64 - from as i64;
    let bytes = jump
        .checked_mul(stride)
        .ok_or(SpmmError::DeltaOverflow(i64::MAX))?;
    i32::try_from(bytes).map_err(|_| SpmmError::DeltaOverflow(bytes))
}

/// Byte stride for `output_width` activations, fitting the kernel's `i64`
/// pointer arithmetic.
fn stride_bytes(config: &EncoderConfig, output_width: usize) -> Result<usize> {
    if output_width == 0 {
        return Err(SpmmError::InvalidConfig("output_width must be at least 1".into()));
    }
    config
        .row_stride_bytes(output_width)
        .filter(|&s| i64::try_from(s).is_ok())
        .ok_or_else(|| {
            SpmmError::InvalidConfig(format!(
                "row stride of {output_width} x {} bytes overflows",
                config.element_size
            ))
        })
}

fn stale_profile() -> SpmmError {
    SpmmError::CorruptEncoding("profile does not describe this weight matrix".into())
}

fn prefix_entry(steps: usize) -> Result<u32> {
    u32::try_from(steps)
        .map_err(|_| SpmmError::InvalidConfig(format!("{steps} steps overflow u32 prefix counts")))
}

fn check_len(buffer: &'static str, required: usize, actual: usize) -> Result<()> {
    if actual < required {
        return Err(SpmmError::BufferTooSmall {
            buffer,
            required,
            actual,
        });
    }
    Ok(())
}

/// Encode into caller-provided buffers and return `first_nonzero_column`.
///
/// Buffers must hold at least `profile.nonzero_count` values,
/// `profile.channel_group_count` prefix entries and `profile.block_count`
/// deltas. Nothing is allocated.
///
/// # Errors
///
/// Returns an error if:
/// - `output_width` is zero or its byte stride overflows
/// - `profile` was computed for a matrix of different dimensions
/// - the matrix has no nonzero elements ([`SpmmError::EmptyWeights`])
/// - a buffer is undersized
/// - a byte delta does not fit `i32`
pub fn encode_into(
    weights: &DenseWeights<'_>,
    output_width: usize,
    profile: &SparsityProfile,
    config: &EncoderConfig,
    values: &mut [i8],
    group_prefix_counts: &mut [u32],
    advance_deltas: &mut [i32],
) -> Result<usize> {
    config.validate()?;
    let row_stride = stride_bytes(config, output_width)?;
    let (rows, cols) = weights.dims();
    if (profile.rows, profile.cols) != (rows, cols) {
        return Err(SpmmError::ShapeMismatch {
            expected: vec![profile.rows, profile.cols],
            actual: vec![rows, cols],
        });
    }
    if profile.is_empty() {
        return Err(SpmmError::EmptyWeights);
    }
    check_len("values", profile.nonzero_count, values.len())?;
    check_len(
        "group_prefix_counts",
        profile.channel_group_count,
        group_prefix_counts.len(),
    )?;
    check_len("advance_deltas", profile.block_count, advance_deltas.len())?;

    let stride = i64::try_from(row_stride)
        .map_err(|_| SpmmError::InvalidConfig("row stride overflows i64".into()))?;

    let group_count = profile.channel_group_count;
    let expected_groups = if profile.use_block_layout {
        rows.div_ceil(BLOCK_ROWS)
    } else {
        rows
    };
    if group_count != expected_groups || (profile.use_block_layout && rows < BLOCK_ROWS) {
        return Err(stale_profile());
    }
    let prefix = &mut group_prefix_counts[..group_count];
    let deltas = &mut advance_deltas[..profile.block_count];

    let mut writer = DeltaWriter::new(deltas, stride);
    let mut value_index = 0;
    let mut steps = 0;
    let mut group = 0;

    let paired_rows = if profile.use_block_layout {
        rows - rows % BLOCK_ROWS
    } else {
        0
    };

    for oc in (0..paired_rows).step_by(BLOCK_ROWS) {
        let (r0, r1) = (weights.row(oc), weights.row(oc + 1));
        for ic in 0..cols {
            if r0[ic] != 0 || r1[ic] != 0 {
                if value_index + BLOCK_ROWS > profile.nonzero_count {
                    return Err(stale_profile());
                }
                values[value_index] = r0[ic];
                values[value_index + 1] = r1[ic];
                value_index += BLOCK_ROWS;
                writer.visit(ic)?;
                steps += 1;
            }
        }
        prefix[group] = prefix_entry(steps)?;
        group += 1;
    }

    for oc in paired_rows..rows {
        for (ic, &w) in weights.row(oc).iter().enumerate() {
            if w != 0 {
                if value_index >= profile.nonzero_count {
                    return Err(stale_profile());
                }
                values[value_index] = w;
                value_index += 1;
                writer.visit(ic)?;
                steps += 1;
            }
        }
        prefix[group] = prefix_entry(steps)?;
        group += 1;
    }

    if value_index != profile.nonzero_count || steps != profile.block_count {
        return Err(stale_profile());
    }

    let DeltaWriter {
        deltas,
        first_col,
        last_col,
        ..
    } = writer;
    let first_col = first_col.ok_or(SpmmError::EmptyWeights)?;
    fold_group_deltas(prefix, deltas, steps)?;
    deltas[steps - 1] = column_delta(first_col, last_col, stride)?;

    tracing::debug!(
        rows,
        cols,
        output_width,
        values = value_index,
        steps,
        first_col,
        "encoded sparse weights"
    );

    Ok(first_col)
}

/// Replace the last delta of every non-empty group with the running total.
///
/// Raw deltas exist for steps `0..steps - 1`; the final step has none yet.
fn fold_group_deltas(prefix: &[u32], deltas: &mut [i32], steps: usize) -> Result<()> {
    let mut running = 0i64;
    let mut cursor = 0usize;

    for &end in prefix {
        let end = end as usize;
        while cursor < end {
            if cursor + 1 < steps {
                running += i64::from(deltas[cursor]);
            }
            cursor += 1;
        }
        if cursor > 0 {
            deltas[cursor - 1] =
                i32::try_from(running).map_err(|_| SpmmError::DeltaOverflow(running))?;
        }
    }
    Ok(())
}

/// Encode a weight matrix into freshly allocated buffers.
///
/// # Errors
///
/// See [`encode_into`].
///
/// # Example
///
/// ```rust
/// use spmm_prepack::sparse::{encode, profile, DenseWeights, EncoderConfig};
///
/// let data = vec![0i8, 3, 0, 0, 0, -1, 2, 0];
/// let weights = DenseWeights::new(&data, 2, 4)?;
/// let p = profile(&weights);
/// let encoded = encode(&weights, 16, &p, &EncoderConfig::default())?;
///
/// assert_eq!(encoded.values, vec![3, -1, 2]);
/// assert_eq!(encoded.group_prefix_counts, vec![1, 3]);
/// assert_eq!(encoded.first_nonzero_column, 1);
/// # Ok::<(), spmm_prepack::SpmmError>(())
/// ```
pub fn encode(
    weights: &DenseWeights<'_>,
    output_width: usize,
    profile: &SparsityProfile,
    config: &EncoderConfig,
) -> Result<EncodedSparseWeights> {
    let mut buffers = EncodeBuffers::for_profile(profile);
    let first_nonzero_column = encode_into(
        weights,
        output_width,
        profile,
        config,
        &mut buffers.values,
        &mut buffers.group_prefix_counts,
        &mut buffers.advance_deltas,
    )?;

    let encoded = EncodedSparseWeights {
        values: buffers.values,
        group_prefix_counts: buffers.group_prefix_counts,
        advance_deltas: buffers.advance_deltas,
        first_nonzero_column,
        layout: if profile.use_block_layout {
            SparseLayout::Block
        } else {
            SparseLayout::Unstructured
        },
        shape: weights.dims(),
        output_width,
        row_stride_bytes: stride_bytes(config, output_width)?,
    };
    tracing::debug!(
        layout = ?encoded.layout,
        memory_bytes = encoded.memory_bytes(),
        compression_ratio = encoded.compression_ratio(),
        "packed sparse weights"
    );
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::profile::{profile, profile_with_policy};

    #[test]
    fn test_unstructured_encoding() -> Result<()> {
        let data = vec![
            0, 3, 0, 4, //
            0, 0, 0, 0, //
            5, 0, 6, 0, //
        ];
        let weights = DenseWeights::new(&data, 3, 4)?;
        let p = profile(&weights);
        assert!(!p.use_block_layout);

        let enc = encode(&weights, 10, &p, &EncoderConfig::default())?;

        assert_eq!(enc.values, vec![3, 4, 5, 6]);
        assert_eq!(enc.group_prefix_counts, vec![2, 2, 4]);
        assert_eq!(enc.first_nonzero_column, 1);
        // cols: 1 -> 3 -> 0 -> 2, wrap to 1
        // raw: [20, -30, 20]; row 0 folds to 20 - 30 = -10 (col 0 from col 1)
        assert_eq!(enc.advance_deltas, vec![20, -10, 20, -10]);
        assert_eq!(enc.column_trace()?, vec![1, 3, 0, 2, 1]);
        Ok(())
    }

    #[test]
    fn test_block_encoding_with_odd_tail() -> Result<()> {
        let data = vec![
            1, 0, 0, 2, //
            3, 0, 0, 0, //
            0, 0, 4, 0, //
        ];
        let weights = DenseWeights::new(&data, 3, 4)?;
        let p = profile_with_policy(&weights, &EncoderConfig::forced_block())?;
        let enc = encode(&weights, 1, &p, &EncoderConfig::forced_block())?;

        assert_eq!(enc.layout, SparseLayout::Block);
        assert_eq!(enc.values, vec![1, 3, 2, 0, 4]);
        assert_eq!(enc.group_prefix_counts, vec![2, 3]);
        // cols: 0 -> 3 -> 2, wrap to 0
        assert_eq!(enc.advance_deltas, vec![3, 2, -2]);
        assert_eq!(enc.column_trace()?, vec![0, 3, 2, 0]);
        Ok(())
    }

    #[test]
    fn test_single_nonzero() -> Result<()> {
        let mut data = vec![0i8; 20];
        data[13] = -7;
        let weights = DenseWeights::new(&data, 4, 5)?;
        let p = profile(&weights);
        let enc = encode(&weights, 8, &p, &EncoderConfig::forced_unstructured())?;

        assert_eq!(enc.values, vec![-7]);
        assert_eq!(enc.first_nonzero_column, 3);
        assert_eq!(enc.advance_deltas, vec![0]);
        assert_eq!(enc.column_trace()?, vec![3, 3]);
        Ok(())
    }

    #[test]
    fn test_dense_matrix_strides() -> Result<()> {
        let data = vec![1i8; 8];
        let weights = DenseWeights::new(&data, 1, 8)?;
        let p = profile(&weights);
        let enc = encode(&weights, 4, &p, &EncoderConfig::default())?;

        assert_eq!(&enc.advance_deltas[..7], &[4; 7]);
        assert_eq!(enc.advance_deltas[7], -28);
        Ok(())
    }

    #[test]
    fn test_empty_matrix_rejected() {
        let data = vec![0i8; 6];
        let weights = DenseWeights::new(&data, 2, 3).unwrap();
        let p = profile(&weights);
        assert!(matches!(
            encode(&weights, 4, &p, &EncoderConfig::default()),
            Err(SpmmError::EmptyWeights)
        ));
    }

    #[test]
    fn test_profile_shape_mismatch() {
        let a = vec![1i8; 6];
        let b = vec![1i8; 8];
        let wa = DenseWeights::new(&a, 2, 3).unwrap();
        let wb = DenseWeights::new(&b, 2, 4).unwrap();
        let p = profile(&wa);
        assert!(matches!(
            encode(&wb, 4, &p, &EncoderConfig::default()),
            Err(SpmmError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_into_checks_buffers() {
        let data = vec![1i8, 0, 2, 3];
        let weights = DenseWeights::new(&data, 2, 2).unwrap();
        let p = profile_with_policy(&weights, &EncoderConfig::forced_unstructured()).unwrap();

        let mut values = vec![0i8; 2];
        let mut prefix = vec![0u32; 2];
        let mut deltas = vec![0i32; 3];
        let err = encode_into(
            &weights,
            4,
            &p,
            &EncoderConfig::default(),
            &mut values,
            &mut prefix,
            &mut deltas,
        );
        assert!(matches!(
            err,
            Err(SpmmError::BufferTooSmall {
                buffer: "values",
                required: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_encode_into_oversized_buffers() -> Result<()> {
        let data = vec![0i8, 5, 6, 0];
        let weights = DenseWeights::new(&data, 2, 2)?;
        let p = profile_with_policy(&weights, &EncoderConfig::forced_unstructured())?;

        let mut values = vec![0i8; 8];
        let mut prefix = vec![0u32; 4];
        let mut deltas = vec![0i32; 8];
        let first = encode_into(
            &weights,
            2,
            &p,
            &EncoderConfig::default(),
            &mut values,
            &mut prefix,
            &mut deltas,
        )?;

        assert_eq!(first, 1);
        assert_eq!(&values[..2], &[5, 6]);
        assert_eq!(&prefix[..2], &[1, 2]);
        // col 1 -> col 0, fold keeps -2, wrap +2
        assert_eq!(&deltas[..2], &[-2, 2]);
        Ok(())
    }

    #[test]
    fn test_stale_profile_rejected() {
        let sparse = vec![1i8, 0, 0, 0];
        let dense = vec![1i8, 1, 1, 1];
        let p = profile(&DenseWeights::new(&sparse, 2, 2).unwrap());
        let weights = DenseWeights::new(&dense, 2, 2).unwrap();
        assert!(matches!(
            encode(&weights, 2, &p, &EncoderConfig::default()),
            Err(SpmmError::CorruptEncoding(_))
        ));
    }

    #[test]
    fn test_zero_output_width_rejected() {
        let data = vec![1i8, 0, 2, 0, 0, 3];
        let weights = DenseWeights::new(&data, 2, 3).unwrap();
        let p = profile(&weights);
        assert!(matches!(
            encode(&weights, 0, &p, &EncoderConfig::default()),
            Err(SpmmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_row_stride_overflow_is_an_error() {
        let data = vec![1i8, 0, 2, 0, 0, 3];
        let weights = DenseWeights::new(&data, 2, 3).unwrap();
        let p = profile(&weights);
        let config = EncoderConfig {
            element_size: 4,
            ..EncoderConfig::default()
        };
        assert!(matches!(
            encode(&weights, usize::MAX / 2, &p, &config),
            Err(SpmmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_delta_overflow_detected() {
        let mut data = vec![0i8; 2 * 3];
        data[0] = 1;
        data[5] = 1;
        let weights = DenseWeights::new(&data, 2, 3).unwrap();
        let p = profile(&weights);
        let err = encode(&weights, usize::MAX / 8, &p, &EncoderConfig::forced_unstructured());
        assert!(err.is_err());
    }
}
