// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Core types for sparse int8 weight prepacking.
//!
//! ## Encoded representation
//!
//! A weight matrix `[out_channels, in_channels]` is flattened into three
//! parallel arrays consumed by a pointer-walking sparse kernel:
//!
//! ```text
//! values               kept weights, scan order (pairs in block layout)
//! group_prefix_counts  running step total per row / row pair
//! advance_deltas       byte offsets between consecutive kept columns
//! ```
//!
//! One *step* is one kernel iteration: a single element in the
//! unstructured layout, or one column of a row pair (two values) in the
//! block layout. `advance_deltas` has exactly one entry per step.
//!
//! Within a group, the delta at step `s` moves the activation pointer from
//! the column of step `s` to the column of step `s + 1`. The delta stored at
//! the last step of a group is folded: it holds the running total of all
//! moves so far, i.e. the byte offset of the next group's first column
//! relative to `first_nonzero_column`. The very last delta wraps from the
//! final column back to `first_nonzero_column`.

use std::ops::Range;

use crate::error::{Result, SpmmError};

use super::config::BLOCK_ROWS;

/// Borrowed view of a dense, row-major int8 weight matrix.
///
/// Rows are output channels, columns are input channels.
#[derive(Debug, Clone, Copy)]
pub struct DenseWeights<'a> {
    data: &'a [i8],
    rows: usize,
    cols: usize,
}

impl<'a> DenseWeights<'a> {
    /// Wrap a row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns [`SpmmError::ShapeMismatch`] if `data.len() != rows * cols`.
    pub fn new(data: &'a [i8], rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(SpmmError::ShapeMismatch {
                expected: vec![rows, cols],
                actual: vec![data.len()],
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Get the row and column dimensions.
    #[must_use]
    pub const fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of rows (output channels).
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (input channels).
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Underlying row-major data.
    #[must_use]
    pub const fn as_slice(&self) -> &'a [i8] {
        self.data
    }

    /// One row of the matrix.
    ///
    /// # Panics
    ///
    /// Panics if `row >= rows`.
    #[must_use]
    pub fn row(&self, row: usize) -> &'a [i8] {
        assert!(row < self.rows, "row {row} out of bounds ({})", self.rows);
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Element at `(row, col)`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> i8 {
        self.row(row)[col]
    }
}

/// Which packed layout an encoding uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseLayout {
    /// One step per nonzero element, one group per row.
    Unstructured,

    /// One step per active column of a row pair, two values per step.
    /// A trailing odd row forms a final single-row group.
    Block,
}

/// Result of scanning a weight matrix for sparsity.
///
/// Computed once per matrix at prepack time and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparsityProfile {
    /// Matrix rows (output channels).
    pub rows: usize,

    /// Matrix columns (input channels).
    pub cols: usize,

    /// Number of zero-valued elements in the matrix.
    pub zero_count: usize,

    /// Number of entries in `values` for the chosen layout.
    /// In block layout every active pair reserves two slots.
    pub nonzero_count: usize,

    /// Number of kernel steps, which is also the length of `advance_deltas`.
    pub block_count: usize,

    /// Whether the 2-row block layout was selected.
    pub use_block_layout: bool,

    /// Number of entries in `group_prefix_counts`.
    pub channel_group_count: usize,

    /// Nonzero elements inside the even-row (paired) region.
    pub paired_nonzeros: usize,

    /// Row-pair columns where at least one of the two rows is nonzero.
    pub active_pairs: usize,
}

impl SparsityProfile {
    /// Layout selected for this matrix.
    #[must_use]
    pub const fn layout(&self) -> SparseLayout {
        if self.use_block_layout {
            SparseLayout::Block
        } else {
            SparseLayout::Unstructured
        }
    }

    /// Nonzero elements in the whole matrix, independent of layout.
    #[must_use]
    pub const fn element_nonzeros(&self) -> usize {
        self.rows * self.cols - self.zero_count
    }

    /// Row-pair columns where both rows are nonzero.
    #[must_use]
    pub const fn fully_active_pairs(&self) -> usize {
        self.paired_nonzeros - self.active_pairs
    }

    /// True if there is nothing to encode. The sparse kernel must be skipped.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nonzero_count == 0
    }

    /// Fraction of zero elements.
    #[must_use]
    pub fn sparsity(&self) -> f32 {
        let total = self.rows * self.cols;
        if total == 0 {
            return 1.0;
        }
        // Precision loss acceptable for sparsity metric calculation
        #[allow(clippy::cast_precision_loss)]
        {
            self.zero_count as f32 / total as f32
        }
    }
}

/// Encoded sparse weights ready for a pointer-walking kernel.
///
/// Produced once per weight matrix; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSparseWeights {
    /// Kept weights. Block layout stores both rows of an active pair.
    pub values: Vec<i8>,

    /// Running step count per group (inclusive).
    pub group_prefix_counts: Vec<u32>,

    /// Byte deltas, one per step. See the module docs for folding.
    pub advance_deltas: Vec<i32>,

    /// Column of the very first kept weight. The caller pre-advances the
    /// activation pointer by `first_nonzero_column * row_stride_bytes`.
    pub first_nonzero_column: usize,

    /// Layout of the arrays.
    pub layout: SparseLayout,

    /// Original shape (`out_channels`, `in_channels`).
    pub shape: (usize, usize),

    /// Activation row length the deltas were scaled for.
    pub output_width: usize,

    /// Byte stride between consecutive input channels.
    pub row_stride_bytes: usize,
}

impl EncodedSparseWeights {
    /// Get the row and column dimensions.
    #[must_use]
    pub const fn dims(&self) -> (usize, usize) {
        self.shape
    }

    /// Number of groups (rows, or row pairs plus an odd tail).
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.group_prefix_counts.len()
    }

    /// Total number of kernel steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.group_prefix_counts.last().map_or(0, |&n| n as usize)
    }

    /// Number of two-row groups.
    #[must_use]
    pub const fn paired_group_count(&self) -> usize {
        match self.layout {
            SparseLayout::Unstructured => 0,
            SparseLayout::Block => self.shape.0 / BLOCK_ROWS,
        }
    }

    /// Values consumed per step by group `group`.
    #[must_use]
    pub fn values_per_step(&self, group: usize) -> usize {
        if group < self.paired_group_count() {
            BLOCK_ROWS
        } else {
            1
        }
    }

    /// Output rows covered by `group`.
    #[must_use]
    pub fn group_rows(&self, group: usize) -> Range<usize> {
        let paired = self.paired_group_count();
        if group < paired {
            group * BLOCK_ROWS..(group + 1) * BLOCK_ROWS
        } else {
            let row = paired * BLOCK_ROWS + (group - paired);
            row..row + 1
        }
    }

    /// Step indices belonging to `group`.
    ///
    /// # Panics
    ///
    /// Panics if `group >= group_count()`.
    #[must_use]
    pub fn group_steps(&self, group: usize) -> Range<usize> {
        let start = if group == 0 {
            0
        } else {
            self.group_prefix_counts[group - 1] as usize
        };
        start..self.group_prefix_counts[group] as usize
    }

    /// Index into `values` of the first value consumed at `step`.
    #[must_use]
    pub fn value_offset(&self, step: usize) -> usize {
        let paired = self.paired_group_count();
        if paired == 0 {
            return step;
        }
        let paired_steps = self.group_prefix_counts[paired - 1] as usize;
        if step < paired_steps {
            step * BLOCK_ROWS
        } else {
            paired_steps * BLOCK_ROWS + (step - paired_steps)
        }
    }

    /// Byte offset, relative to `first_nonzero_column`, of the first column
    /// visited by `group`. `None` if the group has no steps.
    #[must_use]
    pub fn group_entry_offset(&self, group: usize) -> Option<i64> {
        let steps = self.group_steps(group);
        if steps.is_empty() {
            None
        } else if steps.start == 0 {
            Some(0)
        } else {
            Some(i64::from(self.advance_deltas[steps.start - 1]))
        }
    }

    /// Check the structural invariants the kernel relies on.
    ///
    /// # Errors
    ///
    /// Returns [`SpmmError::CorruptEncoding`] describing the first violation.
    pub fn check_consistency(&self) -> Result<()> {
        let expected_groups = match self.layout {
            SparseLayout::Unstructured => self.shape.0,
            SparseLayout::Block => self.shape.0.div_ceil(BLOCK_ROWS),
        };
        if self.group_prefix_counts.len() != expected_groups {
            return Err(SpmmError::CorruptEncoding(format!(
                "{} groups for {} rows",
                self.group_prefix_counts.len(),
                self.shape.0
            )));
        }
        if self
            .group_prefix_counts
            .windows(2)
            .any(|pair| pair[1] < pair[0])
        {
            return Err(SpmmError::CorruptEncoding(
                "group prefix counts decrease".into(),
            ));
        }
        let steps = self.step_count();
        if self.advance_deltas.len() != steps {
            return Err(SpmmError::CorruptEncoding(format!(
                "{} deltas for {steps} steps",
                self.advance_deltas.len()
            )));
        }
        let expected_values = if steps == 0 { 0 } else { self.value_offset(steps) };
        if self.values.len() != expected_values {
            return Err(SpmmError::CorruptEncoding(format!(
                "{} values, expected {expected_values}",
                self.values.len()
            )));
        }
        if self.row_stride_bytes == 0 && steps > 0 {
            return Err(SpmmError::CorruptEncoding("zero row stride".into()));
        }
        Ok(())
    }

    /// Replay the deltas and return the input column visited at each step,
    /// followed by the column reached through the final wraparound delta.
    ///
    /// # Errors
    ///
    /// Returns [`SpmmError::CorruptEncoding`] if the arrays are inconsistent
    /// or a delta lands outside `0..in_channels`.
    pub fn column_trace(&self) -> Result<Vec<usize>> {
        self.check_consistency()?;

        let mut columns = Vec::with_capacity(self.step_count() + 1);
        let mut last_offset = 0i64;

        for group in 0..self.group_count() {
            let Some(mut offset) = self.group_entry_offset(group) else {
                continue;
            };
            let steps = self.group_steps(group);
            for step in steps.clone() {
                columns.push(self.offset_to_column(offset)?);
                last_offset = offset;
                if step + 1 < steps.end {
                    offset += i64::from(self.advance_deltas[step]);
                }
            }
        }

        if let Some(&wrap) = self.advance_deltas.last() {
            columns.push(self.offset_to_column(last_offset + i64::from(wrap))?);
        }

        Ok(columns)
    }

    /// Convert a byte offset relative to `first_nonzero_column` to a column.
    ///
    /// # Errors
    ///
    /// Returns [`SpmmError::CorruptEncoding`] if the offset is not a whole
    /// number of rows or falls outside the matrix.
    pub fn offset_to_column(&self, offset: i64) -> Result<usize> {
        let stride = i64::try_from(self.row_stride_bytes)
            .map_err(|_| SpmmError::CorruptEncoding("row stride overflows i64".into()))?;
        if stride == 0 || offset % stride != 0 {
            return Err(SpmmError::CorruptEncoding(format!(
                "offset {offset} is not a multiple of row stride {stride}"
            )));
        }
        let first = i64::try_from(self.first_nonzero_column)
            .map_err(|_| SpmmError::CorruptEncoding("first column overflows i64".into()))?;
        let column = first + offset / stride;
        usize::try_from(column)
            .ok()
            .filter(|&c| c < self.shape.1)
            .ok_or_else(|| {
                SpmmError::CorruptEncoding(format!(
                    "column {column} outside 0..{}",
                    self.shape.1
                ))
            })
    }

    /// Memory size in bytes of the three arrays.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.values.len()
            + self.group_prefix_counts.len() * std::mem::size_of::<u32>()
            + self.advance_deltas.len() * std::mem::size_of::<i32>()
    }

    /// Compression ratio vs the dense int8 matrix.
    #[must_use]
    pub fn compression_ratio(&self) -> f32 {
        let dense_bytes = self.shape.0 * self.shape.1;
        // Precision loss acceptable for compression ratio metric
        #[allow(clippy::cast_precision_loss)]
        {
            dense_bytes as f32 / self.memory_bytes().max(1) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> EncodedSparseWeights {
        // 3 rows x 4 cols, block layout:
        // pair (0,1) active at cols 1 and 3, tail row 2 has col 0.
        EncodedSparseWeights {
            values: vec![5, 0, 7, -2, 9],
            group_prefix_counts: vec![2, 3],
            // step0 col1 -> step1 col3 (+2 rows), folded entry: next group
            // starts at col0 = -1 row from first column; wrap col0 -> col1.
            advance_deltas: vec![16, -8, 8],
            first_nonzero_column: 1,
            layout: SparseLayout::Block,
            shape: (3, 4),
            output_width: 8,
            row_stride_bytes: 8,
        }
    }

    #[test]
    fn test_dense_weights_shape_check() {
        let data = vec![0i8; 12];
        assert!(DenseWeights::new(&data, 3, 4).is_ok());
        assert!(matches!(
            DenseWeights::new(&data, 5, 4),
            Err(SpmmError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_dense_weights_rows() {
        let data: Vec<i8> = (0..6).collect();
        let weights = DenseWeights::new(&data, 2, 3).unwrap();
        assert_eq!(weights.row(1), &[3, 4, 5]);
        assert_eq!(weights.get(0, 2), 2);
        assert_eq!(weights.dims(), (2, 3));
    }

    #[test]
    #[should_panic(expected = "row")]
    fn test_dense_weights_row_bounds() {
        let data = vec![0i8; 6];
        let weights = DenseWeights::new(&data, 2, 3).unwrap();
        let _ = weights.row(2);
    }

    #[test]
    fn test_memory_accounting() {
        let enc = sample_block();
        // 5 values + 2 prefix entries * 4 + 3 deltas * 4
        assert_eq!(enc.memory_bytes(), 25);
        assert!((enc.compression_ratio() - 12.0 / 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_block_group_geometry() {
        let enc = sample_block();
        assert_eq!(enc.paired_group_count(), 1);
        assert_eq!(enc.group_rows(0), 0..2);
        assert_eq!(enc.group_rows(1), 2..3);
        assert_eq!(enc.values_per_step(0), 2);
        assert_eq!(enc.values_per_step(1), 1);
        assert_eq!(enc.value_offset(0), 0);
        assert_eq!(enc.value_offset(1), 2);
        assert_eq!(enc.value_offset(2), 4);
        assert!(enc.check_consistency().is_ok());
    }

    #[test]
    fn test_column_trace_decodes_folded_deltas() -> Result<()> {
        let enc = sample_block();
        assert_eq!(enc.group_entry_offset(0), Some(0));
        assert_eq!(enc.group_entry_offset(1), Some(-8));
        assert_eq!(enc.column_trace()?, vec![1, 3, 0, 1]);
        Ok(())
    }

    #[test]
    fn test_consistency_rejects_bad_prefix() {
        let mut enc = sample_block();
        enc.group_prefix_counts = vec![3, 2];
        assert!(matches!(
            enc.check_consistency(),
            Err(SpmmError::CorruptEncoding(_))
        ));
    }

    #[test]
    fn test_column_trace_rejects_out_of_range() {
        let mut enc = sample_block();
        enc.advance_deltas[0] = 64;
        assert!(enc.column_trace().is_err());
    }

    #[test]
    fn test_profile_helpers() {
        let profile = SparsityProfile {
            rows: 4,
            cols: 10,
            zero_count: 30,
            nonzero_count: 10,
            block_count: 10,
            use_block_layout: false,
            channel_group_count: 4,
            paired_nonzeros: 10,
            active_pairs: 7,
        };
        assert_eq!(profile.layout(), SparseLayout::Unstructured);
        assert_eq!(profile.element_nonzeros(), 10);
        assert_eq!(profile.fully_active_pairs(), 3);
        assert!(!profile.is_empty());
        assert!((profile.sparsity() - 0.75).abs() < 1e-6);
    }
}
