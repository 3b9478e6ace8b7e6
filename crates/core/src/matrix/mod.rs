use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Result, VisionWavError};

/// Dense 2-D array of `f32` stored row-major in one contiguous buffer.
///
/// Every analysis matrix in the crate uses rows for the feature axis
/// (frequency bin, mel band, pitch class, lag) and columns for frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Wraps an existing buffer. `data.len()` must equal `rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let expected = checked_len(rows, cols)?;
        if data.len() != expected {
            return Err(VisionWavError::invalid(format!(
                "matrix buffer holds {} values but shape {rows}x{cols} needs {expected}",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Allocates a zero-filled matrix, reporting allocation failure instead
    /// of aborting.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = checked_len(rows, cols)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| {
            VisionWavError::overflow(format!("cannot allocate a {rows}x{cols} matrix"))
        })?;
        data.resize(len, 0.0);
        Ok(Self { rows, cols, data })
    }

    /// Transposes a column-major buffer (one contiguous run of `rows`
    /// values per frame) into a row-major matrix.
    pub fn from_column_major(rows: usize, cols: usize, data: &[f32]) -> Result<Self> {
        let mut matrix = Self::zeros(rows, cols)?;
        if data.len() != matrix.data.len() {
            return Err(VisionWavError::invalid(format!(
                "column buffer holds {} values but shape {rows}x{cols} needs {}",
                data.len(),
                matrix.data.len()
            )));
        }
        for (col, values) in data.chunks_exact(rows.max(1)).enumerate() {
            for (row, &value) in values.iter().enumerate() {
                matrix.data[row * cols + col] = value;
            }
        }
        Ok(matrix)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Returns the value at `(row, col)`, or `None` when out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f32] {
        let cols = self.cols;
        &mut self.data[row * cols..(row + 1) * cols]
    }

    /// Strided view over one column.
    pub fn column(&self, col: usize) -> impl Iterator<Item = f32> + '_ {
        self.data.iter().skip(col).step_by(self.cols.max(1)).copied().take(self.rows)
    }

    /// Largest value in the matrix, `None` when empty.
    pub fn max(&self) -> Option<f32> {
        self.data.iter().copied().reduce(f32::max)
    }

    /// Row index of the largest value in `col`.
    pub fn argmax_column(&self, col: usize) -> Option<usize> {
        if col >= self.cols {
            return None;
        }
        self.column(col)
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (row, value)| match best {
                Some((_, current)) if current >= value => best,
                _ => Some((row, value)),
            })
            .map(|(row, _)| row)
    }

    /// Applies `f` to every element, producing a new matrix.
    pub fn map(&self, f: impl Fn(f32) -> f32 + Sync) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.par_iter().map(|&value| f(value)).collect(),
        }
    }

    /// Matrix product `self · rhs`. Output rows are computed in parallel and
    /// zero weights are skipped, which keeps sparse filterbanks cheap.
    pub fn matmul(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols != rhs.rows {
            return Err(VisionWavError::invalid(format!(
                "cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }

        let mut out = Matrix::zeros(self.rows, rhs.cols)?;
        if out.is_empty() {
            return Ok(out);
        }

        out.data
            .par_chunks_mut(rhs.cols)
            .enumerate()
            .for_each(|(row, out_row)| {
                for (k, &weight) in self.row(row).iter().enumerate() {
                    if weight == 0.0 {
                        continue;
                    }
                    for (acc, &value) in out_row.iter_mut().zip(rhs.row(k)) {
                        *acc += weight * value;
                    }
                }
            });

        Ok(out)
    }
}

fn checked_len(rows: usize, cols: usize) -> Result<usize> {
    rows.checked_mul(cols)
        .ok_or_else(|| VisionWavError::overflow(format!("matrix shape {rows}x{cols} overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_columns_row_major() {
        let m = Matrix::from_column_major(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.row(0), &[1.0, 3.0, 5.0]);
        assert_eq!(m.column(1).collect::<Vec<_>>(), vec![3.0, 4.0]);
        assert_eq!(m.get(1, 2), Some(6.0));
        assert_eq!(m.get(2, 0), None);
    }

    #[test]
    fn multiplies_matrices() {
        let a = Matrix::new(2, 3, vec![1.0, 0.0, 2.0, 0.0, 1.0, 0.0]).unwrap();
        let b = Matrix::new(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.as_slice(), &[11.0, 14.0, 3.0, 4.0]);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let a = Matrix::zeros(2, 3).unwrap();
        let b = Matrix::zeros(2, 3).unwrap();
        assert!(matches!(a.matmul(&b), Err(VisionWavError::InvalidConfig(_))));
        assert!(Matrix::new(2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn reports_overflowing_shapes() {
        let err = Matrix::zeros(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, VisionWavError::NumericOverflow(_)));
    }

    #[test]
    fn zero_column_matrices_multiply() {
        let weights = Matrix::zeros(4, 3).unwrap();
        let frames = Matrix::zeros(3, 0).unwrap();
        let out = weights.matmul(&frames).unwrap();
        assert_eq!(out.shape(), (4, 0));
        assert_eq!(out.argmax_column(0), None);
    }
}
