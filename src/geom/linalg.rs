//! Dense linear algebra for the reduced normal equations.

use super::core::{Point3, Tolerance};
use super::error::{FitError, try_zeroed};

/// Square row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    /// Zero-filled `n × n` matrix.
    pub fn zeros(n: usize) -> Result<Self, FitError> {
        let len = n.checked_mul(n).ok_or(FitError::AllocationFailure { len: usize::MAX })?;
        Ok(Self {
            n,
            data: try_zeroed(len)?,
        })
    }

    /// Build from row-major values. Returns `None` if `values.len() != n*n`.
    #[must_use]
    pub fn from_row_major(n: usize, values: Vec<f64>) -> Option<Self> {
        (values.len() == n * n).then_some(Self { n, data: values })
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.n
    }

    #[inline]
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.n + col] = value;
    }

    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.n + col] += value;
    }

    /// Multiply every diagonal entry by `factor` (Levenberg-Marquardt damping).
    pub fn scale_diagonal(&mut self, factor: f64) {
        for i in 0..self.n {
            self.data[i * self.n + i] *= factor;
        }
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let n = self.n;
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.data.split_at_mut(hi * n);
        head[lo * n..lo * n + n].swap_with_slice(&mut tail[..n]);
    }
}

/// Solve `A·x = b` by Gaussian elimination with partial pivoting.
///
/// `a` and `b` are consumed as scratch space. Fails with
/// [`FitError::DimensionMismatch`] when `b` does not match `a`, and with
/// [`FitError::SingularSystem`] when the best remaining pivot in a column is
/// smaller than [`Tolerance::PIVOT`].
pub fn solve_dense(mut a: DenseMatrix, mut b: Vec<f64>) -> Result<Vec<f64>, FitError> {
    let n = a.dim();
    if b.len() != n {
        return Err(FitError::DimensionMismatch {
            expected: n,
            provided: b.len(),
        });
    }

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_mag = a.get(col, col).abs();
        for row in col + 1..n {
            let mag = a.get(row, col).abs();
            if mag > pivot_mag {
                pivot_mag = mag;
                pivot_row = row;
            }
        }

        if !(pivot_mag >= Tolerance::PIVOT.eps) {
            return Err(FitError::SingularSystem { column: col });
        }

        if pivot_row != col {
            a.swap_rows(pivot_row, col);
            b.swap(pivot_row, col);
        }

        let pivot = a.get(col, col);
        for row in col + 1..n {
            let factor = a.get(row, col) / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                let v = a.get(col, k);
                a.add(row, k, -factor * v);
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in row + 1..n {
            sum -= a.get(row, k) * x[k];
        }
        x[row] = sum / a.get(row, row);
    }
    Ok(x)
}

/// Linear interpolation of `values` over a monotonic `table` of parameters.
///
/// `x` outside the table is clamped to its ends. Fails if the bracketing
/// interval has (near) zero width.
pub fn interp1d(x: f64, table: &[f64], values: &[Point3]) -> Result<Point3, FitError> {
    if table.len() < 2 || table.len() != values.len() {
        return Err(FitError::DegenerateGeometry {
            reason: format!(
                "interpolation table has {} parameters and {} values",
                table.len(),
                values.len()
            ),
        });
    }

    let last = table.len() - 1;
    if x <= table[0] {
        return Ok(values[0]);
    }
    if x >= table[last] {
        return Ok(values[last]);
    }

    // Largest `lo` with table[lo] <= x.
    let mut lo = 0;
    let mut hi = last;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if table[mid] <= x {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let width = table[hi] - table[lo];
    if width.abs() < Tolerance::ZERO_LENGTH.eps {
        return Err(FitError::DegenerateGeometry {
            reason: format!("interpolation interval {lo} has zero width"),
        });
    }
    Ok(values[lo].lerp(values[hi], (x - table[lo]) / width))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_known_3x3() {
        // x = (1, -2, 3)
        let a = DenseMatrix::from_row_major(
            3,
            vec![2.0, 1.0, -1.0, -3.0, -1.0, 2.0, -2.0, 1.0, 2.0],
        )
        .unwrap();
        let b = vec![-3.0, 5.0, 2.0];
        let x = solve_dense(a, b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] + 2.0).abs() < 1e-12);
        assert!((x[2] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_needs_pivoting() {
        let a = DenseMatrix::from_row_major(2, vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let x = solve_dense(a, vec![4.0, 5.0]).unwrap();
        assert_eq!(x, vec![5.0, 4.0]);
    }

    #[test]
    fn test_solve_singular_2x2() {
        let a = DenseMatrix::from_row_major(2, vec![1.0, 2.0, 2.0, 4.0]).unwrap();
        let err = solve_dense(a, vec![1.0, 2.0]).unwrap_err();
        assert_eq!(err, FitError::SingularSystem { column: 1 });
    }

    #[test]
    fn test_solve_rejects_short_rhs() {
        let a = DenseMatrix::from_row_major(2, vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let err = solve_dense(a, vec![1.0]).unwrap_err();
        assert_eq!(
            err,
            FitError::DimensionMismatch {
                expected: 2,
                provided: 1
            }
        );
    }

    #[test]
    fn test_scale_diagonal() {
        let mut a = DenseMatrix::from_row_major(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        a.scale_diagonal(2.0);
        assert_eq!(a.get(0, 0), 2.0);
        assert_eq!(a.get(0, 1), 2.0);
        assert_eq!(a.get(1, 1), 8.0);
    }

    #[test]
    fn test_interp1d_brackets_and_clamps() {
        let table = [0.0, 1.0, 3.0];
        let values = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
        ];
        let p = interp1d(2.0, &table, &values).unwrap();
        assert_eq!(p, Point3::new(1.0, 1.0, 0.0));
        assert_eq!(interp1d(-1.0, &table, &values).unwrap(), values[0]);
        assert_eq!(interp1d(5.0, &table, &values).unwrap(), values[2]);
    }

    #[test]
    fn test_interp1d_rejects_degenerate_interval() {
        let values = [Point3::ORIGIN; 4];
        let repeated = [0.0, 1.0, 1.0, 2.0];
        assert!(interp1d(1.5, &repeated, &values).is_ok());

        let bad = [0.0, 0.5, 0.5 + 1e-15, 1.0];
        assert!(matches!(
            interp1d(0.5 + 5e-16, &bad, &values),
            Err(FitError::DegenerateGeometry { .. })
        ));
    }
}
