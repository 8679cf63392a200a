//! Cubic B-spline evaluation on the open-uniform knot vector.
//!
//! A spline with `n` control points (`n > 3`) uses the knots
//! `0,0,0,0,1,2,...,n-4,n-3,n-3,n-3,n-3`, so its parameter runs over
//! `[0, n-3]` and every unit interval is one polynomial span.
//!
//! The evaluators return the basis weights alongside the position because the
//! fitter needs `dX/dP` (the weight of each control point) for its Jacobian;
//! the same scalar weight applies to all three coordinate axes.

use super::core::{Point3, Vec3};
use super::error::FitError;

/// Degree of every spline handled by the fitter.
pub const DEGREE: usize = 3;

/// The four non-zero basis functions at one parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicBasis {
    /// Index of the first control point influencing the span.
    pub span: usize,
    /// Basis values for control points `span..span + 4`.
    pub values: [f64; 4],
    /// Derivatives of `values` with respect to the parameter.
    pub derivs: [f64; 4],
}

/// Knot `i` of the open-uniform cubic knot vector for `ncp` control points.
#[inline]
fn knot(ncp: usize, i: usize) -> f64 {
    (i.saturating_sub(DEGREE)).min(ncp - DEGREE) as f64
}

/// Span index for parameter `t`: `clamp(floor(t), 0, ncp - 4)`.
#[must_use]
pub fn span_index(ncp: usize, t: f64) -> usize {
    let last = ncp.saturating_sub(DEGREE + 1);
    if !(t > 0.0) {
        return 0;
    }
    (t.floor() as usize).min(last)
}

/// Evaluate the four active cubic basis functions and their first derivatives.
///
/// Out-of-range `t` is not an error; the nearest span is extrapolated, so
/// callers clamp beforehand.
pub fn cubic_basis(ncp: usize, t: f64) -> Result<CubicBasis, FitError> {
    if ncp <= DEGREE {
        return Err(FitError::InvalidControlCount {
            reason: format!("{ncp} control points, a cubic needs at least 4"),
        });
    }

    let span = span_index(ncp, t);
    let k = span + DEGREE;

    // Cox-de Boor triangle: upper part holds basis values of rising degree,
    // lower part the knot differences used for the derivative.
    let mut ndu = [[0.0_f64; 4]; 4];
    let mut left = [0.0_f64; 4];
    let mut right = [0.0_f64; 4];
    ndu[0][0] = 1.0;
    for j in 1..=DEGREE {
        left[j] = t - knot(ncp, k + 1 - j);
        right[j] = knot(ncp, k + j) - t;
        let mut saved = 0.0;
        for r in 0..j {
            ndu[j][r] = right[r + 1] + left[j - r];
            let temp = ndu[r][j - 1] / ndu[j][r];
            ndu[r][j] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        ndu[j][j] = saved;
    }

    let mut values = [0.0; 4];
    let mut derivs = [0.0; 4];
    for r in 0..=DEGREE {
        values[r] = ndu[r][DEGREE];
        let mut d = 0.0;
        if r >= 1 {
            d += ndu[r - 1][DEGREE - 1] / ndu[DEGREE][r - 1];
        }
        if r < DEGREE {
            d -= ndu[r][DEGREE - 1] / ndu[DEGREE][r];
        }
        derivs[r] = DEGREE as f64 * d;
    }

    Ok(CubicBasis {
        span,
        values,
        derivs,
    })
}

// ============================================================================
// Curve evaluation
// ============================================================================

/// Position and derivatives of a cubic curve at one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveEval {
    pub point: Point3,
    /// `dX/dT`.
    pub tangent: Vec3,
    /// Active basis; `basis.values[i]` is `dX/dP` for control point `basis.span + i`.
    pub basis: CubicBasis,
}

impl CurveEval {
    /// `dX/dP` expanded to one entry per control point (zero outside the span).
    #[must_use]
    pub fn control_derivatives(&self, ncp: usize) -> Vec<f64> {
        let mut out = vec![0.0; ncp];
        for (i, w) in self.basis.values.iter().enumerate() {
            if let Some(slot) = out.get_mut(self.basis.span + i) {
                *slot = *w;
            }
        }
        out
    }
}

/// Evaluate a cubic B-spline curve at `t`.
pub fn eval_curve(t: f64, control_points: &[Point3]) -> Result<CurveEval, FitError> {
    let basis = cubic_basis(control_points.len(), t)?;
    let mut point = Vec3::ZERO;
    let mut tangent = Vec3::ZERO;
    for i in 0..4 {
        let cp = control_points[basis.span + i].to_vec3();
        point = point + cp * basis.values[i];
        tangent = tangent + cp * basis.derivs[i];
    }
    Ok(CurveEval {
        point: point.into(),
        tangent,
        basis,
    })
}

// ============================================================================
// Surface evaluation
// ============================================================================

/// Position and derivatives of a tensor-product cubic surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceEval {
    pub point: Point3,
    /// `dX/dU`.
    pub du: Vec3,
    /// `dX/dV`.
    pub dv: Vec3,
    pub basis_u: CubicBasis,
    pub basis_v: CubicBasis,
}

impl SurfaceEval {
    /// `dX/dP` for control point `(span_u + i, span_v + j)` of the active 4×4 window.
    #[must_use]
    pub fn weight(&self, i: usize, j: usize) -> f64 {
        self.basis_u.values[i] * self.basis_v.values[j]
    }

    /// `dX/dP` expanded to the full `nu*nv` grid (index `i + nu*j`).
    #[must_use]
    pub fn control_derivatives(&self, nu: usize, nv: usize) -> Vec<f64> {
        let mut out = vec![0.0; nu * nv];
        for j in 0..4 {
            for i in 0..4 {
                let iu = self.basis_u.span + i;
                let jv = self.basis_v.span + j;
                if iu < nu && jv < nv {
                    out[iu + nu * jv] = self.weight(i, j);
                }
            }
        }
        out
    }
}

/// Evaluate a cubic B-spline surface at `(u, v)`.
///
/// `control_points` is an `nu × nv` grid stored with `u` varying fastest
/// (index `i + nu*j`).
pub fn eval_surface(
    u: f64,
    v: f64,
    nu: usize,
    nv: usize,
    control_points: &[Point3],
) -> Result<SurfaceEval, FitError> {
    if control_points.len() != nu * nv {
        return Err(FitError::GridSizeMismatch {
            expected: nu * nv,
            provided: control_points.len(),
        });
    }
    let basis_u = cubic_basis(nu, u)?;
    let basis_v = cubic_basis(nv, v)?;

    let mut point = Vec3::ZERO;
    let mut du = Vec3::ZERO;
    let mut dv = Vec3::ZERO;
    for j in 0..4 {
        for i in 0..4 {
            let cp = control_points[(basis_u.span + i) + nu * (basis_v.span + j)].to_vec3();
            point = point + cp * (basis_u.values[i] * basis_v.values[j]);
            du = du + cp * (basis_u.derivs[i] * basis_v.values[j]);
            dv = dv + cp * (basis_u.values[i] * basis_v.derivs[j]);
        }
    }

    Ok(SurfaceEval {
        point: point.into(),
        du,
        dv,
        basis_u,
        basis_v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_index_clamps() {
        assert_eq!(span_index(6, -1.0), 0);
        assert_eq!(span_index(6, 0.0), 0);
        assert_eq!(span_index(6, 1.5), 1);
        assert_eq!(span_index(6, 3.0), 2);
        assert_eq!(span_index(6, 9.0), 2);
    }

    #[test]
    fn test_basis_rejects_too_few_control_points() {
        assert!(matches!(
            cubic_basis(3, 0.0),
            Err(FitError::InvalidControlCount { .. })
        ));
    }

    #[test]
    fn test_single_span_is_bernstein() {
        // Four control points reduce to a cubic Bezier on [0, 1].
        let b = cubic_basis(4, 0.5).unwrap();
        let expected = [0.125, 0.375, 0.375, 0.125];
        for (got, want) in b.values.iter().zip(expected) {
            assert!((got - want).abs() < 1e-14);
        }
        let expected_d = [-0.75, -0.75, 0.75, 0.75];
        for (got, want) in b.derivs.iter().zip(expected_d) {
            assert!((got - want).abs() < 1e-14);
        }
    }

    #[test]
    fn test_uniform_interior_span() {
        // Far from the clamped ends the basis is the uniform cubic one.
        let b = cubic_basis(10, 3.0).unwrap();
        assert_eq!(b.span, 3);
        let expected = [1.0 / 6.0, 4.0 / 6.0, 1.0 / 6.0, 0.0];
        for (got, want) in b.values.iter().zip(expected) {
            assert!((got - want).abs() < 1e-14);
        }
    }

    #[test]
    fn test_control_derivatives_sum_to_one() {
        let cps: Vec<Point3> = (0..6).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let eval = eval_curve(1.25, &cps).unwrap();
        let d = eval.control_derivatives(cps.len());
        assert_eq!(d.len(), 6);
        assert!((d.iter().sum::<f64>() - 1.0).abs() < 1e-14);
    }
}
