//! Norms of the objective vector.
//!
//! The objective stores three residual components per cloud point followed by
//! three smoothing components per free control point.

use serde::{Deserialize, Serialize};

/// Root-mean-square of all components of `f`.
#[must_use]
pub fn rms_norm(f: &[f64]) -> f64 {
    if f.is_empty() {
        return 0.0;
    }
    (f.iter().map(|v| v * v).sum::<f64>() / f.len() as f64).sqrt()
}

/// Largest point distance among the first `point_count` residual triples.
#[must_use]
pub fn max_point_norm(f: &[f64], point_count: usize) -> f64 {
    f.chunks_exact(3)
        .take(point_count)
        .map(|r| (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt())
        .fold(0.0_f64, f64::max)
}

/// RMS and max norms of one objective vector, in normalized units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Norms {
    pub rms: f64,
    pub max: f64,
}

impl Norms {
    #[must_use]
    pub fn of(f: &[f64], point_count: usize) -> Self {
        Self {
            rms: rms_norm(f),
            max: max_point_norm(f, point_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_norm() {
        assert_eq!(rms_norm(&[]), 0.0);
        assert!((rms_norm(&[3.0, 4.0]) - (12.5_f64).sqrt()).abs() < 1e-15);
    }

    #[test]
    fn test_max_point_norm_ignores_smoothing_tail() {
        // Two points then one smoothing triple that must not count.
        let f = [3.0, 4.0, 0.0, 0.0, 0.0, 1.0, 100.0, 0.0, 0.0];
        assert!((max_point_norm(&f, 2) - 5.0).abs() < 1e-15);
        let n = Norms::of(&f, 2);
        assert!(n.rms > 30.0);
        assert!((n.max - 5.0).abs() < 1e-15);
    }
}
