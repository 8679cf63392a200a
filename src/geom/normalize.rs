//! Conditioning of the least-squares problem.
//!
//! Clouds are translated to their centroid and divided by the largest
//! bounding-box extent before fitting; results are mapped back afterwards.

use serde::{Deserialize, Serialize};

use super::core::{BBox, Point3, Tolerance, Vec3};
use super::error::FitError;

/// Translation and scale applied to a cloud before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub scale: f64,
    pub xavg: f64,
    pub yavg: f64,
    pub zavg: f64,
}

impl Normalization {
    /// Centroid and largest extent of `cloud`.
    ///
    /// Fails with [`FitError::DegenerateGeometry`] when every point coincides.
    pub fn from_cloud(cloud: &[Point3]) -> Result<Self, FitError> {
        let bbox = BBox::from_points(cloud).ok_or(FitError::EmptyCloud { provided: 0 })?;
        let scale = bbox.max_extent();
        if !scale.is_finite() || Tolerance::ZERO_LENGTH.is_zero_length(scale) {
            return Err(FitError::DegenerateGeometry {
                reason: format!("bounding-box extent {scale:e} of the cloud is zero"),
            });
        }

        let n = cloud.len() as f64;
        let sum = cloud
            .iter()
            .fold(Vec3::ZERO, |acc, p| acc + p.to_vec3());
        Ok(Self {
            scale,
            xavg: sum.x / n,
            yavg: sum.y / n,
            zavg: sum.z / n,
        })
    }

    #[must_use]
    pub fn apply(&self, p: Point3) -> Point3 {
        Point3::new(
            (p.x - self.xavg) / self.scale,
            (p.y - self.yavg) / self.scale,
            (p.z - self.zavg) / self.scale,
        )
    }

    #[must_use]
    pub fn restore(&self, p: Point3) -> Point3 {
        Point3::new(
            p.x * self.scale + self.xavg,
            p.y * self.scale + self.yavg,
            p.z * self.scale + self.zavg,
        )
    }

    /// Convert a length measured in normalized units back to caller units.
    #[must_use]
    pub fn restore_length(&self, len: f64) -> f64 {
        len * self.scale
    }

    #[must_use]
    pub fn apply_all(&self, points: &[Point3]) -> Vec<Point3> {
        points.iter().map(|p| self.apply(*p)).collect()
    }

    #[must_use]
    pub fn restore_all(&self, points: &[Point3]) -> Vec<Point3> {
        points.iter().map(|p| self.restore(*p)).collect()
    }
}
