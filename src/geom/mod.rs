//! Cubic B-spline fitting engine.
//!
//! Bottom-up: `core` (points, tolerances) → `bspline` (basis and evaluators)
//! → `linalg`/`norms`/`normalize` → `lm` (damping and driving loop) →
//! `curve_fit` / `surface_fit` → `batch`.

mod batch;
mod bspline;
mod core;
mod curve_fit;
mod diagnostics;
mod error;
mod linalg;
mod lm;
mod metrics;
mod normalize;
mod norms;
mod surface_fit;

pub use batch::{FitJob, FitOutcome, FitResult, FitScheduler, fit_batch};
pub use bspline::{
    CubicBasis, CurveEval, DEGREE, SurfaceEval, cubic_basis, eval_curve, eval_surface, span_index,
};
pub use core::{BBox, Point3, Tolerance, Vec3};
pub use curve_fit::{
    CurveFit, CurveFitFlags, CurveFitOptions, CurveFitter, CurveTrial, curve_objective, fit_curve,
    fit_curve_with_progress,
};
pub use diagnostics::FitDiagnostics;
pub use error::FitError;
pub use linalg::{DenseMatrix, interp1d, solve_dense};
pub use lm::{Damping, DriveOutcome, LmSettings, StepFitter, StepReport, drive};
pub use metrics::{FitMetrics, FitTimingReport, TimingBucket};
pub use normalize::Normalization;
pub use norms::{Norms, max_point_norm, rms_norm};
pub use surface_fit::{
    SmoothingMask, SurfaceFit, SurfaceFitFlags, SurfaceFitOptions, SurfaceFitter, SurfaceTrial,
    fit_surface, fit_surface_with_progress, surface_objective,
};

#[cfg(test)]
mod tests;
