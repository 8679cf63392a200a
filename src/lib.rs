//! Least-squares fitting of cubic B-spline curves and bicubic B-spline
//! surfaces to 3D point clouds.
//!
//! The fitters solve simultaneously for each cloud point's parameter and for
//! the interior control points, using a Levenberg-Marquardt loop on the
//! block-structured normal equations. End points (curves) and the boundary
//! ring (surfaces) of the control net are held fixed.
//!
//! ```no_run
//! use bspline_fitter::{CurveFitOptions, Point3, fit_curve};
//!
//! let cloud: Vec<Point3> = (0..20)
//!     .map(|k| {
//!         let t = f64::from(k) / 19.0;
//!         Point3::new(t, (t * std::f64::consts::PI).sin(), 0.0)
//!     })
//!     .collect();
//! let mut control_points = vec![Point3::ORIGIN; 6];
//! control_points[5] = Point3::new(1.0, 0.0, 0.0);
//!
//! let fit = fit_curve(&cloud, &control_points, CurveFitOptions::ordered())?;
//! println!("rms {:.3e} after {} steps", fit.rms_error, fit.iterations);
//! # Ok::<(), bspline_fitter::FitError>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss, clippy::many_single_char_names)]

pub mod geom;

pub use geom::{
    CurveFit, CurveFitFlags, CurveFitOptions, FitDiagnostics, FitError, FitJob, FitOutcome,
    FitResult, LmSettings, Point3, StepReport, SurfaceFit, SurfaceFitFlags, SurfaceFitOptions,
    Vec3, fit_batch, fit_curve, fit_curve_with_progress, fit_surface, fit_surface_with_progress,
};
