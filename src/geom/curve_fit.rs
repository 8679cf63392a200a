//! Cubic B-spline curve fitting to a point cloud.
//!
//! Fits the interior control points of a curve with fixed end points while
//! solving for one parameter `T` per cloud point, using Levenberg-Marquardt
//! on the block-structured normal equations:
//!
//! ```text
//! | A   B | |dT|   |D|      A: m×m diagonal (one T per point)
//! | Bt  C | |dP| = |E|      C: 3(n-2)×3(n-2), data + pentadiagonal smoothing
//! ```
//!
//! `A` is eliminated first, so only the control-point Schur complement goes
//! through the dense solver.
//!
//! # Lifecycle
//! [`CurveFitter::new`] (init) → [`CurveFitter::step`] (repeat) →
//! [`CurveFitter::finish`] (done). [`fit_curve`] drives the whole loop.

use std::io::Write;

use serde::{Deserialize, Serialize};

use super::bspline::{eval_curve, span_index};
use super::core::{Point3, Tolerance, Vec3};
use super::diagnostics::FitDiagnostics;
use super::error::{FitError, try_zeroed};
use super::linalg::{DenseMatrix, interp1d, solve_dense};
use super::lm::{Damping, LmSettings, StepFitter, StepReport, drive};
use super::metrics::{FitMetrics, TimingBucket};
use super::normalize::Normalization;
use super::norms::Norms;

// ============================================================================
// Options
// ============================================================================

/// Flags selecting how a curve fit is initialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveFitFlags {
    /// Cloud points are ordered along the curve.
    pub ordered: bool,
    /// Closed curve. Not implemented; rejected at init.
    pub periodic: bool,
    /// The interior control points passed in are a starting guess.
    pub interior_given: bool,
}

/// Options for [`fit_curve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveFitOptions {
    pub flags: CurveFitFlags,
    /// Initial smoothing weight in `[0, 1]`; decays by `lm.smoothing_decay` per step.
    pub smoothing: f64,
    /// Iteration cap for the driving loop.
    pub max_iterations: usize,
    pub lm: LmSettings,
}

impl Default for CurveFitOptions {
    fn default() -> Self {
        Self {
            flags: CurveFitFlags::default(),
            smoothing: 0.0,
            max_iterations: 100,
            lm: LmSettings::default(),
        }
    }
}

impl CurveFitOptions {
    /// Options for a cloud ordered along the curve.
    #[must_use]
    pub fn ordered() -> Self {
        Self {
            flags: CurveFitFlags {
                ordered: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Treat the interior control points passed to the fitter as a starting guess.
    #[must_use]
    pub fn with_interior_given(mut self, interior_given: bool) -> Self {
        self.flags.interior_given = interior_given;
        self
    }
}

// ============================================================================
// Result
// ============================================================================

/// A fitted curve in the caller's coordinate frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveFit {
    /// All `n` control points, end points unchanged.
    pub control_points: Vec<Point3>,
    /// Parameter `T` in `[0, n-3]` for each cloud point.
    pub parameters: Vec<f64>,
    /// RMS of the objective vector (fit and smoothing terms).
    pub rms_error: f64,
    /// Largest distance between a cloud point and its curve point.
    pub max_error: f64,
    /// Smallest cosine between consecutive control-polygon edges.
    pub min_polygon_dot: f64,
    /// Smallest number of cloud points in any of the `n-3` spans.
    pub min_points_per_span: usize,
    /// LM steps executed.
    pub iterations: usize,
    pub normalization: Normalization,
    pub diagnostics: FitDiagnostics,
}

impl CurveFit {
    /// Evaluate the fitted curve at `t` in `[0, n-3]`.
    pub fn point_at(&self, t: f64) -> Result<Point3, FitError> {
        Ok(eval_curve(t, &self.control_points)?.point)
    }
}

// ============================================================================
// Fitter state
// ============================================================================

/// Data-term contribution of one cloud point to the normal equations.
#[derive(Debug, Clone, Copy)]
struct PointBlock {
    tangent: Vec3,
    /// Damped `A_k`.
    a: f64,
    d: f64,
    /// Interior control point indices (0-based over interior) and basis weights.
    weights: [(usize, f64); 4],
    count: usize,
}

impl PointBlock {
    fn weights(&self) -> &[(usize, f64)] {
        &self.weights[..self.count]
    }
}

/// Candidate state produced by [`CurveFitter::propose`].
#[derive(Debug, Clone)]
pub struct CurveTrial {
    params: Vec<f64>,
    control_points: Vec<Point3>,
    residual: Vec<f64>,
    norms: Norms,
    flat_blocks: usize,
}

impl CurveTrial {
    #[must_use]
    pub fn norms(&self) -> Norms {
        self.norms
    }
}

/// Fit context for one curve.
#[derive(Debug, Clone)]
pub struct CurveFitter {
    cloud: Vec<Point3>,
    normalization: Normalization,
    params: Vec<f64>,
    control_points: Vec<Point3>,
    residual: Vec<f64>,
    norms: Norms,
    smoothing: f64,
    iteration: usize,
    damping: Damping,
    settings: LmSettings,
    diagnostics: FitDiagnostics,
    metrics: FitMetrics,
}

impl CurveFitter {
    /// Validate inputs, normalize, and build the initial parametrization.
    ///
    /// `control_points` holds all `n` control points; the first and last are
    /// fixed. The interior ones are only read when `flags.interior_given`.
    pub fn new(
        cloud: &[Point3],
        control_points: &[Point3],
        flags: CurveFitFlags,
        smoothing: f64,
        settings: LmSettings,
    ) -> Result<Self, FitError> {
        let m = cloud.len();
        let n = control_points.len();

        if m < 2 {
            return Err(FitError::EmptyCloud { provided: m });
        }
        if let Some(index) = cloud.iter().position(|p| !p.is_finite()) {
            return Err(FitError::NonFiniteInput { index });
        }
        if flags.periodic {
            return Err(FitError::InvalidFlag {
                reason: "periodic curves are not implemented",
            });
        }
        check_smoothing(smoothing)?;
        if n < 4 {
            return Err(FitError::InvalidControlCount {
                reason: format!("{n} control points, a cubic curve needs at least 4"),
            });
        }
        if smoothing == 0.0 && m < n - 2 {
            return Err(FitError::InvalidControlCount {
                reason: format!(
                    "{} free control points but only {m} cloud points and no smoothing",
                    n - 2
                ),
            });
        }
        let bad_control = control_points.iter().enumerate().position(|(j, p)| {
            (flags.interior_given || j == 0 || j == n - 1) && !p.is_finite()
        });
        if let Some(j) = bad_control {
            return Err(FitError::NonFiniteInput { index: m + j });
        }

        let mut metrics = FitMetrics::default();
        metrics.begin();

        let normalization = Normalization::from_cloud(cloud)?;
        let cloud = normalization.apply_all(cloud);
        let given = normalization.apply_all(control_points);

        let (params, control_points) = metrics.time(TimingBucket::Initialize, || {
            initial_parametrization(&cloud, &given, flags)
        })?;

        let residual = metrics.time(TimingBucket::Objective, || {
            curve_objective(&cloud, &params, &control_points, smoothing)
        })?;
        let norms = Norms::of(&residual, m);

        log::debug!(
            "curve fit init: m={m} n={n} smooth={smoothing} rms={:.6e} max={:.6e}",
            norms.rms,
            norms.max
        );

        Ok(Self {
            cloud,
            normalization,
            params,
            control_points,
            residual,
            norms,
            smoothing,
            iteration: 0,
            damping: Damping::new(&settings),
            settings,
            diagnostics: FitDiagnostics::new(),
            metrics,
        })
    }

    /// Number of steps taken so far.
    #[must_use]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Current damping parameter.
    #[must_use]
    pub fn lambda(&self) -> f64 {
        self.damping.lambda()
    }

    /// Current objective vector (normalized units).
    #[must_use]
    pub fn residual(&self) -> &[f64] {
        &self.residual
    }

    /// Current RMS in the caller's units.
    #[must_use]
    pub fn rms_error(&self) -> f64 {
        self.normalization.restore_length(self.norms.rms)
    }

    /// Current max point error in the caller's units.
    #[must_use]
    pub fn max_error(&self) -> f64 {
        self.normalization.restore_length(self.norms.max)
    }

    fn point_count(&self) -> usize {
        self.cloud.len()
    }

    fn interior_count(&self) -> usize {
        self.control_points.len() - 2
    }

    /// Recompute the current objective if the smoothing weight changed.
    fn refresh_smoothing(&mut self, smoothing: f64) -> Result<(), FitError> {
        if smoothing == self.smoothing {
            return Ok(());
        }
        self.residual =
            curve_objective(&self.cloud, &self.params, &self.control_points, smoothing)?;
        self.norms = Norms::of(&self.residual, self.point_count());
        self.smoothing = smoothing;
        Ok(())
    }

    /// Compute a trial state from the current one without modifying it.
    pub fn propose(&mut self, smoothing: f64) -> Result<CurveTrial, FitError> {
        check_smoothing(smoothing)?;
        let frozen = self.iteration < self.settings.frozen_iterations;
        let factor = self.damping.diagonal_factor();
        let n = self.control_points.len();
        let nc = self.interior_count();
        let unknowns = 3 * nc;

        let mut metrics = std::mem::take(&mut self.metrics);
        let built = metrics.time(TimingBucket::NormalEquations, || {
            self.normal_equations(smoothing, factor, frozen)
        });
        let (blocks, schur, rhs, flat_blocks) = match built {
            Ok(v) => v,
            Err(err) => {
                self.metrics = metrics;
                return Err(err);
            }
        };

        let delta_cp = if frozen {
            vec![0.0; unknowns]
        } else {
            match metrics.time(TimingBucket::Solve, || solve_dense(schur, rhs)) {
                Ok(x) => x,
                Err(err) => {
                    self.metrics = metrics;
                    return Err(err);
                }
            }
        };

        let tmax = (n - 3) as f64;
        let mut params = self.params.clone();
        for (k, block) in blocks.iter().enumerate() {
            if block.a <= 0.0 {
                continue;
            }
            let mut coupled = 0.0;
            for &(j, w) in block.weights() {
                for c in 0..3 {
                    coupled += block.tangent.axis(c) * w * delta_cp[3 * j + c];
                }
            }
            let dt = (block.d - coupled) / block.a;
            params[k] = (params[k] + dt).clamp(0.0, tmax);
        }

        let mut control_points = self.control_points.clone();
        for j in 0..nc {
            let d = Vec3::new(delta_cp[3 * j], delta_cp[3 * j + 1], delta_cp[3 * j + 2]);
            control_points[j + 1] = control_points[j + 1] + d;
        }

        let objective = metrics.time(TimingBucket::Objective, || {
            curve_objective(&self.cloud, &params, &control_points, smoothing)
        });
        self.metrics = metrics;
        let residual = objective?;
        let norms = Norms::of(&residual, self.point_count());

        Ok(CurveTrial {
            params,
            control_points,
            residual,
            norms,
            flat_blocks,
        })
    }

    /// Adopt a trial state as the current one.
    pub fn commit(&mut self, trial: CurveTrial) {
        self.params = trial.params;
        self.control_points = trial.control_points;
        self.residual = trial.residual;
        self.norms = trial.norms;
    }

    /// One Levenberg-Marquardt iteration.
    pub fn step(&mut self, smoothing: f64) -> Result<StepReport, FitError> {
        check_smoothing(smoothing)?;
        self.refresh_smoothing(smoothing)?;

        let frozen = self.iteration < self.settings.frozen_iterations;
        let trial = self.propose(smoothing)?;
        self.diagnostics.flat_parameter_blocks += trial.flat_blocks;
        let accepted = trial.norms.rms < self.norms.rms;
        if accepted {
            self.commit(trial);
            self.damping.accept();
            self.diagnostics.accepted_steps += 1;
        } else {
            self.damping.reject();
            self.diagnostics.rejected_steps += 1;
        }
        self.iteration += 1;

        log::debug!(
            "curve fit iter {}: rms={:.6e} max={:.6e} {} lambda={:.3e} smooth={smoothing}",
            self.iteration,
            self.norms.rms,
            self.norms.max,
            if accepted { "accept" } else { "reject" },
            self.damping.lambda()
        );

        Ok(StepReport {
            iteration: self.iteration,
            accepted,
            rms: self.rms_error(),
            max: self.max_error(),
            lambda: self.damping.lambda(),
            smoothing,
            frozen,
            norms: self.norms,
        })
    }

    /// Build the damped, Schur-reduced normal equations.
    ///
    /// Returns the per-point blocks (needed for back-substitution), the reduced
    /// matrix `C'`, the reduced right-hand side `E'`, and the number of points
    /// whose tangent block was too small to move.
    fn normal_equations(
        &self,
        smoothing: f64,
        factor: f64,
        frozen: bool,
    ) -> Result<(Vec<PointBlock>, DenseMatrix, Vec<f64>, usize), FitError> {
        let n = self.control_points.len();
        let nc = self.interior_count();
        let unknowns = 3 * nc;

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(self.cloud.len())
            .map_err(|_| FitError::AllocationFailure {
                len: self.cloud.len(),
            })?;

        let mut c = DenseMatrix::zeros(if frozen { 0 } else { unknowns })?;
        let mut e = try_zeroed(if frozen { 0 } else { unknowns })?;

        for (q, &t) in self.cloud.iter().zip(&self.params) {
            let eval = eval_curve(t, &self.control_points)?;
            let r = eval.point.sub_point(*q);

            let mut weights = [(0usize, 0.0f64); 4];
            let mut count = 0;
            for (i, &w) in eval.basis.values.iter().enumerate() {
                let idx = eval.basis.span + i;
                if idx >= 1 && idx <= n - 2 && w != 0.0 {
                    weights[count] = (idx - 1, w);
                    count += 1;
                }
            }

            if !frozen {
                for &(ja, wa) in &weights[..count] {
                    for &(jb, wb) in &weights[..count] {
                        for axis in 0..3 {
                            c.add(3 * ja + axis, 3 * jb + axis, wa * wb);
                        }
                    }
                    for axis in 0..3 {
                        e[3 * ja + axis] -= wa * r.axis(axis);
                    }
                }
            }

            blocks.push(PointBlock {
                tangent: eval.tangent,
                a: eval.tangent.length_squared(),
                d: -eval.tangent.dot(r),
                weights,
                count,
            });
        }

        if !frozen && smoothing > 0.0 {
            add_second_difference_smoothing(&self.control_points, smoothing, &mut c, &mut e);
        }

        // Damping, then eliminate the diagonal block.
        let mut flat = 0;
        for block in &mut blocks {
            block.a *= factor;
            if block.a < Tolerance::PIVOT.eps {
                log::trace!("curve fit: flat parameter block ({:.3e})", block.a);
                block.a = 0.0;
                flat += 1;
            }
        }

        if frozen {
            return Ok((blocks, c, e, flat));
        }

        c.scale_diagonal(factor);

        let mut cols = [(0usize, 0.0f64); 12];
        for block in &blocks {
            if block.a <= 0.0 {
                continue;
            }
            let inv = 1.0 / block.a;
            let mut len = 0;
            for &(j, w) in block.weights() {
                for axis in 0..3 {
                    cols[len] = (3 * j + axis, block.tangent.axis(axis) * w);
                    len += 1;
                }
            }
            for &(ca, va) in &cols[..len] {
                for &(cb, vb) in &cols[..len] {
                    c.add(ca, cb, -inv * va * vb);
                }
                e[ca] -= inv * va * block.d;
            }
        }

        Ok((blocks, c, e, flat))
    }

    /// Extract results in the caller's frame and release the context.
    #[must_use]
    pub fn finish(self) -> CurveFit {
        let (iterations, smoothing) = (self.iteration, self.smoothing);
        self.finish_with(iterations, false, smoothing)
    }

    fn finish_with(mut self, iterations: usize, converged: bool, final_smoothing: f64) -> CurveFit {
        let n = self.control_points.len();
        let mut metrics = std::mem::take(&mut self.metrics);
        let (min_polygon_dot, counts) = metrics.time(TimingBucket::Finalize, || {
            (
                min_polygon_dot(&self.control_points),
                points_per_span(&self.params, n),
            )
        });
        let min_points_per_span = counts.iter().copied().min().unwrap_or(0);

        let mut diagnostics = self.diagnostics;
        for (span, count) in counts.iter().enumerate() {
            if *count == 0 {
                diagnostics.add_warning(format!("span {span} has no cloud points"));
            }
        }
        diagnostics.final_lambda = self.damping.lambda();
        diagnostics.final_smoothing = final_smoothing;
        diagnostics.converged = converged;
        diagnostics.timing = metrics.end();

        CurveFit {
            control_points: self.normalization.restore_all(&self.control_points),
            parameters: self.params,
            rms_error: self.normalization.restore_length(self.norms.rms),
            max_error: self.normalization.restore_length(self.norms.max),
            min_polygon_dot,
            min_points_per_span,
            iterations,
            normalization: self.normalization,
            diagnostics,
        }
    }
}

impl StepFitter for CurveFitter {
    fn norms(&self) -> Norms {
        self.norms
    }

    fn step(&mut self, smoothing: f64) -> Result<StepReport, FitError> {
        CurveFitter::step(self, smoothing)
    }
}

// ============================================================================
// Driving wrappers
// ============================================================================

/// Fit a cubic B-spline curve to `cloud`.
///
/// `control_points` holds all `n` control points: the first and last are kept
/// fixed; the interior ones are used as a starting guess only when
/// `options.flags.interior_given` is set.
///
/// # Errors
/// Returns an error for invalid input or when a step hits a singular system.
pub fn fit_curve(
    cloud: &[Point3],
    control_points: &[Point3],
    options: CurveFitOptions,
) -> Result<CurveFit, FitError> {
    fit_curve_with_progress(cloud, control_points, options, None)
}

/// [`fit_curve`] writing one progress line per iteration to `progress`.
pub fn fit_curve_with_progress(
    cloud: &[Point3],
    control_points: &[Point3],
    options: CurveFitOptions,
    progress: Option<&mut dyn Write>,
) -> Result<CurveFit, FitError> {
    let mut fitter = CurveFitter::new(
        cloud,
        control_points,
        options.flags,
        options.smoothing,
        options.lm,
    )?;
    let outcome = drive(
        &mut fitter,
        options.smoothing,
        options.max_iterations,
        &options.lm,
        progress,
    )?;
    let fit = fitter.finish_with(outcome.iterations, outcome.converged, outcome.final_smoothing);
    log::debug!(
        "curve fit done: rms={:.6e} max={:.6e} {}",
        fit.rms_error,
        fit.max_error,
        fit.diagnostics.summary()
    );
    Ok(fit)
}

// ============================================================================
// Objective and initialization
// ============================================================================

pub(crate) fn check_smoothing(smoothing: f64) -> Result<(), FitError> {
    if (0.0..=1.0).contains(&smoothing) {
        Ok(())
    } else {
        Err(FitError::InvalidSmoothing { value: smoothing })
    }
}

/// Objective vector: 3 fit residuals per cloud point, then
/// `smoothing * (P[j-1] - 2P[j] + P[j+1])` for every interior control point.
pub fn curve_objective(
    cloud: &[Point3],
    params: &[f64],
    control_points: &[Point3],
    smoothing: f64,
) -> Result<Vec<f64>, FitError> {
    let n = control_points.len();
    let mut f = try_zeroed(3 * cloud.len() + 3 * n.saturating_sub(2))?;

    for (k, (q, &t)) in cloud.iter().zip(params).enumerate() {
        let r = eval_curve(t, control_points)?.point.sub_point(*q);
        f[3 * k] = r.x;
        f[3 * k + 1] = r.y;
        f[3 * k + 2] = r.z;
    }

    let base = 3 * cloud.len();
    for j in 1..n - 1 {
        let s = (control_points[j - 1].to_vec3() - control_points[j].to_vec3() * 2.0
            + control_points[j + 1].to_vec3())
            * smoothing;
        let at = base + 3 * (j - 1);
        f[at] = s.x;
        f[at + 1] = s.y;
        f[at + 2] = s.z;
    }
    Ok(f)
}

/// Add the second-difference smoothing term to the normal equations.
///
/// Each interior control point `j` contributes the residual
/// `s_j = smoothing * (P[j-1] - 2P[j] + P[j+1])`; its Jacobian couples at most
/// three neighbouring unknowns, giving the `{1, -4, 6, -4, 1}` band in `C`
/// (tapered where the stencil reaches a fixed end point).
fn add_second_difference_smoothing(
    control_points: &[Point3],
    smoothing: f64,
    c: &mut DenseMatrix,
    e: &mut [f64],
) {
    let n = control_points.len();
    let s2 = smoothing * smoothing;
    for j in 1..n - 1 {
        let s = (control_points[j - 1].to_vec3() - control_points[j].to_vec3() * 2.0
            + control_points[j + 1].to_vec3())
            * smoothing;

        let stencil = [(j - 1, 1.0), (j, -2.0), (j + 1, 1.0)];
        for &(pa, ca) in &stencil {
            if pa == 0 || pa == n - 1 {
                continue;
            }
            for &(pb, cb) in &stencil {
                if pb == 0 || pb == n - 1 {
                    continue;
                }
                for axis in 0..3 {
                    c.add(3 * (pa - 1) + axis, 3 * (pb - 1) + axis, s2 * ca * cb);
                }
            }
            for axis in 0..3 {
                e[3 * (pa - 1) + axis] -= smoothing * ca * s.axis(axis);
            }
        }
    }
}

/// Initial `T` per cloud point and initial control polygon (normalized frame).
fn initial_parametrization(
    cloud: &[Point3],
    given: &[Point3],
    flags: CurveFitFlags,
) -> Result<(Vec<f64>, Vec<Point3>), FitError> {
    let n = given.len();
    let m = cloud.len();
    let tmax = (n - 3) as f64;
    let first = given[0];
    let last = given[n - 1];
    let straight: Vec<Point3> = (0..n)
        .map(|j| first.lerp(last, j as f64 / (n - 1) as f64))
        .collect();
    let by_index = || -> Vec<f64> {
        (0..m).map(|k| k as f64 / (m - 1) as f64 * tmax).collect()
    };

    if flags.interior_given {
        let params = nearest_control_point_params(cloud, given)?;
        return Ok((params, given.to_vec()));
    }

    if m < 3 {
        let dir = last.sub_point(first);
        let len2 = dir.length_squared();
        if len2 < Tolerance::ZERO_LENGTH.eps {
            return Ok((by_index(), straight));
        }
        let params = cloud
            .iter()
            .map(|q| (q.sub_point(first).dot(dir) / len2).clamp(0.0, 1.0) * tmax)
            .collect();
        return Ok((params, straight));
    }

    if !flags.ordered {
        return Ok((by_index(), straight));
    }

    // Ordered: cumulative chord length rescaled to [0, n-3].
    let mut table = Vec::with_capacity(m);
    table.push(0.0);
    for k in 1..m {
        let prev = table[k - 1];
        table.push(prev + cloud[k].distance_to(cloud[k - 1]));
    }
    let total = table[m - 1];
    if Tolerance::ZERO_LENGTH.is_zero_length(total) {
        return Err(FitError::DegenerateGeometry {
            reason: "ordered cloud has zero chord length".to_string(),
        });
    }
    for t in &mut table {
        *t = *t / total * tmax;
    }

    let mut control_points = straight;
    for j in 1..n - 1 {
        let station = j as f64 * tmax / (n - 1) as f64;
        control_points[j] = interp1d(station, &table, cloud)?;
    }
    Ok((table, control_points))
}

/// Parameters from a given control polygon: each control point gets the `T`
/// of its cumulative polygon length, and each cloud point takes the `T` of its
/// nearest control point, shifted toward the neighbour whose edge it projects
/// onto.
fn nearest_control_point_params(
    cloud: &[Point3],
    control_points: &[Point3],
) -> Result<Vec<f64>, FitError> {
    let n = control_points.len();
    let tmax = (n - 3) as f64;

    let mut stations = Vec::with_capacity(n);
    stations.push(0.0);
    for j in 1..n {
        let prev = stations[j - 1];
        stations.push(prev + control_points[j].distance_to(control_points[j - 1]));
    }
    let total = stations[n - 1];
    if Tolerance::ZERO_LENGTH.is_zero_length(total) {
        return Err(FitError::DegenerateGeometry {
            reason: "given control polygon has zero length".to_string(),
        });
    }
    for s in &mut stations {
        *s = *s / total * tmax;
    }

    let params = cloud
        .iter()
        .map(|q| {
            let (j, _) = control_points
                .iter()
                .enumerate()
                .map(|(j, p)| (j, p.distance_squared_to(*q)))
                .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best });

            let mut best: Option<(usize, f64)> = None;
            for nb in [j.wrapping_sub(1), j + 1] {
                if nb >= n {
                    continue;
                }
                let edge = control_points[nb].sub_point(control_points[j]);
                let len2 = edge.length_squared();
                if len2 < Tolerance::ZERO_LENGTH.eps {
                    continue;
                }
                let frac = q.sub_point(control_points[j]).dot(edge) / len2;
                if frac > 0.0 && best.is_none_or(|(_, f)| frac > f) {
                    best = Some((nb, frac.min(1.0)));
                }
            }
            match best {
                Some((nb, frac)) => stations[j] + frac * (stations[nb] - stations[j]),
                None => stations[j],
            }
        })
        .collect();
    Ok(params)
}

/// Smallest cosine between consecutive control-polygon edges (1 if straight).
fn min_polygon_dot(control_points: &[Point3]) -> f64 {
    control_points
        .windows(3)
        .filter_map(|w| {
            let a = w[1].sub_point(w[0]).normalized()?;
            let b = w[2].sub_point(w[1]).normalized()?;
            Some(a.dot(b))
        })
        .fold(1.0_f64, f64::min)
}

/// Number of parameters falling in each of the `n-3` spans.
fn points_per_span(params: &[f64], n: usize) -> Vec<usize> {
    let mut counts = vec![0; n - 3];
    for &t in params {
        counts[span_index(n, t)] += 1;
    }
    counts
}
