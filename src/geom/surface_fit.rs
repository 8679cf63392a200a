//! Tensor-product cubic B-spline surface fitting to a point cloud.
//!
//! The boundary ring of the `nu × nv` control grid is fixed; the fitter solves
//! for the `(nu-2)(nv-2)` interior control points and one `(U, V)` pair per
//! cloud point. The normal equations have the same block layout as the curve
//! fitter, but the per-point block `A` is 2×2 and smoothing uses a discrete
//! Laplacian mask over the interior nodes:
//!
//! ```text
//! s_p = smoothing * (4 P_p - P_left - P_right - P_down - P_up)
//! ```
//!
//! Neighbours on the boundary ring are fixed, so they appear in the residual
//! but not in the mask.
//!
//! Control grids are stored with `u` varying fastest (index `i + nu*j`).

use std::io::Write;

use serde::{Deserialize, Serialize};

use super::bspline::{eval_surface, span_index};
use super::core::{Point3, Tolerance, Vec3};
use super::curve_fit::check_smoothing;
use super::diagnostics::FitDiagnostics;
use super::error::{FitError, try_zeroed};
use super::linalg::{DenseMatrix, solve_dense};
use super::lm::{Damping, LmSettings, StepFitter, StepReport, drive};
use super::metrics::{FitMetrics, TimingBucket};
use super::normalize::Normalization;
use super::norms::Norms;

// ============================================================================
// Options
// ============================================================================

/// Flags selecting how a surface fit is initialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceFitFlags {
    /// Closed in `u`. Not implemented; rejected at init.
    pub periodic_u: bool,
    /// Closed in `v`. Not implemented; rejected at init.
    pub periodic_v: bool,
    /// The interior control points passed in are a starting guess.
    pub interior_given: bool,
}

/// Options for [`fit_surface`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceFitOptions {
    pub flags: SurfaceFitFlags,
    /// Initial smoothing weight in `[0, 1]`.
    pub smoothing: f64,
    pub max_iterations: usize,
    pub lm: LmSettings,
}

impl Default for SurfaceFitOptions {
    fn default() -> Self {
        Self {
            flags: SurfaceFitFlags::default(),
            smoothing: 0.0,
            max_iterations: 100,
            lm: LmSettings::default(),
        }
    }
}

impl SurfaceFitOptions {
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

    #[must_use]
    pub fn with_interior_given(mut self, interior_given: bool) -> Self {
        self.flags.interior_given = interior_given;
        self
    }
}

// ============================================================================
// Result
// ============================================================================

/// A fitted surface in the caller's coordinate frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceFit {
    pub nu: usize,
    pub nv: usize,
    /// Full `nu × nv` grid, boundary ring unchanged.
    pub control_points: Vec<Point3>,
    /// `(U, V)` per cloud point, `U` in `[0, nu-3]` and `V` in `[0, nv-3]`.
    pub parameters: Vec<[f64; 2]>,
    pub rms_error: f64,
    pub max_error: f64,
    /// Smallest number of cloud points in any of the `(nu-3)(nv-3)` cells.
    pub min_points_per_cell: usize,
    pub iterations: usize,
    pub normalization: Normalization,
    pub diagnostics: FitDiagnostics,
}

impl SurfaceFit {
    /// Evaluate the fitted surface at `(u, v)`.
    pub fn point_at(&self, u: f64, v: f64) -> Result<Point3, FitError> {
        Ok(eval_surface(u, v, self.nu, self.nv, &self.control_points)?.point)
    }

    /// Control point `(i, j)` of the fitted grid.
    #[must_use]
    pub fn control_point(&self, i: usize, j: usize) -> Point3 {
        self.control_points[i + self.nu * j]
    }
}

// ============================================================================
// Smoothing mask
// ============================================================================

/// Five-point Laplacian over the interior nodes, truncated at the boundary.
///
/// Row `p` holds `(q, coefficient)` for `+4` on the diagonal and `-1` for each
/// interior 4-neighbour.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingMask {
    nu: usize,
    rows: Vec<Vec<(usize, f64)>>,
}

impl SmoothingMask {
    #[must_use]
    pub fn new(nu: usize, nv: usize) -> Self {
        let iu = nu - 2;
        let iv = nv - 2;
        let mut rows = Vec::with_capacity(iu * iv);
        for j in 0..iv {
            for i in 0..iu {
                let mut row = vec![(i + iu * j, 4.0)];
                if i > 0 {
                    row.push((i - 1 + iu * j, -1.0));
                }
                if i + 1 < iu {
                    row.push((i + 1 + iu * j, -1.0));
                }
                if j > 0 {
                    row.push((i + iu * (j - 1), -1.0));
                }
                if j + 1 < iv {
                    row.push((i + iu * (j + 1), -1.0));
                }
                rows.push(row);
            }
        }
        Self { nu, rows }
    }

    /// Number of interior nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Mask entry `(p, q)`.
    #[must_use]
    pub fn entry(&self, p: usize, q: usize) -> f64 {
        self.rows[p]
            .iter()
            .find(|(col, _)| *col == q)
            .map_or(0.0, |(_, c)| *c)
    }

    /// Laplacian residual at interior node `p`, including fixed boundary neighbours.
    fn residual(&self, p: usize, grid: &[Point3]) -> Vec3 {
        let iu = self.nu - 2;
        let i = p % iu + 1;
        let j = p / iu + 1;
        let nu = self.nu;
        node(grid, nu, i, j) * 4.0
            - node(grid, nu, i - 1, j)
            - node(grid, nu, i + 1, j)
            - node(grid, nu, i, j - 1)
            - node(grid, nu, i, j + 1)
    }

    /// Add `smoothing² MᵀM` to `c` and the matching gradient to `e`.
    fn accumulate(&self, grid: &[Point3], smoothing: f64, c: &mut DenseMatrix, e: &mut [f64]) {
        let s2 = smoothing * smoothing;
        for (k, row) in self.rows.iter().enumerate() {
            let s = self.residual(k, grid) * smoothing;
            for &(a, ma) in row {
                for &(b, mb) in row {
                    for axis in 0..3 {
                        c.add(3 * a + axis, 3 * b + axis, s2 * ma * mb);
                    }
                }
                for axis in 0..3 {
                    e[3 * a + axis] -= smoothing * ma * s.axis(axis);
                }
            }
        }
    }
}

// ============================================================================
// Fitter state
// ============================================================================

/// Data-term contribution of one cloud point.
#[derive(Debug, Clone)]
struct PointBlock {
    /// Damped 2×2 `A_k` inverse, row-major; `None` when singular.
    inverse: Option<[f64; 4]>,
    d: [f64; 2],
    /// `(column, dX_c/dU * w, dX_c/dV * w)` for every interior unknown touched.
    cols: Vec<(usize, f64, f64)>,
}

/// Candidate state produced by [`SurfaceFitter::propose`].
#[derive(Debug, Clone)]
pub struct SurfaceTrial {
    params: Vec<[f64; 2]>,
    control_points: Vec<Point3>,
    residual: Vec<f64>,
    norms: Norms,
    flat_blocks: usize,
}

impl SurfaceTrial {
    #[must_use]
    pub fn norms(&self) -> Norms {
        self.norms
    }
}

/// Fit context for one surface.
#[derive(Debug, Clone)]
pub struct SurfaceFitter {
    cloud: Vec<Point3>,
    nu: usize,
    nv: usize,
    normalization: Normalization,
    params: Vec<[f64; 2]>,
    control_points: Vec<Point3>,
    mask: SmoothingMask,
    residual: Vec<f64>,
    norms: Norms,
    smoothing: f64,
    iteration: usize,
    damping: Damping,
    settings: LmSettings,
    diagnostics: FitDiagnostics,
    metrics: FitMetrics,
}

impl SurfaceFitter {
    /// Validate inputs, normalize, and build the initial interior net and `(U, V)`.
    ///
    /// `control_points` is the full `nu × nv` grid; only the boundary ring is
    /// read unless `flags.interior_given`.
    pub fn new(
        cloud: &[Point3],
        nu: usize,
        nv: usize,
        control_points: &[Point3],
        flags: SurfaceFitFlags,
        smoothing: f64,
        settings: LmSettings,
    ) -> Result<Self, FitError> {
        let m = cloud.len();
        if m < 2 {
            return Err(FitError::EmptyCloud { provided: m });
        }
        if let Some(index) = cloud.iter().position(|p| !p.is_finite()) {
            return Err(FitError::NonFiniteInput { index });
        }
        if flags.periodic_u || flags.periodic_v {
            return Err(FitError::InvalidFlag {
                reason: "periodic surfaces are not implemented",
            });
        }
        check_smoothing(smoothing)?;
        if nu < 4 || nv < 4 {
            return Err(FitError::InvalidControlCount {
                reason: format!("{nu}x{nv} control grid, a bicubic surface needs at least 4x4"),
            });
        }
        if control_points.len() != nu * nv {
            return Err(FitError::GridSizeMismatch {
                expected: nu * nv,
                provided: control_points.len(),
            });
        }
        let free = (nu - 2) * (nv - 2);
        if smoothing == 0.0 && m < free {
            return Err(FitError::InvalidControlCount {
                reason: format!(
                    "{free} free control points but only {m} cloud points and no smoothing"
                ),
            });
        }
        let bad_control = control_points.iter().enumerate().position(|(k, p)| {
            (flags.interior_given || is_boundary(k, nu, nv)) && !p.is_finite()
        });
        if let Some(k) = bad_control {
            return Err(FitError::NonFiniteInput { index: m + k });
        }

        let mut metrics = FitMetrics::default();
        metrics.begin();

        let normalization = Normalization::from_cloud(cloud)?;
        let cloud = normalization.apply_all(cloud);
        let mut grid = normalization.apply_all(control_points);

        let params = metrics.time(TimingBucket::Initialize, || {
            if !flags.interior_given {
                fill_coons_interior(&mut grid, nu, nv);
            }
            nearest_interior_params(&cloud, &grid, nu, nv)
        });
        let mask = SmoothingMask::new(nu, nv);

        let residual = metrics.time(TimingBucket::Objective, || {
            surface_objective(&cloud, &params, &grid, nu, nv, smoothing)
        })?;
        let norms = Norms::of(&residual, m);

        log::debug!(
            "surface fit init: m={m} grid={nu}x{nv} smooth={smoothing} rms={:.6e} max={:.6e}",
            norms.rms,
            norms.max
        );

        Ok(Self {
            cloud,
            nu,
            nv,
            normalization,
            params,
            control_points: grid,
            mask,
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

    #[must_use]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    #[must_use]
    pub fn lambda(&self) -> f64 {
        self.damping.lambda()
    }

    #[must_use]
    pub fn mask(&self) -> &SmoothingMask {
        &self.mask
    }

    /// Current objective vector (normalized units).
    #[must_use]
    pub fn residual(&self) -> &[f64] {
        &self.residual
    }

    #[must_use]
    pub fn rms_error(&self) -> f64 {
        self.normalization.restore_length(self.norms.rms)
    }

    #[must_use]
    pub fn max_error(&self) -> f64 {
        self.normalization.restore_length(self.norms.max)
    }

    fn refresh_smoothing(&mut self, smoothing: f64) -> Result<(), FitError> {
        if smoothing == self.smoothing {
            return Ok(());
        }
        self.residual = surface_objective(
            &self.cloud,
            &self.params,
            &self.control_points,
            self.nu,
            self.nv,
            smoothing,
        )?;
        self.norms = Norms::of(&self.residual, self.cloud.len());
        self.smoothing = smoothing;
        Ok(())
    }

    /// Compute a trial state from the current one without modifying it.
    pub fn propose(&mut self, smoothing: f64) -> Result<SurfaceTrial, FitError> {
        check_smoothing(smoothing)?;
        let frozen = self.iteration < self.settings.frozen_iterations;
        let factor = self.damping.diagonal_factor();
        let (nu, nv) = (self.nu, self.nv);
        let iu = nu - 2;
        let unknowns = 3 * self.mask.len();

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

        let umax = (nu - 3) as f64;
        let vmax = (nv - 3) as f64;
        let mut params = self.params.clone();
        for (k, block) in blocks.iter().enumerate() {
            let Some(inv) = block.inverse else {
                continue;
            };
            let mut ru = block.d[0];
            let mut rv = block.d[1];
            for &(col, bu, bv) in &block.cols {
                ru -= bu * delta_cp[col];
                rv -= bv * delta_cp[col];
            }
            let du = inv[0] * ru + inv[1] * rv;
            let dv = inv[2] * ru + inv[3] * rv;
            params[k] = [
                (params[k][0] + du).clamp(0.0, umax),
                (params[k][1] + dv).clamp(0.0, vmax),
            ];
        }

        let mut control_points = self.control_points.clone();
        for p in 0..self.mask.len() {
            let i = p % iu + 1;
            let j = p / iu + 1;
            let d = Vec3::new(delta_cp[3 * p], delta_cp[3 * p + 1], delta_cp[3 * p + 2]);
            control_points[i + nu * j] = control_points[i + nu * j] + d;
        }

        let objective = metrics.time(TimingBucket::Objective, || {
            surface_objective(&self.cloud, &params, &control_points, nu, nv, smoothing)
        });
        self.metrics = metrics;
        let residual = objective?;
        let norms = Norms::of(&residual, self.cloud.len());

        Ok(SurfaceTrial {
            params,
            control_points,
            residual,
            norms,
            flat_blocks,
        })
    }

    /// Adopt a trial state as the current one.
    pub fn commit(&mut self, trial: SurfaceTrial) {
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
            "surface fit iter {}: rms={:.6e} max={:.6e} {} lambda={:.3e} smooth={smoothing}",
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
    fn normal_equations(
        &self,
        smoothing: f64,
        factor: f64,
        frozen: bool,
    ) -> Result<(Vec<PointBlock>, DenseMatrix, Vec<f64>, usize), FitError> {
        let (nu, nv) = (self.nu, self.nv);
        let iu = nu - 2;
        let unknowns = if frozen { 0 } else { 3 * self.mask.len() };

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(self.cloud.len())
            .map_err(|_| FitError::AllocationFailure {
                len: self.cloud.len(),
            })?;
        let mut c = DenseMatrix::zeros(unknowns)?;
        let mut e = try_zeroed(unknowns)?;
        let mut flat = 0;

        for (q, &[u, v]) in self.cloud.iter().zip(&self.params) {
            let eval = eval_surface(u, v, nu, nv, &self.control_points)?;
            let r = eval.point.sub_point(*q);

            let a = [
                eval.du.dot(eval.du) * factor,
                eval.du.dot(eval.dv),
                eval.dv.dot(eval.dv) * factor,
            ];
            let d = [-eval.du.dot(r), -eval.dv.dot(r)];

            let mut weights = Vec::with_capacity(16);
            for jj in 0..4 {
                for ii in 0..4 {
                    let i = eval.basis_u.span + ii;
                    let j = eval.basis_v.span + jj;
                    let w = eval.weight(ii, jj);
                    if i >= 1 && i <= nu - 2 && j >= 1 && j <= nv - 2 && w != 0.0 {
                        weights.push(((i - 1) + iu * (j - 1), w));
                    }
                }
            }

            let mut cols = Vec::new();
            if !frozen {
                for &(pa, wa) in &weights {
                    for &(pb, wb) in &weights {
                        for axis in 0..3 {
                            c.add(3 * pa + axis, 3 * pb + axis, wa * wb);
                        }
                    }
                    for axis in 0..3 {
                        e[3 * pa + axis] -= wa * r.axis(axis);
                    }
                }
                cols.reserve(3 * weights.len());
                for &(p, w) in &weights {
                    for axis in 0..3 {
                        cols.push((3 * p + axis, eval.du.axis(axis) * w, eval.dv.axis(axis) * w));
                    }
                }
            }

            let det = a[0] * a[2] - a[1] * a[1];
            let inverse = if det.abs() < Tolerance::PIVOT.eps {
                log::trace!("surface fit: flat parameter block (det {det:.3e})");
                flat += 1;
                None
            } else {
                Some([a[2] / det, -a[1] / det, -a[1] / det, a[0] / det])
            };

            blocks.push(PointBlock { inverse, d, cols });
        }

        if frozen {
            return Ok((blocks, c, e, flat));
        }

        if smoothing > 0.0 {
            self.mask
                .accumulate(&self.control_points, smoothing, &mut c, &mut e);
        }
        c.scale_diagonal(factor);

        for block in &blocks {
            let Some(inv) = block.inverse else {
                continue;
            };
            // g = A⁻¹ D, and A⁻¹ [bu, bv]ᵀ per column.
            let gu = inv[0] * block.d[0] + inv[1] * block.d[1];
            let gv = inv[2] * block.d[0] + inv[3] * block.d[1];
            for &(ca, bua, bva) in &block.cols {
                let hu = inv[0] * bua + inv[1] * bva;
                let hv = inv[2] * bua + inv[3] * bva;
                for &(cb, bub, bvb) in &block.cols {
                    c.add(ca, cb, -(hu * bub + hv * bvb));
                }
                e[ca] -= bua * gu + bva * gv;
            }
        }

        Ok((blocks, c, e, flat))
    }

    /// Extract results in the caller's frame and release the context.
    #[must_use]
    pub fn finish(self) -> SurfaceFit {
        let (iterations, smoothing) = (self.iteration, self.smoothing);
        self.finish_with(iterations, false, smoothing)
    }

    fn finish_with(
        mut self,
        iterations: usize,
        converged: bool,
        final_smoothing: f64,
    ) -> SurfaceFit {
        let mut metrics = std::mem::take(&mut self.metrics);
        let counts = metrics.time(TimingBucket::Finalize, || {
            points_per_cell(&self.params, self.nu, self.nv)
        });
        let min_points_per_cell = counts.iter().copied().min().unwrap_or(0);

        let mut diagnostics = self.diagnostics;
        let cells_u = self.nu - 3;
        for (cell, count) in counts.iter().enumerate() {
            if *count == 0 {
                diagnostics.add_warning(format!(
                    "cell ({}, {}) has no cloud points",
                    cell % cells_u,
                    cell / cells_u
                ));
            }
        }
        diagnostics.final_lambda = self.damping.lambda();
        diagnostics.final_smoothing = final_smoothing;
        diagnostics.converged = converged;
        diagnostics.timing = metrics.end();

        SurfaceFit {
            nu: self.nu,
            nv: self.nv,
            control_points: self.normalization.restore_all(&self.control_points),
            parameters: self.params,
            rms_error: self.normalization.restore_length(self.norms.rms),
            max_error: self.normalization.restore_length(self.norms.max),
            min_points_per_cell,
            iterations,
            normalization: self.normalization,
            diagnostics,
        }
    }
}

impl StepFitter for SurfaceFitter {
    fn norms(&self) -> Norms {
        self.norms
    }

    fn step(&mut self, smoothing: f64) -> Result<StepReport, FitError> {
        SurfaceFitter::step(self, smoothing)
    }
}

// ============================================================================
// Driving wrappers
// ============================================================================

/// Fit a bicubic B-spline surface to `cloud`.
///
/// `control_points` is the full `nu × nv` grid (index `i + nu*j`); its boundary
/// ring stays fixed.
///
/// # Errors
/// Returns an error for invalid input or when a step hits a singular system.
pub fn fit_surface(
    cloud: &[Point3],
    nu: usize,
    nv: usize,
    control_points: &[Point3],
    options: SurfaceFitOptions,
) -> Result<SurfaceFit, FitError> {
    fit_surface_with_progress(cloud, nu, nv, control_points, options, None)
}

/// [`fit_surface`] writing one progress line per iteration to `progress`.
pub fn fit_surface_with_progress(
    cloud: &[Point3],
    nu: usize,
    nv: usize,
    control_points: &[Point3],
    options: SurfaceFitOptions,
    progress: Option<&mut dyn Write>,
) -> Result<SurfaceFit, FitError> {
    let mut fitter = SurfaceFitter::new(
        cloud,
        nu,
        nv,
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
        "surface fit done: rms={:.6e} max={:.6e} {}",
        fit.rms_error,
        fit.max_error,
        fit.diagnostics.summary()
    );
    Ok(fit)
}

// ============================================================================
// Objective and initialization
// ============================================================================

fn is_boundary(k: usize, nu: usize, nv: usize) -> bool {
    let i = k % nu;
    let j = k / nu;
    i == 0 || j == 0 || i == nu - 1 || j == nv - 1
}

/// Objective vector: 3 fit residuals per cloud point, then the scaled
/// Laplacian residual for every interior control point.
pub fn surface_objective(
    cloud: &[Point3],
    params: &[[f64; 2]],
    control_points: &[Point3],
    nu: usize,
    nv: usize,
    smoothing: f64,
) -> Result<Vec<f64>, FitError> {
    if nu < 4 || nv < 4 {
        return Err(FitError::InvalidControlCount {
            reason: format!("{nu}x{nv} control grid, a bicubic surface needs at least 4x4"),
        });
    }
    let mut f = try_zeroed(3 * cloud.len() + 3 * (nu - 2) * (nv - 2))?;

    for (k, (q, &[u, v])) in cloud.iter().zip(params).enumerate() {
        let r = eval_surface(u, v, nu, nv, control_points)?.point.sub_point(*q);
        f[3 * k] = r.x;
        f[3 * k + 1] = r.y;
        f[3 * k + 2] = r.z;
    }

    let base = 3 * cloud.len();
    let mask = SmoothingMask::new(nu, nv);
    for p in 0..mask.len() {
        let s = mask.residual(p, control_points) * smoothing;
        f[base + 3 * p] = s.x;
        f[base + 3 * p + 1] = s.y;
        f[base + 3 * p + 2] = s.z;
    }
    Ok(f)
}

/// Fill the interior of `grid` with the bilinearly blended (Coons) patch of
/// its boundary ring.
fn fill_coons_interior(grid: &mut [Point3], nu: usize, nv: usize) {
    let c00 = node(grid, nu, 0, 0);
    let c10 = node(grid, nu, nu - 1, 0);
    let c01 = node(grid, nu, 0, nv - 1);
    let c11 = node(grid, nu, nu - 1, nv - 1);
    for j in 1..nv - 1 {
        let t = j as f64 / (nv - 1) as f64;
        for i in 1..nu - 1 {
            let s = i as f64 / (nu - 1) as f64;
            let ruled_v = node(grid, nu, i, 0) * (1.0 - t) + node(grid, nu, i, nv - 1) * t;
            let ruled_u = node(grid, nu, 0, j) * (1.0 - s) + node(grid, nu, nu - 1, j) * s;
            let bilinear = c00 * ((1.0 - s) * (1.0 - t))
                + c10 * (s * (1.0 - t))
                + c01 * ((1.0 - s) * t)
                + c11 * (s * t);
            grid[i + nu * j] = (ruled_v + ruled_u - bilinear).into();
        }
    }
}

#[inline]
fn node(grid: &[Point3], nu: usize, i: usize, j: usize) -> Vec3 {
    grid[i + nu * j].to_vec3()
}

/// `(U, V)` of the nearest interior control point for every cloud point.
///
/// Interior node `(i, j)` maps to `U = i (nu-3)/(nu-1)`, `V = j (nv-3)/(nv-1)`.
fn nearest_interior_params(
    cloud: &[Point3],
    grid: &[Point3],
    nu: usize,
    nv: usize,
) -> Vec<[f64; 2]> {
    let su = (nu - 3) as f64 / (nu - 1) as f64;
    let sv = (nv - 3) as f64 / (nv - 1) as f64;
    cloud
        .iter()
        .map(|q| {
            let mut best = (1, 1, f64::INFINITY);
            for j in 1..nv - 1 {
                for i in 1..nu - 1 {
                    let d = grid[i + nu * j].distance_squared_to(*q);
                    if d < best.2 {
                        best = (i, j, d);
                    }
                }
            }
            [best.0 as f64 * su, best.1 as f64 * sv]
        })
        .collect()
}

/// Number of `(U, V)` pairs in each of the `(nu-3)(nv-3)` cells, `u` fastest.
fn points_per_cell(params: &[[f64; 2]], nu: usize, nv: usize) -> Vec<usize> {
    let cells_u = nu - 3;
    let mut counts = vec![0; cells_u * (nv - 3)];
    for &[u, v] in params {
        counts[span_index(nu, u) + cells_u * span_index(nv, v)] += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planar_grid(nu: usize, nv: usize) -> Vec<Point3> {
        let mut grid = Vec::with_capacity(nu * nv);
        for j in 0..nv {
            for i in 0..nu {
                grid.push(Point3::new(
                    i as f64 / (nu - 1) as f64,
                    j as f64 / (nv - 1) as f64,
                    0.0,
                ));
            }
        }
        grid
    }

    #[test]
    fn test_mask_stencil() {
        let mask = SmoothingMask::new(5, 5);
        assert_eq!(mask.len(), 9);
        // Centre node touches all four interior neighbours.
        assert_eq!(mask.entry(4, 4), 4.0);
        for q in [1, 3, 5, 7] {
            assert_eq!(mask.entry(4, q), -1.0);
        }
        assert_eq!(mask.entry(4, 0), 0.0);
        // Corner node is truncated to two neighbours.
        assert_eq!(mask.rows[0].len(), 3);
    }

    #[test]
    fn test_coons_reproduces_planar_grid() {
        let expected = planar_grid(5, 6);
        let mut grid = expected.clone();
        for j in 1..5 {
            for i in 1..4 {
                grid[i + 5 * j] = Point3::new(9.0, 9.0, 9.0);
            }
        }
        fill_coons_interior(&mut grid, 5, 6);
        for (got, want) in grid.iter().zip(&expected) {
            assert!(got.distance_to(*want) < 1e-14);
        }
    }

    #[test]
    fn test_laplacian_vanishes_on_uniform_grid() {
        let grid = planar_grid(5, 5);
        let f = surface_objective(&[], &[], &grid, 5, 5, 0.3).unwrap();
        assert_eq!(f.len(), 27);
        assert!(f.iter().all(|v| v.abs() < 1e-14));
    }

    #[test]
    fn test_nearest_interior_params_skip_corners() {
        let grid = planar_grid(5, 5);
        let params = nearest_interior_params(&[Point3::new(0.0, 0.0, 0.0)], &grid, 5, 5);
        // Nearest interior node is (1, 1) although corner (0, 0) coincides.
        assert!((params[0][0] - 0.5).abs() < 1e-15);
        assert!((params[0][1] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_points_per_cell() {
        let counts = points_per_cell(&[[0.2, 0.2], [1.5, 0.1], [2.0, 2.0], [1.9, 1.1]], 5, 5);
        assert_eq!(counts, vec![1, 1, 0, 2]);
    }
}
