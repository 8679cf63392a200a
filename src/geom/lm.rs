//! Levenberg-Marquardt policy shared by the curve and surface fitters.
//!
//! The fitters own the problem-specific normal equations; this module owns
//! the damping schedule, the step report, the progress sink, and the driving
//! loop used by [`fit_curve`](super::fit_curve) and
//! [`fit_surface`](super::fit_surface).

use std::io::Write;

use serde::{Deserialize, Serialize};

use super::core::Tolerance;
use super::error::FitError;
use super::norms::Norms;

/// Tunables of the damped solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LmSettings {
    /// Damping parameter before the first step.
    pub initial_lambda: f64,
    /// Lower bound reached by repeated halving on accepted steps.
    pub min_lambda: f64,
    /// Upper bound reached by repeated doubling on rejected steps.
    pub max_lambda: f64,
    /// Number of leading steps during which control points stay fixed and only
    /// the per-point parameters move. Empirical stabilizer for the first
    /// iterations; zero disables it.
    pub frozen_iterations: usize,
    /// Factor applied to the smoothing weight after every step of the driver.
    pub smoothing_decay: f64,
    /// Change in RMS and max between accepted steps treated as converged.
    pub convergence_tol: f64,
}

impl Default for LmSettings {
    fn default() -> Self {
        Self {
            initial_lambda: 1.0,
            min_lambda: 1e-10,
            max_lambda: 1e10,
            frozen_iterations: 5,
            smoothing_decay: 0.99,
            convergence_tol: Tolerance::CONVERGENCE.eps,
        }
    }
}

/// Current damping parameter with its accept/reject schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Damping {
    lambda: f64,
    min: f64,
    max: f64,
}

impl Damping {
    #[must_use]
    pub fn new(settings: &LmSettings) -> Self {
        Self {
            lambda: settings.initial_lambda,
            min: settings.min_lambda,
            max: settings.max_lambda,
        }
    }

    #[must_use]
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Factor applied to the diagonal of the normal equations.
    #[must_use]
    pub fn diagonal_factor(&self) -> f64 {
        1.0 + self.lambda
    }

    pub fn accept(&mut self) {
        self.lambda = (self.lambda * 0.5).max(self.min);
    }

    pub fn reject(&mut self) {
        self.lambda = (self.lambda * 2.0).min(self.max);
    }
}

/// Outcome of one LM step.
///
/// `rms` and `max` are in the caller's coordinate frame; `norms` holds the
/// same values in normalized units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// 1-based index of this step.
    pub iteration: usize,
    /// Whether the trial state replaced the current one.
    pub accepted: bool,
    pub rms: f64,
    pub max: f64,
    /// Damping after the accept/reject update.
    pub lambda: f64,
    /// Smoothing weight used for this step.
    pub smoothing: f64,
    /// Control points were held fixed and only the per-point parameters moved.
    pub frozen: bool,
    pub norms: Norms,
}

impl StepReport {
    /// One progress line, as written to the progress sink.
    #[must_use]
    pub fn progress_line(&self) -> String {
        format!(
            "iter {:4}  rms={:.6e}  max={:.6e}  {}  lambda={:.3e}  smooth={:.5}",
            self.iteration,
            self.rms,
            self.max,
            if self.accepted { "accept" } else { "reject" },
            self.lambda,
            self.smoothing,
        )
    }
}

/// A fitter that can be advanced one LM step at a time.
pub trait StepFitter {
    /// Norms of the current state, in normalized units.
    fn norms(&self) -> Norms;

    /// Perform one LM step with the given smoothing weight.
    fn step(&mut self, smoothing: f64) -> Result<StepReport, FitError>;
}

/// Result of [`drive`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveOutcome {
    pub iterations: usize,
    pub converged: bool,
    /// Smoothing weight after the last decay.
    pub final_smoothing: f64,
}

/// Run up to `max_iterations` steps with geometric smoothing decay.
///
/// Stops early once an accepted step changes both RMS and max by less than
/// `settings.convergence_tol`, or once the RMS reaches zero. Steps with frozen
/// control points never trigger the convergence stop, and the first step that
/// solves for control points is compared against the state before them.
pub fn drive<F: StepFitter>(
    fitter: &mut F,
    smoothing: f64,
    max_iterations: usize,
    settings: &LmSettings,
    mut progress: Option<&mut dyn Write>,
) -> Result<DriveOutcome, FitError> {
    let mut smooth = smoothing;
    let mut previous = fitter.norms();
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        if Tolerance::ZERO_LENGTH.is_zero_length(fitter.norms().rms) {
            converged = true;
            break;
        }

        let report = fitter.step(smooth)?;
        iterations += 1;

        if let Some(sink) = progress.as_deref_mut() {
            if let Err(err) = writeln!(sink, "{}", report.progress_line()) {
                log::warn!("progress sink write failed: {err}");
            }
        }

        if report.accepted && !report.frozen {
            let current = report.norms;
            let drms = (current.rms - previous.rms).abs();
            let dmax = (current.max - previous.max).abs();
            previous = current;
            if drms < settings.convergence_tol && dmax < settings.convergence_tol {
                converged = true;
                break;
            }
        }

        smooth *= settings.smoothing_decay;
    }

    Ok(DriveOutcome {
        iterations,
        converged,
        final_smoothing: smooth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damping_schedule_is_bounded() {
        let settings = LmSettings::default();
        let mut d = Damping::new(&settings);
        assert_eq!(d.diagonal_factor(), 2.0);
        for _ in 0..100 {
            d.accept();
        }
        assert_eq!(d.lambda(), 1e-10);
        for _ in 0..200 {
            d.reject();
        }
        assert_eq!(d.lambda(), 1e10);
    }

    struct Scripted {
        norms: Norms,
        script: Vec<(bool, f64)>,
        calls: usize,
        frozen_steps: usize,
        smoothing_seen: Vec<f64>,
    }

    impl StepFitter for Scripted {
        fn norms(&self) -> Norms {
            self.norms
        }

        fn step(&mut self, smoothing: f64) -> Result<StepReport, FitError> {
            self.smoothing_seen.push(smoothing);
            let (accepted, rms) = self.script[self.calls];
            self.calls += 1;
            if accepted {
                self.norms = Norms { rms, max: rms };
            }
            Ok(StepReport {
                iteration: self.calls,
                accepted,
                rms: self.norms.rms,
                max: self.norms.max,
                lambda: 1.0,
                smoothing,
                frozen: self.calls <= self.frozen_steps,
                norms: self.norms,
            })
        }
    }

    #[test]
    fn test_drive_stops_on_small_accepted_change() {
        let mut f = Scripted {
            norms: Norms { rms: 1.0, max: 1.0 },
            script: vec![(true, 0.5), (false, 0.0), (true, 0.5 - 1e-8), (true, 0.1)],
            calls: 0,
            frozen_steps: 0,
            smoothing_seen: Vec::new(),
        };
        let mut sink = Vec::new();
        let outcome = drive(
            &mut f,
            0.5,
            100,
            &LmSettings::default(),
            Some(&mut sink as &mut dyn Write),
        )
        .unwrap();
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.converged);
        assert!((f.smoothing_seen[1] - 0.495).abs() < 1e-12);
        assert!((outcome.final_smoothing - 0.5 * 0.99 * 0.99).abs() < 1e-12);
        let text = String::from_utf8(sink).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().contains("reject"));
    }

    #[test]
    fn test_drive_respects_iteration_cap() {
        let mut f = Scripted {
            norms: Norms { rms: 1.0, max: 1.0 },
            script: vec![(true, 0.5), (true, 0.25), (true, 0.125)],
            calls: 0,
            frozen_steps: 0,
            smoothing_seen: Vec::new(),
        };
        let outcome = drive(&mut f, 0.0, 2, &LmSettings::default(), None).unwrap();
        assert_eq!(outcome.iterations, 2);
        assert!(!outcome.converged);
    }

    #[test]
    fn test_drive_ignores_small_change_while_frozen() {
        // Parameter-only steps settle quickly; the control-point steps must still run.
        let mut f = Scripted {
            norms: Norms { rms: 1.0, max: 1.0 },
            script: vec![
                (true, 0.5),
                (true, 0.5 - 1e-9),
                (true, 0.5 - 2e-9),
                (true, 0.2),
                (true, 0.2 - 1e-9),
            ],
            calls: 0,
            frozen_steps: 3,
            smoothing_seen: Vec::new(),
        };
        let outcome = drive(&mut f, 0.0, 100, &LmSettings::default(), None).unwrap();
        assert_eq!(outcome.iterations, 5);
        assert!(outcome.converged);
    }
}
