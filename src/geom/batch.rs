//! Fitting many independent curves and surfaces.
//!
//! Each job owns its cloud and control net, so workers share nothing but the
//! scheduler. The scheduler hands out the not-yet-started job with the largest
//! cloud and marks it started before the lock is released, so no job runs
//! twice and the longest fits start first.
//!
//! With the `parallel` feature the queue is drained by rayon tasks; otherwise
//! it is drained on the calling thread in the same order.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::core::Point3;
use super::curve_fit::{CurveFit, CurveFitOptions, fit_curve};
use super::error::FitError;
use super::surface_fit::{SurfaceFit, SurfaceFitOptions, fit_surface};

/// One independent fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitJob {
    Curve {
        cloud: Vec<Point3>,
        control_points: Vec<Point3>,
        options: CurveFitOptions,
    },
    Surface {
        cloud: Vec<Point3>,
        nu: usize,
        nv: usize,
        control_points: Vec<Point3>,
        options: SurfaceFitOptions,
    },
}

impl FitJob {
    /// Number of cloud points; the scheduling key.
    #[must_use]
    pub fn cloud_len(&self) -> usize {
        match self {
            Self::Curve { cloud, .. } | Self::Surface { cloud, .. } => cloud.len(),
        }
    }

    /// Run this job on the current thread.
    pub fn run(&self) -> Result<FitResult, FitError> {
        match self {
            Self::Curve {
                cloud,
                control_points,
                options,
            } => fit_curve(cloud, control_points, *options).map(FitResult::Curve),
            Self::Surface {
                cloud,
                nu,
                nv,
                control_points,
                options,
            } => fit_surface(cloud, *nu, *nv, control_points, *options).map(FitResult::Surface),
        }
    }
}

/// Output of a successful [`FitJob`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitResult {
    Curve(CurveFit),
    Surface(SurfaceFit),
}

impl FitResult {
    #[must_use]
    pub fn rms_error(&self) -> f64 {
        match self {
            Self::Curve(fit) => fit.rms_error,
            Self::Surface(fit) => fit.rms_error,
        }
    }

    #[must_use]
    pub fn max_error(&self) -> f64 {
        match self {
            Self::Curve(fit) => fit.max_error,
            Self::Surface(fit) => fit.max_error,
        }
    }

    #[must_use]
    pub fn iterations(&self) -> usize {
        match self {
            Self::Curve(fit) => fit.iterations,
            Self::Surface(fit) => fit.iterations,
        }
    }
}

/// Per-job result; a failed job does not affect the others.
pub type FitOutcome = Result<FitResult, FitError>;

/// Largest-cloud-first work queue.
#[derive(Debug)]
pub struct FitScheduler {
    sizes: Vec<usize>,
    started: Mutex<Vec<bool>>,
}

impl FitScheduler {
    #[must_use]
    pub fn new(jobs: &[FitJob]) -> Self {
        Self {
            sizes: jobs.iter().map(FitJob::cloud_len).collect(),
            started: Mutex::new(vec![false; jobs.len()]),
        }
    }

    /// Claim the largest job not yet started. Ties go to the lower index.
    pub fn next_job(&self) -> Option<usize> {
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        let pick = started
            .iter()
            .enumerate()
            .filter(|(_, s)| !**s)
            .map(|(i, _)| i)
            .fold(None, |best: Option<usize>, i| match best {
                Some(b) if self.sizes[b] >= self.sizes[i] => Some(b),
                _ => Some(i),
            })?;
        started[pick] = true;
        Some(pick)
    }
}

/// Fit every job and return the outcomes in job order.
///
/// `workers` bounds the number of concurrent fits when the `parallel` feature
/// is enabled (`0` is treated as `1`); it is ignored otherwise.
#[must_use]
pub fn fit_batch(jobs: &[FitJob], workers: usize) -> Vec<FitOutcome> {
    let scheduler = FitScheduler::new(jobs);
    let slots: Mutex<Vec<Option<FitOutcome>>> = Mutex::new(vec![None; jobs.len()]);

    drain(&scheduler, jobs, &slots, workers.max(1));

    collect_outcomes(slots.into_inner().unwrap_or_else(PoisonError::into_inner))
}

/// Unwrap the filled slots in job order; an empty slot becomes
/// [`FitError::JobNotRun`].
fn collect_outcomes(slots: Vec<Option<FitOutcome>>) -> Vec<FitOutcome> {
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.unwrap_or(Err(FitError::JobNotRun { index })))
        .collect()
}

fn run_claimed(
    scheduler: &FitScheduler,
    jobs: &[FitJob],
    slots: &Mutex<Vec<Option<FitOutcome>>>,
) {
    while let Some(index) = scheduler.next_job() {
        log::debug!(
            "batch: job {index} started ({} points)",
            jobs[index].cloud_len()
        );
        let outcome = jobs[index].run();
        if let Err(err) = &outcome {
            log::warn!("batch: job {index} failed: {err}");
        }
        slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(outcome);
    }
}

#[cfg(feature = "parallel")]
fn drain(
    scheduler: &FitScheduler,
    jobs: &[FitJob],
    slots: &Mutex<Vec<Option<FitOutcome>>>,
    workers: usize,
) {
    rayon::scope(|s| {
        for _ in 0..workers.min(jobs.len()) {
            s.spawn(|_| run_claimed(scheduler, jobs, slots));
        }
    });
}

#[cfg(not(feature = "parallel"))]
fn drain(
    scheduler: &FitScheduler,
    jobs: &[FitJob],
    slots: &Mutex<Vec<Option<FitOutcome>>>,
    _workers: usize,
) {
    run_claimed(scheduler, jobs, slots);
}
