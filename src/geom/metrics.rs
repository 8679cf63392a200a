//! Opt-in timing hooks for the fitters.
//!
//! Timing is only collected when the `fit_metrics` feature is enabled and the
//! target is not WASM (`std::time::Instant` is unavailable there). Otherwise
//! every call compiles to a plain closure invocation.
//!
//! ```ignore
//! let mut metrics = FitMetrics::default();
//! metrics.begin();
//! let f = metrics.time(TimingBucket::Objective, || objective(&state));
//! if let Some(report) = metrics.end() {
//!     println!("objective: {} ns", report.objective_ns);
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Phases of a fit that accumulate time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimingBucket {
    /// Normalization, initial parametrization and initial objective.
    Initialize,
    /// Building the `A`, `B`, `C`, `D`, `E` blocks and the Schur complement.
    NormalEquations,
    /// Dense solve of the reduced system.
    Solve,
    /// Objective evaluation at trial points.
    Objective,
    /// Extraction of results and diagnostics.
    Finalize,
}

/// Cumulative nanoseconds per [`TimingBucket`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitTimingReport {
    pub initialize_ns: u64,
    pub normal_equations_ns: u64,
    pub solve_ns: u64,
    pub objective_ns: u64,
    pub finalize_ns: u64,
}

impl FitTimingReport {
    /// Returns the total time across all buckets in nanoseconds.
    #[must_use]
    pub fn total_ns(&self) -> u64 {
        self.initialize_ns
            .saturating_add(self.normal_equations_ns)
            .saturating_add(self.solve_ns)
            .saturating_add(self.objective_ns)
            .saturating_add(self.finalize_ns)
    }

    /// Returns the total time in milliseconds (for display purposes).
    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.total_ns() as f64 / 1_000_000.0
    }
}

/// Accumulator for timing fit phases.
///
/// When the `fit_metrics` feature is disabled (or on WASM), all methods are
/// no-ops and [`end`](Self::end) returns `None`.
#[derive(Debug, Default, Clone)]
pub struct FitMetrics {
    #[cfg(all(feature = "fit_metrics", not(target_arch = "wasm32")))]
    report: FitTimingReport,
}

impl FitMetrics {
    /// Resets all timing counters to zero.
    pub fn begin(&mut self) {
        #[cfg(all(feature = "fit_metrics", not(target_arch = "wasm32")))]
        {
            self.report = FitTimingReport::default();
        }
    }

    /// Returns the accumulated timing report, or `None` if metrics are disabled.
    #[must_use]
    pub fn end(&self) -> Option<FitTimingReport> {
        #[cfg(all(feature = "fit_metrics", not(target_arch = "wasm32")))]
        {
            Some(self.report.clone())
        }
        #[cfg(not(all(feature = "fit_metrics", not(target_arch = "wasm32"))))]
        {
            None
        }
    }

    /// Times the execution of `f` and accumulates the elapsed time in `bucket`.
    pub fn time<R>(&mut self, bucket: TimingBucket, f: impl FnOnce() -> R) -> R {
        #[cfg(all(feature = "fit_metrics", not(target_arch = "wasm32")))]
        {
            let start = std::time::Instant::now();
            let result = f();
            let nanos = start.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
            self.add_to_bucket(bucket, nanos);
            result
        }

        #[cfg(not(all(feature = "fit_metrics", not(target_arch = "wasm32"))))]
        {
            let _ = bucket;
            f()
        }
    }

    #[cfg(all(feature = "fit_metrics", not(target_arch = "wasm32")))]
    fn add_to_bucket(&mut self, bucket: TimingBucket, nanos: u64) {
        let slot = match bucket {
            TimingBucket::Initialize => &mut self.report.initialize_ns,
            TimingBucket::NormalEquations => &mut self.report.normal_equations_ns,
            TimingBucket::Solve => &mut self.report.solve_ns,
            TimingBucket::Objective => &mut self.report.objective_ns,
            TimingBucket::Finalize => &mut self.report.finalize_ns,
        };
        *slot = slot.saturating_add(nanos);
    }
}
