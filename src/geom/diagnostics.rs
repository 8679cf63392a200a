//! Per-fit diagnostics.
//!
//! Collected by the curve and surface fitters alongside their numeric outputs:
//!
//! - Step bookkeeping (accepted/rejected LM steps, final damping)
//! - Convergence state of the driving loop
//! - Per-point blocks that were too flat to move their parameters
//! - Optional timing breakdown (`fit_metrics` feature)

use serde::{Deserialize, Serialize};

use super::metrics::FitTimingReport;

/// Diagnostics returned with every [`CurveFit`](super::CurveFit) and
/// [`SurfaceFit`](super::SurfaceFit).
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// Number of LM steps whose trial objective improved the RMS.
    pub accepted_steps: usize,

    /// Number of LM steps that were rolled back.
    pub rejected_steps: usize,

    /// Damping parameter after the last step.
    pub final_lambda: f64,

    /// Smoothing weight used by the last step (after geometric decay).
    pub final_smoothing: f64,

    /// Whether the driving loop stopped on its convergence rule rather than
    /// the iteration cap.
    pub converged: bool,

    /// Per-point parameter blocks skipped because their tangent block was
    /// numerically singular, summed over all steps.
    pub flat_parameter_blocks: usize,

    /// Optional timing breakdown.
    pub timing: Option<FitTimingReport>,

    /// Human-readable warnings, e.g. spans without data.
    pub warnings: Vec<String>,
}

impl FitDiagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if any warnings were recorded.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Adds a warning message to the diagnostics.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Total LM steps taken.
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.accepted_steps + self.rejected_steps
    }

    /// Short summary for logging.
    ///
    /// Format: `"steps:{total} (+{accepted}/-{rejected}) lambda:{lambda} [converged]"`
    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = format!(
            "steps:{} (+{}/-{}) lambda:{:.3e}",
            self.total_steps(),
            self.accepted_steps,
            self.rejected_steps,
            self.final_lambda
        );
        if self.converged {
            s.push_str(" converged");
        }
        if self.has_warnings() {
            s.push_str(&format!(" warnings:{}", self.warnings.len()));
        }
        s
    }
}
