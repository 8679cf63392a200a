/// Errors that can occur while fitting a curve or surface to a point cloud.
///
/// A rejected LM step is not an error; it is reported through
/// [`StepReport::accepted`](super::StepReport).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    /// The requested flag combination is not implemented (periodic fits).
    #[error("unsupported fit flags: {reason}")]
    InvalidFlag { reason: &'static str },

    /// The smoothing weight lies outside `[0, 1]`.
    #[error("smoothing weight {value} outside [0, 1]")]
    InvalidSmoothing { value: f64 },

    /// Too few control points, or more free control points than the data supports.
    #[error("invalid control point count: {reason}")]
    InvalidControlCount { reason: String },

    /// The cloud has fewer than two points.
    #[error("point cloud has {provided} points, at least 2 required")]
    EmptyCloud { provided: usize },

    /// The control grid length does not match `nu * nv`.
    #[error("control grid size mismatch: expected {expected} points, got {provided}")]
    GridSizeMismatch { expected: usize, provided: usize },

    /// A cloud point or control point contains NaN or infinite coordinates.
    ///
    /// Indices at or past the cloud length refer to control points.
    #[error("input point {index} contains NaN or infinite values")]
    NonFiniteInput { index: usize },

    /// A vector or matrix operand has the wrong length for the system.
    #[error("dimension mismatch: expected {expected} entries, got {provided}")]
    DimensionMismatch { expected: usize, provided: usize },

    /// A batch job was never claimed by a worker.
    #[error("batch job {index} was not run")]
    JobNotRun { index: usize },

    /// The input cannot be normalized or interpolated.
    #[error("degenerate geometry: {reason}")]
    DegenerateGeometry { reason: String },

    /// A working buffer could not be reserved.
    #[error("failed to allocate working buffer of {len} values")]
    AllocationFailure { len: usize },

    /// The reduced normal equations have no usable pivot.
    #[error("reduced normal equations are singular at column {column}")]
    SingularSystem { column: usize },
}

/// Allocate a zero-filled working buffer, reporting failure instead of aborting.
pub(crate) fn try_zeroed(len: usize) -> Result<Vec<f64>, FitError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| FitError::AllocationFailure { len })?;
    buf.resize(len, 0.0);
    Ok(buf)
}
