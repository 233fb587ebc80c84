use thiserror::Error;

/// Error type for calibration failures.
///
/// Per-glacier errors are caught at the orchestrator boundary and turn into
/// skip log entries; only [`Error::MissingContext`] aborts a whole batch.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid prior or sampler configuration. Fatal for the glacier.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The forward model or likelihood produced non-finite values repeatedly.
    #[error("forward model produced non-finite output {consecutive} times in a row (limit {limit})")]
    NumericalInstability { consecutive: usize, limit: usize },

    /// The trace is shorter than the requested ensemble size.
    #[error("trace holds {available} samples but the ensemble needs {requested}")]
    InsufficientSamples { available: usize, requested: usize },

    /// Glacier or climate context is missing entirely. No glacier in the
    /// affected chunk can proceed, so this propagates and aborts the batch.
    #[error("missing glacier/climate context: {0}")]
    MissingContext(String),

    /// The per-glacier wall-clock budget was exceeded. Recoverable: the
    /// glacier is skipped and the batch continues.
    #[error("exceeded wall-clock budget of {budget_secs:.1} s")]
    TimeBudgetExceeded { budget_secs: f64 },

    /// Reading or writing a persisted calibration record failed.
    #[error("failed to persist calibration result: {0}")]
    Persistence(String),

    /// Forward model failure that is not a context problem.
    #[error("forward model error: {0}")]
    Model(String),
}

impl Error {
    /// Whether this error must abort the whole batch rather than skip one
    /// glacier.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, Error::MissingContext(_))
    }
}

/// Convenience type for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
