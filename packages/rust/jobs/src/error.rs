//! Worker and job error types.

use std::error::Error as StdError;
use std::fmt;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure of a single task, as reported by a worker.
///
/// Displays as its cause. `code` is a free-form classification (an HTTP
/// status, for instance); 0 means unclassified.
pub struct WorkerError {
    cause: BoxError,
    code: u16,
}

impl WorkerError {
    pub fn new(cause: impl Into<BoxError>, code: u16) -> Self {
        Self {
            cause: cause.into(),
            code,
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// Borrow the cause as a concrete error type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }

    pub(crate) fn panicked(job: &str, message: &str) -> Self {
        Self::new(format!("panic in job {job}: {message}"), 0)
    }
}

impl fmt::Debug for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerError")
            .field("cause", &self.cause)
            .field("code", &self.code)
            .finish()
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, f)
    }
}

impl StdError for WorkerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.source()
    }
}

/// Outcome of a failed dispatch.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The pool was constructed with inconsistent limits.
    #[error("job {job} misconfigured: {message}")]
    Config { job: String, message: String },

    /// First failure of a fail-fast job, returned verbatim.
    #[error(transparent)]
    Worker(WorkerError),

    /// Every failure of a fault-tolerant job.
    #[error("{}", summarize(.0))]
    Aggregate(Vec<WorkerError>),

    /// The caller's token was cancelled.
    #[error("job {job} cancelled")]
    Cancelled { job: String },

    /// The dispatch deadline passed before all tasks completed.
    #[error("job {job} deadline exceeded")]
    DeadlineExceeded { job: String },
}

impl JobError {
    /// The worker errors carried by this error, if any.
    pub fn errors(&self) -> &[WorkerError] {
        match self {
            Self::Worker(error) => std::slice::from_ref(error),
            Self::Aggregate(errors) => errors,
            _ => &[],
        }
    }

    /// Code of the carried worker error; 0 for everything else.
    pub fn code(&self) -> u16 {
        match self {
            Self::Worker(error) => error.code(),
            _ => 0,
        }
    }

    /// Whether the job stopped because its context ended.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }
}

fn summarize(errors: &[WorkerError]) -> String {
    let mut out = match errors.len() {
        1 => "1 error occurred:".to_string(),
        n => format!("{n} errors occurred:"),
    };
    for error in errors {
        out.push_str("\n\t* ");
        out.push_str(&error.to_string());
    }
    out
}
