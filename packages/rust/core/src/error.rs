//! Build-level error type.

use docforge_jobs::JobError;
use docforge_shared::DocforgeError;

/// Why a build stopped.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Configuration, resolution or collision failure before any task ran.
    #[error(transparent)]
    Docforge(#[from] DocforgeError),

    /// A job queue failed, or the build was cancelled while it ran.
    #[error(transparent)]
    Job(#[from] JobError),
}

impl BuildError {
    /// Whether the build ended because its token was cancelled.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Docforge(e) => matches!(e, DocforgeError::Cancelled),
            Self::Job(e) => is_cancellation(e),
        }
    }
}

/// A queue stopped by its context, or whose every failure is a worker
/// giving up on cancellation.
pub(crate) fn is_cancellation(e: &JobError) -> bool {
    if e.is_interrupted() {
        return true;
    }
    let errors = e.errors();
    !errors.is_empty()
        && errors.iter().all(|w| {
            matches!(w.downcast_ref::<DocforgeError>(), Some(DocforgeError::Cancelled))
        })
}
