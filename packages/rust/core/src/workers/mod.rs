//! Workers behind the build's job queues.

pub mod document;
pub mod download;
pub mod git_info;
pub mod validator;

use docforge_jobs::WorkerError;
use docforge_shared::DocforgeError;

pub use document::DocumentWorker;
pub use download::DownloadWorker;
pub use git_info::GitInfoWorker;
pub use validator::{Backoff, ValidatorWorker};

fn cancelled() -> WorkerError {
    WorkerError::new(DocforgeError::Cancelled, 0)
}
