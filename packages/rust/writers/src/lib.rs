//! Output writers for built documents, downloaded resources and git info.
//!
//! [`FsWriter`] writes below a root directory. [`DryRunWriters`] hands out
//! writers that only record what would have been written and prints the
//! resulting file tree on [`DryRunWriters::flush`].

pub mod dry_run;
pub mod fs;

use std::future::Future;

use docforge_shared::{Node, Result};

pub use dry_run::{DryRunWriter, DryRunWriters};
pub use fs::FsWriter;

/// Sink for named blobs placed under a relative directory.
pub trait Writer: Send + Sync {
    /// Write `bytes` as `name` in the directory `path`. `node` is the
    /// document the bytes were built for, if any.
    fn write(
        &self,
        name: &str,
        path: &str,
        bytes: &[u8],
        node: Option<&Node>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// File name of a blob written as `name`, with the writer's extension.
pub(crate) fn file_name(name: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{name}.{ext}"),
        None => name.to_string(),
    }
}

/// Either a filesystem writer or a dry-run recorder.
#[derive(Debug, Clone)]
pub enum OutputWriter {
    Fs(FsWriter),
    DryRun(DryRunWriter),
}

impl Writer for OutputWriter {
    async fn write(&self, name: &str, path: &str, bytes: &[u8], node: Option<&Node>) -> Result<()> {
        match self {
            Self::Fs(writer) => writer.write(name, path, bytes, node).await,
            Self::DryRun(writer) => writer.write(name, path, bytes, node).await,
        }
    }
}

impl From<FsWriter> for OutputWriter {
    fn from(writer: FsWriter) -> Self {
        Self::Fs(writer)
    }
}

impl From<DryRunWriter> for OutputWriter {
    fn from(writer: DryRunWriter) -> Self {
        Self::DryRun(writer)
    }
}
