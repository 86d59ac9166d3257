//! GitHub info worker: stores commit metadata next to built documents.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use docforge_hosts::Registry;
use docforge_jobs::{Worker, WorkerError};
use docforge_writers::{OutputWriter, Writer};

use crate::tasks::GitInfoTask;

/// Reads the commit history of every source of a node and writes it as
/// `<node name>.json` under the node's path.
pub struct GitInfoWorker {
    registry: Arc<Registry>,
    writer: OutputWriter,
}

impl GitInfoWorker {
    pub fn new(registry: Arc<Registry>, writer: impl Into<OutputWriter>) -> Self {
        Self {
            registry,
            writer: writer.into(),
        }
    }
}

impl Worker<GitInfoTask> for GitInfoWorker {
    async fn work(&self, token: &CancellationToken, task: GitInfoTask) -> Result<(), WorkerError> {
        let node = task.node;
        let mut info = Vec::new();
        for source in &node.sources {
            let read = tokio::select! {
                read = self.registry.read_git_info(source) => read,
                () = token.cancelled() => return Err(super::cancelled()),
            };
            match read {
                Ok(bytes) => info.extend_from_slice(&bytes),
                Err(e) if e.is_not_found() => {
                    warn!(%source, error = %e, "git info not found");
                }
                Err(e) => {
                    return Err(WorkerError::new(
                        format!("failed to read git info for {source}: {e}"),
                        0,
                    ));
                }
            }
        }
        if info.is_empty() {
            debug!(node = %node.full_name(), "no git info available");
            return Ok(());
        }

        self.writer
            .write(&node.name, &node.path, &info, Some(&node))
            .await
            .map_err(|e| WorkerError::new(e, 0))
    }
}
