//! Document worker: builds one node into its output file.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use docforge_jobs::{Submitter, Worker, WorkerError};
use docforge_writers::{OutputWriter, Writer};

use crate::buffer::BufferPool;
use crate::processor::ContentProcessor;
use crate::reader::Reader;
use crate::tasks::{DocumentTask, GitInfoTask};

pub struct DocumentWorker<R> {
    reader: R,
    processor: Arc<ContentProcessor>,
    writer: OutputWriter,
    git_info: Option<Submitter<GitInfoTask>>,
    buffers: BufferPool,
}

impl<R: Reader> DocumentWorker<R> {
    pub fn new(reader: R, processor: Arc<ContentProcessor>, writer: impl Into<OutputWriter>) -> Self {
        Self {
            reader,
            processor,
            writer: writer.into(),
            git_info: None,
            buffers: BufferPool::new(),
        }
    }

    /// Schedule commit metadata for every document written.
    pub fn with_git_info(mut self, git_info: Submitter<GitInfoTask>) -> Self {
        self.git_info = Some(git_info);
        self
    }
}

impl<R: Reader + 'static> Worker<DocumentTask> for DocumentWorker<R> {
    #[instrument(skip_all, fields(node = %task.node.full_name()))]
    async fn work(&self, token: &CancellationToken, task: DocumentTask) -> Result<(), WorkerError> {
        let node = task.node;
        if !node.is_document() {
            return Ok(());
        }

        let mut buf = self.buffers.get();
        tokio::select! {
            result = self.processor.process(&mut buf, &self.reader, &node) => {
                result.map_err(|e| WorkerError::new(e, 0))?;
            }
            () = token.cancelled() => return Err(super::cancelled()),
        }

        if buf.is_empty() {
            warn!("no content assigned to document node, nothing written");
            return Ok(());
        }
        self.writer
            .write(&node.name, &node.path, &buf, Some(&node))
            .await
            .map_err(|e| WorkerError::new(e, 0))?;
        debug!(size = buf.len(), "document written");

        if let Some(git_info) = &self.git_info {
            if !git_info.add_task(GitInfoTask { node: Arc::clone(&node) }) {
                warn!("git info queue closed, metadata not scheduled");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use docforge_hosts::Registry;
    use docforge_jobs::{JobQueue, WaitGroup, WorkerFn};
    use docforge_shared::{DocforgeError, GitHubConfig, MetricsRegistry, Node, Result};
    use docforge_writers::FsWriter;

    use super::*;
    use crate::processor::SourceIndex;
    use crate::tasks::DownloadTask;

    /// Serves fixed content per source.
    struct Fixed(BTreeMap<String, Vec<u8>>);

    impl Reader for Fixed {
        async fn read(&self, source: &str) -> Result<Vec<u8>> {
            self.0
                .get(source)
                .cloned()
                .ok_or_else(|| DocforgeError::not_found(source))
        }
    }

    fn processor(wg: &WaitGroup) -> (Arc<ContentProcessor>, JobQueue<DownloadTask, impl Worker<DownloadTask>>) {
        let registry = Arc::new(
            Registry::from_config(&GitHubConfig::default(), &BTreeMap::new(), &MetricsRegistry::new())
                .unwrap(),
        );
        let downloads = JobQueue::new(
            "Download",
            1,
            false,
            WorkerFn(|_token: CancellationToken, _task: DownloadTask| async { Ok::<(), WorkerError>(()) }),
            wg,
        )
        .unwrap();
        let processor = ContentProcessor::new(registry, SourceIndex::default(), downloads.submitter());
        (Arc::new(processor), downloads)
    }

    fn task(name: &str, path: &str, source: &str) -> DocumentTask {
        let mut node = Node::document(name, source);
        node.path = path.into();
        DocumentTask { node: Arc::new(node) }
    }

    #[tokio::test]
    async fn writes_processed_content_and_schedules_git_info() {
        let out = tempfile::tempdir().unwrap();
        let wg = WaitGroup::new();
        let (processor, _downloads) = processor(&wg);

        let scheduled = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&scheduled);
        let git_info = JobQueue::new(
            "GitHubInfo",
            1,
            false,
            WorkerFn(move |_token: CancellationToken, task: GitInfoTask| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(task.node.full_name());
                    Ok::<(), WorkerError>(())
                }
            }),
            &wg,
        )
        .unwrap();

        let reader = Fixed(BTreeMap::from([("src/a.md".to_string(), b"# A\n".to_vec())]));
        let worker = DocumentWorker::new(reader, processor, FsWriter::new(out.path()))
            .with_git_info(git_info.submitter());

        let token = CancellationToken::new();
        worker.work(&token, task("a.md", "guide", "src/a.md")).await.unwrap();
        git_info.start(&token);
        tokio::time::timeout(Duration::from_secs(2), wg.wait()).await.unwrap();

        assert_eq!(std::fs::read_to_string(out.path().join("guide/a.md")).unwrap(), "# A\n");
        assert_eq!(*scheduled.lock().unwrap(), vec!["guide/a.md".to_string()]);
    }

    #[tokio::test]
    async fn empty_documents_are_not_written() {
        let out = tempfile::tempdir().unwrap();
        let wg = WaitGroup::new();
        let (processor, _downloads) = processor(&wg);
        let reader = Fixed(BTreeMap::from([("src/empty.md".to_string(), Vec::new())]));
        let worker = DocumentWorker::new(reader, processor, FsWriter::new(out.path()));

        worker
            .work(&CancellationToken::new(), task("empty.md", "", "src/empty.md"))
            .await
            .unwrap();

        assert!(!out.path().join("empty.md").exists());
    }

    #[tokio::test]
    async fn read_failures_name_the_node() {
        let out = tempfile::tempdir().unwrap();
        let wg = WaitGroup::new();
        let (processor, _downloads) = processor(&wg);

        struct Broken;
        impl Reader for Broken {
            async fn read(&self, source: &str) -> Result<Vec<u8>> {
                Err(DocforgeError::Transport(format!("connection reset reading {source}")))
            }
        }
        let worker = DocumentWorker::new(Broken, processor, FsWriter::new(out.path()));

        let err = worker
            .work(&CancellationToken::new(), task("b.md", "x", "src/b.md"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to process document x/b.md"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_processing() {
        let out = tempfile::tempdir().unwrap();
        let wg = WaitGroup::new();
        let (processor, _downloads) = processor(&wg);

        struct Stalled;
        impl Reader for Stalled {
            async fn read(&self, _source: &str) -> Result<Vec<u8>> {
                std::future::pending().await
            }
        }
        let worker = DocumentWorker::new(Stalled, processor, FsWriter::new(out.path()));

        let token = CancellationToken::new();
        token.cancel();
        let err = worker.work(&token, task("c.md", "", "src/c.md")).await.unwrap_err();
        assert!(err.downcast_ref::<DocforgeError>().is_some_and(|e| matches!(e, DocforgeError::Cancelled)));
    }
}
