//! Download worker: copies linked resources into the resources directory.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use docforge_jobs::{Worker, WorkerError};
use docforge_shared::DocforgeError;
use docforge_writers::{OutputWriter, Writer};

use crate::reader::Reader;
use crate::tasks::DownloadTask;

pub struct DownloadWorker<R> {
    reader: R,
    writer: OutputWriter,
    /// Sources already claimed by a worker.
    claimed: Mutex<HashSet<String>>,
}

impl<R: Reader> DownloadWorker<R> {
    pub fn new(reader: R, writer: impl Into<OutputWriter>) -> Self {
        Self {
            reader,
            writer: writer.into(),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, source: &str) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(source.to_string())
    }

    async fn download(&self, task: &DownloadTask) -> Result<(), DocforgeError> {
        let bytes = self.reader.read(&task.source).await?;
        self.writer.write(&task.target, "", &bytes, None).await?;
        debug!(url = %task.source, target = %task.target, size = bytes.len(), "downloaded resource");
        Ok(())
    }
}

impl<R: Reader + 'static> Worker<DownloadTask> for DownloadWorker<R> {
    async fn work(&self, token: &CancellationToken, task: DownloadTask) -> Result<(), WorkerError> {
        if !self.claim(&task.source) {
            debug!(url = %task.source, "resource already downloaded");
            return Ok(());
        }

        let result = tokio::select! {
            result = self.download(&task) => result,
            () = token.cancelled() => return Err(super::cancelled()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(url = %task.source, referer = %task.referer, "linked resource not found");
                Ok(())
            }
            Err(e) => Err(WorkerError::new(
                format!("downloading {} as {} failed: {e}", task.source, task.target),
                0,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use docforge_shared::Result;
    use docforge_writers::FsWriter;

    use super::*;

    struct Counting {
        files: BTreeMap<String, Vec<u8>>,
        reads: Arc<AtomicUsize>,
    }

    impl Reader for Counting {
        async fn read(&self, source: &str) -> Result<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match source {
                "https://host/broken.png" => Err(DocforgeError::Transport("502 Bad Gateway".into())),
                _ => self
                    .files
                    .get(source)
                    .cloned()
                    .ok_or_else(|| DocforgeError::not_found(source)),
            }
        }
    }

    fn worker(root: &std::path::Path) -> (DownloadWorker<Counting>, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let reader = Counting {
            files: BTreeMap::from([("https://host/logo.png".to_string(), b"png".to_vec())]),
            reads: Arc::clone(&reads),
        };
        (DownloadWorker::new(reader, FsWriter::new(root)), reads)
    }

    fn task(source: &str, target: &str) -> DownloadTask {
        DownloadTask {
            source: source.into(),
            target: target.into(),
            referer: "https://host/intro.md".into(),
        }
    }

    #[tokio::test]
    async fn writes_each_resource_once() {
        let out = tempfile::tempdir().unwrap();
        let (worker, reads) = worker(out.path());
        let token = CancellationToken::new();

        worker.work(&token, task("https://host/logo.png", "1.png")).await.unwrap();
        worker.work(&token, task("https://host/logo.png", "1.png")).await.unwrap();

        assert_eq!(std::fs::read(out.path().join("1.png")).unwrap(), b"png");
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_resources_only_warn() {
        let out = tempfile::tempdir().unwrap();
        let (worker, _) = worker(out.path());

        worker
            .work(&CancellationToken::new(), task("https://host/gone.png", "2.png"))
            .await
            .unwrap();

        assert!(!out.path().join("2.png").exists());
    }

    #[tokio::test]
    async fn transport_failures_fail_the_task() {
        let out = tempfile::tempdir().unwrap();
        let (worker, _) = worker(out.path());

        let err = worker
            .work(&CancellationToken::new(), task("https://host/broken.png", "3.png"))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "downloading https://host/broken.png as 3.png failed: transport error: 502 Bad Gateway"
        );
    }
}
