//! Build orchestration.
//!
//! A [`Reactor`] resolves the manifest, wires the document, download,
//! validator and GitHub info queues to one [`WaitGroup`], feeds every
//! document node in, and waits until no queue has work left.

use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use docforge_hosts::{InstrumentedClient, Registry};
use docforge_jobs::{JobError, JobQueue, WaitGroup};
use docforge_shared::{DocforgeError, Manifest, MetricsRegistry, Options, Result};
use docforge_writers::{DryRunWriters, FsWriter, OutputWriter};

use crate::error::{BuildError, is_cancellation};
use crate::processor::{ContentProcessor, SourceIndex};
use crate::resolver;
use crate::tasks::DocumentTask;
use crate::workers::{DocumentWorker, DownloadWorker, GitInfoWorker, ValidatorWorker};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting build status.
pub trait BuildProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the build completes successfully.
    fn done(&self, summary: &BuildSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl BuildProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _summary: &BuildSummary) {}
}

/// Outcome of a successful build.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Document nodes processed.
    pub documents: usize,
    pub downloads: usize,
    pub validations: usize,
    pub git_info: usize,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Output sinks of one build: real directories, or dry-run recorders.
struct BuildWriters {
    documents: OutputWriter,
    resources: OutputWriter,
    git_info: Option<OutputWriter>,
    dry_run: Option<DryRunWriters>,
}

impl BuildWriters {
    fn for_options(options: &Options) -> Self {
        if options.dry_run {
            let dry_run = DryRunWriters::new();
            let writer = |root: &std::path::Path| dry_run.writer(root.display().to_string());
            return Self {
                documents: writer(&options.destination).into(),
                resources: writer(&options.resources_root()).into(),
                git_info: options
                    .github_info_destination
                    .as_deref()
                    .map(|dir| writer(dir).with_extension("json").into()),
                dry_run: Some(dry_run),
            };
        }
        Self {
            documents: FsWriter::new(&options.destination).into(),
            resources: FsWriter::new(options.resources_root()).into(),
            git_info: options
                .github_info_destination
                .as_ref()
                .map(|dir| FsWriter::new(dir).with_extension("json").into()),
            dry_run: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reactor
// ---------------------------------------------------------------------------

pub struct Reactor {
    options: Options,
    registry: Arc<Registry>,
    metrics: Arc<MetricsRegistry>,
    client: InstrumentedClient,
    writers: BuildWriters,
}

impl Reactor {
    /// Validate `options` and prepare the build's writers.
    pub fn new(options: Options, registry: Arc<Registry>, metrics: Arc<MetricsRegistry>) -> Result<Self> {
        options.validate()?;
        let client = InstrumentedClient::new(&metrics)?;
        let writers = BuildWriters::for_options(&options);
        Ok(Self {
            options,
            registry,
            metrics,
            client,
            writers,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Planned files of a dry run.
    pub fn dry_run(&self) -> Option<&DryRunWriters> {
        self.writers.dry_run.as_ref()
    }

    /// Build the documentation described by `manifest`.
    ///
    /// On every exit path the resolved manifest is printed when
    /// `options.resolve` is set, and the dry-run tree is flushed.
    #[instrument(skip_all, fields(destination = %self.options.destination.display()))]
    pub async fn run(
        &self,
        token: &CancellationToken,
        manifest: &mut Manifest,
        progress: &dyn BuildProgress,
    ) -> std::result::Result<BuildSummary, BuildError> {
        self.metrics.reset();
        let result = self.build(token, manifest, progress).await;

        if self.options.resolve {
            self.print_resolved(manifest);
        }
        if let Some(dry_run) = &self.writers.dry_run {
            if let Err(e) = dry_run.flush() {
                warn!(error = %e, "failed to print dry-run output");
            }
        }
        if let Ok(summary) = &result {
            progress.done(summary);
        }
        result
    }

    fn print_resolved(&self, manifest: &Manifest) {
        let printed = manifest.to_yaml().and_then(|yaml| {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "---\n{yaml}")
                .and_then(|()| stdout.flush())
                .map_err(|e| DocforgeError::io("<stdout>", e))
        });
        if let Err(e) = printed {
            warn!(error = %e, "failed to print resolved manifest");
        }
    }

    async fn build(
        &self,
        token: &CancellationToken,
        manifest: &mut Manifest,
        progress: &dyn BuildProgress,
    ) -> std::result::Result<BuildSummary, BuildError> {
        let started = Instant::now();
        let options = &self.options;

        progress.phase("Resolving manifest");
        let locality = resolver::resolve_manifest(manifest, &self.registry, options).await?;
        resolver::check_collisions(&manifest.structure)?;

        let wg = WaitGroup::new();
        let build_token = token.child_token();

        let downloads = JobQueue::new(
            "Download",
            options.download_workers,
            options.fail_fast,
            DownloadWorker::new(Arc::clone(&self.registry), self.writers.resources.clone()),
            &wg,
        )?;
        downloads.escalate_failures_to(build_token.clone());

        let validator = if options.validate_links {
            let queue = JobQueue::new(
                "Validator",
                options.validation_workers,
                false,
                ValidatorWorker::new(Arc::clone(&self.registry), self.client.clone()),
                &wg,
            )?;
            Some(queue)
        } else {
            None
        };

        let git_info = match &self.writers.git_info {
            Some(writer) => {
                let queue = JobQueue::new(
                    "GitHubInfo",
                    options.download_workers,
                    options.fail_fast,
                    GitInfoWorker::new(Arc::clone(&self.registry), writer.clone()),
                    &wg,
                )?;
                queue.escalate_failures_to(build_token.clone());
                Some(queue)
            }
            None => None,
        };

        let mut processor = ContentProcessor::new(
            Arc::clone(&self.registry),
            SourceIndex::new(&manifest.structure),
            downloads.submitter(),
        )
        .with_locality(locality)
        .with_resources_path(options.resources_path.clone());
        if let Some(validator) = &validator {
            processor = processor.with_validator(validator.submitter());
        }
        let mut worker = DocumentWorker::new(
            Arc::clone(&self.registry),
            Arc::new(processor),
            self.writers.documents.clone(),
        );
        if let Some(git_info) = &git_info {
            worker = worker.with_git_info(git_info.submitter());
        }
        let documents = JobQueue::new(
            "Document",
            options.document_workers,
            options.fail_fast,
            worker,
            &wg,
        )?;
        documents.escalate_failures_to(build_token.clone());

        documents.start(&build_token);
        downloads.start(&build_token);
        if let Some(queue) = &validator {
            queue.start(&build_token);
        }
        if let Some(queue) = &git_info {
            queue.start(&build_token);
        }

        progress.phase("Building documents");
        let mut scheduled = 0;
        for node in manifest.nodes().filter(|node| node.is_document()) {
            if documents.add_task(DocumentTask { node: Arc::new(node.clone()) }) {
                scheduled += 1;
            }
        }
        info!(documents = scheduled, "documents scheduled");

        tokio::select! {
            () = wg.wait() => {}
            () = build_token.cancelled() => {}
        }

        documents.stop();
        downloads.stop();
        let mut outcomes = vec![documents.join().await, downloads.join().await];
        if let Some(queue) = &validator {
            queue.stop();
            outcomes.push(queue.join().await);
        }
        if let Some(queue) = &git_info {
            queue.stop();
            outcomes.push(queue.join().await);
        }

        let summary = BuildSummary {
            documents: documents.processed_count(),
            downloads: downloads.processed_count(),
            validations: validator.as_ref().map_or(0, JobQueue::processed_count),
            git_info: git_info.as_ref().map_or(0, JobQueue::processed_count),
            elapsed: started.elapsed(),
        };
        info!(
            documents = summary.documents,
            downloads = summary.downloads,
            validations = summary.validations,
            git_info = summary.git_info,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "build finished"
        );
        self.registry.log_rate_limits();

        first_failure(outcomes, &build_token)?;
        Ok(summary)
    }
}

/// The first real failure among the queue outcomes, falling back to an
/// interruption, then to cancellation of the build token.
fn first_failure(
    outcomes: Vec<std::result::Result<(), JobError>>,
    build_token: &CancellationToken,
) -> std::result::Result<(), BuildError> {
    let mut interrupted = None;
    for outcome in outcomes {
        match outcome {
            Ok(()) => {}
            Err(e) if is_cancellation(&e) => {
                interrupted.get_or_insert(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(e) = interrupted {
        return Err(e.into());
    }
    if build_token.is_cancelled() {
        return Err(DocforgeError::Cancelled.into());
    }
    Ok(())
}
