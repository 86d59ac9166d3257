//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use docforge_core::{BuildProgress, BuildSummary, Reactor};
use docforge_hosts::Registry;
use docforge_shared::urls::has_scheme;
use docforge_shared::{
    AppConfig, Manifest, MetricsRegistry, Options, init_config, load_config, load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Docforge: build documentation bundles from a manifest.
#[derive(Parser)]
#[command(
    name = "docforge",
    version,
    about = "Build documentation bundles from GitHub sources described by a YAML manifest.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.docforge/docforge.toml.
    #[arg(long, global = true, env = "DOCFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build the documentation described by a manifest.
    Build(BuildArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags of `docforge build`. Unset flags fall back to the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct BuildArgs {
    /// Manifest file path or URL.
    #[arg(short = 'f', long = "manifest")]
    pub manifest: String,

    /// Destination directory of the build.
    #[arg(short = 'd', long)]
    pub destination: Option<PathBuf>,

    /// Resources directory, relative to the destination.
    #[arg(long)]
    pub resources_path: Option<String>,

    #[arg(long)]
    pub document_workers: Option<usize>,

    #[arg(long)]
    pub validation_workers: Option<usize>,

    #[arg(long)]
    pub download_workers: Option<usize>,

    /// Abort the build on the first document or download failure.
    #[arg(long)]
    pub fail_fast: bool,

    /// Print the planned file tree instead of writing files.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the resolved manifest when the build ends.
    #[arg(long)]
    pub resolve: bool,

    /// Skip link validation.
    #[arg(long)]
    pub no_validate: bool,

    /// Write GitHub commit info for each document under this directory.
    #[arg(long)]
    pub github_info_destination: Option<PathBuf>,

    /// Emit Hugo-compatible section files.
    #[arg(long)]
    pub hugo: bool,

    /// Serve a URL prefix from a local checkout (PREFIX=DIR, repeatable).
    #[arg(long = "resource-mapping", value_parser = parse_mapping)]
    pub resource_mappings: Vec<(String, PathBuf)>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_mapping(raw: &str) -> std::result::Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((prefix, dir)) if !prefix.is_empty() && !dir.is_empty() => {
            Ok((prefix.trim_end_matches('/').to_string(), PathBuf::from(dir)))
        }
        _ => Err(format!("expected PREFIX=DIR, got '{raw}'")),
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docforge=info",
        1 => "docforge=debug",
        _ => "docforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr; stdout carries the resolved manifest and dry-run tree.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build(args) => cmd_build(cli.config.as_deref(), args).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()).await,
        },
    }
}

fn config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Merge `args` over the options derived from `config`.
fn build_options(config: &AppConfig, args: &BuildArgs) -> Options {
    let mut options = Options::from(config);
    if let Some(destination) = &args.destination {
        options.destination = destination.clone();
    }
    if let Some(resources_path) = &args.resources_path {
        options.resources_path = resources_path.clone();
    }
    if let Some(n) = args.document_workers {
        options.document_workers = n;
    }
    if let Some(n) = args.validation_workers {
        options.validation_workers = n;
    }
    if let Some(n) = args.download_workers {
        options.download_workers = n;
    }
    if args.github_info_destination.is_some() {
        options.github_info_destination = args.github_info_destination.clone();
    }
    if args.hugo {
        let mut hugo = config.hugo.clone();
        hugo.enabled = true;
        options.hugo = Some(hugo);
    }
    options.fail_fast |= args.fail_fast;
    options.validate_links &= !args.no_validate;
    options.dry_run = args.dry_run;
    options.resolve = args.resolve;
    options.manifest_path = Some(PathBuf::from(&args.manifest));
    options
        .resource_mappings
        .extend(args.resource_mappings.iter().cloned());
    options
}

/// Read the manifest from disk, or through the registry when it is a URL.
async fn read_manifest(source: &str, registry: &Registry) -> Result<Manifest> {
    let content = if has_scheme(source) {
        let bytes = registry
            .read(source)
            .await
            .wrap_err_with(|| format!("failed to read manifest {source}"))?;
        String::from_utf8(bytes).map_err(|e| eyre!("manifest {source} is not UTF-8: {e}"))?
    } else {
        tokio::fs::read_to_string(source)
            .await
            .wrap_err_with(|| format!("failed to read manifest {source}"))?
    };
    Ok(Manifest::from_yaml(&content)?)
}

async fn cmd_build(config_path: Option<&Path>, args: BuildArgs) -> Result<()> {
    let config = config(config_path)?;
    let options = build_options(&config, &args);

    let metrics = Arc::new(MetricsRegistry::new());
    let registry = Arc::new(Registry::from_config(
        &config.github,
        &options.resource_mappings,
        &metrics,
    )?);
    let mut manifest = read_manifest(&args.manifest, &registry).await?;

    info!(
        manifest = %args.manifest,
        destination = %options.destination.display(),
        dry_run = options.dry_run,
        "building documentation"
    );

    let reactor = Reactor::new(options, registry, Arc::clone(&metrics))?;

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping build");
            interrupt.cancel();
        }
    });

    // A dry run prints its own summary; a spinner would garble it.
    let progress: Box<dyn BuildProgress> = if args.dry_run || args.resolve {
        Box::new(docforge_core::SilentProgress)
    } else {
        Box::new(CliProgress::new())
    };
    let result = reactor.run(&token, &mut manifest, progress.as_ref()).await;
    match metrics.render() {
        Ok(text) => debug!(metrics = %text, "client metrics"),
        Err(e) => debug!(error = %e, "failed to render client metrics"),
    }

    match result {
        Ok(summary) => {
            if !args.dry_run && !args.resolve {
                print_summary(&summary, &reactor);
            }
            Ok(())
        }
        Err(e) if e.is_cancelled() => Err(eyre!("build cancelled")),
        Err(e) => Err(e).wrap_err("build failed"),
    }
}

fn print_summary(summary: &BuildSummary, reactor: &Reactor) {
    println!();
    println!("  Build finished!");
    println!("  Documents:   {}", summary.documents);
    println!("  Downloads:   {}", summary.downloads);
    println!("  Validations: {}", summary.validations);
    if reactor.options().github_info_destination.is_some() {
        println!("  Git info:    {}", summary.git_info);
    }
    println!("  Path:        {}", reactor.options().destination.display());
    println!("  Time:        {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl BuildProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _summary: &BuildSummary) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
