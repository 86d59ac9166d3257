//! Application configuration for docforge.
//!
//! User config lives at `~/.docforge/docforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocforgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docforge";

// ---------------------------------------------------------------------------
// Config structs (matching docforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Worker pool sizes.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Build output settings.
    #[serde(default)]
    pub build: BuildConfig,

    /// GitHub access.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Hugo output flavour.
    #[serde(default)]
    pub hugo: HugoOptions,

    /// Repository URL prefixes served from local checkouts.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_mappings: BTreeMap<String, String>,
}

/// `[workers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Concurrent document workers.
    #[serde(default = "default_document_workers")]
    pub documents: usize,

    /// Concurrent link validation workers.
    #[serde(default = "default_validation_workers")]
    pub validation: usize,

    /// Concurrent resource download workers.
    #[serde(default = "default_download_workers")]
    pub downloads: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            documents: default_document_workers(),
            validation: default_validation_workers(),
            downloads: default_download_workers(),
        }
    }
}

fn default_document_workers() -> usize {
    25
}
fn default_validation_workers() -> usize {
    10
}
fn default_download_workers() -> usize {
    10
}

/// `[build]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Stop the whole build on the first worker error.
    #[serde(default)]
    pub fail_fast: bool,

    /// Output directory for documents.
    #[serde(default = "default_destination")]
    pub destination: String,

    /// Directory (relative to the destination) for downloaded resources.
    #[serde(default = "default_resources_path")]
    pub resources_path: String,

    /// Check out-of-scope links for reachability.
    #[serde(default = "default_true")]
    pub validate_links: bool,

    /// Directory for git metadata files; unset disables git info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_info_destination: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            destination: default_destination(),
            resources_path: default_resources_path(),
            validate_links: true,
            github_info_destination: None,
        }
    }
}

fn default_destination() -> String {
    ".".into()
}
fn default_resources_path() -> String {
    "__resources".into()
}
fn default_true() -> bool {
    true
}

/// `[github]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Name of the env var holding the API token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Web host whose URLs the GitHub backend accepts.
    #[serde(default = "default_github_host")]
    pub host: String,

    /// REST API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Raw content base URL.
    #[serde(default = "default_raw_base")]
    pub raw_base: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            host: default_github_host(),
            api_base: default_api_base(),
            raw_base: default_raw_base(),
        }
    }
}

impl GitHubConfig {
    /// Read the token from the configured environment variable, if set.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|token| !token.is_empty())
    }
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_github_host() -> String {
    "github.com".into()
}
fn default_api_base() -> String {
    "https://api.github.com".into()
}
fn default_raw_base() -> String {
    "https://raw.githubusercontent.com".into()
}

/// `[hugo]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HugoOptions {
    /// Emit Hugo section files.
    #[serde(default)]
    pub enabled: bool,

    /// Document names promoted to `_index.md` (case-insensitive).
    #[serde(default = "default_index_file_names")]
    pub index_file_names: Vec<String>,
}

impl Default for HugoOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            index_file_names: default_index_file_names(),
        }
    }
}

fn default_index_file_names() -> Vec<String> {
    vec!["readme.md".into(), "index.md".into()]
}

// ---------------------------------------------------------------------------
// Build options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime build options, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct Options {
    pub document_workers: usize,
    pub validation_workers: usize,
    pub download_workers: usize,
    pub fail_fast: bool,
    pub destination: PathBuf,
    /// Relative to `destination`.
    pub resources_path: String,
    pub manifest_path: Option<PathBuf>,
    /// Print the resolved manifest when the build ends.
    pub resolve: bool,
    pub hugo: Option<HugoOptions>,
    pub validate_links: bool,
    pub github_info_destination: Option<PathBuf>,
    pub dry_run: bool,
    /// URL prefix to local directory.
    pub resource_mappings: BTreeMap<String, PathBuf>,
}

impl From<&AppConfig> for Options {
    fn from(config: &AppConfig) -> Self {
        Self {
            document_workers: config.workers.documents,
            validation_workers: config.workers.validation,
            download_workers: config.workers.downloads,
            fail_fast: config.build.fail_fast,
            destination: PathBuf::from(&config.build.destination),
            resources_path: config.build.resources_path.clone(),
            manifest_path: None,
            resolve: false,
            hugo: config.hugo.enabled.then(|| config.hugo.clone()),
            validate_links: config.build.validate_links,
            github_info_destination: config.build.github_info_destination.as_ref().map(PathBuf::from),
            dry_run: false,
            resource_mappings: config
                .resource_mappings
                .iter()
                .map(|(prefix, dir)| (prefix.clone(), PathBuf::from(dir)))
                .collect(),
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl Options {
    /// Reject worker counts that would stall the build.
    pub fn validate(&self) -> Result<()> {
        if self.document_workers == 0 {
            return Err(DocforgeError::config("document workers must be at least 1"));
        }
        if self.download_workers == 0 {
            return Err(DocforgeError::config("download workers must be at least 1"));
        }
        if self.validate_links && self.validation_workers == 0 {
            return Err(DocforgeError::config(
                "validation workers must be at least 1 when link validation is on",
            ));
        }
        if self.resources_path.trim().is_empty() {
            return Err(DocforgeError::config("resources path must not be empty"));
        }
        Ok(())
    }

    /// Directory receiving downloaded resources. A leading `/` makes the
    /// resources path site-absolute; it still lives under `destination`.
    pub fn resources_root(&self) -> PathBuf {
        self.destination.join(self.resources_path.trim_start_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocforgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docforge/docforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocforgeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DocforgeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocforgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocforgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocforgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
