//! Repository host serving a URL prefix from a local checkout.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};
use url::Url;

use docforge_shared::{DocforgeError, LocalityCandidate, Node, Result};

use crate::locator::{ResourceLocator, ResourceType, authority};
use crate::selector::{self, SelectedFile};

/// Serves `https://<host>/<owner>/<repo>/...` URLs under `url_prefix`
/// from `local_path` instead of the network.
#[derive(Debug, Clone)]
pub struct LocalHost {
    url_prefix: String,
    host: String,
    local_path: PathBuf,
}

impl LocalHost {
    pub fn new(url_prefix: impl Into<String>, local_path: impl Into<PathBuf>) -> Result<Self> {
        let url_prefix = url_prefix.into().trim_end_matches('/').to_string();
        let url = Url::parse(&url_prefix).map_err(|e| {
            DocforgeError::config(format!("invalid resource mapping {url_prefix}: {e}"))
        })?;
        let host = authority(&url).ok_or_else(|| {
            DocforgeError::config(format!("resource mapping {url_prefix} has no host"))
        })?;
        Ok(Self {
            url_prefix,
            host,
            local_path: local_path.into(),
        })
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn accept(&self, link: &str) -> bool {
        self.locate(link).is_some()
    }

    fn locate(&self, link: &str) -> Option<ResourceLocator> {
        let rest = link.strip_prefix(&self.url_prefix)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        ResourceLocator::parse(link, &self.host, "")
    }

    fn require(&self, link: &str) -> Result<ResourceLocator> {
        self.locate(link).ok_or_else(|| {
            DocforgeError::parse(format!("{link} is not under {}", self.url_prefix))
        })
    }

    fn file_path(&self, loc: &ResourceLocator) -> PathBuf {
        self.local_path.join(&loc.path)
    }

    #[instrument(skip_all, fields(url = %link))]
    pub async fn read(&self, link: &str) -> Result<Vec<u8>> {
        let loc = self.require(link)?;
        if loc.kind == ResourceType::Tree {
            return Err(DocforgeError::parse(format!("not a blob/raw url: {link}")));
        }
        let path = self.file_path(&loc);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DocforgeError::not_found(link)),
            Err(e) => Err(DocforgeError::io(path, e)),
        }
    }

    /// Whether the file or directory behind `link` is in the checkout.
    pub fn exists(&self, link: &str) -> bool {
        self.locate(link)
            .is_some_and(|loc| self.file_path(&loc).exists())
    }

    /// Local checkouts carry no commit metadata.
    pub async fn read_git_info(&self, _link: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Expand `node.node_selector` from the directory tree.
    #[instrument(skip_all, fields(node = %node.name))]
    pub async fn resolve_node_selector(&self, node: &mut Node) -> Result<()> {
        let Some(selector) = node.node_selector.clone() else {
            return Ok(());
        };
        let loc = self.require(&selector.path)?;
        let dir = self.file_path(&loc);
        let walked = dir.clone();
        let listing = tokio::task::spawn_blocking(move || list_markdown(&walked))
            .await
            .map_err(|e| DocforgeError::Transport(format!("listing {}: {e}", dir.display())))??;
        debug!(dir = %dir.display(), files = listing.len(), "listed local tree");

        let files = listing
            .into_iter()
            .map(|relative| {
                let path = if loc.path.is_empty() {
                    relative.clone()
                } else {
                    format!("{}/{relative}", loc.path)
                };
                let source = ResourceLocator {
                    kind: ResourceType::Blob,
                    path,
                    suffix: String::new(),
                    ..loc.clone()
                };
                SelectedFile {
                    relative,
                    source: source.to_string(),
                }
            })
            .collect();
        selector::attach(node, &selector, files)
    }

    /// Resolve `link` against `source`, preferring a file over a directory.
    pub fn build_abs_link(&self, source: &str, link: &str) -> Result<String> {
        let loc = self.require(source)?;
        let (blob, tree) = loc.resolve_relative(link).ok_or_else(|| {
            DocforgeError::parse(format!("cannot resolve {link} against {source}"))
        })?;
        let target = self.file_path(&blob);
        if target.is_file() {
            return Ok(blob.to_string());
        }
        if target.is_dir() {
            return Ok(tree.to_string());
        }
        Err(DocforgeError::not_found(format!("{link} with source {source}")))
    }

    pub fn locality_candidate(&self, link: &str) -> Option<LocalityCandidate> {
        let loc = self.locate(link)?;
        Some(LocalityCandidate {
            key: loc.repo_key(),
            path: loc.locality_path(),
            version: loc.git_ref,
        })
    }

    pub fn set_version(&self, link: &str, version: &str) -> Result<String> {
        Ok(self.require(link)?.with_ref(version).to_string())
    }

    pub fn name(&self, link: &str) -> String {
        self.locate(link)
            .map(|loc| loc.name().to_string())
            .unwrap_or_else(|| link.to_string())
    }
}

/// Relative paths of every `.md` file below `dir`.
fn list_markdown(dir: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DocforgeError::not_found(current.display().to_string()),
            _ => DocforgeError::io(&current, e),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| DocforgeError::io(&current, e))?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "md") {
                if let Ok(relative) = path.strip_prefix(dir) {
                    let relative: Vec<String> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    out.push(relative.join("/"));
                }
            }
        }
    }
    Ok(out)
}
