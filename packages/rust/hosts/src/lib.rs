//! Repository hosts: the backends that read, list and rewrite resource URLs.
//!
//! A [`Registry`] holds hosts in priority order and hands every URL to the
//! first host that accepts it.

pub mod github;
pub mod http;
pub mod local;
pub mod locator;
mod selector;

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{info, instrument, warn};

use docforge_shared::{
    DocforgeError, GitHubConfig, LocalityCandidate, LocalityResolver, MetricsRegistry, Node,
    Result,
};

pub use github::GitHubHost;
pub use http::{InstrumentedClient, RateLimit};
pub use local::LocalHost;
pub use locator::{ResourceLocator, ResourceType};

// ---------------------------------------------------------------------------
// RepositoryHost
// ---------------------------------------------------------------------------

/// A backend for one family of URLs.
#[derive(Debug)]
pub enum RepositoryHost {
    GitHub(GitHubHost),
    Local(LocalHost),
}

impl RepositoryHost {
    pub fn accept(&self, link: &str) -> bool {
        match self {
            Self::GitHub(host) => host.accept(link),
            Self::Local(host) => host.accept(link),
        }
    }

    /// Raw content of a file URL.
    pub async fn read(&self, link: &str) -> Result<Vec<u8>> {
        match self {
            Self::GitHub(host) => host.read(link).await,
            Self::Local(host) => host.read(link).await,
        }
    }

    /// Commit metadata document; may be empty.
    pub async fn read_git_info(&self, link: &str) -> Result<Vec<u8>> {
        match self {
            Self::GitHub(host) => host.read_git_info(link).await,
            Self::Local(host) => host.read_git_info(link).await,
        }
    }

    /// Expand a node's selector into child nodes.
    pub async fn resolve_node_selector(&self, node: &mut Node) -> Result<()> {
        match self {
            Self::GitHub(host) => host.resolve_node_selector(node).await,
            Self::Local(host) => host.resolve_node_selector(node).await,
        }
    }

    pub fn build_abs_link(&self, source: &str, link: &str) -> Result<String> {
        match self {
            Self::GitHub(host) => host.build_abs_link(source, link),
            Self::Local(host) => host.build_abs_link(source, link),
        }
    }

    pub fn locality_candidate(&self, link: &str) -> Option<LocalityCandidate> {
        match self {
            Self::GitHub(host) => host.locality_candidate(link),
            Self::Local(host) => host.locality_candidate(link),
        }
    }

    pub fn set_version(&self, link: &str, version: &str) -> Result<String> {
        match self {
            Self::GitHub(host) => host.set_version(link, version),
            Self::Local(host) => host.set_version(link, version),
        }
    }

    /// Short display name of a resource.
    pub fn name(&self, link: &str) -> String {
        match self {
            Self::GitHub(host) => host.name(link),
            Self::Local(host) => host.name(link),
        }
    }

    /// Existence of `link` when the host can tell without a request.
    pub fn exists_locally(&self, link: &str) -> Option<bool> {
        match self {
            Self::GitHub(_) => None,
            Self::Local(host) => Some(host.exists(link)),
        }
    }

    /// Pre-authenticated client for requests to this host.
    pub fn client(&self) -> Option<&InstrumentedClient> {
        match self {
            Self::GitHub(host) => Some(host.client()),
            Self::Local(_) => None,
        }
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        match self {
            Self::GitHub(host) => host.rate_limit(),
            Self::Local(_) => None,
        }
    }

    /// Human-readable host label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::GitHub(host) => host.host().to_string(),
            Self::Local(host) => format!("local {}", host.url_prefix()),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Repository hosts in priority order.
#[derive(Debug, Default)]
pub struct Registry {
    hosts: Vec<RepositoryHost>,
}

impl Registry {
    pub fn new(hosts: Vec<RepositoryHost>) -> Self {
        Self { hosts }
    }

    /// Local mappings first, then GitHub.
    pub fn from_config(
        github: &GitHubConfig,
        resource_mappings: &BTreeMap<String, PathBuf>,
        metrics: &MetricsRegistry,
    ) -> Result<Self> {
        let mut hosts = Vec::with_capacity(resource_mappings.len() + 1);
        for (prefix, dir) in resource_mappings {
            hosts.push(RepositoryHost::Local(LocalHost::new(prefix.clone(), dir.clone())?));
        }
        hosts.push(RepositoryHost::GitHub(GitHubHost::new(github, metrics)?));
        Ok(Self::new(hosts))
    }

    /// First host accepting `link`.
    pub fn get(&self, link: &str) -> Result<&RepositoryHost> {
        self.hosts
            .iter()
            .find(|host| host.accept(link))
            .ok_or_else(|| DocforgeError::UnsupportedHost {
                url: link.to_string(),
            })
    }

    pub fn hosts(&self) -> &[RepositoryHost] {
        &self.hosts
    }

    pub async fn read(&self, link: &str) -> Result<Vec<u8>> {
        self.get(link)?.read(link).await
    }

    pub async fn read_git_info(&self, link: &str) -> Result<Vec<u8>> {
        self.get(link)?.read_git_info(link).await
    }

    /// Expand `node.node_selector` with whichever host serves its path.
    #[instrument(skip_all, fields(node = %node.name))]
    pub async fn resolve_node_selector(&self, node: &mut Node) -> Result<()> {
        let Some(selector) = &node.node_selector else {
            return Ok(());
        };
        let host = self.get(&selector.path)?;
        host.resolve_node_selector(node).await
    }

    pub fn build_abs_link(&self, source: &str, link: &str) -> Result<String> {
        self.get(source)?.build_abs_link(source, link)
    }

    /// Client of the host serving `link`, if it has one.
    pub fn client(&self, link: &str) -> Option<&InstrumentedClient> {
        self.get(link).ok()?.client()
    }

    /// Log the remaining API quota of every host that reported one.
    pub fn log_rate_limits(&self) {
        for host in &self.hosts {
            let Some(limit) = host.rate_limit() else {
                continue;
            };
            let reset = limit
                .reset
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown".into());
            if limit.remaining == 0 {
                warn!(host = %host.label(), limit = limit.limit, %reset, "API rate limit exhausted");
            } else {
                info!(
                    host = %host.label(),
                    limit = limit.limit,
                    remaining = limit.remaining,
                    %reset,
                    "API rate limit"
                );
            }
        }
    }
}

impl LocalityResolver for Registry {
    fn locality_candidate(&self, link: &str) -> Option<LocalityCandidate> {
        self.get(link).ok()?.locality_candidate(link)
    }

    fn set_version(&self, link: &str, version: &str) -> Result<String> {
        self.get(link)?.set_version(link, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(local: &std::path::Path) -> Registry {
        let github = GitHubConfig::default();
        let mut mappings = BTreeMap::new();
        mappings.insert("https://github.com/org/local".to_string(), local.to_path_buf());
        Registry::from_config(&github, &mappings, &MetricsRegistry::new()).unwrap()
    }

    #[test]
    fn first_accepting_host_wins() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let local = registry
            .get("https://github.com/org/local/blob/main/README.md")
            .unwrap();
        assert!(matches!(local, RepositoryHost::Local(_)));
        assert!(local.client().is_none());
        assert_eq!(
            local.exists_locally("https://github.com/org/local/blob/main/README.md"),
            Some(false)
        );

        let remote = registry
            .get("https://github.com/org/remote/blob/main/README.md")
            .unwrap();
        assert!(matches!(remote, RepositoryHost::GitHub(_)));
        assert_eq!(remote.label(), "github.com");
        assert!(
            registry
                .client("https://raw.githubusercontent.com/org/remote/main/README.md")
                .is_some()
        );
    }

    #[test]
    fn unsupported_hosts_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = registry(dir.path())
            .get("https://gitlab.com/org/repo/-/blob/main/README.md")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "no suitable repository host for https://gitlab.com/org/repo/-/blob/main/README.md"
        );
    }

    #[test]
    fn registry_resolves_locality() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let link = "https://github.com/org/remote/blob/main/docs/a.md";

        let candidate = LocalityResolver::locality_candidate(&registry, link).unwrap();
        assert_eq!(candidate.key, "github.com/org/remote");
        assert_eq!(
            LocalityResolver::set_version(&registry, link, "v1").unwrap(),
            "https://github.com/org/remote/blob/v1/docs/a.md"
        );
        assert!(LocalityResolver::locality_candidate(&registry, "https://example.com/a").is_none());
    }
}
