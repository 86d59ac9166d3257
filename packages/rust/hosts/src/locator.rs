//! GitHub-style resource URLs.
//!
//! `https://<host>/<owner>/<repo>/<blob|tree|raw>/<ref>/<path>` and the raw
//! content form `https://<raw host>/<owner>/<repo>/<ref>/<path>`. Raw
//! content URLs are normalized to `blob` URLs on the web host.

use std::fmt;

use url::Url;

use docforge_shared::urls::strip_suffixes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Blob,
    Tree,
    Raw,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Raw => "raw",
        }
    }

    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }
}

/// A decomposed repository resource URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub kind: ResourceType,
    pub git_ref: String,
    /// Path inside the repository, without leading `/`. Empty for the root.
    pub path: String,
    /// Query and fragment, kept verbatim.
    pub suffix: String,
}

impl ResourceLocator {
    /// Parse `link` if it belongs to `host` (web URLs) or `raw_host`
    /// (raw content URLs). Hosts are compared including any port.
    pub fn parse(link: &str, host: &str, raw_host: &str) -> Option<Self> {
        let url = Url::parse(link).ok()?;
        if !matches!(url.scheme(), "https" | "http") {
            return None;
        }
        let authority = authority(&url)?;
        let segments: Vec<&str> = url.path_segments()?.collect();
        let suffix = link[strip_suffixes(link).len()..].to_string();

        if authority == host {
            if segments.len() < 4 {
                return None;
            }
            let kind = ResourceType::parse(segments[2])?;
            return Some(Self {
                host: host.to_string(),
                owner: segments[0].to_string(),
                repo: segments[1].to_string(),
                kind,
                git_ref: segments[3].to_string(),
                path: join_path(&segments[4..]),
                suffix,
            });
        }

        if !raw_host.is_empty() && authority == raw_host {
            if segments.len() < 3 {
                return None;
            }
            return Some(Self {
                host: host.to_string(),
                owner: segments[0].to_string(),
                repo: segments[1].to_string(),
                kind: ResourceType::Blob,
                git_ref: segments[2].to_string(),
                path: join_path(&segments[3..]),
                suffix,
            });
        }

        None
    }

    /// The same resource with a different type.
    pub fn with_kind(&self, kind: ResourceType) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// The same resource pinned to another ref.
    pub fn with_ref(&self, git_ref: &str) -> Self {
        Self {
            git_ref: git_ref.to_string(),
            ..self.clone()
        }
    }

    /// `host/owner/repo`, the locality-domain key.
    pub fn repo_key(&self) -> String {
        format!("{}/{}/{}", self.host, self.owner, self.repo)
    }

    /// `owner/repo/<dir>`: the directory holding this resource.
    pub fn locality_path(&self) -> String {
        let dir = match self.path.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => "",
        };
        if dir.is_empty() {
            format!("{}/{}", self.owner, self.repo)
        } else {
            format!("{}/{}/{dir}", self.owner, self.repo)
        }
    }

    /// Last path segment, or the repository name at the root.
    pub fn name(&self) -> &str {
        self.path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(self.repo.as_str())
    }

    /// The URL without query or fragment.
    pub fn resource_url(&self) -> String {
        let mut out = format!(
            "https://{}/{}/{}/{}/{}",
            self.host,
            self.owner,
            self.repo,
            self.kind.as_str(),
            self.git_ref
        );
        if !self.path.is_empty() {
            out.push('/');
            out.push_str(&self.path);
        }
        out
    }

    /// Resolve a relative link against this resource. Returns the `blob`
    /// and `tree` candidates; a leading `/` is relative to the repository
    /// root.
    pub fn resolve_relative(&self, link: &str) -> Option<(Self, Self)> {
        let target = strip_suffixes(link);
        let suffix = &link[target.len()..];
        let target = if target != "/" {
            target.trim_end_matches('/')
        } else {
            target
        };

        let dir = if self.kind == ResourceType::Tree && !self.path.is_empty() {
            format!("{}/", self.path)
        } else {
            self.path.clone()
        };
        let base = Url::parse(&format!("https://repository.invalid/{dir}")).ok()?;
        let resolved = base.join(target).ok()?;
        let path = resolved.path().trim_matches('/').to_string();

        let tree = Self {
            kind: ResourceType::Tree,
            path,
            suffix: suffix.to_string(),
            ..self.clone()
        };
        let blob = tree.with_kind(ResourceType::Blob);
        Some((blob, tree))
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.resource_url(), self.suffix)
    }
}

/// `host[:port]` of a URL.
pub(crate) fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}
