//! GitHub repository host backed by the REST API and raw content server.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use docforge_shared::urls::strip_suffixes;
use docforge_shared::{
    DocforgeError, GitHubConfig, LocalityCandidate, MetricsRegistry, Node, Result,
};

use crate::http::{InstrumentedClient, RateLimit};
use crate::locator::{ResourceLocator, ResourceType, authority};
use crate::selector::{self, SelectedFile};

/// Percent-decoded URL component, or the component itself when it does
/// not decode to UTF-8.
fn decoded(component: &str) -> String {
    urlencoding::decode(component).map_or_else(|_| component.to_string(), |c| c.into_owned())
}

/// Format of `lastmod` and `publishdate` in git info documents.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reads GitHub-hosted repositories.
#[derive(Debug)]
pub struct GitHubHost {
    host: String,
    raw_host: String,
    api_base: String,
    raw_base: String,
    client: InstrumentedClient,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl GitHubHost {
    pub fn new(config: &GitHubConfig, registry: &MetricsRegistry) -> Result<Self> {
        let client = InstrumentedClient::with_token(config.token().as_deref(), registry)?;
        Self::with_client(config, client)
    }

    /// Use a prepared client instead of building one from the config.
    pub fn with_client(config: &GitHubConfig, client: InstrumentedClient) -> Result<Self> {
        let raw_base = config.raw_base.trim_end_matches('/').to_string();
        let raw_url = Url::parse(&raw_base)
            .map_err(|e| DocforgeError::config(format!("invalid raw base {raw_base}: {e}")))?;
        Ok(Self {
            host: config.host.clone(),
            raw_host: authority(&raw_url).unwrap_or_default(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            raw_base,
            client,
            rate_limit: Mutex::new(None),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn accept(&self, link: &str) -> bool {
        self.locate(link).is_some()
    }

    pub fn client(&self) -> &InstrumentedClient {
        &self.client
    }

    /// Quota reported by the most recent API response.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        *lock(&self.rate_limit)
    }

    fn locate(&self, link: &str) -> Option<ResourceLocator> {
        ResourceLocator::parse(link, &self.host, &self.raw_host)
    }

    fn require(&self, link: &str) -> Result<ResourceLocator> {
        self.locate(link)
            .ok_or_else(|| DocforgeError::parse(format!("{link} is not a {} resource URL", self.host)))
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(url = %link))]
    pub async fn read(&self, link: &str) -> Result<Vec<u8>> {
        let loc = self.require(link)?;
        if loc.kind == ResourceType::Tree {
            return Err(DocforgeError::parse(format!("not a blob/raw url: {link}")));
        }
        let raw = format!(
            "{}/{}/{}/{}/{}",
            self.raw_base, loc.owner, loc.repo, loc.git_ref, loc.path
        );
        debug!(%raw, "reading raw content");

        let response = self
            .client
            .send(self.client.get(&raw))
            .await
            .map_err(|e| DocforgeError::Transport(format!("{link}: {e}")))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DocforgeError::not_found(link));
        }
        if !status.is_success() {
            return Err(DocforgeError::Transport(format!(
                "reading blob {link} fails with HTTP status: {}",
                status.as_u16()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| DocforgeError::Transport(format!("{link}: failed to read body: {e}")))?;
        Ok(body.to_vec())
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        let url = format!("{}{path}", self.api_base);
        Url::parse(&url).map_err(|e| DocforgeError::parse(format!("invalid API URL {url}: {e}")))
    }

    /// GET an API URL, recording the reported quota.
    async fn api_get<T: DeserializeOwned>(&self, url: Url, context: &str) -> Result<T> {
        let response = self
            .client
            .send(
                self.client
                    .get(url.as_str())
                    .header(reqwest::header::ACCEPT, "application/vnd.github+json"),
            )
            .await
            .map_err(|e| DocforgeError::Transport(format!("{context}: {e}")))?;

        if let Some(limit) = RateLimit::from_headers(response.headers()) {
            *lock(&self.rate_limit) = Some(limit);
        }
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DocforgeError::not_found(context));
        }
        if !status.is_success() {
            return Err(DocforgeError::Transport(format!(
                "{context} fails with HTTP status: {}",
                status.as_u16()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| DocforgeError::parse(format!("{context}: {e}")))
    }

    // -----------------------------------------------------------------------
    // Git info
    // -----------------------------------------------------------------------

    /// Commit metadata of a file as pretty-printed JSON. Empty when the file
    /// has no commits other than internal ones.
    #[instrument(skip_all, fields(url = %link))]
    pub async fn read_git_info(&self, link: &str) -> Result<Vec<u8>> {
        let loc = self.require(link)?;
        let file_path = decoded(&loc.path);
        let git_ref = decoded(&loc.git_ref);
        let mut url = self.api_url(&format!("/repos/{}/{}/commits", loc.owner, loc.repo))?;
        url.query_pairs_mut()
            .append_pair("path", &file_path)
            .append_pair("sha", &git_ref);
        let commits: Vec<RepositoryCommit> = self
            .api_get(url, &format!("list commits for {link}"))
            .await?;

        let Some(mut info) = GitInfo::from_commits(commits) else {
            return Ok(Vec::new());
        };
        if !git_ref.is_empty() {
            info.shaalias = Some(git_ref);
        }
        if !file_path.is_empty() {
            info.path = Some(file_path);
        }
        serde_json::to_vec_pretty(&info)
            .map_err(|e| DocforgeError::parse(format!("git info for {link}: {e}")))
    }

    // -----------------------------------------------------------------------
    // Node selectors
    // -----------------------------------------------------------------------

    /// Expand `node.node_selector` into child nodes from the repository tree.
    #[instrument(skip_all, fields(node = %node.name))]
    pub async fn resolve_node_selector(&self, node: &mut Node) -> Result<()> {
        let Some(selector) = node.node_selector.clone() else {
            return Ok(());
        };
        let loc = self.require(&selector.path)?;
        let mut url = self.api_url(&format!(
            "/repos/{}/{}/git/trees/{}",
            loc.owner, loc.repo, loc.git_ref
        ))?;
        url.query_pairs_mut().append_pair("recursive", "1");
        let tree: GitTree = self
            .api_get(url, &format!("reading tree {}", selector.path))
            .await?;
        if tree.truncated {
            debug!(path = %selector.path, "repository tree listing truncated");
        }

        let prefix = if loc.path.is_empty() {
            String::new()
        } else {
            format!("{}/", loc.path)
        };
        let files = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob" && entry.path.ends_with(".md"))
            .filter_map(|entry| {
                let relative = entry.path.strip_prefix(&prefix)?.to_string();
                let source = ResourceLocator {
                    kind: ResourceType::Blob,
                    path: entry.path.clone(),
                    suffix: String::new(),
                    ..loc.clone()
                };
                Some(SelectedFile {
                    relative,
                    source: source.to_string(),
                })
            })
            .collect();

        selector::attach(node, &selector, files)
    }

    // -----------------------------------------------------------------------
    // Link arithmetic
    // -----------------------------------------------------------------------

    /// Resolve `link` against `source`. The target is assumed to exist.
    pub fn build_abs_link(&self, source: &str, link: &str) -> Result<String> {
        let loc = self.require(source)?;
        let (blob, tree) = loc.resolve_relative(link).ok_or_else(|| {
            DocforgeError::parse(format!("cannot resolve {link} against {source}"))
        })?;
        // Links to directories stay directories.
        if strip_suffixes(link).ends_with('/') || blob.path.is_empty() {
            return Ok(tree.to_string());
        }
        Ok(blob.to_string())
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

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GitTree {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryCommit {
    #[serde(default)]
    html_url: String,
    commit: CommitDetails,
    /// GitHub account of the author, absent for unknown emails.
    #[serde(default)]
    author: Option<Account>,
    #[serde(default)]
    committer: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct CommitDetails {
    #[serde(default)]
    message: String,
    author: Option<Signature>,
    committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    name: Option<String>,
    email: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Account {
    login: Option<String>,
    html_url: Option<String>,
    avatar_url: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    email: Option<String>,
}

impl RepositoryCommit {
    fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.commit.committer.as_ref()?.date
    }

    fn is_internal(&self) -> bool {
        let message = &self.commit.message;
        let email = self
            .committer
            .as_ref()
            .and_then(|c| c.email.as_deref())
            .or_else(|| self.commit.committer.as_ref().and_then(|c| c.email.as_deref()))
            .unwrap_or_default();
        message.starts_with("[int]")
            || message.contains("[skip ci]")
            || email.contains("[bot]")
            || email.starts_with("ci@")
    }

    /// The account that authored the commit, falling back to the signature.
    fn contributor(&self) -> Option<Contributor> {
        let signature = self.commit.author.as_ref().or(self.commit.committer.as_ref())?;
        let account = self.author.clone().unwrap_or_default();
        Some(Contributor {
            name: signature.name.clone(),
            email: signature.email.clone().or(account.email),
            login: account.login,
            html_url: account.html_url,
            avatar_url: account.avatar_url,
            kind: account.kind,
        })
    }
}

// ---------------------------------------------------------------------------
// Git info document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Contributor {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct GitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    lastmod: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    publishdate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<Contributor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    contributors: Vec<Contributor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weburl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shaalias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

impl GitInfo {
    /// Summarize a commit list; `None` when only internal commits remain.
    fn from_commits(mut commits: Vec<RepositoryCommit>) -> Option<Self> {
        commits.retain(|commit| !commit.is_internal());
        if commits.is_empty() {
            return None;
        }
        // Newest first.
        commits.sort_by(|a, b| b.committed_at().cmp(&a.committed_at()));

        let newest = commits.first()?;
        let oldest = commits.last()?;
        let format = |date: Option<DateTime<Utc>>| date.map(|d| d.format(DATE_FORMAT).to_string());

        let author = oldest.contributor();
        let mut info = GitInfo {
            lastmod: format(newest.committed_at()),
            publishdate: format(oldest.committed_at()),
            weburl: newest
                .html_url
                .split("/commit/")
                .next()
                .filter(|url| !url.is_empty())
                .map(str::to_string),
            ..GitInfo::default()
        };

        if commits.len() > 1 {
            let author_email = author.as_ref().and_then(|a| a.email.clone());
            let mut seen: Vec<String> = Vec::new();
            for contributor in commits.iter().filter_map(RepositoryCommit::contributor) {
                let Some(email) = contributor.email.clone() else {
                    continue;
                };
                let is_user = contributor.kind.as_deref().is_none_or(|kind| kind == "User");
                if is_user && Some(&email) != author_email.as_ref() && !seen.contains(&email) {
                    seen.push(email);
                    info.contributors.push(contributor);
                }
            }
        }
        info.author = author;
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn host_for(server: &MockServer) -> GitHubHost {
        let config = GitHubConfig {
            api_base: server.uri(),
            raw_base: server.uri(),
            ..GitHubConfig::default()
        };
        GitHubHost::with_client(&config, InstrumentedClient::new(&MetricsRegistry::new()).unwrap())
            .unwrap()
    }

    fn commit(sha: &str, message: &str, email: &str, date: &str) -> Value {
        json!({
            "sha": sha,
            "html_url": format!("https://github.com/org/repo/commit/{sha}"),
            "commit": {
                "message": message,
                "author": { "name": email.split('@').next(), "email": email, "date": date },
                "committer": { "name": "GitHub", "email": "noreply@github.com", "date": date }
            },
            "author": { "login": email.split('@').next(), "type": "User",
                        "html_url": format!("https://github.com/{}", email.split('@').next().unwrap_or_default()) },
            "committer": { "login": "web-flow", "type": "User" }
        })
    }

    #[tokio::test]
    async fn read_fetches_raw_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/org/repo/main/docs/intro.md"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# Intro"))
            .mount(&server)
            .await;

        let host = host_for(&server).await;
        let body = host
            .read("https://github.com/org/repo/blob/main/docs/intro.md")
            .await
            .unwrap();
        assert_eq!(body, b"# Intro");
    }

    #[tokio::test]
    async fn read_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let host = host_for(&server).await;
        let err = host
            .read("https://github.com/org/repo/blob/main/missing.md")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = host
            .read("https://github.com/org/repo/tree/main/docs")
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn git_info_skips_internal_commits() {
        let server = MockServer::start().await;
        let commits = json!([
            commit("c3", "[int] bump", "bot@example.com", "2024-03-01T10:00:00Z"),
            commit("c2", "Fix typo", "bob@example.com", "2024-02-01T09:30:00Z"),
            commit("c1", "Initial docs", "alice@example.com", "2024-01-01T08:00:00Z"),
            commit("c0", "Release [skip ci]", "alice@example.com", "2024-04-01T08:00:00Z"),
        ]);
        Mock::given(method("GET"))
            .and(path("/repos/org/repo/commits"))
            .and(query_param("path", "docs/intro.md"))
            .and(query_param("sha", "main"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-limit", "5000")
                    .insert_header("x-ratelimit-remaining", "4999")
                    .set_body_json(commits),
            )
            .mount(&server)
            .await;

        let host = host_for(&server).await;
        let bytes = host
            .read_git_info("https://github.com/org/repo/blob/main/docs/intro.md")
            .await
            .unwrap();
        let info: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(info["lastmod"], "2024-02-01 09:30:00");
        assert_eq!(info["publishdate"], "2024-01-01 08:00:00");
        assert_eq!(info["author"]["email"], "alice@example.com");
        assert_eq!(info["contributors"].as_array().unwrap().len(), 1);
        assert_eq!(info["contributors"][0]["email"], "bob@example.com");
        assert_eq!(info["weburl"], "https://github.com/org/repo");
        assert_eq!(info["shaalias"], "main");
        assert_eq!(info["path"], "docs/intro.md");

        assert_eq!(host.rate_limit().map(|r| r.remaining), Some(4999));
    }

    #[tokio::test]
    async fn git_info_query_encodes_the_file_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/org/repo/commits"))
            .and(query_param("path", "docs/a & b+c#1.md"))
            .and(query_param("sha", "release/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([commit(
                "c1",
                "Add page",
                "alice@example.com",
                "2024-01-01T08:00:00Z"
            )])))
            .mount(&server)
            .await;

        let host = host_for(&server).await;
        let bytes = host
            .read_git_info("https://github.com/org/repo/blob/release%2F1.0/docs/a%20%26%20b+c%231.md")
            .await
            .unwrap();
        let info: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(info["path"], "docs/a & b+c#1.md");
        assert_eq!(info["shaalias"], "release/1.0");
    }

    #[tokio::test]
    async fn git_info_is_empty_without_public_commits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/org/repo/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                commit("c1", "[int] sync", "alice@example.com", "2024-01-01T08:00:00Z")
            ])))
            .mount(&server)
            .await;

        let host = host_for(&server).await;
        let bytes = host
            .read_git_info("https://github.com/org/repo/blob/main/docs/intro.md")
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn node_selector_expands_repository_tree() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/org/repo/git/trees/main"))
            .and(query_param("recursive", "1"))
            .and(header("accept", "application/vnd.github+json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "abc",
                "truncated": false,
                "tree": [
                    { "path": "README.md", "type": "blob" },
                    { "path": "docs", "type": "tree" },
                    { "path": "docs/intro.md", "type": "blob" },
                    { "path": "docs/img/logo.png", "type": "blob" },
                    { "path": "docs/guide/setup.md", "type": "blob" }
                ]
            })))
            .mount(&server)
            .await;

        let host = host_for(&server).await;
        let mut node = Node {
            name: "docs".into(),
            node_selector: Some(docforge_shared::NodeSelector {
                path: "https://github.com/org/repo/tree/main/docs".into(),
                ..Default::default()
            }),
            ..Node::default()
        };
        host.resolve_node_selector(&mut node).await.unwrap();

        let names: Vec<&str> = node.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["guide", "intro.md"]);
        assert_eq!(
            node.nodes[0].nodes[0].sources,
            vec!["https://github.com/org/repo/blob/main/docs/guide/setup.md"]
        );
    }

    #[tokio::test]
    async fn link_arithmetic() {
        let server = MockServer::start().await;
        let host = host_for(&server).await;
        let source = "https://github.com/org/repo/blob/main/docs/intro.md";

        assert_eq!(
            host.build_abs_link(source, "./img/logo.png").unwrap(),
            "https://github.com/org/repo/blob/main/docs/img/logo.png"
        );
        assert_eq!(
            host.build_abs_link(source, "../api/").unwrap(),
            "https://github.com/org/repo/tree/main/api"
        );
        assert_eq!(
            host.set_version(source, "v2.0").unwrap(),
            "https://github.com/org/repo/blob/v2.0/docs/intro.md"
        );
        assert_eq!(host.name(source), "intro.md");

        let candidate = host.locality_candidate(source).unwrap();
        assert_eq!(candidate.key, "github.com/org/repo");
        assert_eq!(candidate.path, "org/repo/docs");
        assert_eq!(candidate.version, "main");

        assert!(host.accept(source));
        let raw = format!("{}/org/repo/main/a.md", server.uri());
        assert_eq!(
            host.set_version(&raw, "v1").unwrap(),
            "https://github.com/org/repo/blob/v1/a.md"
        );
        assert!(!host.accept("https://example.com/org/repo/blob/main/a.md"));
    }
}
