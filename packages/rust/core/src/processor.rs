//! Node content processing.
//!
//! [`ContentProcessor::process`] reads every source of a document node,
//! rewrites each link it finds and appends the result to an output buffer.
//! A link ends up in one of four states:
//!
//! - left alone: anchors, `mailto:` and other non-HTTP schemes, and links
//!   the source's host cannot resolve
//! - rewritten to the relative path of another node built from its target
//! - rewritten to the resources directory, with a download scheduled, when
//!   the target is an in-scope resource
//! - rewritten to its absolute URL, with a validation scheduled

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};
use url::Url;

use docforge_hosts::Registry;
use docforge_jobs::Submitter;
use docforge_markdown::Link;
use docforge_shared::urls::{has_scheme, strip_suffixes};
use docforge_shared::{DocforgeError, LocalityDomain, Node, ResourceUrl, Result};

use crate::reader::Reader;
use crate::tasks::{DownloadTask, ValidationTask};

// ---------------------------------------------------------------------------
// Source index
// ---------------------------------------------------------------------------

/// Output path of the node built from each source URL.
#[derive(Debug, Default, Clone)]
pub struct SourceIndex {
    targets: HashMap<String, String>,
}

impl SourceIndex {
    /// Index every document of a resolved structure. When several nodes
    /// share a source, the last one in document order wins.
    pub fn new(structure: &[Node]) -> Self {
        let mut targets = HashMap::new();
        for node in structure.iter().flat_map(Node::walk) {
            for source in &node.sources {
                targets.insert(normalize(source).to_string(), node.full_name());
            }
        }
        Self { targets }
    }

    /// Output path of the node built from `link`, ignoring query and fragment.
    pub fn get(&self, link: &str) -> Option<&str> {
        self.targets.get(normalize(link)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn normalize(link: &str) -> &str {
    strip_suffixes(link).trim_end_matches('/')
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Rewrites document links and schedules downloads and validations.
pub struct ContentProcessor {
    registry: Arc<Registry>,
    locality: LocalityDomain,
    resources_path: String,
    sources: SourceIndex,
    downloads: Submitter<DownloadTask>,
    validator: Option<Submitter<ValidationTask>>,
    /// Resource URL to its allocated file name.
    download_names: Mutex<HashMap<String, String>>,
}

impl ContentProcessor {
    pub fn new(
        registry: Arc<Registry>,
        sources: SourceIndex,
        downloads: Submitter<DownloadTask>,
    ) -> Self {
        Self {
            registry,
            locality: LocalityDomain::default(),
            resources_path: "__resources".to_string(),
            sources,
            downloads,
            validator: None,
            download_names: Mutex::new(HashMap::new()),
        }
    }

    /// Global locality domain; node-level domains merge over it.
    pub fn with_locality(mut self, locality: LocalityDomain) -> Self {
        self.locality = locality;
        self
    }

    /// Directory of downloaded resources, relative to the destination root
    /// or absolute when it starts with `/`.
    pub fn with_resources_path(mut self, path: impl Into<String>) -> Self {
        self.resources_path = path.into();
        self
    }

    pub fn with_validator(mut self, validator: Submitter<ValidationTask>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Build `node` into `out`. Missing sources are skipped with a warning;
    /// any other read failure fails the node.
    pub async fn process(&self, out: &mut Vec<u8>, reader: &impl Reader, node: &Node) -> Result<()> {
        let domain = self.domain_for(node);
        for source in &node.sources {
            let bytes = match reader.read(source).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => {
                    warn!(node = %node.full_name(), %source, "source not found, skipping");
                    continue;
                }
                Err(e) => return Err(DocforgeError::document(node.full_name(), e)),
            };
            if bytes.is_empty() {
                warn!(node = %node.full_name(), %source, "no content read from source");
                continue;
            }

            let content = String::from_utf8_lossy(&bytes);
            let rewritten = docforge_markdown::rewrite(&content, |link| {
                self.resolve_link(&domain, node, source, link)
            });
            if !out.is_empty() && !out.ends_with(b"\n") {
                out.push(b'\n');
            }
            out.extend_from_slice(rewritten.as_bytes());
        }
        Ok(())
    }

    fn domain_for(&self, node: &Node) -> Cow<'_, LocalityDomain> {
        match &node.locality_domain {
            Some(overrides) => Cow::Owned(self.locality.merged_with(overrides)),
            None => Cow::Borrowed(&self.locality),
        }
    }

    /// New destination for `link`, or `None` to keep it as written.
    fn resolve_link(
        &self,
        domain: &LocalityDomain,
        node: &Node,
        source: &str,
        link: &Link,
    ) -> Option<String> {
        let dest = link.destination.trim();
        if dest.is_empty() || dest.starts_with('#') {
            return None;
        }

        let absolute = if has_scheme(dest) {
            if !is_http(dest) {
                return None;
            }
            if let Some(substitute) = domain.substitute_link(dest) {
                return changed(source, dest, substitute.to_string());
            }
            if self.registry.get(dest).is_err() {
                self.validate(dest, dest, source);
                return None;
            }
            dest.to_string()
        } else {
            match self.registry.build_abs_link(source, dest) {
                Ok(absolute) => absolute,
                Err(e) => {
                    warn!(%source, link = dest, error = %e, "cannot resolve link, keeping it");
                    return None;
                }
            }
        };
        if let Some(substitute) = domain.substitute_link(&absolute) {
            return changed(source, dest, substitute.to_string());
        }

        // Sources keep their declared version, so look the link up before
        // the locality pins it.
        if let Some(relative) = self.node_link(node, &absolute) {
            return changed(source, dest, relative);
        }
        let (absolute, in_scope) = domain.match_path_in_locality(&absolute, self.registry.as_ref());
        if let Some(relative) = self.node_link(node, &absolute) {
            return changed(source, dest, relative);
        }
        let url = match ResourceUrl::parse(&absolute) {
            Ok(url) => url,
            Err(e) => {
                warn!(%source, link = dest, error = %e, "invalid absolute link, keeping it");
                return None;
            }
        };

        if in_scope && !url.extension.is_empty() && url.extension != "md" {
            let name = self.download_name(domain, &absolute, &url, source);
            return changed(source, dest, self.resource_link(node, &name));
        }

        self.validate(&absolute, dest, source);
        changed(source, dest, absolute)
    }

    /// Relative link from `node` to the node built from `absolute`, keeping
    /// the fragment.
    fn node_link(&self, node: &Node, absolute: &str) -> Option<String> {
        let target = self.sources.get(absolute)?;
        let fragment = absolute.find('#').map_or("", |idx| &absolute[idx..]);
        Some(format!("{}{fragment}", relative_path(&node.path, target)))
    }

    /// Allocate the file name of a resource once per URL, scheduling its
    /// download on first use.
    fn download_name(
        &self,
        domain: &LocalityDomain,
        absolute: &str,
        url: &ResourceUrl,
        referer: &str,
    ) -> String {
        let key = strip_suffixes(absolute).to_string();
        let name = {
            let mut names = lock(&self.download_names);
            if let Some(name) = names.get(&key) {
                return name.clone();
            }
            let name = domain.download_name(url);
            names.insert(key, name.clone());
            name
        };

        let task = DownloadTask {
            source: absolute.to_string(),
            target: name.clone(),
            referer: referer.to_string(),
        };
        if self.downloads.add_task(task) {
            debug!(url = %absolute, %name, "scheduled download");
        } else {
            warn!(url = %absolute, %name, "download queue closed, resource not scheduled");
        }
        name
    }

    /// Link from `node` to a file in the resources directory.
    fn resource_link(&self, node: &Node, name: &str) -> String {
        if self.resources_path.starts_with('/') {
            return format!("{}/{name}", self.resources_path.trim_end_matches('/'));
        }
        let depth = node.path.split('/').filter(|c| !c.is_empty()).count();
        format!(
            "{}{}/{name}",
            "../".repeat(depth),
            self.resources_path.trim_end_matches('/')
        )
    }

    fn validate(&self, absolute: &str, dest: &str, referer: &str) {
        let Some(validator) = &self.validator else {
            return;
        };
        match Url::parse(absolute) {
            Ok(url) => {
                let task = ValidationTask {
                    url,
                    destination: dest.to_string(),
                    referer: referer.to_string(),
                };
                if !validator.add_task(task) {
                    debug!(url = %absolute, "validator queue closed, link not checked");
                }
            }
            Err(e) => warn!(url = %absolute, %referer, error = %e, "cannot validate link"),
        }
    }
}

fn is_http(link: &str) -> bool {
    let lower = link.get(..8).unwrap_or(link).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn changed(source: &str, dest: &str, rewritten: String) -> Option<String> {
    if rewritten == dest {
        return None;
    }
    trace!(%source, from = dest, to = %rewritten, "rewrote link");
    Some(rewritten)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Path from the directory `from_dir` to the file `to`, both relative to
/// the output root. Same-directory and descendant targets start with `./`.
pub fn relative_path(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|c| !c.is_empty()).collect();
    let to: Vec<&str> = to.split('/').filter(|c| !c.is_empty()).collect();
    let to_dirs = &to[..to.len().saturating_sub(1)];

    let common = from
        .iter()
        .zip(to_dirs)
        .take_while(|(a, b)| a == b)
        .count();
    let ups = from.len() - common;

    let mut parts = if ups == 0 { vec!["."] } else { vec![".."; ups] };
    parts.extend(&to[common..]);
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Duration;

    use docforge_jobs::{JobQueue, WaitGroup, Worker, WorkerError};
    use docforge_shared::{GitHubConfig, MetricsRegistry};
    use tokio_util::sync::CancellationToken;

    use super::*;

    const REPO: &str = "https://github.com/org/repo";

    /// Collects every task it is handed.
    struct Recorder<T>(Arc<Mutex<Vec<T>>>);

    impl<T: Send + 'static> Worker<T> for Recorder<T> {
        async fn work(&self, _token: &CancellationToken, task: T) -> std::result::Result<(), WorkerError> {
            self.0.lock().unwrap().push(task);
            Ok(())
        }
    }

    fn recording_queue<T: Send + 'static>(
        name: &str,
        wg: &WaitGroup,
    ) -> (JobQueue<T, Recorder<T>>, Arc<Mutex<Vec<T>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = JobQueue::new(name, 2, false, Recorder(Arc::clone(&seen)), wg).unwrap();
        (queue, seen)
    }

    fn checkout() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("docs/guide")).unwrap();
        std::fs::create_dir_all(root.join("docs/img")).unwrap();
        std::fs::write(
            root.join("docs/intro.md"),
            "# Intro\n\
             See [setup](guide/setup.md#install), ![logo](img/logo.png) and ![again](./img/logo.png).\n\
             Also [site](https://example.com/page), [gone](missing.md), [top](#top) and [mail](mailto:a@b.c).\n\
             Unlisted [notes](guide/notes.md).\n\
             ```\n[code](guide/setup.md)\n```\n",
        )
        .unwrap();
        std::fs::write(root.join("docs/guide/setup.md"), "# Setup\nBack to [intro](../intro.md).\n").unwrap();
        std::fs::write(root.join("docs/guide/notes.md"), "# Notes\n").unwrap();
        std::fs::write(root.join("docs/img/logo.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();
        dir
    }

    fn registry(checkout: &Path) -> Arc<Registry> {
        let mut mappings = BTreeMap::new();
        mappings.insert(REPO.to_string(), checkout.to_path_buf());
        Arc::new(Registry::from_config(&GitHubConfig::default(), &mappings, &MetricsRegistry::new()).unwrap())
    }

    fn structure() -> Vec<Node> {
        let mut intro = Node::document("intro.md", format!("{REPO}/blob/main/docs/intro.md"));
        intro.path = String::new();
        let mut setup = Node::document("setup.md", format!("{REPO}/blob/main/docs/guide/setup.md"));
        setup.path = "guide".into();
        let mut guide = Node::container("guide", vec![setup]);
        guide.path = String::new();
        vec![intro, guide]
    }

    fn locality() -> LocalityDomain {
        let mut domain = LocalityDomain::default();
        domain.set("github.com/org/repo", "org/repo/docs", "main");
        domain
    }

    #[tokio::test]
    async fn classifies_every_kind_of_link() {
        let dir = checkout();
        let registry = registry(dir.path());
        let structure = structure();
        let wg = WaitGroup::new();
        let (downloads, downloaded) = recording_queue::<DownloadTask>("Download", &wg);
        let (validator, validated) = recording_queue::<ValidationTask>("Validator", &wg);

        let processor = ContentProcessor::new(
            Arc::clone(&registry),
            SourceIndex::new(&structure),
            downloads.submitter(),
        )
        .with_locality(locality())
        .with_validator(validator.submitter());

        let mut out = Vec::new();
        processor
            .process(&mut out, registry.as_ref(), &structure[0])
            .await
            .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("[setup](./guide/setup.md#install)"));
        assert!(out.contains("[site](https://example.com/page)"));
        assert!(out.contains("[gone](missing.md)"));
        assert!(out.contains("[top](#top)"));
        assert!(out.contains("[mail](mailto:a@b.c)"));
        assert!(out.contains(&format!("[notes]({REPO}/blob/main/docs/guide/notes.md)")));
        assert!(out.contains("[code](guide/setup.md)"));

        // Both image links share one download.
        let token = CancellationToken::new();
        downloads.start(&token);
        validator.start(&token);
        tokio::time::timeout(Duration::from_secs(2), wg.wait()).await.unwrap();

        let downloaded = downloaded.lock().unwrap().clone();
        assert_eq!(downloaded.len(), 1);
        assert_eq!(downloaded[0].source, format!("{REPO}/blob/main/docs/img/logo.png"));
        assert!(downloaded[0].target.ends_with(".png"));
        let resource = format!("__resources/{}", downloaded[0].target);
        assert_eq!(out.matches(&format!("]({resource})")).count(), 2);

        let mut checked: Vec<String> = validated
            .lock()
            .unwrap()
            .iter()
            .map(|task| task.url.to_string())
            .collect();
        checked.sort();
        assert_eq!(
            checked,
            vec![
                "https://example.com/page".to_string(),
                format!("{REPO}/blob/main/docs/guide/notes.md"),
            ]
        );
    }

    /// Process `structure[0]` and collect the scheduled tasks.
    async fn build_intro(
        structure: &[Node],
        domain: LocalityDomain,
    ) -> (String, Vec<DownloadTask>, Vec<String>) {
        let dir = checkout();
        let registry = registry(dir.path());
        let wg = WaitGroup::new();
        let (downloads, downloaded) = recording_queue::<DownloadTask>("Download", &wg);
        let (validator, validated) = recording_queue::<ValidationTask>("Validator", &wg);
        let processor = ContentProcessor::new(
            Arc::clone(&registry),
            SourceIndex::new(structure),
            downloads.submitter(),
        )
        .with_locality(domain)
        .with_validator(validator.submitter());

        let mut out = Vec::new();
        processor
            .process(&mut out, registry.as_ref(), &structure[0])
            .await
            .unwrap();

        let token = CancellationToken::new();
        downloads.start(&token);
        validator.start(&token);
        tokio::time::timeout(Duration::from_secs(2), wg.wait()).await.unwrap();

        let downloaded = downloaded.lock().unwrap().clone();
        let mut checked: Vec<String> = validated
            .lock()
            .unwrap()
            .iter()
            .map(|task| task.url.to_string())
            .collect();
        checked.sort();
        (String::from_utf8(out).unwrap(), downloaded, checked)
    }

    #[tokio::test]
    async fn pinned_versions_keep_node_links_relative() {
        let structure = structure();
        let mut domain = LocalityDomain::default();
        domain.set("github.com/org/repo", "org/repo/docs", "v2");

        let (out, downloaded, checked) = build_intro(&structure, domain).await;

        assert!(out.contains("[setup](./guide/setup.md#install)"), "{out}");
        assert!(out.contains(&format!("[notes]({REPO}/blob/v2/docs/guide/notes.md)")));
        assert_eq!(downloaded.len(), 1);
        assert_eq!(downloaded[0].source, format!("{REPO}/blob/v2/docs/img/logo.png"));
        assert_eq!(
            checked,
            vec![
                "https://example.com/page".to_string(),
                format!("{REPO}/blob/v2/docs/guide/notes.md"),
            ]
        );
    }

    #[tokio::test]
    async fn node_locality_merges_over_the_global_domain() {
        let mut structure = structure();
        let mut overrides = LocalityDomain::default();
        overrides.set("github.com/org/repo", "", "v3");
        if let Some(value) = overrides.mapping.get_mut("github.com/org/repo") {
            value.exclude.push(r"\.png$".to_string());
        }
        structure[0].locality_domain = Some(overrides);

        let (out, downloaded, checked) = build_intro(&structure, locality()).await;

        // Excluded resources are pinned to the node's version and only validated.
        assert!(downloaded.is_empty());
        let logo = format!("{REPO}/blob/v3/docs/img/logo.png");
        assert_eq!(out.matches(&format!("]({logo})")).count(), 2);
        assert!(checked.contains(&logo));
        assert!(out.contains("[setup](./guide/setup.md#install)"));
        assert!(out.contains(&format!("[notes]({REPO}/blob/v3/docs/guide/notes.md)")));
    }

    #[tokio::test]
    async fn nested_nodes_link_upwards() {
        let dir = checkout();
        let registry = registry(dir.path());
        let structure = structure();
        let wg = WaitGroup::new();
        let (downloads, _) = recording_queue::<DownloadTask>("Download", &wg);
        let processor = ContentProcessor::new(
            Arc::clone(&registry),
            SourceIndex::new(&structure),
            downloads.submitter(),
        );

        let setup = &structure[1].nodes[0];
        let mut out = Vec::new();
        processor.process(&mut out, registry.as_ref(), setup).await.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "# Setup\nBack to [intro](../intro.md).\n"
        );
    }

    #[tokio::test]
    async fn missing_sources_are_skipped() {
        let dir = checkout();
        let registry = registry(dir.path());
        let wg = WaitGroup::new();
        let (downloads, _) = recording_queue::<DownloadTask>("Download", &wg);
        let processor =
            ContentProcessor::new(Arc::clone(&registry), SourceIndex::default(), downloads.submitter());

        let node = Node {
            name: "merged.md".into(),
            sources: vec![
                format!("{REPO}/blob/main/docs/gone.md"),
                format!("{REPO}/blob/main/docs/guide/notes.md"),
            ],
            ..Node::default()
        };
        let mut out = Vec::new();
        processor.process(&mut out, registry.as_ref(), &node).await.unwrap();
        assert_eq!(out, b"# Notes\n");
    }

    #[tokio::test]
    async fn unsupported_sources_fail_the_node() {
        let dir = checkout();
        let registry = registry(dir.path());
        let wg = WaitGroup::new();
        let (downloads, _) = recording_queue::<DownloadTask>("Download", &wg);
        let processor =
            ContentProcessor::new(Arc::clone(&registry), SourceIndex::default(), downloads.submitter());

        let node = Node::document("x.md", "https://gitlab.com/org/repo/-/blob/main/x.md");
        let mut out = Vec::new();
        let err = processor
            .process(&mut out, registry.as_ref(), &node)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to process document x.md"));
    }

    #[test]
    fn link_substitutes_win() {
        let dir = checkout();
        let registry = registry(dir.path());
        let wg = WaitGroup::new();
        let (downloads, _) = recording_queue::<DownloadTask>("Download", &wg);
        let processor =
            ContentProcessor::new(Arc::clone(&registry), SourceIndex::default(), downloads.submitter());

        let mut domain = locality();
        domain.link_substitutes.insert(
            format!("{REPO}/blob/main/docs/guide/notes.md"),
            "https://docs.example.com/notes".into(),
        );
        let source = format!("{REPO}/blob/main/docs/intro.md");
        let link = docforge_markdown::parse_links("[n](guide/notes.md)").remove(0);

        assert_eq!(
            processor.resolve_link(&domain, &Node::default(), &source, &link),
            Some("https://docs.example.com/notes".to_string())
        );
    }

    #[test]
    fn resource_links_climb_to_the_root() {
        let dir = checkout();
        let registry = registry(dir.path());
        let wg = WaitGroup::new();
        let (downloads, _) = recording_queue::<DownloadTask>("Download", &wg);
        let processor = ContentProcessor::new(registry, SourceIndex::default(), downloads.submitter());

        let mut node = Node::document("a.md", "x");
        node.path = "one/two".into();
        assert_eq!(processor.resource_link(&node, "f.png"), "../../__resources/f.png");

        let processor = processor.with_resources_path("/assets/");
        assert_eq!(processor.resource_link(&node, "f.png"), "/assets/f.png");
    }

    #[test]
    fn relative_paths_between_nodes() {
        assert_eq!(relative_path("", "intro.md"), "./intro.md");
        assert_eq!(relative_path("guide", "guide/setup.md"), "./setup.md");
        assert_eq!(relative_path("guide", "intro.md"), "../intro.md");
        assert_eq!(relative_path("a/b", "a/c/d.md"), "../c/d.md");
        assert_eq!(relative_path("", "a/b/c.md"), "./a/b/c.md");
    }

    #[test]
    fn source_index_prefers_the_last_node() {
        let mut first = Node::document("a.md", "https://github.com/o/r/blob/main/a.md");
        first.path = "one".into();
        let mut second = Node::document("b.md", "https://github.com/o/r/blob/main/a.md");
        second.path = "two".into();
        let index = SourceIndex::new(&[first, second]);

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("https://github.com/o/r/blob/main/a.md#frag"), Some("two/b.md"));
    }
}
