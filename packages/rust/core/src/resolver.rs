//! Manifest resolution.
//!
//! Turns a parsed manifest into the tree the build works on: node names are
//! evaluated, node selectors are expanded into child nodes, Hugo section
//! files are picked and every node gets its output path.

use futures::future::BoxFuture;
use tracing::{debug, instrument};
use uuid::Uuid;

use docforge_hosts::Registry;
use docforge_shared::urls::split_extension;
use docforge_shared::{
    DocforgeError, LocalityDomain, LocalityResolver, Manifest, Node, Options, Result,
};

/// Name given to Hugo section files.
pub const SECTION_FILE: &str = "_index.md";

/// Resolve `manifest` in place and return the effective global locality
/// domain: the declared one, or one derived from every document source
/// when the manifest declares none.
#[instrument(skip_all)]
pub async fn resolve_manifest(
    manifest: &mut Manifest,
    registry: &Registry,
    options: &Options,
) -> Result<LocalityDomain> {
    let mut root = Node {
        nodes: std::mem::take(&mut manifest.structure),
        node_selector: manifest.node_selector.take(),
        ..Node::default()
    };
    resolve_names(&mut root.nodes, registry)?;

    let mut visited: Vec<String> = options
        .manifest_path
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    if let Some(selector) = root.node_selector.clone() {
        registry
            .resolve_node_selector(&mut root)
            .await
            .map_err(|e| DocforgeError::resolution(format!("node selector {}: {e}", selector.path)))?;
        root.node_selector = None;
    }
    if root.nodes.is_empty() {
        return Err(DocforgeError::resolution("document structure is empty"));
    }
    resolve_structure(&mut root.nodes, registry, &mut visited).await?;

    if let Some(hugo) = options.hugo.as_ref().filter(|hugo| hugo.enabled) {
        resolve_section_files(&mut root, &hugo.index_file_names);
    }
    assign_paths(&mut root.nodes, "");
    manifest.structure = root.nodes;

    let locality = match &manifest.locality_domain {
        Some(declared) if !declared.is_empty() => declared.clone(),
        declared => {
            let mut derived = implicit_locality(&manifest.structure, registry);
            if let Some(declared) = declared {
                derived.download_substitutes = declared.download_substitutes.clone();
                derived.link_substitutes = declared.link_substitutes.clone();
            }
            derived
        }
    };
    debug!(
        documents = manifest.nodes().filter(|n| n.is_document()).count(),
        locality_keys = locality.mapping.len(),
        "manifest resolved"
    );
    Ok(locality)
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// Evaluate `$name`, `$uuid` and `$ext` in document names and give
/// extensionless names `.md`.
fn resolve_names(nodes: &mut [Node], registry: &Registry) -> Result<()> {
    for node in nodes {
        if !node.is_document() {
            resolve_names(&mut node.nodes, registry)?;
            continue;
        }

        let mut name = if node.name.is_empty() {
            "$name".to_string()
        } else {
            node.name.clone()
        };
        if name.contains('$') {
            let source = &node.sources[0];
            let file_name = registry
                .get(source)
                .map_err(|e| DocforgeError::resolution(e.to_string()))?
                .name(source);
            let (stem, ext) = split_extension(&file_name);
            if !ext.is_empty() && !name.contains("$ext") {
                name.push_str("$ext");
            }
            let ext = if ext.is_empty() { String::new() } else { format!(".{ext}") };
            name = name
                .replace("$name", stem)
                .replace("$uuid", &Uuid::now_v7().to_string())
                .replace("$ext", &ext);
        }
        if split_extension(&name).1.is_empty() {
            name.push_str(".md");
        }
        node.name = name;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Node selectors
// ---------------------------------------------------------------------------

/// Expand node selectors depth first. `visited` holds every selector path
/// expanded so far; meeting one again is a cycle.
fn resolve_structure<'a>(
    nodes: &'a mut [Node],
    registry: &'a Registry,
    visited: &'a mut Vec<String>,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        for node in nodes.iter_mut() {
            if let Some(path) = node.node_selector.as_ref().map(|s| s.path.clone()) {
                if visited.contains(&path) {
                    return Err(DocforgeError::resolution(format!(
                        "circular dependency discovered: {}",
                        cycle(visited, &path)
                    )));
                }
                visited.push(path.clone());
                registry.resolve_node_selector(node).await.map_err(|e| {
                    DocforgeError::resolution(format!("node {} selector {path}: {e}", node.name))
                })?;
                node.node_selector = None;
            }
            resolve_structure(&mut node.nodes, registry, visited).await?;
        }
        Ok(())
    })
}

/// `a -> b -> a` from the first visit of `path` onwards.
fn cycle(visited: &[String], path: &str) -> String {
    let start = visited.iter().position(|v| v == path).unwrap_or(0);
    let mut chain: Vec<&str> = visited[start..].iter().map(String::as_str).collect();
    chain.push(path);
    chain.join(" -> ")
}

// ---------------------------------------------------------------------------
// Hugo section files
// ---------------------------------------------------------------------------

/// In every container without a section file, rename the first document
/// matching `index_file_names` (in priority order, case-insensitive).
fn resolve_section_files(container: &mut Node, index_file_names: &[String]) {
    let has_section = container
        .nodes
        .iter()
        .any(|n| n.is_document() && n.name == SECTION_FILE);
    if !has_section {
        let promoted = index_file_names.iter().find_map(|index_name| {
            container
                .nodes
                .iter()
                .position(|n| n.is_document() && n.name.eq_ignore_ascii_case(index_name))
        });
        if let Some(idx) = promoted {
            let node = &mut container.nodes[idx];
            debug!(from = %node.name, "promoting section file");
            node.name = SECTION_FILE.to_string();
        }
    }
    for child in container.nodes.iter_mut().filter(|n| !n.is_document()) {
        resolve_section_files(child, index_file_names);
    }
}

// ---------------------------------------------------------------------------
// Paths and locality
// ---------------------------------------------------------------------------

fn assign_paths(nodes: &mut [Node], parent: &str) {
    for node in nodes {
        node.path = parent.to_string();
        if !node.nodes.is_empty() {
            let child_path = node.full_name();
            assign_paths(&mut node.nodes, &child_path);
        }
    }
}

fn implicit_locality(structure: &[Node], registry: &Registry) -> LocalityDomain {
    let mut domain = LocalityDomain::default();
    for node in structure.iter().flat_map(Node::walk) {
        for source in &node.sources {
            if let Some(candidate) = registry.locality_candidate(source) {
                domain.set(&candidate.key, &candidate.path, &candidate.version);
            }
        }
    }
    domain
}

// ---------------------------------------------------------------------------
// Collisions
// ---------------------------------------------------------------------------

/// Fail when siblings share a name, listing every offending container.
pub fn check_collisions(structure: &[Node]) -> Result<()> {
    let mut report = Vec::new();
    collect_collisions(structure, None, &mut report);
    if report.is_empty() {
        return Ok(());
    }

    let mut message = String::from("Node collisions detected.");
    for (container, names) in report {
        message.push_str(&format!("\nIn {container} container node."));
        for (name, sources) in names {
            message.push_str(&format!(
                " Node with name {name} appears {} times for sources: {}.",
                sources.len(),
                sources.join(", ")
            ));
        }
    }
    Err(DocforgeError::validation(message))
}

type Collision = (String, Vec<(String, Vec<String>)>);

fn collect_collisions(nodes: &[Node], parent: Option<&str>, report: &mut Vec<Collision>) {
    let mut duplicated: Vec<&str> = Vec::new();
    for (idx, node) in nodes.iter().enumerate() {
        let seen_before = nodes[..idx].iter().any(|n| n.name == node.name);
        if seen_before && !duplicated.contains(&node.name.as_str()) {
            duplicated.push(&node.name);
        }
    }
    if !duplicated.is_empty() {
        let names = duplicated
            .into_iter()
            .map(|name| {
                let sources = nodes
                    .iter()
                    .filter(|n| n.name == name)
                    .map(|n| n.sources.join(", "))
                    .collect();
                (name.to_string(), sources)
            })
            .collect();
        report.push((parent.unwrap_or("root").to_string(), names));
    }

    for node in nodes.iter().filter(|n| !n.nodes.is_empty()) {
        let chain = match parent {
            Some(parent) => format!("{parent}.{}", node.name),
            None => node.name.clone(),
        };
        collect_collisions(&node.nodes, Some(&chain), report);
    }
}
