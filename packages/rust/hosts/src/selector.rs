//! Turning a host's file listing into child nodes of a selector node.

use regex::Regex;

use docforge_shared::{DocforgeError, Node, NodeSelector, Result};

/// A markdown file found under a selector directory.
#[derive(Debug, Clone)]
pub(crate) struct SelectedFile {
    /// Path relative to the selector directory.
    pub relative: String,
    /// Source URL of the file.
    pub source: String,
}

/// Add `files` below `node`, one container per directory. Files deeper than
/// `selector.depth` (when non-zero) or matching an exclude pattern are
/// skipped, so no empty container is ever created.
pub(crate) fn attach(node: &mut Node, selector: &NodeSelector, mut files: Vec<SelectedFile>) -> Result<()> {
    let excludes = selector
        .exclude_paths
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                DocforgeError::parse(format!("invalid exclude path {pattern}: {e}"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    for file in files {
        let components: Vec<&str> = file.relative.split('/').filter(|c| !c.is_empty()).collect();
        let Some((file_name, dirs)) = components.split_last() else {
            continue;
        };
        if selector.depth > 0 && components.len() > selector.depth {
            continue;
        }
        if excludes.iter().any(|rx| rx.is_match(&file.relative)) {
            continue;
        }

        let mut parent = &mut *node;
        for dir in dirs {
            let idx = match parent
                .nodes
                .iter()
                .position(|child| !child.is_document() && child.name == *dir)
            {
                Some(idx) => idx,
                None => {
                    parent.nodes.push(Node::container(*dir, Vec::new()));
                    parent.nodes.len() - 1
                }
            };
            parent = &mut parent.nodes[idx];
        }
        parent.nodes.push(Node::document(*file_name, file.source));
    }
    Ok(())
}
