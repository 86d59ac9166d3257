//! Documentation tree types: nodes, node selectors and the manifest.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DocforgeError, Result};
use crate::locality::LocalityDomain;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A vertex in the documentation tree.
///
/// A node with sources is a document node; a node with only children is a
/// container. Child nodes are owned by value, so the tree never shares
/// subtrees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// File or directory name in the output tree.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Content selectors, concatenated in order.
    #[serde(
        default,
        alias = "source",
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,

    /// Directory reference expanded into child nodes during resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<NodeSelector>,

    /// Overrides merged over the manifest's locality domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality_domain: Option<LocalityDomain>,

    /// Output directory of this node, assigned from the parent chain.
    #[serde(skip)]
    pub path: String,
}

impl Node {
    /// A document node with a single source.
    pub fn document(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: vec![source.into()],
            ..Self::default()
        }
    }

    /// A container node.
    pub fn container(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            nodes,
            ..Self::default()
        }
    }

    pub fn is_document(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Output path of the node itself: `path/name`.
    pub fn full_name(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// Depth-first iterator over this node and its descendants.
    pub fn walk(&self) -> impl Iterator<Item = &Node> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.nodes.iter().rev());
            Some(node)
        })
    }
}

/// Accept either a single source string or a list of them.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(source) => vec![source],
        OneOrMany::Many(sources) => sources,
    })
}

/// A directory reference expanded into child nodes by a repository host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    /// Directory URL.
    pub path: String,

    /// Maximum depth below `path`; 0 means unlimited.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub depth: usize,

    /// Regular expressions on paths relative to `path`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_paths: Vec<String>,
}

fn is_zero(depth: &usize) -> bool {
    *depth == 0
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The documentation manifest: node tree plus global settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structure: Vec<Node>,

    /// Expanded into top-level nodes during resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<NodeSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality_domain: Option<LocalityDomain>,
}

impl Manifest {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| DocforgeError::parse(format!("invalid manifest: {e}")))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| DocforgeError::parse(format!("cannot serialize manifest: {e}")))
    }

    /// Every node of the structure, depth first.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.structure.iter().flat_map(Node::walk)
    }
}
