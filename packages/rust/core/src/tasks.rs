//! Tasks passed between the build's job queues.

use std::sync::Arc;

use url::Url;

use docforge_shared::Node;

/// Build one document node.
#[derive(Debug, Clone)]
pub struct DocumentTask {
    pub node: Arc<Node>,
}

/// Fetch a linked resource and store it under the resources root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Absolute URL of the resource.
    pub source: String,
    /// File name under the resources root.
    pub target: String,
    /// Source URL of the document linking to it.
    pub referer: String,
}

/// Check that an external link is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTask {
    pub url: Url,
    /// The link as written in the document.
    pub destination: String,
    pub referer: String,
}

/// Fetch commit metadata for a built document.
#[derive(Debug, Clone)]
pub struct GitInfoTask {
    pub node: Arc<Node>,
}
