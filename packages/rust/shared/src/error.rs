//! Error types for docforge.
//!
//! Library crates use [`DocforgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docforge operations.
#[derive(Debug, thiserror::Error)]
pub enum DocforgeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The manifest could not be expanded into a node tree.
    #[error("failed to resolve manifest: {message}")]
    Resolution { message: String },

    /// A repository host reported that a resource does not exist.
    #[error("resource not found: {url}")]
    NotFound { url: String },

    /// Network/HTTP error while reading or downloading.
    #[error("transport error: {0}")]
    Transport(String),

    /// No registered repository host accepts the URL.
    #[error("no suitable repository host for {url}")]
    UnsupportedHost { url: String },

    /// URL, manifest or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (invalid structure, name collisions, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An output file could not be written.
    #[error("error writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A document node failed to build.
    #[error("failed to process document {node}: {source}")]
    Document {
        node: String,
        source: Box<DocforgeError>,
    },

    /// A metrics collector could not be created, registered or encoded.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The surrounding build was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocforgeError>;

impl DocforgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a resolution error from any displayable message.
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution {
            message: msg.into(),
        }
    }

    /// Create a not-found error for a resource URL.
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a failed output write.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Attribute an error to the document node that produced it.
    pub fn document(node: impl Into<String>, source: DocforgeError) -> Self {
        Self::Document {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Whether the error means the resource is absent (as opposed to unreachable).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Document { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocforgeError::config("document workers must be positive");
        assert_eq!(
            err.to_string(),
            "config error: document workers must be positive"
        );

        let err = DocforgeError::resolution("document structure is empty");
        assert_eq!(
            err.to_string(),
            "failed to resolve manifest: document structure is empty"
        );

        let err = DocforgeError::UnsupportedHost {
            url: "ftp://example.com/a".into(),
        };
        assert!(err.to_string().contains("no suitable repository host"));
    }

    #[test]
    fn document_error_names_the_node() {
        let err = DocforgeError::document("docs/intro.md", DocforgeError::Transport("HTTP 500".into()));
        assert_eq!(
            err.to_string(),
            "failed to process document docs/intro.md: transport error: HTTP 500"
        );
        assert!(!err.is_not_found());

        let err = DocforgeError::document("a.md", DocforgeError::not_found("https://x/a.md"));
        assert!(err.is_not_found());
    }
}
