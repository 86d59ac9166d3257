//! Filesystem writer.

use std::path::{Path, PathBuf};

use tracing::debug;

use docforge_shared::{DocforgeError, Node, Result};

use crate::Writer;

/// Writes blobs to `root/<path>/<name>[.ext]`, creating directories as
/// needed. Empty payloads are skipped.
#[derive(Debug, Clone)]
pub struct FsWriter {
    root: PathBuf,
    ext: Option<String>,
}

impl FsWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ext: None,
        }
    }

    /// Append `.ext` to every written name.
    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Writer for FsWriter {
    async fn write(&self, name: &str, path: &str, bytes: &[u8], _node: Option<&Node>) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let dir = self.root.join(path);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DocforgeError::io(&dir, e))?;

        let file_path = dir.join(crate::file_name(name, self.ext.as_deref()));
        tokio::fs::write(&file_path, bytes)
            .await
            .map_err(|e| DocforgeError::write(&file_path, e))?;

        debug!(path = %file_path.display(), size = bytes.len(), "wrote file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_into_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = FsWriter::new(tmp.path());

        writer
            .write("intro.md", "guide/basics", b"# Intro", None)
            .await
            .unwrap();

        let content = std::fs::read_to_string(tmp.path().join("guide/basics/intro.md")).unwrap();
        assert_eq!(content, "# Intro");
    }

    #[tokio::test]
    async fn appends_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = FsWriter::new(tmp.path()).with_extension("json");

        writer.write("intro.md", "", b"{}", None).await.unwrap();

        assert!(tmp.path().join("intro.md.json").is_file());
    }

    #[tokio::test]
    async fn skips_empty_payloads() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = FsWriter::new(tmp.path().join("out"));

        writer.write("empty.md", "a", b"", None).await.unwrap();

        assert!(!tmp.path().join("out").exists());
    }

    #[tokio::test]
    async fn write_failures_name_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("taken.md")).unwrap();
        let writer = FsWriter::new(tmp.path());

        let err = writer.write("taken.md", "", b"x", None).await.unwrap_err();

        assert!(
            err.to_string()
                .starts_with(&format!("error writing {}", tmp.path().join("taken.md").display()))
        );
    }
}
