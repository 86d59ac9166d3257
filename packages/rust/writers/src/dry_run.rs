//! Dry-run writers: record planned files and print them as a tree.

use std::collections::BTreeSet;
use std::io::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use docforge_shared::{Node, Result};

use crate::Writer;

type Planned = Arc<Mutex<Vec<String>>>;

/// Factory for dry-run writers sharing one record of planned files.
#[derive(Debug, Clone)]
pub struct DryRunWriters {
    files: Planned,
    started: Instant,
}

impl Default for DryRunWriters {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunWriters {
    pub fn new() -> Self {
        Self {
            files: Arc::default(),
            started: Instant::now(),
        }
    }

    /// A writer recording files under `root`.
    pub fn writer(&self, root: impl Into<String>) -> DryRunWriter {
        DryRunWriter {
            root: root.into(),
            ext: None,
            files: Arc::clone(&self.files),
        }
    }

    /// Planned file paths, sorted.
    pub fn files(&self) -> Vec<String> {
        let mut files = lock(&self.files).clone();
        files.sort();
        files
    }

    /// Print the planned tree and elapsed time to stdout.
    pub fn flush(&self) -> io::Result<()> {
        let stdout = io::stdout();
        self.flush_to(&mut stdout.lock())
    }

    pub fn flush_to(&self, out: &mut impl io::Write) -> io::Result<()> {
        let mut rendered = render_tree(&self.files());
        rendered.push_str(&format!(
            "\nBuild finished in {:.3} seconds\n",
            self.started.elapsed().as_secs_f64()
        ));
        out.write_all(rendered.as_bytes())?;
        out.flush()
    }
}

/// Records `root/path/name[.ext]` for every write [`FsWriter`] would make.
///
/// [`FsWriter`]: crate::FsWriter
#[derive(Debug, Clone)]
pub struct DryRunWriter {
    root: String,
    ext: Option<String>,
    files: Planned,
}

impl DryRunWriter {
    /// Append `.ext` to every recorded name.
    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }
}

impl Writer for DryRunWriter {
    async fn write(&self, name: &str, path: &str, bytes: &[u8], _node: Option<&Node>) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let name = crate::file_name(name, self.ext.as_deref());
        let planned = clean_path(&[&self.root, path, &name]);
        lock(&self.files).push(planned);
        Ok(())
    }
}

fn lock(files: &Planned) -> MutexGuard<'_, Vec<String>> {
    files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Join parts with `/`, dropping empty and `.` components.
fn clean_path(parts: &[&str]) -> String {
    let mut components: Vec<&str> = Vec::new();
    for part in parts {
        for component in part.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                other => components.push(other),
            }
        }
    }
    components.join("/")
}

/// One line per distinct directory or file, indented two spaces per level.
fn render_tree(files: &[String]) -> String {
    let mut seen = BTreeSet::new();
    let mut out = String::new();
    for file in files {
        let components: Vec<&str> = file.split('/').collect();
        for depth in 0..components.len() {
            let prefix = components[..=depth].join("/");
            if seen.insert(prefix) {
                out.push_str(&"  ".repeat(depth));
                out.push_str(components[depth]);
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_files_from_every_writer() {
        let writers = DryRunWriters::new();
        let docs = writers.writer("site");
        let resources = writers.writer("site/__resources");
        let node = Node::document("setup.md", "https://github.com/org/repo/blob/main/setup.md");

        docs.write("setup.md", "./guide/", b"# Setup", Some(&node)).await.unwrap();
        resources.write("logo.png", "", b"png", None).await.unwrap();

        assert_eq!(
            writers.files(),
            vec!["site/__resources/logo.png", "site/guide/setup.md"]
        );
    }

    #[tokio::test]
    async fn names_match_the_filesystem_writer() {
        let writers = DryRunWriters::new();
        let docs = writers.writer("site");
        let git_info = writers.writer("info").with_extension("json");
        let node = Node::document("changelog.txt", "https://github.com/org/repo/blob/main/CHANGELOG");

        docs.write("changelog.txt", "", b"notes", Some(&node)).await.unwrap();
        docs.write("empty.md", "", b"", Some(&node)).await.unwrap();
        git_info.write("intro.md", "guide", b"{}", Some(&node)).await.unwrap();

        assert_eq!(
            writers.files(),
            vec!["info/guide/intro.md.json", "site/changelog.txt"]
        );
    }

    #[tokio::test]
    async fn flush_prints_indented_tree() {
        let writers = DryRunWriters::new();
        let docs = writers.writer("out");
        docs.write("b.md", "x", b"b", None).await.unwrap();
        docs.write("a.md", "x", b"a", None).await.unwrap();
        docs.write("c.md", "", b"c", None).await.unwrap();

        let mut buf = Vec::new();
        writers.flush_to(&mut buf).unwrap();
        let printed = String::from_utf8(buf).unwrap();

        assert!(printed.starts_with("out\n  c.md\n  x\n    a.md\n    b.md\n"));
        assert!(printed.contains("\nBuild finished in "));
        assert!(printed.ends_with(" seconds\n"));
    }

    #[test]
    fn clean_path_normalises_components() {
        assert_eq!(clean_path(&["./out/", "a/../b", "c.md"]), "out/b/c.md");
        assert_eq!(clean_path(&["", "", "c.md"]), "c.md");
    }
}
