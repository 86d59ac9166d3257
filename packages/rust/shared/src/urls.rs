//! Decomposition of resource URLs into path, name and extension.

use url::Url;

use crate::error::{DocforgeError, Result};

/// A parsed resource URL.
///
/// For `https://github.com/org/repo/blob/main/docs/img/logo.png`:
/// `resource_path` is `/org/repo/blob/main/docs/img`, `resource_name` is `logo`
/// and `extension` is `png`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUrl {
    pub url: Url,
    pub resource_path: String,
    pub resource_name: String,
    pub extension: String,
}

impl ResourceUrl {
    /// Parse an absolute URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let url =
            Url::parse(raw).map_err(|e| DocforgeError::parse(format!("invalid URL {raw}: {e}")))?;
        Ok(Self::from_url(url))
    }

    pub fn from_url(url: Url) -> Self {
        let path = url.path().trim_end_matches('/');
        let (resource_path, last) = match path.rfind('/') {
            Some(idx) => (&path[..idx], &path[idx + 1..]),
            None => ("", path),
        };
        let (resource_name, extension) = split_extension(last);

        Self {
            resource_path: resource_path.to_string(),
            resource_name: resource_name.to_string(),
            extension: extension.to_string(),
            url,
        }
    }

    /// The URL path without its leading `/`.
    pub fn path_key(&self) -> &str {
        self.url.path().trim_start_matches('/')
    }
}

/// Split `name.ext` into its stem and extension (without the dot).
///
/// Leading dots do not start an extension, so `.gitignore` has none.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx + 1..]),
        _ => (file_name, ""),
    }
}

/// Whether a link carries a URL scheme (`https:`, `file:`, `mailto:` ...).
pub fn has_scheme(link: &str) -> bool {
    match link.find(':') {
        Some(idx) => {
            let scheme = &link[..idx];
            // Windows drive letters are paths, not schemes.
            scheme.len() > 1
                && scheme
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Strip the query and fragment from a link.
pub fn strip_suffixes(link: &str) -> &str {
    let end = link.find(['?', '#']).unwrap_or(link.len());
    &link[..end]
}
