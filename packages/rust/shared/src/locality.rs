//! Locality domain: which referenced resources are local to the build.
//!
//! A link is *in scope* when its repository is a key of the domain and its
//! path falls under the key's path prefix. In-scope assets are downloaded and
//! rewritten; everything else stays an external, version-pinned link.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::urls::ResourceUrl;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Scope entry for one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityDomainValue {
    /// Branch, tag or commit that local links are pinned to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Path prefix (`owner/repo/dir`) of in-scope resources.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Regexes that force a link into scope. Wins over `exclude`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Regexes that push a link out of scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// Scoping policy keyed by repository (`github.com/org/repo`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityDomain {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mapping: BTreeMap<String, LocalityDomainValue>,

    /// Regex on the resource path mapped to a file name template using
    /// `$name`, `$uuid`, `$path` and `$ext`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub download_substitutes: BTreeMap<String, String>,

    /// Absolute link mapped to the literal replacement emitted in documents.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub link_substitutes: BTreeMap<String, String>,
}

/// Coordinates of a link inside a locality domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalityCandidate {
    pub key: String,
    pub path: String,
    pub version: String,
}

/// What the locality domain needs from the repository hosts.
pub trait LocalityResolver {
    /// Decompose a link; `None` when no host understands it.
    fn locality_candidate(&self, link: &str) -> Option<LocalityCandidate>;

    /// Rewrite the version component of a link.
    fn set_version(&self, link: &str, version: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl LocalityDomain {
    pub fn get(&self, key: &str) -> Option<&LocalityDomainValue> {
        self.mapping.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Record `path` under `key`, keeping the longest common `/`-component
    /// prefix with whatever was stored before. The first version wins.
    pub fn set(&mut self, key: &str, path: &str, version: &str) {
        match self.mapping.get_mut(key) {
            Some(value) => value.path = common_path_prefix(&value.path, path),
            None => {
                self.mapping.insert(
                    key.to_string(),
                    LocalityDomainValue {
                        version: version.to_string(),
                        path: path.to_string(),
                        ..LocalityDomainValue::default()
                    },
                );
            }
        }
    }

    /// Overlay `overrides` on this domain. Non-empty scalar fields replace,
    /// lists concatenate and substitute maps union with `overrides` winning.
    pub fn merged_with(&self, overrides: &LocalityDomain) -> LocalityDomain {
        let mut merged = self.clone();
        for (key, value) in &overrides.mapping {
            match merged.mapping.get_mut(key) {
                Some(base) => {
                    if !value.version.is_empty() {
                        base.version = value.version.clone();
                    }
                    if !value.path.is_empty() {
                        base.path = value.path.clone();
                    }
                    base.include.extend(value.include.iter().cloned());
                    base.exclude.extend(value.exclude.iter().cloned());
                }
                None => {
                    merged.mapping.insert(key.clone(), value.clone());
                }
            }
        }
        merged.download_substitutes.extend(
            overrides
                .download_substitutes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged.link_substitutes.extend(
            overrides
                .link_substitutes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged
    }

    /// Decide whether `link` is local, returning the (possibly version
    /// rewritten) link together with the verdict.
    pub fn match_path_in_locality(
        &self,
        link: &str,
        hosts: &impl LocalityResolver,
    ) -> (String, bool) {
        let Some(candidate) = hosts.locality_candidate(link) else {
            return (link.to_string(), false);
        };
        let Some(value) = self.mapping.get(&candidate.key) else {
            return (link.to_string(), false);
        };

        let mut excluded = value.exclude.iter().any(|rx| matches(rx, link));
        if excluded && value.include.iter().any(|rx| matches(rx, link)) {
            excluded = false;
        }

        if excluded {
            return (with_version(hosts, link, &value.version), false);
        }

        if candidate.path.starts_with(&value.path) {
            return match hosts.set_version(link, &value.version) {
                Ok(rewritten) => (rewritten, true),
                Err(e) => {
                    warn!(link, error = %e, "cannot pin link version");
                    (link.to_string(), false)
                }
            };
        }

        let repo_prefix = value
            .path
            .rsplit_once('/')
            .map(|(head, _)| head)
            .unwrap_or("");
        if candidate.path.starts_with(repo_prefix) {
            return (with_version(hosts, link, &value.version), false);
        }

        (link.to_string(), false)
    }

    /// Allocate a fresh file name for a downloaded resource.
    ///
    /// Every call draws a new UUID; callers that need a stable name per URL
    /// must cache the result.
    pub fn download_name(&self, url: &ResourceUrl) -> String {
        let id = Uuid::now_v7().to_string();
        let key = url.path_key();

        for (pattern, template) in &self.download_substitutes {
            if matches(pattern, key) {
                return template
                    .replace("$name", &url.resource_name)
                    .replace("$uuid", &id)
                    .replace("$path", &url.resource_path)
                    .replace("$ext", &url.extension);
            }
        }

        if url.extension.is_empty() {
            id
        } else {
            format!("{id}.{}", url.extension)
        }
    }

    /// Literal replacement configured for an absolute link.
    pub fn substitute_link(&self, link: &str) -> Option<&str> {
        self.link_substitutes.get(link).map(String::as_str)
    }
}

fn with_version(hosts: &impl LocalityResolver, link: &str, version: &str) -> String {
    hosts.set_version(link, version).unwrap_or_else(|e| {
        warn!(link, error = %e, "cannot pin link version");
        link.to_string()
    })
}

fn matches(pattern: &str, haystack: &str) -> bool {
    match Regex::new(pattern) {
        Ok(rx) => rx.is_match(haystack),
        Err(e) => {
            warn!(pattern, error = %e, "invalid locality pattern");
            false
        }
    }
}

/// Longest common prefix of two paths, compared component-wise on `/`.
pub fn common_path_prefix(a: &str, b: &str) -> String {
    a.split('/')
        .zip(b.split('/'))
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect::<Vec<_>>()
        .join("/")
}
