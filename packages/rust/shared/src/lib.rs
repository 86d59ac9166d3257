//! Shared types, error model, and configuration for docforge.
//!
//! This crate is the foundation depended on by all other docforge crates.
//! It provides:
//! - [`DocforgeError`], the unified error type
//! - The documentation tree ([`Node`], [`NodeSelector`], [`Manifest`])
//! - The [`LocalityDomain`] scoping policy
//! - Configuration ([`AppConfig`], [`Options`], config loading)
//! - HTTP client metrics ([`MetricsRegistry`])

pub mod config;
pub mod error;
pub mod locality;
pub mod metrics;
pub mod types;
pub mod urls;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BuildConfig, GitHubConfig, HugoOptions, Options, WorkersConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{DocforgeError, Result};
pub use locality::{LocalityCandidate, LocalityDomain, LocalityDomainValue, LocalityResolver};
pub use metrics::{ClientMetrics, MetricsRegistry};
pub use types::{Manifest, Node, NodeSelector};
pub use urls::ResourceUrl;
