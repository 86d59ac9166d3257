//! Documentation build engine for docforge.
//!
//! This crate ties the job queues, repository hosts, link grammar and
//! writers together into a build:
//! - [`resolver`] expands a manifest into the node tree to build
//! - [`ContentProcessor`] rewrites the links of each document
//! - [`workers`] serve the document, download, validator and GitHub info queues
//! - [`Reactor`] runs a whole build and reports a [`BuildSummary`]

pub mod buffer;
pub mod error;
pub mod processor;
pub mod reactor;
pub mod reader;
pub mod resolver;
pub mod tasks;
pub mod workers;

pub use error::BuildError;
pub use processor::{ContentProcessor, SourceIndex, relative_path};
pub use reactor::{BuildProgress, BuildSummary, Reactor, SilentProgress};
pub use reader::Reader;
pub use resolver::{check_collisions, resolve_manifest};
pub use tasks::{DocumentTask, DownloadTask, GitInfoTask, ValidationTask};
