//! Source readers.

use std::future::Future;
use std::sync::Arc;

use docforge_hosts::Registry;
use docforge_shared::Result;

/// Reads the raw bytes behind a source URL.
pub trait Reader: Send + Sync {
    fn read(&self, source: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

impl Reader for Registry {
    async fn read(&self, source: &str) -> Result<Vec<u8>> {
        Registry::read(self, source).await
    }
}

impl<R: Reader> Reader for Arc<R> {
    async fn read(&self, source: &str) -> Result<Vec<u8>> {
        R::read(self.as_ref(), source).await
    }
}
