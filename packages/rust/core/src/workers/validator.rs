//! Link validator: checks that external links answer, logging those that
//! do not. Validation never fails a build.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use docforge_hosts::{InstrumentedClient, Registry, RepositoryHost};
use docforge_jobs::{Worker, WorkerError};

use crate::tasks::ValidationTask;

/// Hosts used in documentation samples.
const SAMPLE_HOSTS: &[&str] = &["localhost", "127.0.0.1", "1.2.3.4"];
const SAMPLE_DOMAIN: &str = "foo.bar";

/// Longest `Retry-After` honoured, in seconds.
const MAX_RETRY_AFTER_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Delays between retries of a rate-limited request.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// One entry per retry.
    pub delays: Vec<Duration>,
    /// Unit of the random extra delay; retry `n` adds up to `n` units.
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            delays: [1, 5, 10, 20].into_iter().map(Duration::from_secs).collect(),
            jitter: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    pub fn retries(&self) -> usize {
        self.delays.len()
    }

    fn delay(&self, attempt: usize) -> Duration {
        let base = self.delays.get(attempt).copied().unwrap_or_default();
        let units = rand::thread_rng().gen_range(0..=attempt as u32);
        base + self.jitter * units
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct ValidatorWorker {
    registry: Arc<Registry>,
    client: InstrumentedClient,
    backoff: Backoff,
    skip_samples: bool,
    /// `scheme://host/path` of every link already checked.
    validated: Mutex<HashSet<String>>,
}

impl ValidatorWorker {
    /// `client` serves links whose host has no client of its own.
    pub fn new(registry: Arc<Registry>, client: InstrumentedClient) -> Self {
        Self {
            registry,
            client,
            backoff: Backoff::default(),
            skip_samples: true,
            validated: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether links to sample hosts such as `localhost` are ignored.
    pub fn skip_sample_hosts(mut self, skip: bool) -> Self {
        self.skip_samples = skip;
        self
    }

    /// Claim a link for validation; `false` when it was checked before.
    fn claim(&self, url: &Url) -> bool {
        let mut key = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
        if let Some(port) = url.port() {
            key.push_str(&format!(":{port}"));
        }
        key.push_str(url.path());
        self.validated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key)
    }

    async fn check(&self, client: &InstrumentedClient, task: &ValidationTask) {
        let url = task.url.as_str();
        let mut outcome = self.send(client, Method::HEAD, url).await;
        if matches!(outcome, Ok(status) if is_broken(status)) {
            trace!(%url, "HEAD rejected, retrying with GET");
            outcome = self.send(client, Method::GET, url).await;
        }
        match outcome {
            Ok(status) if is_broken(status) => warn!(
                link = %task.destination,
                referer = %task.referer,
                %url,
                status = status.as_u16(),
                "link is not reachable"
            ),
            Ok(status) => trace!(%url, status = status.as_u16(), "link validated"),
            Err(e) => warn!(
                link = %task.destination,
                referer = %task.referer,
                %url,
                error = %e,
                "failed to validate link"
            ),
        }
    }

    /// Send a request, retrying while the server answers 429.
    async fn send(
        &self,
        client: &InstrumentedClient,
        method: Method,
        url: &str,
    ) -> reqwest::Result<StatusCode> {
        let request = || {
            if method == Method::HEAD {
                client.head(url)
            } else {
                client.get(url)
            }
        };

        let mut response = client.send(request()).await?;
        for attempt in 0..self.backoff.retries() {
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                break;
            }
            let delay = retry_after(response.headers()).unwrap_or_else(|| self.backoff.delay(attempt));
            debug!(%url, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
            tokio::time::sleep(delay).await;
            response = client.send(request()).await?;
        }
        Ok(response.status())
    }
}

impl Worker<ValidationTask> for ValidatorWorker {
    async fn work(&self, token: &CancellationToken, task: ValidationTask) -> Result<(), WorkerError> {
        let host = task.url.host_str().unwrap_or_default();
        if self.skip_samples && is_sample_host(host) {
            trace!(url = %task.url, "skipping sample host");
            return Ok(());
        }
        if !self.claim(&task.url) {
            return Ok(());
        }

        let repository = self.registry.get(task.url.as_str()).ok();
        if let Some(exists) = repository.and_then(|h| h.exists_locally(task.url.as_str())) {
            if !exists {
                warn!(link = %task.destination, referer = %task.referer, "linked file does not exist");
            }
            return Ok(());
        }

        let client = repository
            .and_then(RepositoryHost::client)
            .unwrap_or(&self.client);
        tokio::select! {
            () = self.check(client, &task) => {}
            () = token.cancelled() => debug!(url = %task.url, "validation cancelled"),
        }
        Ok(())
    }
}

fn is_sample_host(host: &str) -> bool {
    SAMPLE_HOSTS.contains(&host) || host.contains(SAMPLE_DOMAIN)
}

/// Authorization failures prove the link exists.
fn is_broken(status: StatusCode) -> bool {
    status.as_u16() >= 400 && status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs <= MAX_RETRY_AFTER_SECS)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use docforge_shared::{GitHubConfig, MetricsRegistry};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn validator(mappings: BTreeMap<String, std::path::PathBuf>) -> ValidatorWorker {
        let metrics = MetricsRegistry::new();
        let registry = Registry::from_config(&GitHubConfig::default(), &mappings, &metrics).unwrap();
        ValidatorWorker::new(Arc::new(registry), InstrumentedClient::new(&metrics).unwrap())
            .with_backoff(Backoff {
                delays: vec![Duration::from_millis(5); 4],
                jitter: Duration::ZERO,
            })
            .skip_sample_hosts(false)
    }

    fn task(url: &str) -> ValidationTask {
        ValidationTask {
            url: Url::parse(url).unwrap(),
            destination: url.to_string(),
            referer: "https://github.com/org/repo/blob/main/README.md".into(),
        }
    }

    #[tokio::test]
    async fn falls_back_to_get_when_head_fails() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(405))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        validator(BTreeMap::new())
            .work(&CancellationToken::new(), task(&format!("{}/page", server.uri())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn authorization_failures_count_as_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        validator(BTreeMap::new())
            .work(&CancellationToken::new(), task(&format!("{}/private", server.uri())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retries_rate_limited_requests() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        validator(BTreeMap::new())
            .work(&CancellationToken::new(), task(&format!("{}/busy", server.uri())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_the_last_retry() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(429))
            .expect(5)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(5)
            .mount(&server)
            .await;

        validator(BTreeMap::new())
            .work(&CancellationToken::new(), task(&format!("{}/flooded", server.uri())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn checks_each_link_once() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let worker = validator(BTreeMap::new());
        let token = CancellationToken::new();
        worker.work(&token, task(&format!("{}/page?a=1", server.uri()))).await.unwrap();
        worker.work(&token, task(&format!("{}/page#intro", server.uri()))).await.unwrap();
    }

    #[tokio::test]
    async fn sample_hosts_are_never_requested() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let worker = validator(BTreeMap::new()).skip_sample_hosts(true);
        worker
            .work(&CancellationToken::new(), task(&format!("{}/sample", server.uri())))
            .await
            .unwrap();
        assert!(is_sample_host("docs.foo.bar"));
        assert!(!is_sample_host("example.com"));
    }

    #[tokio::test]
    async fn local_links_are_checked_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# Readme").unwrap();
        let mappings = BTreeMap::from([("https://github.com/org/repo".to_string(), dir.path().to_path_buf())]);

        let worker = validator(mappings);
        let token = CancellationToken::new();
        worker
            .work(&token, task("https://github.com/org/repo/blob/main/README.md"))
            .await
            .unwrap();
        worker
            .work(&token, task("https://github.com/org/repo/blob/main/MISSING.md"))
            .await
            .unwrap();
    }

    #[test]
    fn retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "30".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(30)));
        headers.insert(RETRY_AFTER, "301".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn jitter_grows_with_attempts() {
        let backoff = Backoff::default();
        assert_eq!(backoff.retries(), 4);
        for _ in 0..20 {
            assert_eq!(backoff.delay(0), Duration::from_secs(1));
            let third = backoff.delay(2);
            assert!(third >= Duration::from_secs(10) && third <= Duration::from_secs(12));
        }
    }
}
