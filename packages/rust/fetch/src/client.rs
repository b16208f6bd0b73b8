//! HTTP client with the shared retry policy and fetch lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use hss_shared::{FetchConfig, HssError, Result};

use crate::retry::{RetryPolicy, parse_retry_after};

/// User-Agent string for IIIF requests.
const USER_AGENT: &str = concat!("hss/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// Fetch events
// ---------------------------------------------------------------------------

/// Lifecycle of one URL fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// A network request is about to be sent.
    Started { url: String, attempt: u32 },
    /// The body was served from the request cache or the in-run memo.
    CacheHit { url: String },
    /// A failed attempt will be retried after `delay`.
    Retrying {
        url: String,
        attempt: u32,
        delay: Duration,
    },
    Completed { url: String, status: u16 },
    Failed { url: String, error: String },
}

/// Running totals published by the remote warmer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub discovered: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Receives fetch lifecycle events. Called synchronously; must not block.
pub trait FetchObserver: Send + Sync {
    fn on_fetch(&self, event: &FetchEvent);
    fn on_warm_progress(&self, _totals: WarmReport) {}
}

/// Observer that ignores every event.
pub struct SilentObserver;

impl FetchObserver for SilentObserver {
    fn on_fetch(&self, _event: &FetchEvent) {}
}

// ---------------------------------------------------------------------------
// HttpClient
// ---------------------------------------------------------------------------

/// JSON GET client shared by every request cache of a build.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
    observer: Arc<dyn FetchObserver>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HssError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            policy: RetryPolicy::from_config(config),
            observer: Arc::new(SilentObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn observer(&self) -> &Arc<dyn FetchObserver> {
        &self.observer
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` and parse the body as JSON, retrying transient failures.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let max = self.policy.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max {
            self.observer.on_fetch(&FetchEvent::Started {
                url: url.to_string(),
                attempt,
            });

            let mut retry_after = None;
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let status = resp.status().as_u16();
                    let body = resp.json::<Value>().await.map_err(|e| {
                        self.fail(url, format!("invalid JSON: {e}"));
                        HssError::parse(format!("{url}: invalid JSON: {e}"))
                    })?;
                    self.observer.on_fetch(&FetchEvent::Completed {
                        url: url.to_string(),
                        status,
                    });
                    return Ok(body);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    last_error = format!("HTTP {status}");
                    if !self.policy.is_retryable(status) {
                        self.fail(url, last_error.clone());
                        return Err(HssError::Network(format!("GET {url}: {last_error}")));
                    }
                    retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after);
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < max {
                let delay = self.policy.delay(url, attempt, retry_after);
                debug!(url, attempt, delay_ms = delay.as_millis() as u64, error = %last_error, "retrying");
                self.observer.on_fetch(&FetchEvent::Retrying {
                    url: url.to_string(),
                    attempt,
                    delay,
                });
                tokio::time::sleep(delay).await;
            }
        }

        warn!(url, attempts = max, error = %last_error, "giving up");
        self.fail(url, last_error.clone());
        Err(HssError::Network(format!(
            "GET {url} failed after {max} attempt(s): {last_error}"
        )))
    }

    fn fail(&self, url: &str, error: String) {
        self.observer.on_fetch(&FetchEvent::Failed {
            url: url.to_string(),
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<FetchEvent>>);

    impl FetchObserver for Recorder {
        fn on_fetch(&self, event: &FetchEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn fast_config() -> FetchConfig {
        FetchConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn retries_retryable_status_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/m.json"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/m.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m"})))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = Arc::new(Recorder::default());
        let client = HttpClient::new(&fast_config()).unwrap().with_observer(recorder.clone());
        let body = client.get_json(&format!("{}/m.json", server.uri())).await.unwrap();
        assert_eq!(body["id"], "m");

        let events = recorder.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, FetchEvent::Retrying { attempt: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, FetchEvent::Completed { status: 200, .. })));
    }

    #[tokio::test]
    async fn non_retryable_status_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&fast_config()).unwrap();
        let err = client
            .get_json(&format!("{}/missing.json", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.json"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = HttpClient::new(&fast_config()).unwrap();
        let err = client
            .get_json(&format!("{}/flaky.json", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }
}
