//! Disk-backed memoized HTTP GET, one per origin store.
//!
//! Responses live at `<cache_dir>/_requests/<store>/<sha256(url)>.json`.
//! Within a run, every network response is memoized so that staleness checks,
//! discovery, warming, and loading touch the network at most once per URL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use hss_shared::json::{read_json, write_json};
use hss_shared::{Result, hash_str, structural_hash};

use crate::client::{FetchEvent, HttpClient};

/// On-disk envelope of one cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedResponse {
    url: String,
    fetched_at: DateTime<Utc>,
    hash: String,
    body: Value,
}

/// A network response taken this run.
#[derive(Debug)]
struct NetworkEntry {
    body: Value,
    hash: String,
    /// Differs from the copy on disk when it was fetched.
    changed: bool,
    /// Written to disk.
    committed: AtomicBool,
}

#[derive(Debug)]
pub struct RequestCache {
    dir: PathBuf,
    client: HttpClient,
    /// Serve from disk when a cached copy exists.
    enabled: bool,
    memo: Mutex<HashMap<String, Arc<OnceCell<Arc<NetworkEntry>>>>>,
}

impl RequestCache {
    pub fn new(cache_dir: &Path, store_id: &str, client: HttpClient, enabled: bool) -> Self {
        Self {
            dir: cache_dir.join("_requests").join(store_id),
            client,
            enabled,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hash_str(url)))
    }

    fn read_disk(&self, url: &str) -> Option<CachedResponse> {
        match read_json::<CachedResponse>(&self.path_for(url)) {
            Ok(found) => found.filter(|r| r.url == url),
            Err(e) => {
                warn!(url, error = %e, "corrupt request cache entry, ignoring");
                None
            }
        }
    }

    /// The cached body on disk, without touching the network.
    pub fn cached(&self, url: &str) -> Option<Value> {
        self.read_disk(url).map(|r| r.body)
    }

    /// Network response for `url`, fetched at most once per run.
    async fn network(&self, url: &str) -> Result<Arc<NetworkEntry>> {
        let cell = {
            let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
            memo.entry(url.to_string()).or_default().clone()
        };
        let entry = cell
            .get_or_try_init(|| async {
                let body = self.client.get_json(url).await?;
                let hash = structural_hash(&body);
                let changed = self.read_disk(url).is_none_or(|prior| prior.hash != hash);
                Ok::<_, hss_shared::HssError>(Arc::new(NetworkEntry {
                    body,
                    hash,
                    changed,
                    committed: AtomicBool::new(false),
                }))
            })
            .await?;
        Ok(entry.clone())
    }

    fn commit(&self, url: &str, entry: &NetworkEntry) -> Result<()> {
        if entry.committed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let record = CachedResponse {
            url: url.to_string(),
            fetched_at: Utc::now(),
            hash: entry.hash.clone(),
            body: entry.body.clone(),
        };
        write_json(&self.path_for(url), &record)
    }

    fn memoized(&self, url: &str) -> Option<Arc<NetworkEntry>> {
        let memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        memo.get(url).and_then(|cell| cell.get().cloned())
    }

    /// JSON at `url`: this run's response, else the disk copy (when enabled),
    /// else the network. Claims any pending `did_change` response.
    pub async fn fetch(&self, url: &str) -> Result<Value> {
        if let Some(entry) = self.memoized(url) {
            self.commit(url, &entry)?;
            self.client.observer().on_fetch(&FetchEvent::CacheHit {
                url: url.to_string(),
            });
            return Ok(entry.body.clone());
        }
        if self.enabled {
            if let Some(cached) = self.read_disk(url) {
                debug!(url, "request cache hit");
                self.client.observer().on_fetch(&FetchEvent::CacheHit {
                    url: url.to_string(),
                });
                return Ok(cached.body);
            }
        }
        let entry = self.network(url).await?;
        self.commit(url, &entry)?;
        Ok(entry.body.clone())
    }

    /// Re-fetch `url` and compare with the disk copy.
    ///
    /// The response is held in memory, not written, until a later
    /// [`fetch`](Self::fetch) claims it.
    pub async fn did_change(&self, url: &str) -> Result<bool> {
        Ok(self.network(url).await?.changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hss_shared::FetchConfig;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_cache() -> PathBuf {
        std::env::temp_dir().join(format!("hss-requests-{}", Uuid::now_v7()))
    }

    fn cache(dir: &Path, enabled: bool) -> RequestCache {
        let client = HttpClient::new(&FetchConfig::default()).unwrap();
        RequestCache::new(dir, "remote", client, enabled)
    }

    async fn serve(server: &MockServer, route: &str, body: Value, times: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetch_is_memoized_within_a_run() {
        let server = MockServer::start().await;
        serve(&server, "/m.json", json!({"id": "m"}), 1).await;
        let url = format!("{}/m.json", server.uri());

        let requests = cache(&temp_cache(), false);
        let (a, b) = tokio::join!(requests.fetch(&url), requests.fetch(&url));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(requests.fetch(&url).await.unwrap()["id"], "m");
    }

    #[tokio::test]
    async fn disk_copy_serves_next_run() {
        let server = MockServer::start().await;
        serve(&server, "/m.json", json!({"id": "m"}), 1).await;
        let url = format!("{}/m.json", server.uri());
        let dir = temp_cache();

        cache(&dir, true).fetch(&url).await.unwrap();
        let next_run = cache(&dir, true);
        assert_eq!(next_run.cached(&url), Some(json!({"id": "m"})));
        assert_eq!(next_run.fetch(&url).await.unwrap()["id"], "m");
    }

    #[tokio::test]
    async fn did_change_then_fetch_uses_one_request() {
        let server = MockServer::start().await;
        serve(&server, "/m.json", json!({"id": "m", "v": 2}), 1).await;
        let url = format!("{}/m.json", server.uri());
        let dir = temp_cache();

        let requests = cache(&dir, true);
        assert!(requests.did_change(&url).await.unwrap());
        // Not committed until claimed.
        assert!(requests.cached(&url).is_none());
        assert_eq!(requests.fetch(&url).await.unwrap()["v"], 2);
        assert!(requests.cached(&url).is_some());
    }

    #[tokio::test]
    async fn unchanged_response_is_reported_unchanged() {
        let server = MockServer::start().await;
        serve(&server, "/m.json", json!({"id": "m"}), 2).await;
        let url = format!("{}/m.json", server.uri());
        let dir = temp_cache();

        cache(&dir, true).fetch(&url).await.unwrap();
        assert!(!cache(&dir, true).did_change(&url).await.unwrap());
    }
}
