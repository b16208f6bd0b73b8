//! Remote warmer: prefetch every remote resource before the build parses stores.
//!
//! Warming is an optimization. Failures are logged and counted but never
//! abort the run; the load phase fetches again on a cache miss.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use hss_shared::ResourceType;

use crate::client::WarmReport;
use crate::discover::discover;
use crate::request_cache::RequestCache;

/// Remote roots of one store, fetched through that store's request cache.
#[derive(Debug, Clone)]
pub struct WarmTarget {
    pub store_id: String,
    pub cache: Arc<RequestCache>,
    pub roots: Vec<String>,
}

#[derive(Debug, Default)]
struct Totals {
    discovered: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl Totals {
    fn snapshot(&self) -> WarmReport {
        WarmReport {
            discovered: self.discovered.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

pub struct RemoteWarmer {
    concurrency: usize,
    totals: Arc<Totals>,
}

impl RemoteWarmer {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            totals: Arc::new(Totals::default()),
        }
    }

    /// Running totals so far.
    pub fn totals(&self) -> WarmReport {
        self.totals.snapshot()
    }

    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn warm(&self, targets: Vec<WarmTarget>) -> WarmReport {
        for target in targets {
            self.warm_target(target).await;
        }
        let report = self.totals();
        info!(
            discovered = report.discovered,
            completed = report.completed,
            failed = report.failed,
            "remote warming complete"
        );
        report
    }

    async fn warm_target(&self, target: WarmTarget) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut visited: HashSet<String> = HashSet::new();
        let mut tasks = JoinSet::new();
        let publish = {
            let cache = target.cache.clone();
            let totals = self.totals.clone();
            move || cache.client().observer().on_warm_progress(totals.snapshot())
        };

        for root in &target.roots {
            let discovery = match discover(&target.cache, root, self.concurrency).await {
                Ok(discovery) => discovery,
                Err(e) => {
                    warn!(store = %target.store_id, root = %root, error = %e, "failed to warm remote root");
                    self.totals.failed.fetch_add(1, Ordering::SeqCst);
                    publish();
                    continue;
                }
            };

            let collections = discovery
                .nodes
                .iter()
                .filter(|n| n.resource_type == ResourceType::Collection)
                .count();
            self.totals
                .discovered
                .fetch_add(discovery.nodes.len(), Ordering::SeqCst);
            self.totals.completed.fetch_add(collections, Ordering::SeqCst);
            self.totals
                .failed
                .fetch_add(discovery.failures.len(), Ordering::SeqCst);
            publish();

            for node in discovery.manifests() {
                if !visited.insert(node.url.clone()) {
                    continue;
                }
                let cache = target.cache.clone();
                let sem = semaphore.clone();
                let totals = self.totals.clone();
                let url = node.url.clone();
                tasks.spawn(async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        return;
                    };
                    match cache.fetch(&url).await {
                        Ok(_) => {
                            totals.completed.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            warn!(url = %url, error = %e, "failed to warm manifest");
                            totals.failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    cache.client().observer().on_warm_progress(totals.snapshot());
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "warm task panicked");
                self.totals.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpClient;
    use hss_shared::FetchConfig;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn prefetches_manifests_once_and_counts_failures() {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/collection.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("{base}/collection.json"),
                "type": "Collection",
                "items": [
                    {"id": format!("{base}/a.json"), "type": "Manifest"},
                    {"id": format!("{base}/b.json"), "type": "Manifest"},
                    {"id": format!("{base}/a.json"), "type": "Manifest"}
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"type": "Manifest"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = std::env::temp_dir().join(format!("hss-warm-{}", Uuid::now_v7()));
        let cache = Arc::new(RequestCache::new(
            &dir,
            "remote",
            HttpClient::new(&FetchConfig::default()).unwrap(),
            false,
        ));
        let warmer = RemoteWarmer::new(4);
        let report = warmer
            .warm(vec![WarmTarget {
                store_id: "remote".into(),
                cache: cache.clone(),
                roots: vec![format!("{base}/collection.json")],
            }])
            .await;

        assert_eq!(report.discovered, 3);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);

        // Memoized: loading again does not hit the network.
        cache.fetch(&format!("{base}/a.json")).await.unwrap();
    }
}
