//! load-stores: bring every parsed resource's object graph into memory,
//! from the cache tree when its store reports no change.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use hss_cache::ResourceCache;
use hss_shared::{ActiveResource, ObjectGraph, ParsedResource, Result, structural_hash};

use crate::api::ResourceLookup;
use crate::progress::{Phase, PhaseCounters};
use crate::queue::drain;
use crate::state::{BuildState, CONTENT_CACHE_KEY};

/// What load-stores recorded about the source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentRecord {
    hash: String,
    id: String,
    sub_resources: usize,
    /// Structural hash of each source canvas, in order.
    #[serde(default)]
    canvas_hashes: Vec<String>,
}

#[instrument(skip_all, fields(resources = state.parsed.len()))]
pub(crate) async fn run(state: &mut BuildState) -> Result<()> {
    let total = state.parsed.len();
    state.progress.discovered(Phase::LoadStores, total);

    let counters = PhaseCounters::default();
    PhaseCounters::add(&counters.total, total);
    let done = AtomicUsize::new(0);

    let shared: &BuildState = state;
    let outcomes = drain(
        shared.parsed.iter().collect(),
        shared.concurrency(),
        |parsed| {
            let counters = &counters;
            let done = &done;
            async move {
                let outcome = load_one(shared, parsed, counters).await;
                let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                shared
                    .progress
                    .processed(Phase::LoadStores, &parsed.slug, current, total);
                (parsed.slug.clone(), outcome)
            }
        },
    )
    .await;

    let mut resources = Vec::with_capacity(outcomes.len());
    let mut caches = HashMap::new();
    let mut failures = Vec::new();
    for (slug, outcome) in outcomes {
        match outcome {
            Ok(Some((resource, cache))) => {
                caches.insert(slug, cache);
                resources.push(resource);
            }
            Ok(None) => debug!(%slug, "resource skipped"),
            Err(e) => {
                warn!(%slug, error = %e, "failed to load resource");
                PhaseCounters::add(&counters.failed, 1);
                failures.push(format!("load `{slug}`: {e}"));
            }
        }
    }
    resources.sort_by(|a, b| a.parsed.slug.cmp(&b.parsed.slug));

    let stats = counters.snapshot();
    info!(
        loaded = resources.len(),
        reloaded = stats.processed,
        reused = stats.cache_hits,
        failed = stats.failed,
        "loaded resources"
    );

    let resources = Arc::new(resources);
    state.lookup = Arc::new(ResourceLookup::new(resources.clone()));
    state.resources = resources;
    state.caches = caches;
    state.failures.extend(failures);
    state.record_stats(Phase::LoadStores, stats);
    Ok(())
}

async fn load_one(
    state: &BuildState,
    parsed: &ParsedResource,
    counters: &PhaseCounters,
) -> Result<Option<(ActiveResource, Arc<ResourceCache>)>> {
    let handle = state.store(&parsed.store_id)?;
    let cache = Arc::new(ResourceCache::open(&state.config.cache_dir, &parsed.slug));

    let stale = !state.options.cache
        || !cache.has_graph()
        || match handle
            .store
            .invalidate(&handle.config, parsed, &cache, &handle.ctx)
            .await
        {
            Ok(stale) => stale,
            Err(e) => {
                warn!(slug = %parsed.slug, error = %e, "change check failed, using cached graph");
                false
            }
        };

    let reused = if stale { None } else { reuse(&cache) };
    let (record, graph, reloaded) = match reused {
        Some((record, graph)) => {
            PhaseCounters::add(&counters.cache_hits, 1);
            (record, graph, false)
        }
        None => {
            let Some(loaded) = handle
                .store
                .load(&handle.config, parsed, &cache, &handle.ctx)
                .await?
            else {
                return Ok(None);
            };
            let record = ContentRecord {
                hash: loaded.graph.content_hash(),
                id: loaded.id,
                sub_resources: loaded.sub_resources,
                canvas_hashes: loaded.graph.canvases().into_iter().map(|c| structural_hash(c)).collect(),
            };
            cache.save_source(&loaded.graph)?;
            cache
                .caches
                .set(CONTENT_CACHE_KEY, serde_json::to_value(&record).unwrap_or_default());
            cache.mark_changed();
            PhaseCounters::add(&counters.processed, 1);
            (record, loaded.graph, true)
        }
    };
    cache.save()?;

    let resource = ActiveResource {
        parsed: parsed.clone(),
        id: record.id,
        sub_resources: record.sub_resources,
        content_hash: record.hash,
        canvas_hashes: record.canvas_hashes,
        reloaded,
        graph: Arc::new(std::sync::RwLock::new(graph)),
    };
    Ok(Some((resource, cache)))
}

/// The cached graph and its content record, if both are present and sound.
fn reuse(cache: &ResourceCache) -> Option<(ContentRecord, ObjectGraph)> {
    let record = cache
        .caches
        .get_key(CONTENT_CACHE_KEY)
        .and_then(|v| serde_json::from_value::<ContentRecord>(v).ok())?;
    let graph = cache.load_graph()?;
    Some((record, graph))
}
