//! link, extract, enrich: run the resolved steps over every target resource.
//!
//! Per resource: resolve steps, merge options, skip steps whose cached
//! result is still valid, run the rest, and persist the cache facade once
//! all steps (and canvas sub-steps) finish. Temp payloads are gathered
//! across the phase and handed to each step's `collect` post-pass after the
//! queue drains.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use hss_cache::{LinkerCacheEntry, ResourceCache, signatures};
use hss_fetch::RequestCache;
use hss_shared::{ActiveResource, HssError, Result, structural_hash};

use crate::api::{ResourceView, StepApi};
use crate::progress::{Phase, PhaseCounters};
use crate::queue::drain;
use crate::state::BuildState;
use crate::step::{Step, StepKind};

// ---------------------------------------------------------------------------
// Records & collectors
// ---------------------------------------------------------------------------

/// Invalidation record of one step, kept under the step id in `caches`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepRecord {
    hash: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temp: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    collections: Vec<String>,
}

/// Hash of everything a step's cached result depends on.
fn fingerprint(step: &dyn Step, config: &Value, files: &[String], content_hash: &str) -> String {
    structural_hash(&json!({
        "config": config,
        "code": step.fingerprint(),
        "files": signatures(files.iter().map(String::as_str)),
        "content": content_hash,
    }))
}

/// Phase-wide temp payloads: step id -> view key -> payload.
#[derive(Default)]
struct Collector {
    temps: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl Collector {
    fn push(&self, step: &str, key: String, temp: Value) {
        self.temps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(step.to_string())
            .or_default()
            .insert(key, temp);
    }

    fn take(&self) -> BTreeMap<String, BTreeMap<String, Value>> {
        std::mem::take(&mut *self.temps.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Prepared linker lookups, keyed by hash of `{id, config}`.
type Prepared = HashMap<String, Option<Arc<Value>>>;

fn prepare_key(step: &dyn Step, config: &Value) -> String {
    structural_hash(&json!({ "id": step.id(), "config": config }))
}

/// What happened to one resource (and its canvases).
#[derive(Debug, Default)]
struct Tally {
    ran: usize,
    hits: usize,
    failures: Vec<String>,
}

impl Tally {
    fn record(&mut self, key: &str, step: &str, result: Result<bool>) {
        match result {
            Ok(true) => self.ran += 1,
            Ok(false) => self.hits += 1,
            Err(e) => {
                warn!(resource = key, step, error = %e, "step failed");
                self.failures.push(e.to_string());
            }
        }
    }

    fn absorb(&mut self, other: Tally) {
        self.ran += other.ran;
        self.hits += other.hits;
        self.failures.extend(other.failures);
    }
}

/// Services shared by every task of one phase.
struct Run<'a> {
    state: &'a BuildState,
    kind: StepKind,
    collector: Collector,
    prepared: Prepared,
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(phase = %phase))]
pub(crate) async fn run(state: &mut BuildState, phase: Phase, kind: StepKind) -> Result<()> {
    let shared: &BuildState = state;
    let work: Vec<(&ActiveResource, Vec<Arc<dyn Step>>, Vec<Arc<dyn Step>>)> = shared
        .targets()
        .into_iter()
        .map(|resource| {
            let (own, canvas) = shared.steps_for(resource, kind);
            (resource, own, canvas)
        })
        .filter(|(_, own, canvas)| !own.is_empty() || !canvas.is_empty())
        .collect();

    let total = work.len();
    shared.progress.discovered(phase, total);
    let counters = PhaseCounters::default();
    PhaseCounters::add(&counters.total, total);

    let prepared = if kind == StepKind::Link {
        prepare_linkers(shared, &work).await?
    } else {
        Prepared::new()
    };
    let run = Run {
        state: shared,
        kind,
        collector: Collector::default(),
        prepared,
    };

    let done = AtomicUsize::new(0);
    let tallies = drain(work, shared.concurrency(), |(resource, own, canvas)| {
        let run = &run;
        let done = &done;
        async move {
            let tally = process_resource(run, resource, &own, &canvas).await;
            let current = done.fetch_add(1, Ordering::SeqCst) + 1;
            run.state
                .progress
                .processed(phase, resource.slug(), current, total);
            tally
        }
    })
    .await;

    let mut failures = Vec::new();
    for tally in tallies {
        if tally.ran > 0 {
            PhaseCounters::add(&counters.processed, 1);
        }
        if !tally.failures.is_empty() {
            PhaseCounters::add(&counters.failed, 1);
        }
        PhaseCounters::add(&counters.steps_run, tally.ran);
        PhaseCounters::add(&counters.cache_hits, tally.hits);
        failures.extend(tally.failures);
    }

    failures.extend(collect(&run).await);
    drop(run);

    let stats = counters.snapshot();
    info!(
        total = stats.total,
        processed = stats.processed,
        steps_run = stats.steps_run,
        cache_hits = stats.cache_hits,
        failed = stats.failed,
        "{phase} complete"
    );
    state.record_stats(phase, stats);

    if kind == StepKind::Enrich && !failures.is_empty() {
        let err = HssError::Aggregate {
            phase: phase.to_string(),
            failures,
        };
        if state.options.strict {
            return Err(err);
        }
        warn!(error = %err, "enrichment finished with failures");
        if let HssError::Aggregate { failures, .. } = err {
            state.warnings.extend(failures);
        }
        return Ok(());
    }
    state.failures.extend(failures);
    Ok(())
}

/// Run each linker's `prepare` once per distinct resolved config.
async fn prepare_linkers(
    state: &BuildState,
    work: &[(&ActiveResource, Vec<Arc<dyn Step>>, Vec<Arc<dyn Step>>)],
) -> Result<Prepared> {
    let mut prepared = Prepared::new();
    for (resource, steps, _) in work {
        for step in steps {
            let config = state.options_for(step.as_ref(), resource);
            let key = prepare_key(step.as_ref(), &config);
            if prepared.contains_key(&key) {
                continue;
            }
            let lookup = step
                .prepare(&state.step_ctx, &config)
                .await
                .map_err(|e| HssError::step(step.id(), "prepare", e))?;
            debug!(step = step.id(), "prepared linker");
            prepared.insert(key, lookup.map(Arc::new));
        }
    }
    Ok(prepared)
}

// ---------------------------------------------------------------------------
// Per-resource work
// ---------------------------------------------------------------------------

async fn process_resource(
    run: &Run<'_>,
    resource: &ActiveResource,
    own: &[Arc<dyn Step>],
    canvas: &[Arc<dyn Step>],
) -> Tally {
    let mut tally = Tally::default();
    let slug = resource.slug();
    let (Some(cache), Ok(handle)) = (
        run.state.cache(slug),
        run.state.store(&resource.parsed.store_id),
    ) else {
        tally.failures.push(format!("`{slug}`: resource is not loaded"));
        return tally;
    };
    let requests = handle.ctx.requests.as_ref();

    let view = ResourceView::of(resource);
    if run.kind == StepKind::Link {
        link_resource(run, resource, own, cache, requests, &view, &mut tally).await;
    } else {
        for step in own {
            let config = run.state.options_for(step.as_ref(), resource);
            let api = StepApi::new(resource, cache, None, &run.state.lookup, requests, None);
            let result = run_step(run, step.as_ref(), &view, &api, cache, &config).await;
            tally.record(slug, step.id(), result);
        }
    }

    if !canvas.is_empty() {
        let canvases: Vec<(usize, Value)> = {
            let graph = resource.graph.read().unwrap_or_else(|e| e.into_inner());
            graph.canvases().into_iter().cloned().enumerate().collect()
        };
        let tallies = drain(canvases, run.state.canvas_concurrency(), |(index, document)| {
            async move {
                process_canvas(run, resource, cache, requests, canvas, index, &document).await
            }
        })
        .await;
        for canvas_tally in tallies {
            tally.absorb(canvas_tally);
        }
    }

    if let Err(e) = cache.save() {
        tally.failures.push(format!("`{slug}`: {e}"));
    }
    debug!(slug, ran = tally.ran, hits = tally.hits, "resource processed");
    tally
}

/// Canvas steps of one canvas. Failures stay with this canvas.
async fn process_canvas(
    run: &Run<'_>,
    resource: &ActiveResource,
    parent: &ResourceCache,
    requests: &RequestCache,
    steps: &[Arc<dyn Step>],
    index: usize,
    document: &Value,
) -> Tally {
    let mut tally = Tally::default();
    let cache = parent.canvas(index);
    let view = ResourceView::for_canvas(resource, index, document);
    let key = view.key();

    for step in steps {
        let config = run.state.options_for(step.as_ref(), resource);
        let api = StepApi::new(resource, &cache, Some(parent), &run.state.lookup, requests, None);
        let result = run_step(run, step.as_ref(), &view, &api, &cache, &config).await;
        tally.record(&key, step.id(), result);
    }

    if let Err(e) = cache.save() {
        tally.failures.push(format!("`{key}`: {e}"));
    }
    tally
}

/// Run one extraction/enrichment step unless its cached result is valid.
/// `Ok(true)` when the handler ran.
async fn run_step(
    run: &Run<'_>,
    step: &dyn Step,
    view: &ResourceView,
    api: &StepApi<'_>,
    cache: &ResourceCache,
    config: &Value,
) -> Result<bool> {
    let record = cache
        .caches
        .get_key(step.id())
        .and_then(|v| serde_json::from_value::<StepRecord>(v).ok());

    if run.state.options.cache {
        let stale = match step.invalidate(view, api, config).await? {
            Some(stale) => stale,
            None => record
                .as_ref()
                .is_none_or(|r| r.hash != fingerprint(step, config, &r.files, &view.content_hash)),
        };
        if let (false, Some(record)) = (stale, record) {
            if let Some(temp) = record.temp {
                run.collector.push(step.id(), view.key(), temp);
            }
            run.state.add_to_collections(&view.slug, &record.collections);
            return Ok(false);
        }
    }

    let output = step
        .handler(view, api, config)
        .await
        .map_err(|e| HssError::step(step.id(), view.key(), e))?;
    output.apply(cache);
    if output.did_change {
        if let Some(parent) = api.parent_cache() {
            parent.mark_changed();
        }
    }

    let files = api.tracked_files();
    let record = StepRecord {
        hash: fingerprint(step, config, &files, &view.content_hash),
        files,
        temp: output.temp.clone(),
        collections: output.collections.clone(),
    };
    cache
        .caches
        .set(step.id(), serde_json::to_value(&record).unwrap_or_default());
    if let Some(temp) = output.temp {
        run.collector.push(step.id(), view.key(), temp);
    }
    run.state.add_to_collections(&view.slug, &output.collections);
    Ok(true)
}

/// Link one resource. Linkers edit the graph in place, so a linker cannot
/// be re-run on its own output: when any linker is stale the graph is
/// rewound to its source and every linker is replayed in order.
async fn link_resource(
    run: &Run<'_>,
    resource: &ActiveResource,
    linkers: &[Arc<dyn Step>],
    cache: &ResourceCache,
    requests: &RequestCache,
    view: &ResourceView,
    tally: &mut Tally,
) {
    let slug = resource.slug();
    let mut replay = resource.reloaded || !run.state.options.cache;
    let mut jobs = Vec::with_capacity(linkers.len());
    for step in linkers {
        let config = run.state.options_for(step.as_ref(), resource);
        let prepared = run
            .prepared
            .get(&prepare_key(step.as_ref(), &config))
            .cloned()
            .flatten();
        if !replay {
            let api =
                StepApi::new(resource, cache, None, &run.state.lookup, requests, prepared.clone());
            replay = linker_stale(run, step.as_ref(), view, &api, &config, prepared.as_deref()).await;
        }
        jobs.push((step, config, prepared));
    }

    if !replay {
        for step in linkers {
            tally.record(slug, step.id(), Ok(false));
        }
        return;
    }

    if !resource.reloaded {
        match cache.load_source() {
            Some(source) => {
                *resource.graph.write().unwrap_or_else(|e| e.into_inner()) = source;
                cache.mark_changed();
                debug!(slug, "rewound graph to source");
            }
            None => warn!(slug, "no source graph cached, linking over the previous output"),
        }
    }

    for (step, config, prepared) in jobs {
        let api = StepApi::new(resource, cache, None, &run.state.lookup, requests, prepared.clone())
            .linking();
        let result = run_linker(run, step.as_ref(), view, &api, cache, &config, prepared).await;
        tally.record(slug, step.id(), result);
    }
}

/// Config and prepared-lookup hashes a linker cache entry is compared on.
fn linker_hashes(
    step: &dyn Step,
    view: &ResourceView,
    config: &Value,
    prepared: Option<&Value>,
) -> (String, Option<String>) {
    let config_hash = structural_hash(&json!({
        "config": config,
        "code": step.fingerprint(),
        "content": view.content_hash,
    }));
    (config_hash, prepared.map(|lookup| structural_hash(lookup)))
}

/// Whether a linker's config, prepared lookup, content, or tracked files
/// moved since its cache entry was written. A failing `invalidate` counts
/// as stale.
async fn linker_stale(
    run: &Run<'_>,
    step: &dyn Step,
    view: &ResourceView,
    api: &StepApi<'_>,
    config: &Value,
    prepared: Option<&Value>,
) -> bool {
    match step.invalidate(view, api, config).await {
        Ok(Some(stale)) => return stale,
        Ok(None) => {}
        Err(e) => {
            debug!(step = step.id(), slug = %view.slug, error = %e, "invalidate failed");
            return true;
        }
    }
    let (config_hash, prepare_hash) = linker_hashes(step, view, config, prepared);
    run.state
        .linker_caches
        .get(step.id())
        .and_then(|c| c.get(&view.slug))
        .is_none_or(|entry| {
            entry.config_hash != config_hash
                || entry.prepare_hash != prepare_hash
                || !entry.files_unchanged()
        })
}

/// Run one linker and refresh its linker cache entry.
async fn run_linker(
    run: &Run<'_>,
    step: &dyn Step,
    view: &ResourceView,
    api: &StepApi<'_>,
    cache: &ResourceCache,
    config: &Value,
    prepared: Option<Arc<Value>>,
) -> Result<bool> {
    let output = step
        .handler(view, api, config)
        .await
        .map_err(|e| HssError::step(step.id(), view.key(), e))?;
    output.apply(cache);
    run.state.add_to_collections(&view.slug, &output.collections);
    if let Some(temp) = output.temp {
        run.collector.push(step.id(), view.key(), temp);
    }

    if let Some(linker_cache) = run.state.linker_caches.get(step.id()) {
        let (config_hash, prepare_hash) = linker_hashes(step, view, config, prepared.as_deref());
        let tracked_files = signatures(api.tracked_files().iter().map(String::as_str))
            .into_iter()
            .filter_map(|(path, signature)| signature.map(|s| (path, s)))
            .collect();
        linker_cache.set(
            &view.slug,
            LinkerCacheEntry {
                config_hash,
                tracked_files,
                prepare_hash,
            },
        );
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Post-pass
// ---------------------------------------------------------------------------

/// Hand every step its phase-wide temp payloads and merge what it returns.
async fn collect(run: &Run<'_>) -> Vec<String> {
    let mut failures = Vec::new();
    let temps = run.collector.take();
    for step in run.state.registry.steps() {
        if step.kind() != run.kind {
            continue;
        }
        let Some(temp) = temps.get(step.id()) else {
            continue;
        };
        let config = run
            .state
            .configured
            .get(step.id())
            .cloned()
            .unwrap_or(Value::Null);
        let outputs = match step.collect(temp, &run.state.step_ctx, &config).await {
            Ok(outputs) => outputs,
            Err(e) => {
                let e = HssError::step(step.id(), "collect", e);
                warn!(error = %e, "collect failed");
                failures.push(e.to_string());
                continue;
            }
        };
        debug!(step = step.id(), outputs = outputs.len(), "collected");
        for (key, output) in outputs {
            let Some(cache) = run.state.cache_for_key(&key) else {
                warn!(step = step.id(), %key, "collect output for unknown resource");
                continue;
            };
            output.apply(&cache);
            let slug = key.split("/canvases/").next().unwrap_or(&key);
            run.state.add_to_collections(slug, &output.collections);
            if let Err(e) = cache.save() {
                failures.push(format!("`{key}`: {e}"));
            }
        }
    }
    failures
}
