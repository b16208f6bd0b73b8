//! Build orchestrator: sequences the phases and aggregates their results.
//!
//! warm-remote → parse-stores → load-stores → link → extract → enrich →
//! emit → build-indices → save-files. Phases never overlap; each one starts
//! only after the previous phase's queue has drained.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use hss_cache::LinkerCache;
use hss_fetch::{HttpClient, RequestCache, WarmReport};
use hss_shared::json::read_json;
use hss_shared::{BuildConfig, HssError, Result, SlugTemplate};
use hss_stores::{FileTypeCache, StoreContext, StoreRegistry};

use crate::api::ResourceLookup;
use crate::phases;
use crate::progress::{BuildProgress, Phase, PhaseStats, ProgressObserver};
use crate::state::{BuildState, StoreHandle};
use crate::step::{StepContext, StepKind, StepRegistry};
use crate::steps::default_registry;

/// Name of the file under the cache dir holding the last build hash.
pub const BUILD_HASH_FILE: &str = "_build.json";

// ---------------------------------------------------------------------------
// Options & result
// ---------------------------------------------------------------------------

/// Options of one build invocation.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Reuse cached documents and step results. Off re-runs everything.
    pub cache: bool,
    /// Write the output tree (emit, build-indices, sitemap).
    pub emit: bool,
    /// Optional phases to run. `None` runs all of them. parse-stores,
    /// load-stores and save-files always run.
    pub phases: Option<Vec<Phase>>,
    /// Per-phase resource concurrency; defaults to `[concurrency] resources`.
    pub concurrency: Option<usize>,
    /// Canvas concurrency per Manifest; defaults to `[concurrency] canvases`.
    pub canvas_concurrency: Option<usize>,
    /// Only process and emit the resource with this slug.
    pub exact: Option<String>,
    /// Warm remote stores before parsing.
    pub warm: bool,
    /// Fail the build on enrichment failures instead of reporting them.
    pub strict: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            cache: true,
            emit: true,
            phases: None,
            concurrency: None,
            canvas_concurrency: None,
            exact: None,
            warm: true,
            strict: false,
        }
    }
}

impl BuildOptions {
    /// Whether `phase` is selected for this run.
    pub fn runs(&self, phase: Phase) -> bool {
        match phase {
            Phase::ParseStores | Phase::LoadStores | Phase::SaveFiles => true,
            Phase::WarmRemote if !self.warm => false,
            Phase::Emit | Phase::BuildIndices if !self.emit => false,
            Phase::BuildIndices if self.exact.is_some() => false,
            _ => self.phases.as_ref().is_none_or(|p| p.contains(&phase)),
        }
    }
}

/// What a build produced.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub run_id: Uuid,
    /// Statistics of every phase that ran, in order.
    pub stats: Vec<(Phase, PhaseStats)>,
    /// slug -> `{type, source}` for every parsed resource.
    pub sitemap: BTreeMap<String, Value>,
    /// Named collections and their member slugs.
    pub collections: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    pub warm: Option<WarmReport>,
    /// Isolated failures that left output missing or stale: load, link,
    /// extract, emit, and save.
    pub failures: Vec<String>,
    /// The output is complete but degraded: warming misses and non-strict
    /// enrichment failures.
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl BuildResult {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseStats> {
        self.stats.iter().find(|(p, _)| *p == phase).map(|(_, s)| s)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BuildHashRecord {
    hash: String,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Runs builds of one configuration with an injected step and store registry.
pub struct Builder {
    config: Arc<BuildConfig>,
    registry: StepRegistry,
    stores: StoreRegistry,
}

impl Builder {
    /// A builder with the built-in steps and stores.
    pub fn new(config: BuildConfig) -> Self {
        Self::with_registry(config, default_registry())
    }

    pub fn with_registry(config: BuildConfig, registry: StepRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            stores: StoreRegistry::default(),
        }
    }

    pub fn with_stores(mut self, stores: StoreRegistry) -> Self {
        self.stores = stores;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Run one build.
    #[instrument(skip_all, fields(cache = options.cache, exact = ?options.exact))]
    pub async fn build(
        &self,
        options: BuildOptions,
        progress: Arc<dyn BuildProgress>,
    ) -> Result<BuildResult> {
        let start = Instant::now();
        let run_id = Uuid::now_v7();
        info!(%run_id, "starting build");

        let mut state = self.prepare(options, progress.clone()).await?;

        if state.options.runs(Phase::WarmRemote) {
            progress.phase(Phase::WarmRemote);
            phases::warm::run(&mut state).await;
        }

        progress.phase(Phase::ParseStores);
        phases::parse::run(&mut state).await?;

        progress.phase(Phase::LoadStores);
        phases::load::run(&mut state).await?;

        for (phase, kind) in [
            (Phase::Link, StepKind::Link),
            (Phase::Extract, StepKind::Extract),
            (Phase::Enrich, StepKind::Enrich),
        ] {
            if state.options.runs(phase) {
                progress.phase(phase);
                phases::process::run(&mut state, phase, kind).await?;
            }
        }

        if state.options.runs(Phase::Emit) {
            progress.phase(Phase::Emit);
            phases::emit::run(&mut state).await?;
        }

        if state.options.runs(Phase::BuildIndices) {
            progress.phase(Phase::BuildIndices);
            phases::indices::run(&mut state).await?;
        }

        progress.phase(Phase::SaveFiles);
        phases::save::run(&mut state).await?;

        let collections = state
            .collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, slugs)| (name.clone(), slugs.iter().cloned().collect()))
            .collect();
        let result = BuildResult {
            run_id,
            sitemap: state.sitemap(),
            stats: std::mem::take(&mut state.stats),
            collections,
            warm: state.warm,
            failures: std::mem::take(&mut state.failures),
            warnings: std::mem::take(&mut state.warnings),
            elapsed: start.elapsed(),
        };

        info!(
            %run_id,
            resources = result.sitemap.len(),
            failures = result.failures.len(),
            warnings = result.warnings.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "build complete"
        );
        progress.done(&result);
        Ok(result)
    }

    /// Validate configuration, reset a stale cache tree, and set up stores
    /// and steps. Nothing is written to the output tree before this passes.
    async fn prepare(
        &self,
        options: BuildOptions,
        progress: Arc<dyn BuildProgress>,
    ) -> Result<BuildState> {
        let config = self.config.clone();
        config.validate()?;
        self.validate_run_lists()?;

        reset_stale_cache(&config).await?;

        let step_ctx = StepContext {
            config: config.clone(),
            cache_dir: config.cache_dir.clone(),
            build_dir: config.build_dir.clone(),
        };

        let mut configured = HashMap::new();
        for step in self.registry.steps() {
            let global = config
                .config
                .get(step.id())
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            configured.insert(step.id().to_string(), step.configure(&step_ctx, global)?);
        }

        let client = HttpClient::new(&config.fetch)?
            .with_observer(Arc::new(ProgressObserver(progress.clone())));
        let file_types = Arc::new(FileTypeCache::load(&config.cache_dir));
        let templates: Vec<SlugTemplate> = config
            .slugs
            .iter()
            .map(|(name, template)| SlugTemplate::compile(name, template))
            .collect::<Result<_>>()?;

        let mut stores = BTreeMap::new();
        for (id, store_config) in config.effective_stores() {
            let store = self.stores.get(&store_config.store_type).ok_or_else(|| {
                HssError::config(format!(
                    "store `{id}` has unknown type `{}`",
                    store_config.store_type
                ))
            })?;
            let store_templates = match &store_config.slug_template {
                Some(name) => templates.iter().filter(|t| &t.name == name).cloned().collect(),
                None => templates.clone(),
            };
            let ctx = StoreContext {
                store_id: id.clone(),
                cache_dir: config.cache_dir.clone(),
                requests: Arc::new(RequestCache::new(
                    &config.cache_dir,
                    &id,
                    client.clone(),
                    options.cache,
                )),
                file_types: file_types.clone(),
                templates: Arc::new(store_templates),
                concurrency: config.concurrency.fetch,
            };
            stores.insert(
                id,
                StoreHandle {
                    config: store_config,
                    store,
                    ctx,
                },
            );
        }

        let linker_caches = self
            .registry
            .steps()
            .iter()
            .filter(|step| step.kind() == StepKind::Link)
            .map(|step| {
                let cache = LinkerCache::load(&config.cache_dir, step.id());
                (step.id().to_string(), Arc::new(cache))
            })
            .collect();

        let resources = Arc::new(Vec::new());
        Ok(BuildState {
            lookup: Arc::new(ResourceLookup::new(resources.clone())),
            resources,
            config,
            options,
            registry: self.registry.clone(),
            step_ctx,
            progress,
            stores,
            file_types,
            parsed: Vec::new(),
            caches: HashMap::new(),
            configured,
            linker_caches,
            collections: Mutex::new(BTreeMap::new()),
            failures: Vec::new(),
            warnings: Vec::new(),
            stats: Vec::new(),
            warm: None,
        })
    }

    /// Every step id named in a run or skip list must be registered.
    fn validate_run_lists(&self) -> Result<()> {
        let check = |owner: &str, ids: &[String]| -> Result<()> {
            match ids.iter().find(|id| !self.registry.contains(id)) {
                Some(id) => Err(HssError::config(format!("{owner} names unknown step `{id}`"))),
                None => Ok(()),
            }
        };
        check("run", &self.config.run)?;
        for (id, store) in self.config.effective_stores() {
            check(&format!("store `{id}` run"), &store.run)?;
            check(&format!("store `{id}` skip"), &store.skip)?;
        }
        Ok(())
    }
}

/// Run a build with the built-in steps and stores.
pub async fn build(
    config: BuildConfig,
    options: BuildOptions,
    progress: Arc<dyn BuildProgress>,
) -> Result<BuildResult> {
    Builder::new(config).build(options, progress).await
}

/// Remove the whole cache tree when the build hash no longer matches.
async fn reset_stale_cache(config: &BuildConfig) -> Result<()> {
    let path = config.cache_dir.join(BUILD_HASH_FILE);
    let recorded = match read_json::<BuildHashRecord>(&path) {
        Ok(recorded) => recorded,
        Err(e) => {
            warn!(error = %e, "unreadable build hash, treating as changed");
            None
        }
    };
    let Some(recorded) = recorded else {
        return Ok(());
    };
    if recorded.hash == config.build_hash() {
        return Ok(());
    }
    info!(cache_dir = %config.cache_dir.display(), "build configuration changed, clearing cache");
    remove_dir(&config.cache_dir).await
}

async fn remove_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HssError::io(dir, e)),
    }
}

pub(crate) fn build_hash_record(config: &BuildConfig) -> impl Serialize {
    BuildHashRecord {
        hash: config.build_hash(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_phases_always_run() {
        let options = BuildOptions {
            phases: Some(vec![Phase::Extract]),
            ..Default::default()
        };
        assert!(options.runs(Phase::ParseStores));
        assert!(options.runs(Phase::LoadStores));
        assert!(options.runs(Phase::SaveFiles));
        assert!(options.runs(Phase::Extract));
        assert!(!options.runs(Phase::Enrich));
        assert!(!options.runs(Phase::WarmRemote));
    }

    #[test]
    fn no_emit_skips_output_phases() {
        let options = BuildOptions {
            emit: false,
            ..Default::default()
        };
        assert!(!options.runs(Phase::Emit));
        assert!(!options.runs(Phase::BuildIndices));
        assert!(options.runs(Phase::Enrich));
    }

    #[test]
    fn exact_skips_indices() {
        let options = BuildOptions {
            exact: Some("manifests/demo".into()),
            ..Default::default()
        };
        assert!(options.runs(Phase::Emit));
        assert!(!options.runs(Phase::BuildIndices));
    }

    #[tokio::test]
    async fn unknown_step_in_run_list_is_config_error() {
        let config = BuildConfig {
            run: vec!["extract-nothing".into()],
            ..Default::default()
        };
        let err = Builder::new(config)
            .build(BuildOptions::default(), Arc::new(crate::SilentProgress))
            .await
            .unwrap_err();
        assert!(matches!(err, HssError::Config { .. }));
    }
}
