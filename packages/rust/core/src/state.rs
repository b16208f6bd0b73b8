//! Mutable state threaded through the phases of one build.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use hss_cache::{LinkerCache, ResourceCache};
use hss_fetch::WarmReport;
use hss_shared::{
    ActiveResource, BuildConfig, HssError, ParsedResource, ResourceType, Result, StoreConfig,
    resolve_options, resolve_steps,
};
use hss_stores::{FileTypeCache, Store, StoreContext};

use crate::api::ResourceLookup;
use crate::build::BuildOptions;
use crate::progress::{BuildProgress, Phase, PhaseStats};
use crate::step::{Step, StepContext, StepKind, StepRegistry};

/// Key in a resource's `caches` document describing its source content.
pub(crate) const CONTENT_CACHE_KEY: &str = "_content";

/// A configured store, ready to use.
pub(crate) struct StoreHandle {
    pub config: StoreConfig,
    pub store: Arc<dyn Store>,
    pub ctx: StoreContext,
}

pub(crate) struct BuildState {
    pub config: Arc<BuildConfig>,
    pub options: BuildOptions,
    pub registry: StepRegistry,
    pub step_ctx: StepContext,
    pub progress: Arc<dyn BuildProgress>,
    pub stores: BTreeMap<String, StoreHandle>,
    pub file_types: Arc<FileTypeCache>,
    /// Output of parse-stores, across every store.
    pub parsed: Vec<ParsedResource>,
    /// Output of load-stores.
    pub resources: Arc<Vec<ActiveResource>>,
    pub caches: HashMap<String, Arc<ResourceCache>>,
    pub lookup: Arc<ResourceLookup>,
    /// Global step configuration after `configure`, keyed by step id.
    pub configured: HashMap<String, Value>,
    pub linker_caches: HashMap<String, Arc<LinkerCache>>,
    /// Named collection -> member slugs.
    pub collections: Mutex<BTreeMap<String, BTreeSet<String>>>,
    /// Failures that leave the output incomplete.
    pub failures: Vec<String>,
    /// Degraded but complete: warming misses and non-strict enrichment.
    pub warnings: Vec<String>,
    pub stats: Vec<(Phase, PhaseStats)>,
    pub warm: Option<WarmReport>,
}

impl BuildState {
    pub fn store(&self, id: &str) -> Result<&StoreHandle> {
        self.stores
            .get(id)
            .ok_or_else(|| HssError::config(format!("unknown store `{id}`")))
    }

    /// Resource concurrency of the step phases.
    pub fn concurrency(&self) -> usize {
        self.options
            .concurrency
            .unwrap_or(self.config.concurrency.resources)
            .max(1)
    }

    pub fn canvas_concurrency(&self) -> usize {
        self.options
            .canvas_concurrency
            .unwrap_or(self.config.concurrency.canvases)
            .max(1)
    }

    pub fn cache(&self, slug: &str) -> Option<&Arc<ResourceCache>> {
        self.caches.get(slug)
    }

    /// Resources the step phases and emit work on: every loaded resource,
    /// or only the `exact` one.
    pub fn targets(&self) -> Vec<&ActiveResource> {
        self.resources
            .iter()
            .filter(|r| match &self.options.exact {
                Some(slug) => r.slug() == slug,
                None => true,
            })
            .collect()
    }

    /// Ordered steps of `kind` that run on `resource`, split into steps on
    /// the resource itself and steps on each of its canvases.
    pub fn steps_for(
        &self,
        resource: &ActiveResource,
        kind: StepKind,
    ) -> (Vec<Arc<dyn Step>>, Vec<Arc<dyn Step>>) {
        let Some(handle) = self.stores.get(&resource.parsed.store_id) else {
            return (Vec::new(), Vec::new());
        };
        let ids = resolve_steps(
            &self.config.run,
            &handle.config.skip,
            &handle.config.run,
            &self.registry.ids(),
        );
        let steps: Vec<Arc<dyn Step>> = ids
            .iter()
            .filter_map(|id| self.registry.get(id))
            .filter(|step| step.kind() == kind)
            .collect();

        let own = steps
            .iter()
            .filter(|step| step.types().contains(&resource.resource_type()))
            .cloned()
            .collect();
        let canvas = if kind != StepKind::Link && resource.resource_type() == ResourceType::Manifest
        {
            steps
                .iter()
                .filter(|step| step.types().contains(&ResourceType::Canvas))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        (own, canvas)
    }

    /// Effective configuration of `step` for `resource`: global, then
    /// store, then resource layer.
    pub fn options_for(&self, step: &dyn Step, resource: &ActiveResource) -> Value {
        let global = self.configured.get(step.id());
        let (store, local) = self
            .stores
            .get(&resource.parsed.store_id)
            .map(|h| h.config.step_layers(step.id(), resource.slug()))
            .unwrap_or((None, None));
        resolve_options(&[global, store, local])
    }

    /// Cache facade for a collector key: a slug, or `<slug>/canvases/<n>`.
    pub fn cache_for_key(&self, key: &str) -> Option<Arc<ResourceCache>> {
        if let Some(cache) = self.caches.get(key) {
            return Some(cache.clone());
        }
        let (slug, index) = key.rsplit_once("/canvases/")?;
        let index = index.parse().ok()?;
        self.caches.get(slug).map(|c| Arc::new(c.canvas(index)))
    }

    pub fn add_to_collections(&self, slug: &str, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        for name in names {
            collections
                .entry(name.clone())
                .or_default()
                .insert(slug.to_string());
        }
    }

    /// Public URL of a resource's emitted document.
    pub fn output_url(&self, slug: &str, resource_type: ResourceType) -> String {
        format!(
            "{}/{slug}/{}",
            self.step_ctx.server_url(),
            resource_type.output_file()
        )
    }

    /// Where other documents should point for `resource`: its emitted copy
    /// when it is saved to disk, its source id otherwise.
    pub fn public_id(&self, resource: &ActiveResource) -> String {
        if resource.parsed.save_to_disk {
            self.output_url(resource.slug(), resource.resource_type())
        } else {
            resource.id.clone()
        }
    }

    pub fn record_stats(&mut self, phase: Phase, stats: PhaseStats) {
        self.stats.push((phase, stats));
    }

    pub fn sitemap(&self) -> BTreeMap<String, Value> {
        self.parsed
            .iter()
            .map(|r| {
                (
                    r.slug.clone(),
                    json!({ "type": r.resource_type, "source": r.source }),
                )
            })
            .collect()
    }
}
