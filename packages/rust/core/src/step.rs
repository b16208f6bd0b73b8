//! Step contract and registry.
//!
//! A step is a named, typed, cacheable unit of per-resource work run in one
//! of the Link, Extract, or Enrich phases.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use hss_cache::ResourceCache;
use hss_shared::{BuildConfig, ResourceType, Result};

use crate::api::{ResourceView, StepApi};

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

/// The phase a step runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Link,
    Extract,
    Enrich,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Extract => "extract",
            Self::Enrich => "enrich",
        }
    }
}

// ---------------------------------------------------------------------------
// StepOutput
// ---------------------------------------------------------------------------

/// What a handler produced for one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub indices: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub caches: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub search: Map<String, Value>,
    /// Named collections the resource should be listed in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<String>,
    /// Opaque payload handed to the step's `collect` post-pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<Value>,
    /// The handler mutated the resource content.
    #[serde(default)]
    pub did_change: bool,
}

impl StepOutput {
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    pub fn with_index(mut self, key: &str, values: Vec<String>) -> Self {
        self.indices.insert(key.to_string(), Value::from(values));
        self
    }

    pub fn with_search(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.search.insert(key.to_string(), value.into());
        self
    }

    pub fn with_temp(mut self, temp: Value) -> Self {
        self.temp = Some(temp);
        self
    }

    pub fn in_collection(mut self, name: impl Into<String>) -> Self {
        self.collections.push(name.into());
        self
    }

    /// Merge the output into a resource's cache documents.
    pub fn apply(&self, cache: &ResourceCache) {
        cache.meta.write(self.meta.clone());
        cache.indices.write(self.indices.clone());
        cache.caches.write(self.caches.clone());
        cache.search.write(self.search.clone());
        if self.did_change {
            cache.mark_changed();
        }
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Build-wide context for the per-build hooks (`configure`, `prepare`, `collect`).
#[derive(Debug, Clone)]
pub struct StepContext {
    pub config: Arc<BuildConfig>,
    pub cache_dir: PathBuf,
    pub build_dir: PathBuf,
}

impl StepContext {
    pub fn server_url(&self) -> &str {
        self.config.server.url.trim_end_matches('/')
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Step: Send + Sync {
    /// Globally unique id; cache key and run-list token.
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    fn kind(&self) -> StepKind;

    /// Resource types the step applies to. `Canvas` steps run once per
    /// canvas of every Manifest (Extract and Enrich only).
    fn types(&self) -> &[ResourceType];

    /// Code fingerprint; changing it invalidates every cached result.
    fn fingerprint(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// Normalize the global configuration once per build.
    fn configure(&self, _ctx: &StepContext, config: Value) -> Result<Value> {
        Ok(config)
    }

    /// Custom staleness check. `None` falls back to the structural hash of
    /// config, code fingerprint, and tracked files.
    async fn invalidate(
        &self,
        _resource: &ResourceView,
        _api: &StepApi<'_>,
        _config: &Value,
    ) -> Result<Option<bool>> {
        Ok(None)
    }

    /// Linkers only: build a shared lookup once per distinct config.
    async fn prepare(&self, _ctx: &StepContext, _config: &Value) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn handler(
        &self,
        resource: &ResourceView,
        api: &StepApi<'_>,
        config: &Value,
    ) -> Result<StepOutput>;

    /// Post-pass over every `temp` payload of the phase, keyed by slug.
    /// Returned outputs are merged into the named resources.
    async fn collect(
        &self,
        _temp: &BTreeMap<String, Value>,
        _ctx: &StepContext,
        _config: &Value,
    ) -> Result<BTreeMap<String, StepOutput>> {
        Ok(BTreeMap::new())
    }

    /// Called once at the end of the build.
    async fn close(&self, _config: &Value) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StepRegistry
// ---------------------------------------------------------------------------

/// Ordered set of steps, keyed by id.
///
/// Registration order is the declared order that run-lists are sorted into.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: Vec<Arc<dyn Step>>,
}

impl StepRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a step, replacing any step with the same id in place.
    pub fn upsert(&mut self, step: Arc<dyn Step>) {
        match self.steps.iter().position(|s| s.id() == step.id()) {
            Some(index) => self.steps[index] = step,
            None => self.steps.push(step),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Step>> {
        self.steps.iter().find(|s| s.id() == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.iter().any(|s| s.id() == id)
    }

    /// Step ids in declared order.
    pub fn ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.id().to_string()).collect()
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(&'static str, StepKind);

    #[async_trait]
    impl Step for Named {
        fn id(&self) -> &str {
            self.0
        }
        fn kind(&self) -> StepKind {
            self.1
        }
        fn types(&self) -> &[ResourceType] {
            &[ResourceType::Manifest]
        }
        async fn handler(
            &self,
            _resource: &ResourceView,
            _api: &StepApi<'_>,
            _config: &Value,
        ) -> Result<StepOutput> {
            Ok(StepOutput::default())
        }
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut registry = StepRegistry::new();
        registry.upsert(Arc::new(Named("a", StepKind::Extract)));
        registry.upsert(Arc::new(Named("b", StepKind::Extract)));
        registry.upsert(Arc::new(Named("a", StepKind::Enrich)));

        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().kind(), StepKind::Enrich);
        assert!(!registry.contains("c"));
    }

    #[test]
    fn output_builders_fill_documents() {
        let output = StepOutput::default()
            .with_meta("label", "Demo")
            .with_index("date", vec!["1900".into()])
            .with_search("label", "Demo")
            .in_collection("highlights");
        assert_eq!(output.meta["label"], "Demo");
        assert_eq!(output.indices["date"], json!(["1900"]));
        assert_eq!(output.collections, vec!["highlights"]);
    }
}
