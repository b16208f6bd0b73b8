//! The store contract and helpers shared by every store type.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use hss_cache::{FileSignature, ResourceCache, file_signature};
use hss_fetch::RequestCache;
use hss_shared::{
    HssError, ObjectGraph, ParsedResource, Result, SlugTemplate, SourceDescriptor, StoreConfig,
};

use crate::file_types::FileTypeCache;

/// Key in a resource's `caches` document holding what the store loaded.
pub const LOAD_CACHE_KEY: &str = "_load";

/// Per-store services handed to every store call.
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub store_id: String,
    pub cache_dir: PathBuf,
    /// Request cache of this store.
    pub requests: Arc<RequestCache>,
    pub file_types: Arc<FileTypeCache>,
    pub templates: Arc<Vec<SlugTemplate>>,
    /// Concurrency for remote discovery.
    pub concurrency: usize,
}

/// A loaded document and what the build needs to know about it.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// Canonical id of the document as found at its source.
    pub id: String,
    pub graph: ObjectGraph,
    pub sub_resources: usize,
}

/// A configured resource origin.
#[async_trait]
pub trait Store: Send + Sync {
    /// The `type` string this store is registered under.
    fn store_type(&self) -> &'static str;

    /// Enumerate the resources this store provides. Run every build.
    async fn parse(&self, config: &StoreConfig, ctx: &StoreContext) -> Result<Vec<ParsedResource>>;

    /// Whether the cached graph of `resource` is stale.
    async fn invalidate(
        &self,
        config: &StoreConfig,
        resource: &ParsedResource,
        cache: &ResourceCache,
        ctx: &StoreContext,
    ) -> Result<bool>;

    /// Read the document. `Ok(None)` when the resource no longer exists.
    async fn load(
        &self,
        config: &StoreConfig,
        resource: &ParsedResource,
        cache: &ResourceCache,
        ctx: &StoreContext,
    ) -> Result<Option<LoadResult>>;
}

// ---------------------------------------------------------------------------
// Source helpers
// ---------------------------------------------------------------------------

/// Read a JSON document from disk. `Ok(None)` when the file is gone.
pub(crate) async fn read_disk_document(file_path: &str) -> Result<Option<Value>> {
    let content = match tokio::fs::read_to_string(file_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HssError::io(file_path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| HssError::parse(format!("{file_path}: {e}")))
}

/// True when the file's signature differs from the one recorded at load.
pub(crate) fn disk_changed(file_path: &str, cache: &ResourceCache) -> bool {
    let current = file_signature(Path::new(file_path));
    let recorded = cache
        .caches
        .get_key(LOAD_CACHE_KEY)
        .and_then(|v| v.get("signature").cloned())
        .and_then(|v| serde_json::from_value::<FileSignature>(v).ok());
    match (current, recorded) {
        (Some(current), Some(recorded)) => current != recorded,
        _ => true,
    }
}

/// Load a disk source and record its signature for later invalidation.
pub(crate) async fn load_disk(
    file_path: &str,
    fallback_id: &str,
    cache: &ResourceCache,
) -> Result<Option<LoadResult>> {
    let Some(doc) = read_disk_document(file_path).await? else {
        debug!(file_path, "source file is gone");
        return Ok(None);
    };
    if let Some(signature) = file_signature(Path::new(file_path)) {
        cache
            .caches
            .set(LOAD_CACHE_KEY, json!({ "signature": signature }));
    }
    Ok(Some(into_result(doc, fallback_id)))
}

pub(crate) fn into_result(doc: Value, fallback_id: &str) -> LoadResult {
    let graph = ObjectGraph::new(doc);
    LoadResult {
        id: graph.id().unwrap_or(fallback_id).to_string(),
        sub_resources: graph.sub_resource_count(),
        graph,
    }
}

/// Disk path of a source, if it is read from disk.
pub(crate) fn disk_path(resource: &ParsedResource) -> Option<&str> {
    match &resource.source {
        SourceDescriptor::Disk { file_path, .. } => Some(file_path),
        SourceDescriptor::Remote { .. } => None,
    }
}
