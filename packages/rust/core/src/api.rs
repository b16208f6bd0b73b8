//! What a step handler sees: a read-only view of the resource and an API
//! for graph access, file tracking, and cross-resource lookups.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use hss_cache::ResourceCache;
use hss_fetch::RequestCache;
use hss_shared::document::doc_id;
use hss_shared::{ActiveResource, HssError, ResourceType, Result, SlugSource, SourceDescriptor};

// ---------------------------------------------------------------------------
// ResourceView
// ---------------------------------------------------------------------------

/// One canvas of a Manifest, as seen by a canvas step.
#[derive(Debug, Clone)]
pub struct CanvasView {
    pub index: usize,
    pub id: String,
    pub document: Value,
}

/// Identity of the resource a handler runs on.
#[derive(Debug, Clone)]
pub struct ResourceView {
    /// Slug of the resource; for canvases, the owning Manifest's slug.
    pub slug: String,
    pub resource_type: ResourceType,
    pub id: String,
    pub store_id: String,
    pub source: SourceDescriptor,
    pub slug_source: SlugSource,
    /// Hash of the source document (or canvas); part of every step fingerprint.
    pub content_hash: String,
    pub canvas: Option<CanvasView>,
}

impl ResourceView {
    pub fn of(resource: &ActiveResource) -> Self {
        Self {
            slug: resource.parsed.slug.clone(),
            resource_type: resource.parsed.resource_type,
            id: resource.id.clone(),
            store_id: resource.parsed.store_id.clone(),
            source: resource.parsed.source.clone(),
            slug_source: resource.parsed.slug_source.clone(),
            content_hash: resource.content_hash.clone(),
            canvas: None,
        }
    }

    pub fn for_canvas(resource: &ActiveResource, index: usize, canvas: &Value) -> Self {
        let id = doc_id(canvas)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}#canvas-{index}", resource.id));
        Self {
            resource_type: ResourceType::Canvas,
            id: id.clone(),
            content_hash: resource.canvas_hash(index),
            canvas: Some(CanvasView {
                index,
                id,
                document: canvas.clone(),
            }),
            ..Self::of(resource)
        }
    }

    /// Key used for this view in phase-wide collectors.
    pub fn key(&self) -> String {
        match &self.canvas {
            Some(canvas) => format!("{}/canvases/{}", self.slug, canvas.index),
            None => self.slug.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceLookup
// ---------------------------------------------------------------------------

/// A Manifest canvas located by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasOwner {
    pub slug: String,
    pub manifest_id: String,
    pub index: usize,
}

/// A resource located by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub slug: String,
    pub resource_type: ResourceType,
}

#[derive(Debug, Default)]
struct CanvasScan {
    /// Resources scanned so far.
    next: usize,
    owners: HashMap<String, CanvasOwner>,
}

/// Cross-resource lookups over every loaded resource of the build.
#[derive(Debug)]
pub struct ResourceLookup {
    resources: Arc<Vec<ActiveResource>>,
    by_id: HashMap<String, usize>,
    by_slug: HashMap<String, usize>,
    canvases: Mutex<CanvasScan>,
}

impl ResourceLookup {
    pub fn new(resources: Arc<Vec<ActiveResource>>) -> Self {
        let by_id = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        let by_slug = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.parsed.slug.clone(), i))
            .collect();
        Self {
            resources,
            by_id,
            by_slug,
            canvases: Mutex::new(CanvasScan::default()),
        }
    }

    pub fn resources(&self) -> &Arc<Vec<ActiveResource>> {
        &self.resources
    }

    pub fn by_id(&self, id: &str) -> Option<&ActiveResource> {
        self.by_id.get(id).map(|&i| &self.resources[i])
    }

    pub fn by_slug(&self, slug: &str) -> Option<&ActiveResource> {
        self.by_slug.get(slug).map(|&i| &self.resources[i])
    }

    /// Which Manifest owns `canvas_id`.
    ///
    /// Manifests are scanned lazily, only as far as needed to answer the
    /// lookup; answers are kept for later calls.
    pub fn canvas_owner(&self, canvas_id: &str) -> Option<CanvasOwner> {
        let mut scan = self.canvases.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(owner) = scan.owners.get(canvas_id) {
            return Some(owner.clone());
        }
        while scan.next < self.resources.len() {
            let resource = &self.resources[scan.next];
            scan.next += 1;
            if resource.resource_type() != ResourceType::Manifest {
                continue;
            }
            let graph = resource.graph.read().unwrap_or_else(|e| e.into_inner());
            for (index, canvas) in graph.canvases().into_iter().enumerate() {
                if let Some(id) = doc_id(canvas) {
                    scan.owners.entry(id.to_string()).or_insert_with(|| CanvasOwner {
                        slug: resource.parsed.slug.clone(),
                        manifest_id: resource.id.clone(),
                        index,
                    });
                }
            }
            drop(graph);
            if let Some(owner) = scan.owners.get(canvas_id) {
                return Some(owner.clone());
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// StepApi
// ---------------------------------------------------------------------------

/// Per-invocation services for a step handler.
pub struct StepApi<'a> {
    resource: &'a ActiveResource,
    cache: &'a ResourceCache,
    parent: Option<&'a ResourceCache>,
    lookup: &'a ResourceLookup,
    requests: &'a RequestCache,
    prepared: Option<Arc<Value>>,
    tracked: Mutex<BTreeSet<String>>,
    editable: bool,
}

impl<'a> StepApi<'a> {
    pub(crate) fn new(
        resource: &'a ActiveResource,
        cache: &'a ResourceCache,
        parent: Option<&'a ResourceCache>,
        lookup: &'a ResourceLookup,
        requests: &'a RequestCache,
        prepared: Option<Arc<Value>>,
    ) -> Self {
        Self {
            resource,
            cache,
            parent,
            lookup,
            requests,
            prepared,
            tracked: Mutex::new(BTreeSet::new()),
            editable: false,
        }
    }

    /// Allow [`modify`](Self::modify). Only linkers edit documents: the link
    /// phase can rewind a graph to its source and replay every linker, which
    /// it could not do for edits made later.
    pub(crate) fn linking(mut self) -> Self {
        self.editable = true;
        self
    }

    /// A copy of the resource's (for canvases, the owning Manifest's) document.
    pub fn document(&self) -> Value {
        self.read(Value::clone)
    }

    pub fn read<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        let graph = self.resource.graph.read().unwrap_or_else(|e| e.into_inner());
        f(graph.root())
    }

    /// Mutate the document. The graph is persisted at the end of the build.
    /// Fails outside the link phase.
    pub fn modify<R>(&self, f: impl FnOnce(&mut Value) -> R) -> Result<R> {
        if !self.editable {
            return Err(HssError::validation(
                "only linkers may modify a resource document",
            ));
        }
        let result = {
            let mut graph = self.resource.graph.write().unwrap_or_else(|e| e.into_inner());
            f(graph.root_mut())
        };
        self.parent.unwrap_or(self.cache).mark_changed();
        Ok(result)
    }

    /// Register an input file; the step re-runs when its signature changes.
    pub fn track_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(absolute.to_string_lossy().to_string());
    }

    pub(crate) fn tracked_files(&self) -> Vec<String> {
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Directory for files copied next to the emitted document.
    pub fn files_dir(&self) -> PathBuf {
        self.parent.unwrap_or(self.cache).files_dir()
    }

    /// Cache facade of the resource (or canvas) being processed.
    pub fn cache(&self) -> &ResourceCache {
        self.cache
    }

    /// The owning Manifest's facade, for canvas steps.
    pub fn parent_cache(&self) -> Option<&ResourceCache> {
        self.parent
    }

    /// Request cache of the resource's store.
    pub fn requests(&self) -> &RequestCache {
        self.requests
    }

    /// Linker lookup structure built by `prepare`.
    pub fn prepared(&self) -> Option<&Value> {
        self.prepared.as_deref()
    }

    pub fn resolve_by_id(&self, id: &str) -> Option<ResolvedRef> {
        self.lookup.by_id(id).map(|r| ResolvedRef {
            slug: r.parsed.slug.clone(),
            resource_type: r.parsed.resource_type,
        })
    }

    pub fn canvas_owner(&self, canvas_id: &str) -> Option<CanvasOwner> {
        self.lookup.canvas_owner(canvas_id)
    }

    /// Split a composite `id#fragment` reference.
    pub fn split_ref(reference: &str) -> (&str, Option<&str>) {
        match reference.split_once('#') {
            Some((id, fragment)) => (id, Some(fragment)),
            None => (reference, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    use hss_shared::{ObjectGraph, ParsedResource};
    use serde_json::json;

    fn manifest(slug: &str, id: &str, canvases: &[&str]) -> ActiveResource {
        let items: Vec<Value> = canvases
            .iter()
            .map(|c| json!({"id": c, "type": "Canvas"}))
            .collect();
        let graph = ObjectGraph::new(json!({"id": id, "type": "Manifest", "items": items}));
        ActiveResource {
            parsed: ParsedResource {
                resource_type: ResourceType::Manifest,
                slug: slug.into(),
                slug_source: SlugSource::File,
                path: format!("{slug}.json"),
                store_id: "content".into(),
                source: SourceDescriptor::Disk {
                    path: format!("{slug}.json"),
                    file_path: format!("content/{slug}.json"),
                },
                save_to_disk: true,
            },
            id: id.into(),
            sub_resources: canvases.len(),
            content_hash: graph.content_hash(),
            canvas_hashes: graph.canvases().into_iter().map(|c| hss_shared::structural_hash(c)).collect(),
            reloaded: true,
            graph: Arc::new(RwLock::new(graph)),
        }
    }

    #[test]
    fn split_ref_handles_fragments() {
        assert_eq!(StepApi::split_ref("https://x/c1#xywh=0,0,10,10"), ("https://x/c1", Some("xywh=0,0,10,10")));
        assert_eq!(StepApi::split_ref("https://x/m"), ("https://x/m", None));
    }

    #[test]
    fn canvas_owner_scans_lazily() {
        let resources = Arc::new(vec![
            manifest("manifests/a", "https://x/a", &["https://x/a/c0", "https://x/a/c1"]),
            manifest("manifests/b", "https://x/b", &["https://x/b/c0"]),
        ]);
        let lookup = ResourceLookup::new(resources);

        let owner = lookup.canvas_owner("https://x/a/c1").unwrap();
        assert_eq!(owner.slug, "manifests/a");
        assert_eq!(owner.index, 1);
        assert_eq!(lookup.canvases.lock().unwrap().next, 1);

        assert_eq!(lookup.canvas_owner("https://x/b/c0").unwrap().slug, "manifests/b");
        assert!(lookup.canvas_owner("https://x/none").is_none());
        assert_eq!(lookup.by_id("https://x/b").unwrap().parsed.slug, "manifests/b");
    }

    #[test]
    fn canvas_view_key_is_sub_path() {
        let resource = manifest("manifests/a", "https://x/a", &["https://x/a/c0"]);
        let canvas = json!({"id": "https://x/a/c0", "type": "Canvas"});
        let view = ResourceView::for_canvas(&resource, 0, &canvas);
        assert_eq!(view.resource_type, ResourceType::Canvas);
        assert_eq!(view.key(), "manifests/a/canvases/0");
        assert_eq!(view.id, "https://x/a/c0");
    }

    #[test]
    fn only_linking_api_may_modify() {
        use crate::steps::testing::Fixture;

        let resource = manifest("manifests/a", "https://x/a", &[]);
        let fx = Fixture::new(vec![resource.clone()]);

        let api = StepApi::new(&resource, &fx.cache, None, &fx.lookup, &fx.requests, None);
        assert!(api.modify(|doc| doc["label"] = json!("x")).is_err());
        assert!(api.document().get("label").is_none());
        assert!(!fx.cache.did_change());

        let api = api.linking();
        api.modify(|doc| doc["label"] = json!("x")).unwrap();
        assert_eq!(api.document()["label"], "x");
        assert!(fx.cache.did_change());
    }

    #[test]
    fn canvas_fingerprint_uses_the_source_canvas() {
        let resource = manifest("manifests/a", "https://x/a", &["https://x/a/c0"]);
        let source = json!({"id": "https://x/a/c0", "type": "Canvas"});
        let linked = json!({
            "id": "https://x/a/c0",
            "type": "Canvas",
            "seeAlso": [{"id": "https://see/c0.xml"}],
        });
        let before = ResourceView::for_canvas(&resource, 0, &source);
        let after = ResourceView::for_canvas(&resource, 0, &linked);
        assert_eq!(before.content_hash, after.content_hash);
        assert_eq!(before.content_hash, hss_shared::structural_hash(&source));

        // A canvas beyond the recorded hashes still gets a stable basis.
        let extra = ResourceView::for_canvas(&resource, 3, &source);
        assert_eq!(extra.content_hash, resource.canvas_hash(3));
        assert_ne!(extra.content_hash, before.content_hash);
    }
}
