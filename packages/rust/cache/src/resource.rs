//! Per-resource cache facade.
//!
//! Layout under `<cache_dir>/<slug>/`:
//! - `meta.json`, `indices.json`, `caches.json`, `search-record.json`
//! - `source.json`: the object graph exactly as loaded from its store
//! - `vault.json`: the object graph after linkers edited it
//! - `files/`: arbitrary files written by steps
//! - `canvases/<n>/`: the same layout for each canvas of a Manifest

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::debug;

use hss_shared::json::{read_json, write_json};
use hss_shared::{ObjectGraph, Result};

use crate::doc::{CacheDoc, MergeMode};

/// Which cache documents were written by [`ResourceCache::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub meta: bool,
    pub indices: bool,
    pub caches: bool,
    pub search: bool,
}

impl SaveReport {
    pub fn any(&self) -> bool {
        self.meta || self.indices || self.caches || self.search
    }
}

/// Lazy, mergeable access to one resource's cache documents and graph.
#[derive(Debug)]
pub struct ResourceCache {
    dir: PathBuf,
    /// Public metadata, emitted as `meta.json`.
    pub meta: CacheDoc,
    /// Facet values, merged by set-union.
    pub indices: CacheDoc,
    /// Per-step invalidation records.
    pub caches: CacheDoc,
    /// Search index fields.
    pub search: CacheDoc,
    did_change: AtomicBool,
}

impl ResourceCache {
    /// Facade for the resource at `<cache_dir>/<slug>`.
    pub fn open(cache_dir: &Path, slug: &str) -> Self {
        Self::at(cache_dir.join(slug))
    }

    pub fn at(dir: PathBuf) -> Self {
        Self {
            meta: CacheDoc::new(dir.join("meta.json"), MergeMode::Replace),
            indices: CacheDoc::new(dir.join("indices.json"), MergeMode::SetUnion),
            caches: CacheDoc::new(dir.join("caches.json"), MergeMode::Replace),
            search: CacheDoc::new(dir.join("search-record.json"), MergeMode::SearchRecord),
            dir,
            did_change: AtomicBool::new(false),
        }
    }

    /// Facade for canvas `index` of this Manifest, persisted independently.
    pub fn canvas(&self, index: usize) -> ResourceCache {
        ResourceCache::at(self.dir.join("canvases").join(index.to_string()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory for files written by steps; copied into the output tree.
    pub fn files_dir(&self) -> PathBuf {
        self.dir.join("files")
    }

    fn vault_path(&self) -> PathBuf {
        self.dir.join("vault.json")
    }

    fn source_path(&self) -> PathBuf {
        self.dir.join("source.json")
    }

    /// Record that the resource's content (not only its metadata) changed.
    pub fn mark_changed(&self) {
        self.did_change.store(true, Ordering::SeqCst);
    }

    pub fn did_change(&self) -> bool {
        self.did_change.load(Ordering::SeqCst)
    }

    /// Both the source and the linked graph are on disk.
    pub fn has_graph(&self) -> bool {
        self.vault_path().exists() && self.source_path().exists()
    }

    /// Linked graph persisted by a previous run. Unreadable graphs count as missing.
    pub fn load_graph(&self) -> Option<ObjectGraph> {
        read_graph(&self.vault_path())
    }

    pub fn save_graph(&self, graph: &ObjectGraph) -> Result<()> {
        write_json(&self.vault_path(), graph.root())
    }

    /// Graph as the store produced it, before any linker ran.
    pub fn load_source(&self) -> Option<ObjectGraph> {
        read_graph(&self.source_path())
    }

    /// Persist a freshly loaded graph as both the source and the linked graph.
    pub fn save_source(&self, graph: &ObjectGraph) -> Result<()> {
        write_json(&self.source_path(), graph.root())?;
        self.save_graph(graph)
    }

    /// Persist every document that was written to and changed.
    pub fn save(&self) -> Result<SaveReport> {
        Ok(SaveReport {
            meta: self.meta.save()?,
            indices: self.indices.save()?,
            caches: self.caches.save()?,
            search: self.search.save()?,
        })
    }
}

fn read_graph(path: &Path) -> Option<ObjectGraph> {
    match read_json::<Value>(path) {
        Ok(Some(value)) if value.is_object() => Some(ObjectGraph::new(value)),
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "discarding cached graph");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn temp_cache() -> PathBuf {
        std::env::temp_dir().join(format!("hss-cache-{}", Uuid::now_v7()))
    }

    #[test]
    fn layout_follows_slug() {
        let root = temp_cache();
        let cache = ResourceCache::open(&root, "manifests/demo");
        assert_eq!(cache.dir(), root.join("manifests/demo"));
        assert_eq!(cache.files_dir(), root.join("manifests/demo/files"));
        assert_eq!(cache.canvas(2).dir(), root.join("manifests/demo/canvases/2"));
        assert_eq!(cache.meta.path(), root.join("manifests/demo/meta.json").as_path());
    }

    #[test]
    fn save_writes_only_touched_documents() {
        let root = temp_cache();
        let cache = ResourceCache::open(&root, "manifests/demo");
        cache.indices.set("date", json!(["1900"]));
        let report = cache.save().unwrap();
        assert!(report.indices);
        assert!(!report.meta && !report.caches && !report.search);
        assert!(!root.join("manifests/demo/meta.json").exists());

        let again = ResourceCache::open(&root, "manifests/demo");
        again.indices.set("date", json!(["1900"]));
        assert!(!again.save().unwrap().any());
    }

    #[test]
    fn graph_roundtrip_and_change_flag() {
        let root = temp_cache();
        let cache = ResourceCache::open(&root, "manifests/demo");
        assert!(cache.load_graph().is_none());
        assert!(!cache.did_change());

        let graph = ObjectGraph::new(json!({"id": "https://x/demo", "type": "Manifest"}));
        cache.save_graph(&graph).unwrap();
        cache.mark_changed();
        assert!(cache.did_change());
        assert_eq!(cache.load_graph(), Some(graph));
    }

    #[test]
    fn source_graph_survives_linked_edits() {
        let root = temp_cache();
        let cache = ResourceCache::open(&root, "manifests/demo");
        let source = ObjectGraph::new(json!({"id": "https://x/demo", "type": "Manifest"}));
        cache.save_source(&source).unwrap();
        assert!(cache.has_graph());

        let linked = ObjectGraph::new(json!({
            "id": "https://x/demo",
            "type": "Manifest",
            "seeAlso": [{"id": "https://see/a.xml"}],
        }));
        cache.save_graph(&linked).unwrap();
        assert_eq!(cache.load_graph(), Some(linked));
        assert_eq!(cache.load_source(), Some(source));
    }
}
