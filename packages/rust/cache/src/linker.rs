//! Persisted per-linker state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use hss_shared::Result;
use hss_shared::json::{read_json, write_json};

use crate::signature::{FileSignature, file_signature};

/// What a linker recorded for one resource on its last run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkerCacheEntry {
    pub config_hash: String,
    #[serde(default)]
    pub tracked_files: BTreeMap<String, FileSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepare_hash: Option<String>,
}

impl LinkerCacheEntry {
    /// True when every tracked file still has its recorded signature.
    pub fn files_unchanged(&self) -> bool {
        self.tracked_files
            .iter()
            .all(|(path, sig)| file_signature(Path::new(path)).as_ref() == Some(sig))
    }
}

/// Entries of one linker keyed by slug, stored at `<cache>/_linkers/<id>.json`.
#[derive(Debug)]
pub struct LinkerCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, LinkerCacheEntry>>,
    dirty: AtomicBool,
}

impl LinkerCache {
    pub fn load(cache_dir: &Path, linker_id: &str) -> Self {
        let path = cache_dir.join("_linkers").join(format!("{linker_id}.json"));
        let entries = match read_json(&path) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding linker cache");
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn get(&self, slug: &str) -> Option<LinkerCacheEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(slug)
            .cloned()
    }

    pub fn set(&self, slug: &str, entry: LinkerCacheEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.get(slug) != Some(&entry) {
            entries.insert(slug.to_string(), entry);
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Write the entries back if any changed this run.
    pub fn save(&self) -> Result<bool> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        write_json(&self.path, &*entries)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn entries_roundtrip_through_disk() {
        let root = std::env::temp_dir().join(format!("hss-linker-{}", Uuid::now_v7()));
        let file = root.join("links.json");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(&file, "{}").unwrap();

        let cache = LinkerCache::load(&root, "link-see-also");
        let mut entry = LinkerCacheEntry {
            config_hash: "abc".into(),
            ..Default::default()
        };
        let path = file.to_string_lossy().to_string();
        entry
            .tracked_files
            .insert(path, file_signature(&file).unwrap());
        cache.set("manifests/demo", entry.clone());
        assert!(cache.save().unwrap());
        assert!(!cache.save().unwrap());

        let reloaded = LinkerCache::load(&root, "link-see-also");
        let stored = reloaded.get("manifests/demo").unwrap();
        assert_eq!(stored, entry);
        assert!(stored.files_unchanged());

        std::fs::write(&file, r#"{"changed": true}"#).unwrap();
        assert!(!stored.files_unchanged());
    }
}
