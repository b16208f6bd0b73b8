//! Persistent cache of IIIF document types for files on disk.
//!
//! Keyed by absolute path; an entry is reused while the file signature is
//! unchanged, so unchanged files are never re-parsed just to learn their type.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use hss_cache::{FileSignature, file_signature};
use hss_shared::json::{read_json, write_json};
use hss_shared::{ResourceType, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileTypeEntry {
    signature: FileSignature,
    /// `None` for JSON that is not a Manifest or Collection.
    #[serde(rename = "type")]
    resource_type: Option<ResourceType>,
}

#[derive(Debug)]
pub struct FileTypeCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, FileTypeEntry>>,
    dirty: AtomicBool,
}

impl FileTypeCache {
    pub fn load(cache_dir: &Path) -> Self {
        let path = cache_dir.join("_stores").join("file-types.json");
        let entries = match read_json(&path) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding file type cache");
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    /// Resource type of the JSON file at `file`, peeking at `type`/`@type`
    /// only when the file changed since it was last seen.
    pub fn resolve(&self, file: &Path) -> Option<ResourceType> {
        let absolute = std::path::absolute(file).unwrap_or_else(|_| file.to_path_buf());
        let key = absolute.to_string_lossy().to_string();
        let signature = file_signature(&absolute)?;

        {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get(&key) {
                if entry.signature == signature {
                    return entry.resource_type;
                }
            }
        }

        let resource_type = peek_type(&absolute);
        debug!(path = %key, ?resource_type, "resolved file type");
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            FileTypeEntry {
                signature,
                resource_type,
            },
        );
        self.dirty.store(true, Ordering::SeqCst);
        resource_type
    }

    pub fn save(&self) -> Result<bool> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        write_json(&self.path, &*entries)?;
        Ok(true)
    }
}

fn peek_type(path: &Path) -> Option<ResourceType> {
    let content = std::fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&content).ok()?;
    hss_shared::document::doc_type(&value).resource_type()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn caches_types_until_file_changes() {
        let root = std::env::temp_dir().join(format!("hss-filetypes-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&root).unwrap();
        let file = root.join("demo.json");
        std::fs::write(&file, r#"{"type": "Manifest"}"#).unwrap();

        let cache = FileTypeCache::load(&root.join("cache"));
        assert_eq!(cache.resolve(&file), Some(ResourceType::Manifest));
        assert!(cache.save().unwrap());

        let reloaded = FileTypeCache::load(&root.join("cache"));
        assert_eq!(reloaded.resolve(&file), Some(ResourceType::Manifest));
        assert!(!reloaded.save().unwrap());

        std::fs::write(&file, r#"{"@type": "sc:Collection", "manifests": []}"#).unwrap();
        assert_eq!(reloaded.resolve(&file), Some(ResourceType::Collection));
        assert!(reloaded.save().unwrap());
    }

    #[test]
    fn non_iiif_json_has_no_type() {
        let root = std::env::temp_dir().join(format!("hss-filetypes-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&root).unwrap();
        let file = root.join("links.json");
        std::fs::write(&file, r#"{"links": []}"#).unwrap();
        assert_eq!(FileTypeCache::load(&root).resolve(&file), None);
    }
}
