//! One lazily-loaded, write-behind cache document.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};

use hss_shared::Result;
use hss_shared::json::{read_object, write_json};

/// How writes combine with values already present for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Last writer wins per key.
    Replace,
    /// Array values are unioned, preserving first-seen order.
    SetUnion,
    /// Scalars last-writer-wins; arrays append, deduplicated by `id`.
    SearchRecord,
}

#[derive(Debug)]
enum DocState {
    Unloaded,
    Clean(Map<String, Value>),
    Dirty {
        base: Map<String, Value>,
        writes: Map<String, Value>,
    },
}

/// A JSON object persisted at `path`, read on first access and written back
/// only if a write this run changed it.
#[derive(Debug)]
pub struct CacheDoc {
    path: PathBuf,
    mode: MergeMode,
    state: Mutex<DocState>,
}

impl CacheDoc {
    pub fn new(path: PathBuf, mode: MergeMode) -> Self {
        Self {
            path,
            mode,
            state: Mutex::new(DocState::Unloaded),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, DocState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, DocState::Unloaded) {
            *state = DocState::Clean(read_object(&self.path));
        }
        state
    }

    /// The persisted document merged with every write made this run.
    pub fn get(&self) -> Map<String, Value> {
        match &*self.lock() {
            DocState::Clean(base) => base.clone(),
            DocState::Dirty { base, writes } => {
                let mut merged = base.clone();
                merge_into(&mut merged, writes, self.mode);
                merged
            }
            DocState::Unloaded => Map::new(),
        }
    }

    pub fn get_key(&self, key: &str) -> Option<Value> {
        self.get().remove(key)
    }

    /// Record `values` to be merged into the document.
    pub fn write(&self, values: Map<String, Value>) {
        if values.is_empty() {
            return;
        }
        let mut state = self.lock();
        let current = std::mem::replace(&mut *state, DocState::Unloaded);
        *state = match current {
            DocState::Clean(base) => DocState::Dirty {
                base,
                writes: values,
            },
            DocState::Dirty { base, mut writes } => {
                merge_into(&mut writes, &values, self.mode);
                DocState::Dirty { base, writes }
            }
            DocState::Unloaded => DocState::Dirty {
                base: read_object(&self.path),
                writes: values,
            },
        };
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        let mut values = Map::new();
        values.insert(key.into(), value);
        self.write(values);
    }

    pub fn is_dirty(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            DocState::Dirty { .. }
        )
    }

    /// Persist pending writes. Returns whether the file was written.
    ///
    /// Writes that leave the document unchanged are dropped without touching disk.
    pub fn save(&self) -> Result<bool> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let DocState::Dirty { base, writes } = &*state else {
            return Ok(false);
        };
        let mut merged = base.clone();
        merge_into(&mut merged, writes, self.mode);
        let changed = merged != *base;
        if changed {
            write_json(&self.path, &merged)?;
        }
        *state = DocState::Clean(merged);
        Ok(changed)
    }
}

// ---------------------------------------------------------------------------
// Merge rules
// ---------------------------------------------------------------------------

/// Merge `incoming` into `target` key by key according to `mode`.
pub fn merge_into(target: &mut Map<String, Value>, incoming: &Map<String, Value>, mode: MergeMode) {
    for (key, value) in incoming {
        let merged = match (mode, target.remove(key)) {
            (MergeMode::Replace, _) | (_, None) => value.clone(),
            (MergeMode::SetUnion, Some(existing)) => union(existing, value),
            (MergeMode::SearchRecord, Some(existing)) => match (existing, value) {
                (Value::Array(mut items), Value::Array(more)) => {
                    for item in more {
                        if !items.iter().any(|i| same_entry(i, item)) {
                            items.push(item.clone());
                        }
                    }
                    Value::Array(items)
                }
                (_, scalar) => scalar.clone(),
            },
        };
        target.insert(key.clone(), merged);
    }
}

fn union(existing: Value, incoming: &Value) -> Value {
    let mut items = into_list(existing);
    for item in into_list(incoming.clone()) {
        if !items.contains(&item) {
            items.push(item);
        }
    }
    Value::Array(items)
}

fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn same_entry(a: &Value, b: &Value) -> bool {
    match (a.get("id"), b.get("id")) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("hss-doc-{}", Uuid::now_v7()))
            .join(name)
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn union_never_overwrites() {
        let doc = CacheDoc::new(temp_path("indices.json"), MergeMode::SetUnion);
        doc.write(obj(json!({"date": ["1900"]})));
        doc.write(obj(json!({"date": ["1901", "1900"]})));
        assert_eq!(doc.get()["date"], json!(["1900", "1901"]));
    }

    #[test]
    fn search_record_appends_by_id() {
        let mut target = obj(json!({"title": "a", "refs": [{"id": "x", "n": 1}]}));
        merge_into(
            &mut target,
            &obj(json!({"title": "b", "refs": [{"id": "x", "n": 2}, {"id": "y"}]})),
            MergeMode::SearchRecord,
        );
        assert_eq!(target["title"], "b");
        assert_eq!(target["refs"], json!([{"id": "x", "n": 1}, {"id": "y"}]));
    }

    #[test]
    fn persists_only_changes() {
        let path = temp_path("meta.json");
        let doc = CacheDoc::new(path.clone(), MergeMode::Replace);
        assert!(!doc.save().unwrap());
        assert!(!path.exists());

        doc.set("label", json!("Demo"));
        assert!(doc.is_dirty());
        assert!(doc.save().unwrap());
        assert!(!doc.is_dirty());

        let reopened = CacheDoc::new(path.clone(), MergeMode::Replace);
        assert_eq!(reopened.get_key("label"), Some(json!("Demo")));
        reopened.set("label", json!("Demo"));
        assert!(!reopened.save().unwrap());
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let path = temp_path("caches.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let doc = CacheDoc::new(path.clone(), MergeMode::Replace);
        assert!(doc.get().is_empty());
        doc.set("step", json!({"hash": "abc"}));
        assert!(doc.save().unwrap());
        let healed: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(healed["step"]["hash"], "abc");
    }
}
