//! JSON file helpers shared by the cache and output trees.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{HssError, Result};

/// Read a JSON object from disk.
///
/// A missing file yields an empty object. A corrupt or non-object file is
/// treated as a cache miss: logged and read as empty, to be overwritten on
/// the next write.
pub fn read_object(path: &Path) -> Map<String, Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return Map::new(),
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!(path = %path.display(), "expected a JSON object, ignoring");
            Map::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt JSON document, ignoring");
            Map::new()
        }
    }
}

/// Read and deserialize a JSON file. `Ok(None)` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HssError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| HssError::parse(format!("{}: {e}", path.display())))
}

/// Pretty-print `value` to `path`, creating parent directories.
///
/// Writes to a temp file first and renames it into place so readers never
/// observe a half-written document.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HssError::io(parent, e))?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| HssError::parse(format!("failed to serialize {}: {e}", path.display())))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.json".into());
    let temp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&temp, content).map_err(|e| HssError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| HssError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("hss-json-test-{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn missing_and_corrupt_files_read_as_empty() {
        let dir = temp_dir();
        assert!(read_object(&dir.join("missing.json")).is_empty());

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("corrupt.json"), "{not json").unwrap();
        assert!(read_object(&dir.join("corrupt.json")).is_empty());

        std::fs::write(dir.join("array.json"), "[1, 2]").unwrap();
        assert!(read_object(&dir.join("array.json")).is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn write_then_read() {
        let dir = temp_dir();
        let path = dir.join("nested/doc.json");
        write_json(&path, &json!({"a": 1})).unwrap();
        assert_eq!(read_object(&path).get("a"), Some(&json!(1)));

        let typed: Option<Value> = read_json(&path).unwrap();
        assert_eq!(typed, Some(json!({"a": 1})));
        assert!(read_json::<Value>(&dir.join("nope.json")).unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
