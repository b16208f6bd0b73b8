//! File signatures used to detect changes to tracked input files.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// mtime + ctime + size of a file, in nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSignature {
    pub mtime: u64,
    pub ctime: u64,
    pub size: u64,
}

/// Signature of `path`, or `None` when it cannot be read.
pub fn file_signature(path: &Path) -> Option<FileSignature> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    Some(FileSignature {
        mtime,
        ctime: change_time(&meta).unwrap_or(mtime),
        size: meta.len(),
    })
}

#[cfg(unix)]
fn change_time(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    let secs = u64::try_from(meta.ctime()).ok()?;
    let nanos = u64::try_from(meta.ctime_nsec()).ok()?;
    Some(secs * 1_000_000_000 + nanos)
}

#[cfg(not(unix))]
fn change_time(meta: &std::fs::Metadata) -> Option<u64> {
    meta.created()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
}

/// Current signatures of `paths`. Missing files map to `None`.
pub fn signatures<'a>(
    paths: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, Option<FileSignature>> {
    paths
        .into_iter()
        .map(|p| (p.to_string(), file_signature(Path::new(p))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn signature_tracks_size_change() {
        let dir = std::env::temp_dir().join(format!("hss-sig-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("links.json");
        std::fs::write(&file, "{}").unwrap();
        let before = file_signature(&file).unwrap();
        assert_eq!(before.size, 2);

        std::fs::write(&file, r#"{"a": 1}"#).unwrap();
        let after = file_signature(&file).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn missing_file_has_no_signature() {
        let sigs = signatures(["/definitely/not/here.json"]);
        assert_eq!(sigs.len(), 1);
        assert!(sigs.values().all(Option::is_none));
    }
}
