//! Core resource model: parsed resources, active resources, and their sources.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::document::ObjectGraph;
use crate::error::HssError;

// ---------------------------------------------------------------------------
// ResourceType
// ---------------------------------------------------------------------------

/// Kind of document a step or resource deals with.
///
/// Stores only ever produce `Manifest` and `Collection` resources; `Canvas`
/// exists so steps can declare that they run on canvas sub-resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Manifest,
    Collection,
    Canvas,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manifest => "Manifest",
            Self::Collection => "Collection",
            Self::Canvas => "Canvas",
        }
    }

    /// File name used for the rewritten document in the output tree.
    pub fn output_file(&self) -> &'static str {
        match self {
            Self::Collection => "collection.json",
            _ => "manifest.json",
        }
    }

    /// Leading slug segment for resources without an explicit destination.
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            Self::Collection => "collections",
            Self::Manifest => "manifests",
            Self::Canvas => "canvases",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = HssError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Manifest" => Ok(Self::Manifest),
            "Collection" => Ok(Self::Collection),
            "Canvas" => Ok(Self::Canvas),
            other => Err(HssError::validation(format!("unknown resource type `{other}`"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Source & slug provenance
// ---------------------------------------------------------------------------

/// Where a resource's JSON is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceDescriptor {
    Disk {
        /// Path relative to the store root.
        path: String,
        /// Absolute (or cwd-relative) path of the file.
        #[serde(rename = "filePath")]
        file_path: String,
    },
    Remote {
        url: String,
    },
}

/// Which rule produced a resource's slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SlugSource {
    /// Derived from a file path under a disk store.
    File,
    /// Matched a configured slug template.
    Template { name: String },
    /// Default URL-path rule of the remote store.
    Default,
}

// ---------------------------------------------------------------------------
// ParsedResource
// ---------------------------------------------------------------------------

/// Pre-load identity of a resource, recomputed on every run by `Store::parse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResource {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Hierarchical identifier; doubles as output and cache path.
    pub slug: String,
    pub slug_source: SlugSource,
    /// Origin path (disk) or URL (remote).
    pub path: String,
    pub store_id: String,
    pub source: SourceDescriptor,
    /// Whether the rewritten document is written to the output tree.
    pub save_to_disk: bool,
}

// ---------------------------------------------------------------------------
// ActiveResource
// ---------------------------------------------------------------------------

/// Object graph shared by reference between phases of one run.
pub type SharedGraph = Arc<RwLock<ObjectGraph>>;

/// A loaded resource: identity plus canonical id and its object graph.
#[derive(Debug, Clone)]
pub struct ActiveResource {
    pub parsed: ParsedResource,
    /// Canonical id of the document as found at its source.
    pub id: String,
    /// Number of canvases (Manifest) or members (Collection).
    pub sub_resources: usize,
    /// Structural hash of the source document; part of every step fingerprint.
    pub content_hash: String,
    /// Structural hash of each source canvas. Edits made by linkers never
    /// change these.
    pub canvas_hashes: Vec<String>,
    /// True when the store reported a change and the graph was re-read this run.
    pub reloaded: bool,
    pub graph: SharedGraph,
}

impl ActiveResource {
    pub fn slug(&self) -> &str {
        &self.parsed.slug
    }

    pub fn resource_type(&self) -> ResourceType {
        self.parsed.resource_type
    }

    /// Fingerprint basis of canvas `index`: its source hash, or the
    /// document hash paired with the index when none was recorded.
    pub fn canvas_hash(&self, index: usize) -> String {
        self.canvas_hashes.get(index).cloned().unwrap_or_else(|| {
            crate::hash::structural_hash(&serde_json::json!({
                "content": self.content_hash,
                "canvas": index,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_descriptor_serializes_tagged() {
        let disk = SourceDescriptor::Disk {
            path: "demo.json".into(),
            file_path: "content/demo.json".into(),
        };
        let json = serde_json::to_value(&disk).unwrap();
        assert_eq!(json["type"], "disk");
        assert_eq!(json["filePath"], "content/demo.json");

        let remote = SourceDescriptor::Remote {
            url: "https://x/demo".into(),
        };
        let json = serde_json::to_value(&remote).unwrap();
        assert_eq!(json, serde_json::json!({"type": "remote", "url": "https://x/demo"}));
    }

    #[test]
    fn resource_type_paths() {
        assert_eq!(ResourceType::Manifest.output_file(), "manifest.json");
        assert_eq!(ResourceType::Collection.output_file(), "collection.json");
        assert_eq!(ResourceType::Collection.slug_prefix(), "collections");
        assert_eq!("Manifest".parse::<ResourceType>().unwrap(), ResourceType::Manifest);
        assert!("Range".parse::<ResourceType>().is_err());
    }
}
