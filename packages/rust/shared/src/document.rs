//! Accessors over raw IIIF Presentation JSON (versions 2 and 3).
//!
//! Parsing the full object model is out of scope; the pipeline only needs a
//! handful of fields, and these helpers read them the same way regardless of
//! whether a document uses `id`/`type` or `@id`/`@type`.

use serde_json::Value;

use crate::hash::structural_hash;
use crate::types::ResourceType;

// ---------------------------------------------------------------------------
// Type tokens
// ---------------------------------------------------------------------------

/// Normalized document type token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Manifest,
    Collection,
    CollectionPage,
    Canvas,
    Other,
}

impl DocType {
    /// The resource type a store should emit for this token, if any.
    pub fn resource_type(&self) -> Option<ResourceType> {
        match self {
            Self::Manifest => Some(ResourceType::Manifest),
            Self::Collection => Some(ResourceType::Collection),
            _ => None,
        }
    }
}

/// Normalize a namespaced or bare type token (`sc:Manifest`, `Manifest`,
/// `as:CollectionPage`, `http://iiif.io/api/presentation/3#Collection`).
pub fn normalize_type(token: &str) -> DocType {
    let bare = token
        .rsplit(|c: char| c == ':' || c == '#' || c == '/')
        .next()
        .unwrap_or(token);
    match bare {
        "Manifest" => DocType::Manifest,
        "Collection" => DocType::Collection,
        "CollectionPage" | "OrderedCollectionPage" => DocType::CollectionPage,
        "Canvas" => DocType::Canvas,
        _ => DocType::Other,
    }
}

/// Read the `type` / `@type` of a document (string or array of strings).
pub fn doc_type(value: &Value) -> DocType {
    let raw = value.get("type").or_else(|| value.get("@type"));
    match raw {
        Some(Value::String(s)) => normalize_type(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(normalize_type)
            .find(|t| *t != DocType::Other)
            .unwrap_or(DocType::Other),
        _ => DocType::Other,
    }
}

/// Read the `id` / `@id` of a document, or a bare string reference.
pub fn doc_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        _ => value
            .get("id")
            .or_else(|| value.get("@id"))
            .and_then(Value::as_str),
    }
}

/// Overwrite the document id, keeping whichever key the document uses.
pub fn set_id(value: &mut Value, id: &str) {
    if let Some(obj) = value.as_object_mut() {
        let key = if obj.contains_key("@id") && !obj.contains_key("id") {
            "@id"
        } else {
            "id"
        };
        obj.insert(key.to_string(), Value::String(id.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Collections and pagination
// ---------------------------------------------------------------------------

/// Child references of a Collection or CollectionPage (v3 `items`, v2
/// `members`/`collections`/`manifests`). Canvases are never returned.
pub fn child_refs(value: &Value) -> Vec<&Value> {
    let mut refs = Vec::new();
    for key in ["items", "members", "collections", "manifests"] {
        if let Some(Value::Array(items)) = value.get(key) {
            refs.extend(
                items
                    .iter()
                    .filter(|item| !matches!(doc_type(item), DocType::Canvas)),
            );
        }
    }
    refs
}

fn link(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        other => doc_id(other).map(str::to_string),
    }
}

/// The `next` page link of a collection page.
pub fn next_page(value: &Value) -> Option<String> {
    link(value.get("next"))
}

/// The `first` page link of a paginated collection.
pub fn first_page(value: &Value) -> Option<String> {
    link(value.get("first"))
}

// ---------------------------------------------------------------------------
// Manifest content
// ---------------------------------------------------------------------------

/// Canvases of a Manifest (v3 `items`, v2 `sequences[0].canvases`).
pub fn canvases(value: &Value) -> Vec<&Value> {
    if let Some(Value::Array(items)) = value.get("items") {
        return items
            .iter()
            .filter(|item| doc_type(item) == DocType::Canvas)
            .collect();
    }
    value
        .get("sequences")
        .and_then(|s| s.get(0))
        .and_then(|s| s.get("canvases"))
        .and_then(Value::as_array)
        .map(|c| c.iter().collect())
        .unwrap_or_default()
}

/// First string of a label-like value: plain string, language map, or
/// v2 `[{"@value": ..}]` list.
pub fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_string),
        Value::Object(map) => {
            if let Some(v) = map.get("@value") {
                return first_string(v);
            }
            map.get("none")
                .or_else(|| map.get("en"))
                .and_then(first_string)
                .or_else(|| map.values().find_map(first_string))
        }
        _ => None,
    }
}

/// Every string of a label-like value, in document order.
pub fn all_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(all_strings).collect(),
        Value::Object(map) => match map.get("@value") {
            Some(v) => all_strings(v),
            None => map.values().flat_map(all_strings).collect(),
        },
        _ => Vec::new(),
    }
}

pub fn label_string(value: &Value) -> Option<String> {
    value.get("label").and_then(first_string)
}

/// `(label, values)` pairs from the `metadata` block.
pub fn metadata_pairs(value: &Value) -> Vec<(String, Vec<String>)> {
    value
        .get("metadata")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let label = entry.get("label").and_then(first_string)?;
                    let values = entry.get("value").map(all_strings).unwrap_or_default();
                    Some((label, values))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Id of the document's own thumbnail, if it declares one.
pub fn thumbnail_id(value: &Value) -> Option<String> {
    match value.get("thumbnail")? {
        Value::Array(items) => items.first().and_then(doc_id).map(str::to_string),
        other => doc_id(other).map(str::to_string),
    }
}

/// The painting body of a canvas (v3 `items[0].items[0].body`, v2 `images[0].resource`).
pub fn painting_body(canvas: &Value) -> Option<&Value> {
    canvas
        .get("items")
        .and_then(|pages| pages.get(0))
        .and_then(|page| page.get("items"))
        .and_then(|annos| annos.get(0))
        .and_then(|anno| anno.get("body"))
        .or_else(|| {
            canvas
                .get("images")
                .and_then(|images| images.get(0))
                .and_then(|anno| anno.get("resource"))
        })
}

/// Id of the first image service attached to the canvas painting body.
pub fn image_service_id(canvas: &Value) -> Option<String> {
    let body = painting_body(canvas)?;
    match body.get("service")? {
        Value::Array(services) => services.first().and_then(doc_id).map(str::to_string),
        other => doc_id(other).map(str::to_string),
    }
}

// ---------------------------------------------------------------------------
// ObjectGraph
// ---------------------------------------------------------------------------

/// In-memory graph of one Manifest or Collection, serialized to the cache
/// tree as `vault.json` for reuse across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectGraph {
    root: Value,
}

impl ObjectGraph {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn id(&self) -> Option<&str> {
        doc_id(&self.root)
    }

    pub fn doc_type(&self) -> DocType {
        doc_type(&self.root)
    }

    pub fn canvases(&self) -> Vec<&Value> {
        canvases(&self.root)
    }

    /// Canvas count for Manifests, member count for Collections.
    pub fn sub_resource_count(&self) -> usize {
        match self.doc_type() {
            DocType::Collection => child_refs(&self.root).len(),
            _ => self.canvases().len(),
        }
    }

    pub fn content_hash(&self) -> String {
        structural_hash(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_namespaced_tokens() {
        assert_eq!(normalize_type("sc:Manifest"), DocType::Manifest);
        assert_eq!(normalize_type("Collection"), DocType::Collection);
        assert_eq!(normalize_type("as:CollectionPage"), DocType::CollectionPage);
        assert_eq!(
            normalize_type("http://iiif.io/api/presentation/3#Collection"),
            DocType::Collection
        );
        assert_eq!(normalize_type("Range"), DocType::Other);
    }

    #[test]
    fn reads_v2_and_v3_ids() {
        let v3 = json!({"id": "https://x/m", "type": "Manifest"});
        let v2 = json!({"@id": "https://x/m2", "@type": "sc:Manifest"});
        assert_eq!(doc_id(&v3), Some("https://x/m"));
        assert_eq!(doc_id(&v2), Some("https://x/m2"));
        assert_eq!(doc_type(&v2), DocType::Manifest);
    }

    #[test]
    fn set_id_keeps_key_style() {
        let mut v2 = json!({"@id": "old"});
        set_id(&mut v2, "new");
        assert_eq!(v2, json!({"@id": "new"}));

        let mut v3 = json!({"id": "old", "type": "Manifest"});
        set_id(&mut v3, "new");
        assert_eq!(v3["id"], "new");
    }

    #[test]
    fn child_refs_skip_canvases_and_merge_v2_lists() {
        let v2 = json!({
            "@type": "sc:Collection",
            "collections": [{"@id": "c1", "@type": "sc:Collection"}],
            "manifests": [{"@id": "m1", "@type": "sc:Manifest"}],
        });
        assert_eq!(child_refs(&v2).len(), 2);
    }

    #[test]
    fn pagination_links_accept_strings_and_objects() {
        let page = json!({"next": {"id": "https://x/p2", "type": "CollectionPage"}});
        assert_eq!(next_page(&page).as_deref(), Some("https://x/p2"));
        let root = json!({"first": "https://x/p1"});
        assert_eq!(first_page(&root).as_deref(), Some("https://x/p1"));
    }

    #[test]
    fn labels_and_metadata() {
        let m = json!({
            "label": {"en": ["A title", "Other"]},
            "metadata": [
                {"label": {"en": ["Date"]}, "value": {"none": ["1900", "1901"]}},
                {"label": "Broken"}
            ]
        });
        assert_eq!(label_string(&m).as_deref(), Some("A title"));
        let pairs = metadata_pairs(&m);
        assert_eq!(pairs[0].0, "Date");
        assert_eq!(pairs[0].1, vec!["1900".to_string(), "1901".to_string()]);
        assert_eq!(pairs[1].1.len(), 0);

        let v2 = json!({"label": [{"@value": "Titre", "@language": "fr"}]});
        assert_eq!(label_string(&v2).as_deref(), Some("Titre"));
    }

    #[test]
    fn canvases_and_image_services() {
        let v3 = json!({
            "type": "Manifest",
            "items": [{
                "id": "c1", "type": "Canvas",
                "items": [{"items": [{"body": {"id": "img", "service": [{"id": "https://img/iiif/1"}]}}]}]
            }]
        });
        let graph = ObjectGraph::new(v3);
        assert_eq!(graph.sub_resource_count(), 1);
        assert_eq!(
            image_service_id(graph.canvases()[0]).as_deref(),
            Some("https://img/iiif/1")
        );

        let v2 = json!({
            "@type": "sc:Manifest",
            "sequences": [{"canvases": [
                {"@id": "c1", "images": [{"resource": {"service": {"@id": "https://img/2"}}}]},
                {"@id": "c2"}
            ]}]
        });
        let graph = ObjectGraph::new(v2);
        assert_eq!(graph.canvases().len(), 2);
        assert_eq!(image_service_id(graph.canvases()[0]).as_deref(), Some("https://img/2"));
    }
}
