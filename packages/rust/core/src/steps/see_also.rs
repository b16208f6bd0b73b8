//! Linker attaching `seeAlso` entries from a links file.
//!
//! The links file is a JSON object keyed by target reference, a resource id
//! or a canvas id optionally followed by `#fragment`:
//!
//! ```json
//! { "https://example.org/m1/canvas/2#xywh=0,0,100,100": [
//!     { "id": "https://example.org/transcripts/2.json", "type": "Dataset" }
//! ] }
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use hss_shared::document::{doc_id, doc_type};
use hss_shared::{DocType, HssError, ResourceType, Result};

use crate::api::{ResourceView, StepApi};
use crate::step::{Step, StepContext, StepKind, StepOutput};

/// Config: `file`, path of the links file.
pub struct LinkSeeAlso;

fn links_file(config: &Value) -> Option<PathBuf> {
    config.get("file").and_then(Value::as_str).map(PathBuf::from)
}

#[async_trait]
impl Step for LinkSeeAlso {
    fn id(&self) -> &str {
        "link-see-also"
    }

    fn name(&self) -> &str {
        "seeAlso links"
    }

    fn kind(&self) -> StepKind {
        StepKind::Link
    }

    fn types(&self) -> &[ResourceType] {
        &[ResourceType::Manifest, ResourceType::Collection]
    }

    /// Group the links file by target id: `{id: [{fragment?, entries}]}`.
    async fn prepare(&self, _ctx: &StepContext, config: &Value) -> Result<Option<Value>> {
        let Some(file) = links_file(config) else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| HssError::io(&file, e))?;
        let links: Map<String, Value> = serde_json::from_str(&content)
            .map_err(|e| HssError::parse(format!("{}: {e}", file.display())))?;

        let mut by_target: Map<String, Value> = Map::new();
        for (reference, entries) in links {
            let (id, fragment) = StepApi::split_ref(&reference);
            let entries = match entries {
                Value::Array(entries) => entries,
                single => vec![single],
            };
            let slot = by_target
                .entry(id.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(slot) = slot {
                slot.push(serde_json::json!({ "fragment": fragment, "entries": entries }));
            }
        }
        debug!(targets = by_target.len(), "prepared links");
        Ok(Some(Value::Object(by_target)))
    }

    async fn handler(
        &self,
        resource: &ResourceView,
        api: &StepApi<'_>,
        config: &Value,
    ) -> Result<StepOutput> {
        let Some(file) = links_file(config) else {
            return Ok(StepOutput::default());
        };
        api.track_file(&file);
        let Some(Value::Object(targets)) = api.prepared() else {
            return Ok(StepOutput::default());
        };

        // (canvas index or None for the resource itself, entries)
        let mut pending: Vec<(Option<usize>, Vec<Value>)> = Vec::new();
        for (target, links) in targets {
            let index = if *target == resource.id {
                None
            } else {
                match api.canvas_owner(target) {
                    Some(owner) if owner.slug == resource.slug => Some(owner.index),
                    _ => continue,
                }
            };
            let entries = links
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|link| link.get("entries")?.as_array())
                .flatten()
                .cloned()
                .collect();
            pending.push((index, entries));
        }
        if pending.is_empty() {
            return Ok(StepOutput::default().with_meta("seeAlsoLinks", 0));
        }

        let added = api.modify(|doc| {
            let mut added = 0;
            for (index, entries) in pending {
                let target = match index {
                    None => Some(&mut *doc),
                    Some(index) => canvas_mut(doc, index),
                };
                if let Some(target) = target {
                    added += add_see_also(target, entries);
                }
            }
            added
        })?;
        Ok(StepOutput::default().with_meta("seeAlsoLinks", added))
    }
}

/// Mutable access to the `index`-th canvas of a Manifest.
fn canvas_mut(doc: &mut Value, index: usize) -> Option<&mut Value> {
    if doc.get("items").is_some_and(Value::is_array) {
        return doc
            .get_mut("items")?
            .as_array_mut()?
            .iter_mut()
            .filter(|item| doc_type(item) == DocType::Canvas)
            .nth(index);
    }
    doc.get_mut("sequences")?
        .get_mut(0)?
        .get_mut("canvases")?
        .get_mut(index)
}

/// Append entries to `seeAlso`, skipping ids already present.
fn add_see_also(target: &mut Value, entries: Vec<Value>) -> usize {
    let Some(obj) = target.as_object_mut() else {
        return 0;
    };
    let list = obj
        .entry("seeAlso")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !list.is_array() {
        *list = Value::Array(vec![list.take()]);
    }
    let Value::Array(list) = list else {
        return 0;
    };
    let mut added = 0;
    for entry in entries {
        let exists = doc_id(&entry).is_some_and(|id| list.iter().any(|e| doc_id(e) == Some(id)));
        if !exists {
            list.push(entry);
            added += 1;
        }
    }
    added
}
