//! build-indices: whole-build aggregates over every emitted resource.
//!
//! Writes, under the build dir:
//! - `manifests/collection.json`, `collections/collection.json`
//! - `topics/<key>/collection.json` and `topics/<key>/<value>/collection.json`
//! - `<name>/collection.json` for every named collection
//! - `meta/indices.json`, `meta/search-index.json`, `meta/canvas-search-index.json`

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use hss_shared::json::write_json;
use hss_shared::{ActiveResource, ResourceType, Result, slugify};

use crate::progress::{Phase, PhaseStats};
use crate::state::BuildState;

const CONTEXT: &str = "http://iiif.io/api/presentation/3/context.json";

/// Top-level directories the indices phase writes itself.
const RESERVED: [&str; 4] = ["manifests", "collections", "topics", "meta"];

/// Facet key -> value -> slugs.
type IndexMap = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[instrument(skip_all)]
pub(crate) async fn run(state: &mut BuildState) -> Result<()> {
    let build_dir = state.config.build_dir.clone();
    let mut written = 0;

    for resource_type in [ResourceType::Manifest, ResourceType::Collection] {
        let members: Vec<&ActiveResource> = state
            .resources
            .iter()
            .filter(|r| r.resource_type() == resource_type)
            .collect();
        let path = format!("{}/collection.json", resource_type.slug_prefix());
        let label = match resource_type {
            ResourceType::Collection => "Collections",
            _ => "Manifests",
        };
        write_json(&build_dir.join(&path), &collection(state, &path, label, &members))?;
        written += 1;
    }

    let index = gather_indices(state);
    for (key, values) in &index {
        let key_slug = slugify(key);
        let key_path = format!("topics/{key_slug}/collection.json");
        let value_items: Vec<Value> = values
            .keys()
            .map(|value| {
                json!({
                    "id": url(state, &format!("topics/{key_slug}/{}/collection.json", slugify(value))),
                    "type": "Collection",
                    "label": { "none": [value] },
                })
            })
            .collect();
        write_json(
            &build_dir.join(&key_path),
            &json!({
                "@context": CONTEXT,
                "id": url(state, &key_path),
                "type": "Collection",
                "label": { "none": [key] },
                "items": value_items,
            }),
        )?;
        written += 1;

        for (value, slugs) in values {
            let members = resolve(state, slugs);
            let path = format!("topics/{key_slug}/{}/collection.json", slugify(value));
            write_json(&build_dir.join(&path), &collection(state, &path, value, &members))?;
            written += 1;
        }
    }

    let named = state
        .collections
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    for (name, slugs) in &named {
        let Some(path) = collection_path(name) else {
            warn!(collection = %name, "invalid collection name");
            state
                .failures
                .push(format!("collection `{name}`: invalid name"));
            continue;
        };
        let slugs: Vec<String> = slugs.iter().cloned().collect();
        let members = resolve(state, &slugs);
        write_json(&build_dir.join(&path), &collection(state, &path, name, &members))?;
        written += 1;
    }

    write_json(&build_dir.join("meta/indices.json"), &index)?;
    write_json(&build_dir.join("meta/search-index.json"), &search_records(state))?;
    write_json(
        &build_dir.join("meta/canvas-search-index.json"),
        &canvas_search_records(state),
    )?;
    written += 3;

    info!(files = written, topics = index.len(), collections = named.len(), "built indices");
    state.record_stats(
        Phase::BuildIndices,
        PhaseStats {
            total: written,
            processed: written,
            ..Default::default()
        },
    );
    Ok(())
}

/// Output path of a named collection. Names are relative paths of plain
/// segments and must not shadow a reserved top-level directory.
fn collection_path(name: &str) -> Option<String> {
    if name.is_empty() || name.starts_with('/') || name.contains('\\') {
        return None;
    }
    let mut segments = name.split('/');
    if segments.clone().any(|s| s.is_empty() || s == "." || s == "..") {
        return None;
    }
    if segments.next().is_some_and(|first| RESERVED.contains(&first)) {
        return None;
    }
    Some(format!("{name}/collection.json"))
}

fn url(state: &BuildState, path: &str) -> String {
    format!("{}/{path}", state.step_ctx.server_url())
}

fn resolve<'a>(state: &'a BuildState, slugs: &[String]) -> Vec<&'a ActiveResource> {
    slugs.iter().filter_map(|slug| state.lookup.by_slug(slug)).collect()
}

/// A IIIF Collection listing `members`, labelled from their metadata.
fn collection(state: &BuildState, path: &str, label: &str, members: &[&ActiveResource]) -> Value {
    let items: Vec<Value> = members
        .iter()
        .map(|resource| {
            let meta = state
                .cache(resource.slug())
                .map(|c| c.meta.get())
                .unwrap_or_default();
            let mut item = Map::new();
            item.insert("id".into(), Value::String(state.public_id(resource)));
            item.insert("type".into(), Value::String(resource.resource_type().to_string()));
            let label = meta
                .get("label")
                .cloned()
                .unwrap_or_else(|| Value::String(resource.slug().to_string()));
            item.insert("label".into(), json!({ "none": [label] }));
            if let Some(thumbnail) = meta.get("thumbnail") {
                item.insert("thumbnail".into(), json!([{ "id": thumbnail, "type": "Image" }]));
            }
            Value::Object(item)
        })
        .collect();
    json!({
        "@context": CONTEXT,
        "id": url(state, path),
        "type": "Collection",
        "label": { "none": [label] },
        "items": items,
    })
}

/// Every resource's `indices` document folded into key -> value -> slugs.
fn gather_indices(state: &BuildState) -> IndexMap {
    let mut index = IndexMap::new();
    for resource in state.resources.iter() {
        let Some(cache) = state.cache(resource.slug()) else {
            continue;
        };
        for (key, values) in cache.indices.get() {
            let values = match values {
                Value::Array(values) => values,
                other => vec![other],
            };
            for value in values {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                index
                    .entry(key.clone())
                    .or_default()
                    .entry(value)
                    .or_default()
                    .push(resource.slug().to_string());
            }
        }
    }
    index
}

fn search_records(state: &BuildState) -> Vec<Value> {
    state
        .resources
        .iter()
        .filter_map(|resource| {
            let record = state.cache(resource.slug())?.search.get();
            (!record.is_empty()).then_some(Value::Object(record))
        })
        .collect()
}

fn canvas_search_records(state: &BuildState) -> Vec<Value> {
    state
        .resources
        .iter()
        .filter(|r| r.resource_type() == ResourceType::Manifest)
        .filter_map(|resource| Some((resource, state.cache(resource.slug())?)))
        .flat_map(|(resource, cache)| {
            (0..resource.sub_resources).filter_map(move |index| {
                let record = cache.canvas(index).search.get();
                (!record.is_empty()).then_some(Value::Object(record))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_stay_inside_their_own_directory() {
        assert_eq!(collection_path("highlights").as_deref(), Some("highlights/collection.json"));
        assert_eq!(
            collection_path("exhibits/spring").as_deref(),
            Some("exhibits/spring/collection.json")
        );

        for name in [
            "",
            "/etc",
            "../outside",
            "exhibits/../../outside",
            "exhibits//spring",
            "./highlights",
            "highlights/",
            "c:\\temp",
            "manifests",
            "topics/date",
            "meta/extra",
            "collections",
        ] {
            assert_eq!(collection_path(name), None, "{name:?}");
        }
        assert!(collection_path("manifests-extra").is_some());
    }
}
