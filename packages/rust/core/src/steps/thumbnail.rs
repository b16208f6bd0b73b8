//! Thumbnails, propagated from descendant Manifests to Collections that
//! declare none.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{Value, json};

use hss_shared::document::{canvases, child_refs, doc_id, painting_body, thumbnail_id};
use hss_shared::{ResourceType, Result};

use crate::api::{ResourceView, StepApi};
use crate::step::{Step, StepContext, StepKind, StepOutput};

/// Collections deeper than this below the Collection are not searched.
const DEFAULT_MAX_DEPTH: usize = 4;

/// `meta.thumbnail`.
///
/// Manifests use their own thumbnail, else the first canvas's thumbnail or
/// painting body. Collections without one take the first thumbnail found in
/// a depth-first walk of their members (config `maxDepth`).
pub struct ExtractThumbnail;

#[async_trait]
impl Step for ExtractThumbnail {
    fn id(&self) -> &str {
        "extract-thumbnail"
    }

    fn kind(&self) -> StepKind {
        StepKind::Extract
    }

    fn types(&self) -> &[ResourceType] {
        &[ResourceType::Manifest, ResourceType::Collection]
    }

    async fn handler(
        &self,
        resource: &ResourceView,
        api: &StepApi<'_>,
        _config: &Value,
    ) -> Result<StepOutput> {
        let (thumbnail, children) = api.read(|doc| {
            let thumbnail = thumbnail_id(doc).or_else(|| {
                let first = canvases(doc).into_iter().next()?;
                thumbnail_id(first)
                    .or_else(|| painting_body(first).and_then(doc_id).map(str::to_string))
            });
            let children: Vec<String> = child_refs(doc)
                .into_iter()
                .filter_map(doc_id)
                .map(str::to_string)
                .collect();
            (thumbnail, children)
        });

        let mut output = StepOutput::default().with_temp(json!({
            "id": resource.id,
            "type": resource.resource_type,
            "thumbnail": thumbnail,
            "children": children,
        }));
        if let Some(thumbnail) = thumbnail {
            output = output.with_meta("thumbnail", thumbnail);
        }
        Ok(output)
    }

    async fn collect(
        &self,
        temp: &BTreeMap<String, Value>,
        _ctx: &StepContext,
        config: &Value,
    ) -> Result<BTreeMap<String, StepOutput>> {
        let max_depth = config
            .get("maxDepth")
            .and_then(Value::as_u64)
            .map(|d| d as usize)
            .unwrap_or(DEFAULT_MAX_DEPTH);
        let by_id: HashMap<&str, &Value> = temp
            .values()
            .filter_map(|t| Some((t.get("id")?.as_str()?, t)))
            .collect();

        let mut outputs = BTreeMap::new();
        for (slug, entry) in temp {
            if entry["type"] != "Collection" || !entry["thumbnail"].is_null() {
                continue;
            }
            if let Some(found) = descendant_thumbnail(entry, &by_id, max_depth) {
                outputs.insert(slug.clone(), StepOutput::default().with_meta("thumbnail", found));
            }
        }
        Ok(outputs)
    }
}

/// Depth-first search for the first member with a thumbnail.
fn descendant_thumbnail(root: &Value, by_id: &HashMap<&str, &Value>, max_depth: usize) -> Option<String> {
    let mut seen = HashSet::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((entry, depth)) = stack.pop() {
        if let Some(id) = entry["id"].as_str() {
            if !seen.insert(id) {
                continue;
            }
        }
        if depth > 0 {
            if let Some(thumbnail) = entry["thumbnail"].as_str() {
                return Some(thumbnail.to_string());
            }
        }
        if depth >= max_depth {
            continue;
        }
        let children = entry["children"].as_array().map(Vec::as_slice).unwrap_or_default();
        // Reversed so the first member is visited first.
        for child in children.iter().rev() {
            if let Some(next) = child.as_str().and_then(|id| by_id.get(id).copied()) {
                stack.push((next, depth + 1));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use hss_shared::BuildConfig;

    use crate::steps::testing::{Fixture, resource};

    fn ctx() -> StepContext {
        StepContext {
            config: Arc::new(BuildConfig::default()),
            cache_dir: PathBuf::from("cache"),
            build_dir: PathBuf::from("build"),
        }
    }

    fn entry(id: &str, kind: &str, thumbnail: Option<&str>, children: &[&str]) -> Value {
        json!({"id": id, "type": kind, "thumbnail": thumbnail, "children": children})
    }

    #[tokio::test]
    async fn manifest_falls_back_to_first_canvas_image() {
        let doc = json!({
            "id": "https://x/m",
            "type": "Manifest",
            "items": [{
                "id": "https://x/m/c0",
                "type": "Canvas",
                "items": [{"items": [{"body": {"id": "https://x/img0.jpg", "type": "Image"}}]}],
            }],
        });
        let active = resource("manifests/m", doc);
        let fx = Fixture::new(Vec::new());
        let api = StepApi::new(&active, &fx.cache, None, &fx.lookup, &fx.requests, None);

        let out = ExtractThumbnail
            .handler(&ResourceView::of(&active), &api, &json!({}))
            .await
            .unwrap();
        assert_eq!(out.meta["thumbnail"], "https://x/img0.jpg");
        assert_eq!(out.temp.unwrap()["type"], "Manifest");
    }

    #[tokio::test]
    async fn collections_inherit_from_nested_descendants() {
        let mut temp = BTreeMap::new();
        temp.insert("collections/root".into(), entry("r", "Collection", None, &["n"]));
        temp.insert("collections/nested".into(), entry("n", "Collection", None, &["r", "m"]));
        temp.insert("manifests/m".into(), entry("m", "Manifest", Some("thumb.jpg"), &[]));
        temp.insert("collections/empty".into(), entry("e", "Collection", None, &[]));

        let outputs = ExtractThumbnail.collect(&temp, &ctx(), &json!({})).await.unwrap();
        assert_eq!(outputs["collections/root"].meta["thumbnail"], "thumb.jpg");
        assert_eq!(outputs["collections/nested"].meta["thumbnail"], "thumb.jpg");
        assert!(!outputs.contains_key("collections/empty"));
        assert!(!outputs.contains_key("manifests/m"));
    }

    #[tokio::test]
    async fn depth_limit_stops_the_walk() {
        let mut temp = BTreeMap::new();
        temp.insert("collections/root".into(), entry("r", "Collection", None, &["n"]));
        temp.insert("collections/nested".into(), entry("n", "Collection", None, &["m"]));
        temp.insert("manifests/m".into(), entry("m", "Manifest", Some("thumb.jpg"), &[]));

        let outputs = ExtractThumbnail
            .collect(&temp, &ctx(), &json!({"maxDepth": 1}))
            .await
            .unwrap();
        assert!(!outputs.contains_key("collections/root"));
        assert!(outputs.contains_key("collections/nested"));
    }
}
