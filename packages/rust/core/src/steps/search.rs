use async_trait::async_trait;
use serde_json::{Value, json};

use hss_shared::document::{first_string, label_string};
use hss_shared::{ResourceType, Result};

use crate::api::{ResourceView, StepApi};
use crate::step::{Step, StepKind, StepOutput};

/// Search records for `meta/search-index.json` and
/// `meta/canvas-search-index.json`.
///
/// Runs in Enrich so it can read what extraction wrote: labels, thumbnails
/// and topic indices. Config `summary = false` drops the summary field.
pub struct SearchRecord;

#[async_trait]
impl Step for SearchRecord {
    fn id(&self) -> &str {
        "search-record"
    }

    fn name(&self) -> &str {
        "Search record"
    }

    fn kind(&self) -> StepKind {
        StepKind::Enrich
    }

    fn types(&self) -> &[ResourceType] {
        &[ResourceType::Manifest, ResourceType::Collection, ResourceType::Canvas]
    }

    /// Stale when the record built from the current meta and indices
    /// differs from the stored one.
    async fn invalidate(
        &self,
        resource: &ResourceView,
        api: &StepApi<'_>,
        config: &Value,
    ) -> Result<Option<bool>> {
        let stored = api.cache().search.get();
        let fresh = build_record(resource, api, config);
        Ok(Some(
            fresh.search.iter().any(|(key, value)| stored.get(key) != Some(value)),
        ))
    }

    async fn handler(
        &self,
        resource: &ResourceView,
        api: &StepApi<'_>,
        config: &Value,
    ) -> Result<StepOutput> {
        Ok(build_record(resource, api, config))
    }
}

fn build_record(resource: &ResourceView, api: &StepApi<'_>, config: &Value) -> StepOutput {
    let meta = api.cache().meta.get();
    let with_summary = config.get("summary").and_then(Value::as_bool).unwrap_or(true);

    let mut output = StepOutput::default()
        .with_search("id", resource.id.as_str())
        .with_search("type", resource.resource_type.as_str())
        .with_search("slug", resource.slug.as_str());

    if let Some(canvas) = &resource.canvas {
        let label = meta
            .get("label")
            .cloned()
            .or_else(|| label_string(&canvas.document).map(Value::String));
        output = output
            .with_search("manifest", resource.slug.as_str())
            .with_search("index", canvas.index);
        if let Some(label) = label {
            output = output.with_search("label", label);
        }
        return output;
    }

    let (label, summary) = api.read(|doc| {
        let summary = doc.get("summary").and_then(first_string);
        (label_string(doc), summary)
    });
    if let Some(label) = meta.get("label").cloned().or(label.map(Value::String)) {
        output = output.with_search("label", label);
    }
    if let (true, Some(summary)) = (with_summary, summary) {
        output = output.with_search("summary", summary);
    }
    if let Some(thumbnail) = meta.get("thumbnail") {
        output = output.with_search("thumbnail", thumbnail.clone());
    }
    let topics = api.cache().indices.get();
    if !topics.is_empty() {
        output = output.with_search("topics", json!(topics));
    }
    output
}
