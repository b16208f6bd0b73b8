use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use hss_shared::document::metadata_pairs;
use hss_shared::{HssError, ResourceType, Result, slugify};

use crate::api::{ResourceView, StepApi};
use crate::step::{Step, StepContext, StepKind, StepOutput};

/// Facet values from the `metadata` block.
///
/// Config `fields` maps an index key to the metadata labels feeding it, e.g.
/// `fields = { date = ["Date", "Datum"] }`. Without `fields`, every metadata
/// entry is indexed under its slugified label.
pub struct ExtractTopics;

#[async_trait]
impl Step for ExtractTopics {
    fn id(&self) -> &str {
        "extract-topics"
    }

    fn kind(&self) -> StepKind {
        StepKind::Extract
    }

    fn types(&self) -> &[ResourceType] {
        &[ResourceType::Manifest, ResourceType::Collection]
    }

    fn configure(&self, _ctx: &StepContext, config: Value) -> Result<Value> {
        match config.get("fields") {
            None | Some(Value::Object(_)) => Ok(config),
            Some(_) => Err(HssError::config("extract-topics: `fields` must be a table")),
        }
    }

    async fn handler(
        &self,
        _resource: &ResourceView,
        api: &StepApi<'_>,
        config: &Value,
    ) -> Result<StepOutput> {
        let pairs = api.read(metadata_pairs);
        let mut topics: BTreeMap<String, Vec<String>> = BTreeMap::new();

        match config.get("fields").and_then(Value::as_object) {
            Some(fields) => {
                for (key, labels) in fields {
                    let labels = label_list(labels);
                    for (label, values) in &pairs {
                        if labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
                            topics.entry(key.clone()).or_default().extend(values.iter().cloned());
                        }
                    }
                }
            }
            None => {
                for (label, values) in pairs {
                    topics.entry(slugify(&label)).or_default().extend(values);
                }
            }
        }

        let mut output = StepOutput::default();
        for (key, mut values) in topics {
            values.retain(|v| !v.trim().is_empty());
            values.sort();
            values.dedup();
            if !values.is_empty() {
                output = output.with_index(&key, values);
            }
        }
        Ok(output)
    }
}

fn label_list(labels: &Value) -> Vec<String> {
    match labels {
        Value::String(label) => vec![label.clone()],
        Value::Array(labels) => labels
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::steps::testing::{Fixture, resource};

    fn letter() -> Value {
        json!({
            "id": "https://x/m",
            "type": "Manifest",
            "metadata": [
                {"label": {"en": ["Date"]}, "value": {"none": ["1900"]}},
                {"label": {"de": ["Datum"]}, "value": {"none": ["1901", "1900"]}},
                {"label": {"en": ["Place of Origin"]}, "value": {"en": ["Wien"]}},
            ],
        })
    }

    #[tokio::test]
    async fn configured_fields_merge_labels() {
        let active = resource("manifests/m", letter());
        let fx = Fixture::new(Vec::new());
        let api = StepApi::new(&active, &fx.cache, None, &fx.lookup, &fx.requests, None);

        let config = json!({"fields": {"date": ["Date", "datum"]}});
        let out = ExtractTopics
            .handler(&ResourceView::of(&active), &api, &config)
            .await
            .unwrap();
        assert_eq!(out.indices["date"], json!(["1900", "1901"]));
        assert!(!out.indices.contains_key("place-of-origin"));
    }

    #[tokio::test]
    async fn default_indexes_every_label() {
        let active = resource("manifests/m", letter());
        let fx = Fixture::new(Vec::new());
        let api = StepApi::new(&active, &fx.cache, None, &fx.lookup, &fx.requests, None);

        let out = ExtractTopics
            .handler(&ResourceView::of(&active), &api, &json!({}))
            .await
            .unwrap();
        assert_eq!(out.indices["place-of-origin"], json!(["Wien"]));
        assert_eq!(out.indices["date"], json!(["1900"]));
    }

    #[test]
    fn fields_must_be_a_table() {
        let ctx = StepContext {
            config: std::sync::Arc::new(hss_shared::BuildConfig::default()),
            cache_dir: "cache".into(),
            build_dir: "build".into(),
        };
        assert!(ExtractTopics.configure(&ctx, json!({"fields": "date"})).is_err());
        assert!(ExtractTopics.configure(&ctx, json!({})).is_ok());
    }
}
