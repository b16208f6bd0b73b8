use async_trait::async_trait;
use serde_json::Value;

use hss_shared::document::{first_string, label_string};
use hss_shared::{ResourceType, Result};

use crate::api::{ResourceView, StepApi};
use crate::step::{Step, StepKind, StepOutput};

/// `meta.label` and `search.label` as a plain string.
///
/// Config: `language` picks that entry of a language map when present.
pub struct ExtractLabelString;

#[async_trait]
impl Step for ExtractLabelString {
    fn id(&self) -> &str {
        "extract-label-string"
    }

    fn name(&self) -> &str {
        "Label string"
    }

    fn kind(&self) -> StepKind {
        StepKind::Extract
    }

    fn types(&self) -> &[ResourceType] {
        &[ResourceType::Manifest, ResourceType::Collection, ResourceType::Canvas]
    }

    async fn handler(
        &self,
        resource: &ResourceView,
        api: &StepApi<'_>,
        config: &Value,
    ) -> Result<StepOutput> {
        let language = config.get("language").and_then(Value::as_str);
        let label = match &resource.canvas {
            Some(canvas) => label_in(&canvas.document, language),
            None => api.read(|doc| label_in(doc, language)),
        };
        Ok(match label {
            Some(label) => StepOutput::default()
                .with_meta("label", label.clone())
                .with_search("label", label),
            None => StepOutput::default(),
        })
    }
}

fn label_in(doc: &Value, language: Option<&str>) -> Option<String> {
    language
        .and_then(|lang| doc.get("label")?.get(lang))
        .and_then(first_string)
        .or_else(|| label_string(doc))
}
