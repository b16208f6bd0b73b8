//! Canvas-level steps.

use async_trait::async_trait;
use serde_json::{Map, Value};

use hss_shared::document::image_service_id;
use hss_shared::{ResourceType, Result};

use crate::api::{ResourceView, StepApi};
use crate::step::{Step, StepKind, StepOutput};

/// `meta.width` / `meta.height` of each canvas.
pub struct ExtractCanvasDims;

#[async_trait]
impl Step for ExtractCanvasDims {
    fn id(&self) -> &str {
        "extract-canvas-dims"
    }

    fn kind(&self) -> StepKind {
        StepKind::Extract
    }

    fn types(&self) -> &[ResourceType] {
        &[ResourceType::Canvas]
    }

    async fn handler(
        &self,
        resource: &ResourceView,
        _api: &StepApi<'_>,
        _config: &Value,
    ) -> Result<StepOutput> {
        let Some(canvas) = &resource.canvas else {
            return Ok(StepOutput::default());
        };
        let mut output = StepOutput::default();
        for key in ["width", "height", "duration"] {
            if let Some(value) = canvas.document.get(key).filter(|v| v.is_number()) {
                output = output.with_meta(key, value.clone());
            }
        }
        Ok(output)
    }
}

/// `meta.imageService`: the canvas image's `info.json` summary.
///
/// Fetched through the store's request cache, so repeated builds reuse it.
pub struct EnrichImageService;

#[async_trait]
impl Step for EnrichImageService {
    fn id(&self) -> &str {
        "enrich-image-service"
    }

    fn kind(&self) -> StepKind {
        StepKind::Enrich
    }

    fn types(&self) -> &[ResourceType] {
        &[ResourceType::Canvas]
    }

    async fn handler(
        &self,
        resource: &ResourceView,
        api: &StepApi<'_>,
        _config: &Value,
    ) -> Result<StepOutput> {
        let Some(service) = resource.canvas.as_ref().and_then(|c| image_service_id(&c.document))
        else {
            return Ok(StepOutput::default());
        };
        let url = format!("{}/info.json", service.trim_end_matches('/'));
        let info = api.requests().fetch(&url).await?;

        let mut summary = Map::new();
        summary.insert("id".into(), Value::String(service));
        for key in ["width", "height", "profile", "protocol"] {
            if let Some(value) = info.get(key) {
                summary.insert(key.into(), value.clone());
            }
        }
        if let Some(sizes) = info.get("sizes") {
            summary.insert("sizes".into(), sizes.clone());
        }
        Ok(StepOutput::default().with_meta("imageService", Value::Object(summary)))
    }
}
