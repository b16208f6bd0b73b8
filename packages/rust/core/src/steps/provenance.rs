//! Where a resource came from.

use async_trait::async_trait;
use serde_json::Value;

use hss_shared::{ResourceType, Result, SourceDescriptor};

use crate::api::{ResourceView, StepApi};
use crate::step::{Step, StepKind, StepOutput};

/// `meta.slugSource`: which rule produced the slug.
pub struct ExtractSlugSource;

#[async_trait]
impl Step for ExtractSlugSource {
    fn id(&self) -> &str {
        "extract-slug-source"
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
        _api: &StepApi<'_>,
        _config: &Value,
    ) -> Result<StepOutput> {
        let source = serde_json::to_value(&resource.slug_source).unwrap_or_default();
        Ok(StepOutput::default().with_meta("slugSource", source))
    }
}

/// `meta.remoteSource`: the URL of resources read over HTTP.
pub struct ExtractRemoteSource;

#[async_trait]
impl Step for ExtractRemoteSource {
    fn id(&self) -> &str {
        "extract-remote-source"
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
        _api: &StepApi<'_>,
        _config: &Value,
    ) -> Result<StepOutput> {
        Ok(match &resource.source {
            SourceDescriptor::Remote { url } => {
                StepOutput::default().with_meta("remoteSource", url.as_str())
            }
            SourceDescriptor::Disk { .. } => StepOutput::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::steps::testing::{Fixture, resource};

    #[tokio::test]
    async fn records_slug_and_remote_source() {
        let active = resource("manifests/a", json!({"id": "https://x/a", "type": "Manifest"}));
        let fx = Fixture::new(Vec::new());

        let view = ResourceView::of(&active);
        let api = StepApi::new(&active, &fx.cache, None, &fx.lookup, &fx.requests, None);
        let out = ExtractSlugSource.handler(&view, &api, &json!({})).await.unwrap();
        assert_eq!(out.meta["slugSource"], json!({"type": "file"}));
        let out = ExtractRemoteSource.handler(&view, &api, &json!({})).await.unwrap();
        assert!(out.meta.is_empty());

        let mut remote = active.clone();
        remote.parsed.source = SourceDescriptor::Remote {
            url: "https://x/a".into(),
        };
        let view = ResourceView::of(&remote);
        let out = ExtractRemoteSource.handler(&view, &api, &json!({})).await.unwrap();
        assert_eq!(out.meta["remoteSource"], "https://x/a");
    }
}
