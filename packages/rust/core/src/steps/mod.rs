//! Built-in steps.

mod canvas;
mod label;
mod provenance;
mod search;
mod see_also;
mod thumbnail;
mod topics;

use std::sync::Arc;

pub use canvas::{EnrichImageService, ExtractCanvasDims};
pub use label::ExtractLabelString;
pub use provenance::{ExtractRemoteSource, ExtractSlugSource};
pub use search::SearchRecord;
pub use see_also::LinkSeeAlso;
pub use thumbnail::ExtractThumbnail;
pub use topics::ExtractTopics;

use crate::step::StepRegistry;

/// Registry with every built-in step, in declared order.
pub fn default_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.upsert(Arc::new(LinkSeeAlso));
    registry.upsert(Arc::new(ExtractLabelString));
    registry.upsert(Arc::new(ExtractSlugSource));
    registry.upsert(Arc::new(ExtractRemoteSource));
    registry.upsert(Arc::new(ExtractThumbnail));
    registry.upsert(Arc::new(ExtractTopics));
    registry.upsert(Arc::new(ExtractCanvasDims));
    registry.upsert(Arc::new(EnrichImageService));
    registry.upsert(Arc::new(SearchRecord));
    registry
}

/// The document a view refers to: the canvas for canvas views, the
/// resource otherwise.
pub(crate) fn view_document(
    resource: &crate::api::ResourceView,
    api: &crate::api::StepApi<'_>,
) -> serde_json::Value {
    match &resource.canvas {
        Some(canvas) => canvas.document.clone(),
        None => api.document(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures for running a step handler outside a build.

    use std::path::PathBuf;
    use std::sync::{Arc, RwLock};

    use serde_json::Value;
    use uuid::Uuid;

    use hss_cache::ResourceCache;
    use hss_fetch::{HttpClient, RequestCache};
    use hss_shared::{
        ActiveResource, FetchConfig, ObjectGraph, ParsedResource, ResourceType, SlugSource,
        SourceDescriptor,
    };

    use crate::api::ResourceLookup;

    pub fn temp_dir(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hss-{prefix}-{}", Uuid::now_v7()))
    }

    pub fn resource(slug: &str, document: Value) -> ActiveResource {
        let graph = ObjectGraph::new(document);
        let resource_type = graph
            .doc_type()
            .resource_type()
            .unwrap_or(ResourceType::Manifest);
        ActiveResource {
            parsed: ParsedResource {
                resource_type,
                slug: slug.into(),
                slug_source: SlugSource::File,
                path: format!("{slug}.json"),
                store_id: "content".into(),
                source: SourceDescriptor::Disk {
                    path: format!("{slug}.json"),
                    file_path: format!("content/{slug}.json"),
                },
                save_to_disk: true,
            },
            id: graph.id().unwrap_or(slug).to_string(),
            sub_resources: graph.sub_resource_count(),
            content_hash: graph.content_hash(),
            canvas_hashes: graph.canvases().into_iter().map(|c| hss_shared::structural_hash(c)).collect(),
            reloaded: true,
            graph: Arc::new(RwLock::new(graph)),
        }
    }

    /// Cache facade, lookup and request cache for one resource.
    pub struct Fixture {
        pub cache: ResourceCache,
        pub lookup: ResourceLookup,
        pub requests: RequestCache,
    }

    impl Fixture {
        pub fn new(resources: Vec<ActiveResource>) -> Self {
            let root = temp_dir("step");
            let client = HttpClient::new(&FetchConfig::default()).unwrap();
            Self {
                cache: ResourceCache::open(&root, "resource"),
                lookup: ResourceLookup::new(Arc::new(resources)),
                requests: RequestCache::new(&root, "content", client, false),
            }
        }
    }
}
