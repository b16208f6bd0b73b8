//! Remote store: a IIIF graph served over HTTP.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};
use url::Url;

use hss_cache::ResourceCache;
use hss_fetch::{DiscoveredNode, discover};
use hss_shared::document::{child_refs, doc_type, first_page, next_page};
use hss_shared::{
    DocType, HssError, ParsedResource, REMOTE_STORE, ResourceType, Result, SlugSource,
    SourceDescriptor, StoreConfig,
};

use crate::store::{
    LoadResult, Store, StoreContext, disk_changed, into_result, load_disk,
};

pub struct RemoteStore;

#[async_trait]
impl Store for RemoteStore {
    fn store_type(&self) -> &'static str {
        REMOTE_STORE
    }

    #[instrument(skip_all, fields(store = %ctx.store_id))]
    async fn parse(&self, config: &StoreConfig, ctx: &StoreContext) -> Result<Vec<ParsedResource>> {
        let mut resources = Vec::new();
        let mut slugs = HashSet::new();

        for root in config.remote_urls() {
            let discovery = discover(&ctx.requests, root, ctx.concurrency).await?;
            for node in &discovery.nodes {
                let (slug, slug_source) = assign_slug(node, ctx);
                if !slugs.insert(slug.clone()) {
                    warn!(%slug, url = %node.url, "duplicate slug, keeping the first resource");
                    continue;
                }
                resources.push(ParsedResource {
                    resource_type: node.resource_type,
                    source: source_for(&slug, &node.url, config.overrides.as_deref()),
                    slug,
                    slug_source,
                    path: node.url.clone(),
                    store_id: ctx.store_id.clone(),
                    save_to_disk: config.save_manifests,
                });
            }
        }

        info!(resources = resources.len(), "parsed remote store");
        Ok(resources)
    }

    async fn invalidate(
        &self,
        _config: &StoreConfig,
        resource: &ParsedResource,
        cache: &ResourceCache,
        ctx: &StoreContext,
    ) -> Result<bool> {
        match &resource.source {
            SourceDescriptor::Disk { file_path, .. } => Ok(disk_changed(file_path, cache)),
            SourceDescriptor::Remote { url } => ctx.requests.did_change(url).await,
        }
    }

    async fn load(
        &self,
        _config: &StoreConfig,
        resource: &ParsedResource,
        cache: &ResourceCache,
        ctx: &StoreContext,
    ) -> Result<Option<LoadResult>> {
        let url = match &resource.source {
            SourceDescriptor::Disk { file_path, .. } => {
                return load_disk(file_path, &resource.path, cache).await;
            }
            SourceDescriptor::Remote { url } => url,
        };
        let mut doc = ctx.requests.fetch(url).await?;
        if resource.resource_type == ResourceType::Collection {
            flatten_pages(&mut doc, ctx).await?;
        }
        Ok(Some(into_result(doc, url)))
    }
}

// ---------------------------------------------------------------------------
// Slugs and sources
// ---------------------------------------------------------------------------

fn assign_slug(node: &DiscoveredNode, ctx: &StoreContext) -> (String, SlugSource) {
    let Ok(url) = Url::parse(&node.url) else {
        return (
            format!("{}/{}", node.resource_type.slug_prefix(), hss_shared::slugify(&node.url)),
            SlugSource::Default,
        );
    };
    for template in ctx.templates.iter() {
        if template.resource_type != node.resource_type {
            continue;
        }
        if let Some(slug) = template.match_url(&url) {
            return (
                slug,
                SlugSource::Template {
                    name: template.name.clone(),
                },
            );
        }
    }
    (default_slug(&url, node.resource_type), SlugSource::Default)
}

/// `<type dir>/<url path>` with a trailing `manifest.json`/`collection.json`
/// (or `.json`) removed; the hostname when nothing is left.
pub fn default_slug(url: &Url, resource_type: ResourceType) -> String {
    let path = url.path().trim_matches('/');
    let stem = ["manifest.json", "collection.json"]
        .iter()
        .find_map(|suffix| path.strip_suffix(suffix))
        .or_else(|| path.strip_suffix(".json"))
        .unwrap_or(path)
        .trim_matches('/');
    let tail = if stem.is_empty() {
        url.host_str().unwrap_or("remote")
    } else {
        stem
    };
    format!("{}/{tail}", resource_type.slug_prefix())
}

/// A curated local copy at `<overrides>/<slug>.json` replaces the remote source.
fn source_for(slug: &str, url: &str, overrides: Option<&str>) -> SourceDescriptor {
    if let Some(dir) = overrides {
        let rel = format!("{slug}.json");
        let file = Path::new(dir).join(&rel);
        if file.is_file() {
            return SourceDescriptor::Disk {
                path: rel,
                file_path: file.to_string_lossy().to_string(),
            };
        }
    }
    SourceDescriptor::Remote {
        url: url.to_string(),
    }
}

/// Merge every page's members into the collection's own `items`.
async fn flatten_pages(doc: &mut Value, ctx: &StoreContext) -> Result<()> {
    let mut next = first_page(doc).or_else(|| next_page(doc));
    if next.is_none() {
        return Ok(());
    }
    let mut items: Vec<Value> = child_refs(doc).into_iter().cloned().collect();
    let mut seen = HashSet::new();

    while let Some(page_url) = next.take() {
        if !seen.insert(page_url.clone()) {
            break;
        }
        let page = ctx.requests.fetch(&page_url).await?;
        if !matches!(doc_type(&page), DocType::Collection | DocType::CollectionPage) {
            return Err(HssError::parse(format!("{page_url}: not a collection page")));
        }
        items.extend(child_refs(&page).into_iter().cloned());
        next = next_page(&page);
    }

    if let Some(obj) = doc.as_object_mut() {
        for key in ["first", "last", "next", "total", "members", "manifests", "collections"] {
            obj.remove(key);
        }
        obj.insert("items".into(), Value::Array(items));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use hss_fetch::{HttpClient, RequestCache};
    use hss_shared::{FetchConfig, SlugTemplate, SlugTemplateConfig};
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::file_types::FileTypeCache;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("hss-remote-{}", Uuid::now_v7()))
    }

    fn context(root: &Path, templates: Vec<SlugTemplate>) -> StoreContext {
        let cache_dir = root.join("cache");
        StoreContext {
            store_id: "remote".into(),
            requests: Arc::new(RequestCache::new(
                &cache_dir,
                "remote",
                HttpClient::new(&FetchConfig::default()).unwrap(),
                false,
            )),
            file_types: Arc::new(FileTypeCache::load(&cache_dir)),
            templates: Arc::new(templates),
            concurrency: 4,
            cache_dir,
        }
    }

    async fn serve(server: &MockServer, route: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn paged_collection(server: &MockServer) {
        let base = server.uri();
        serve(server, "/collection.json", json!({
            "id": format!("{base}/collection.json"),
            "type": "Collection",
            "items": [{"id": format!("{base}/iiif/a/manifest.json"), "type": "Manifest"}],
            "next": format!("{base}/page2.json"),
        }))
        .await;
        serve(server, "/page2.json", json!({
            "id": format!("{base}/page2.json"),
            "type": "CollectionPage",
            "items": [{"id": format!("{base}/iiif/b/manifest.json"), "type": "Manifest"}],
        }))
        .await;
    }

    #[test]
    fn default_slug_rules() {
        let url = Url::parse("https://example.org/iiif/abc/manifest.json").unwrap();
        assert_eq!(default_slug(&url, ResourceType::Manifest), "manifests/iiif/abc");
        let url = Url::parse("https://example.org/collection.json").unwrap();
        assert_eq!(default_slug(&url, ResourceType::Collection), "collections/example.org");
        let url = Url::parse("https://example.org/objects/42").unwrap();
        assert_eq!(default_slug(&url, ResourceType::Manifest), "manifests/objects/42");
    }

    #[tokio::test]
    async fn paginated_root_yields_every_resource() {
        let server = MockServer::start().await;
        paged_collection(&server).await;

        let root = temp_root();
        let config = StoreConfig::remote(format!("{}/collection.json", server.uri()));
        let parsed = RemoteStore.parse(&config, &context(&root, Vec::new())).await.unwrap();
        assert_eq!(parsed.len(), 3);
        let slugs: Vec<_> = parsed.iter().map(|r| r.slug.as_str()).collect();
        assert!(slugs.contains(&"manifests/iiif/a"));
        assert!(slugs.contains(&"manifests/iiif/b"));
        assert!(parsed.iter().all(|r| !r.save_to_disk));
    }

    #[tokio::test]
    async fn templates_and_overrides_apply() {
        let server = MockServer::start().await;
        paged_collection(&server).await;
        let host = Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();

        let template = SlugTemplate::compile(
            "objects",
            &SlugTemplateConfig {
                resource_type: ResourceType::Manifest,
                domain: host,
                prefix: "/iiif/".into(),
                pattern: "{id}/manifest.json".into(),
                slug_prefix: "objects/".into(),
            },
        )
        .unwrap();

        let root = temp_root();
        let overrides = root.join("overrides");
        std::fs::create_dir_all(overrides.join("objects")).unwrap();
        std::fs::write(overrides.join("objects/a.json"), r#"{"id": "local-a", "type": "Manifest"}"#).unwrap();

        let mut config = StoreConfig::remote(format!("{}/collection.json", server.uri()));
        config.overrides = Some(overrides.to_string_lossy().to_string());
        let ctx = context(&root, vec![template]);
        let parsed = RemoteStore.parse(&config, &ctx).await.unwrap();

        let a = parsed.iter().find(|r| r.slug == "objects/a").unwrap();
        assert_eq!(a.slug_source, SlugSource::Template { name: "objects".into() });
        assert!(matches!(a.source, SourceDescriptor::Disk { .. }));

        let cache = ResourceCache::open(&ctx.cache_dir, &a.slug);
        let loaded = RemoteStore.load(&config, a, &cache, &ctx).await.unwrap().unwrap();
        assert_eq!(loaded.id, "local-a");
    }

    #[tokio::test]
    async fn load_flattens_collection_pages() {
        let server = MockServer::start().await;
        paged_collection(&server).await;

        let root = temp_root();
        let ctx = context(&root, Vec::new());
        let config = StoreConfig::remote(format!("{}/collection.json", server.uri()));
        let parsed = RemoteStore.parse(&config, &ctx).await.unwrap();
        let collection = parsed
            .iter()
            .find(|r| r.resource_type == ResourceType::Collection)
            .unwrap();

        let cache = ResourceCache::open(&ctx.cache_dir, &collection.slug);
        let loaded = RemoteStore.load(&config, collection, &cache, &ctx).await.unwrap().unwrap();
        assert_eq!(loaded.sub_resources, 2);
        assert!(loaded.graph.root().get("next").is_none());
    }
}
