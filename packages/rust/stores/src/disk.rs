//! Disk store: IIIF JSON files under a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use hss_cache::ResourceCache;
use hss_shared::{
    DISK_STORE, HssError, ParsedResource, Result, SlugSource, SourceDescriptor, StoreConfig,
    glob_to_regex,
};

use crate::store::{LoadResult, Store, StoreContext, disk_changed, disk_path, load_disk};

/// Default file pattern when a store declares none.
const DEFAULT_PATTERN: &str = "**/*.json";

pub struct DiskStore;

#[async_trait]
impl Store for DiskStore {
    fn store_type(&self) -> &'static str {
        DISK_STORE
    }

    #[instrument(skip_all, fields(store = %ctx.store_id))]
    async fn parse(&self, config: &StoreConfig, ctx: &StoreContext) -> Result<Vec<ParsedResource>> {
        let root = PathBuf::from(
            config
                .path
                .as_deref()
                .ok_or_else(|| HssError::config(format!("store `{}` has no path", ctx.store_id)))?,
        );
        let pattern_text = config.pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
        let pattern = glob_to_regex(pattern_text).ok_or_else(|| {
            HssError::config(format!("store `{}` has an invalid pattern `{pattern_text}`", ctx.store_id))
        })?;

        let mut resources = Vec::new();
        for file in walk_json_files(&root).await? {
            let rel = relative_path(&root, &file);
            if !pattern.is_match(&rel) {
                continue;
            }
            let Some(resource_type) = ctx.file_types.resolve(&file) else {
                debug!(path = %rel, "not a Manifest or Collection, skipping");
                continue;
            };
            let prefix = config
                .destination
                .as_deref()
                .unwrap_or(resource_type.slug_prefix())
                .trim_matches('/');
            let slug = format!("{prefix}/{}", file_slug(&rel));
            let file_path = file.to_string_lossy().to_string();
            resources.push(ParsedResource {
                resource_type,
                slug,
                slug_source: SlugSource::File,
                path: rel.clone(),
                store_id: ctx.store_id.clone(),
                source: SourceDescriptor::Disk {
                    path: rel,
                    file_path,
                },
                save_to_disk: true,
            });
        }

        resources.sort_by(|a, b| a.slug.cmp(&b.slug));
        info!(root = %root.display(), resources = resources.len(), "parsed disk store");
        Ok(resources)
    }

    async fn invalidate(
        &self,
        _config: &StoreConfig,
        resource: &ParsedResource,
        cache: &ResourceCache,
        _ctx: &StoreContext,
    ) -> Result<bool> {
        Ok(disk_path(resource).is_none_or(|path| disk_changed(path, cache)))
    }

    async fn load(
        &self,
        _config: &StoreConfig,
        resource: &ParsedResource,
        cache: &ResourceCache,
        _ctx: &StoreContext,
    ) -> Result<Option<LoadResult>> {
        let Some(path) = disk_path(resource) else {
            return Err(HssError::validation(format!(
                "disk store resource `{}` has a remote source",
                resource.slug
            )));
        };
        load_disk(path, &resource.path, cache).await
    }
}

/// Every `.json` file under `root`, sorted. A missing root yields nothing.
async fn walk_json_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %current.display(), "store directory does not exist");
                continue;
            }
            Err(e) => return Err(HssError::io(&current, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HssError::io(&current, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| HssError::io(&path, e))?;
            if file_type.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn relative_path(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Slug tail for a relative file path: extension dropped, and a trailing
/// `manifest`/`collection` file name folded into its directory.
fn file_slug(rel: &str) -> String {
    let stem = rel.strip_suffix(".json").unwrap_or(rel);
    for name in ["manifest", "collection"] {
        if let Some(dir) = stem.strip_suffix(&format!("/{name}")) {
            return dir.to_string();
        }
    }
    stem.to_string()
}
