//! emit: write rewritten documents, public metadata, and step files to the
//! output tree.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use hss_shared::document::{doc_id, doc_type, set_id};
use hss_shared::json::write_json;
use hss_shared::{ActiveResource, DocType, HssError, ResourceType, Result};

use crate::progress::{Phase, PhaseStats};
use crate::state::BuildState;

#[instrument(skip_all)]
pub(crate) async fn run(state: &mut BuildState) -> Result<()> {
    let targets = state.targets();
    let total = targets.len();
    state.progress.discovered(Phase::Emit, total);

    let mut stats = PhaseStats {
        total,
        ..Default::default()
    };
    let mut failures = Vec::new();
    for (i, resource) in targets.iter().enumerate() {
        match emit_resource(state, resource).await {
            Ok(written) => {
                if written {
                    stats.processed += 1;
                }
            }
            Err(e) => {
                warn!(slug = resource.slug(), error = %e, "failed to emit resource");
                stats.failed += 1;
                failures.push(format!("emit `{}`: {e}", resource.slug()));
            }
        }
        state.progress.processed(Phase::Emit, resource.slug(), i + 1, total);
    }

    info!(written = stats.processed, failed = stats.failed, "emitted resources");
    state.failures.extend(failures);
    state.record_stats(Phase::Emit, stats);
    Ok(())
}

/// Emit one resource. `Ok(true)` when its document was written.
async fn emit_resource(state: &BuildState, resource: &ActiveResource) -> Result<bool> {
    let slug = resource.slug();
    let out_dir = state.config.build_dir.join(slug);
    let Some(cache) = state.cache(slug) else {
        return Err(HssError::Cache(format!("no cache facade for `{slug}`")));
    };

    write_json(&out_dir.join("meta.json"), &Value::Object(cache.meta.get()))?;
    write_json(&out_dir.join("indices.json"), &Value::Object(cache.indices.get()))?;
    copy_dir(&cache.files_dir(), &out_dir).await?;

    if !resource.parsed.save_to_disk {
        return Ok(false);
    }

    let mut document = {
        let graph = resource.graph.read().unwrap_or_else(|e| e.into_inner());
        graph.root().clone()
    };
    set_id(
        &mut document,
        &state.output_url(slug, resource.resource_type()),
    );
    if resource.resource_type() == ResourceType::Collection {
        rewrite_members(state, &mut document);
    }
    write_json(&out_dir.join(resource.resource_type().output_file()), &document)?;
    debug!(slug, "emitted document");
    Ok(true)
}

/// Point Collection members at the emitted copies of resources in this build.
fn rewrite_members(state: &BuildState, document: &mut Value) {
    for key in ["items", "members", "collections", "manifests"] {
        let Some(Value::Array(members)) = document.get_mut(key) else {
            continue;
        };
        for member in members.iter_mut() {
            if doc_type(member) == DocType::Canvas {
                continue;
            }
            let target = doc_id(member)
                .and_then(|id| state.lookup.by_id(id))
                .filter(|r| r.parsed.save_to_disk)
                .map(|r| state.public_id(r));
            if let Some(id) = target {
                set_id(member, &id);
            }
        }
    }
}

/// Copy files written by steps next to the emitted document.
async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    let mut stack = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&src).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(HssError::io(&src, e)),
        };
        tokio::fs::create_dir_all(&dst)
            .await
            .map_err(|e| HssError::io(&dst, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| HssError::io(&src, e))? {
            let path = entry.path();
            let target = dst.join(entry.file_name());
            let file_type = entry.file_type().await.map_err(|e| HssError::io(&path, e))?;
            if file_type.is_dir() {
                stack.push((path, target));
            } else {
                tokio::fs::copy(&path, &target)
                    .await
                    .map_err(|e| HssError::io(&path, e))?;
            }
        }
    }
    Ok(())
}
