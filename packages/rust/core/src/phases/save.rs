//! save-files: persist changed graphs, caches, the sitemap, and the build
//! hash, then close every step.

use tracing::{info, instrument, warn};

use hss_shared::json::write_json;
use hss_shared::{HssError, Result};

use crate::build::{BUILD_HASH_FILE, build_hash_record};
use crate::progress::{Phase, PhaseStats};
use crate::state::BuildState;

#[instrument(skip_all)]
pub(crate) async fn run(state: &mut BuildState) -> Result<()> {
    let mut stats = PhaseStats {
        total: state.resources.len(),
        ..Default::default()
    };

    for resource in state.resources.iter() {
        let Some(cache) = state.cache(resource.slug()) else {
            continue;
        };
        if cache.did_change() {
            let graph = resource.graph.read().unwrap_or_else(|e| e.into_inner());
            cache.save_graph(&graph)?;
            stats.processed += 1;
        }
        cache.save()?;
    }

    if state.options.emit {
        write_json(
            &state.config.build_dir.join("meta/sitemap.json"),
            &state.sitemap(),
        )?;
    }

    for linker_cache in state.linker_caches.values() {
        linker_cache.save()?;
    }
    state.file_types.save()?;
    write_json(
        &state.config.cache_dir.join(BUILD_HASH_FILE),
        &build_hash_record(&state.config),
    )?;

    let mut failures = Vec::new();
    for step in state.registry.steps() {
        let config = state.configured.get(step.id()).cloned().unwrap_or_default();
        if let Err(e) = step.close(&config).await {
            let e = HssError::step(step.id(), "close", e);
            warn!(error = %e, "close failed");
            failures.push(e.to_string());
        }
    }
    stats.failed = failures.len();
    state.failures.extend(failures);

    info!(graphs = stats.processed, "saved build state");
    state.record_stats(Phase::SaveFiles, stats);
    Ok(())
}
