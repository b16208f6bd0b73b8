//! warm-remote: prefetch every remote store's graph into its request cache.

use tracing::{info, instrument};

use hss_fetch::{RemoteWarmer, WarmTarget};
use hss_shared::REMOTE_STORE;

use crate::progress::{Phase, PhaseStats};
use crate::state::BuildState;

/// Never fails; load-stores fetches again whatever could not be warmed.
#[instrument(skip_all)]
pub(crate) async fn run(state: &mut BuildState) {
    let targets: Vec<WarmTarget> = state
        .stores
        .iter()
        .filter(|(_, handle)| handle.config.store_type == REMOTE_STORE)
        .map(|(id, handle)| WarmTarget {
            store_id: id.clone(),
            cache: handle.ctx.requests.clone(),
            roots: handle.config.remote_urls().into_iter().map(str::to_string).collect(),
        })
        .collect();
    if targets.is_empty() {
        return;
    }

    let warmer = RemoteWarmer::new(state.config.concurrency.fetch);
    let report = warmer.warm(targets).await;
    info!(
        discovered = report.discovered,
        completed = report.completed,
        failed = report.failed,
        "remote warming finished"
    );
    if report.failed > 0 {
        state
            .warnings
            .push(format!("warm-remote: {} url(s) failed", report.failed));
    }
    state.record_stats(
        Phase::WarmRemote,
        PhaseStats {
            total: report.discovered,
            processed: report.completed,
            failed: report.failed,
            ..Default::default()
        },
    );
    state.warm = Some(report);
}
