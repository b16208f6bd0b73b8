//! parse-stores: enumerate every store's resources and check slug uniqueness.

use std::collections::HashMap;

use tracing::{info, instrument};

use hss_shared::{HssError, Result};

use crate::progress::{Phase, PhaseStats};
use crate::state::BuildState;

#[instrument(skip_all, fields(stores = state.stores.len()))]
pub(crate) async fn run(state: &mut BuildState) -> Result<()> {
    let mut parsed = Vec::new();
    let mut owners: HashMap<String, String> = HashMap::new();

    for (id, handle) in &state.stores {
        let resources = handle.store.parse(&handle.config, &handle.ctx).await?;
        info!(store = %id, resources = resources.len(), "parsed store");
        for resource in resources {
            if let Some(other) = owners.insert(resource.slug.clone(), id.clone()) {
                return Err(HssError::validation(format!(
                    "duplicate slug `{}` in stores `{other}` and `{id}`",
                    resource.slug
                )));
            }
            parsed.push(resource);
        }
    }

    if let Some(slug) = &state.options.exact {
        if !owners.contains_key(slug) {
            return Err(HssError::validation(format!("no resource with slug `{slug}`")));
        }
    }

    state.progress.discovered(Phase::ParseStores, parsed.len());
    state.record_stats(
        Phase::ParseStores,
        PhaseStats {
            total: parsed.len(),
            processed: parsed.len(),
            ..Default::default()
        },
    );
    state.parsed = parsed;
    Ok(())
}
