//! Phases, per-phase statistics, and progress hooks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use hss_fetch::{FetchEvent, FetchObserver, WarmReport};
use hss_shared::HssError;

use crate::build::BuildResult;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Build phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    WarmRemote,
    ParseStores,
    LoadStores,
    Link,
    Extract,
    Enrich,
    Emit,
    BuildIndices,
    SaveFiles,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::WarmRemote,
        Phase::ParseStores,
        Phase::LoadStores,
        Phase::Link,
        Phase::Extract,
        Phase::Enrich,
        Phase::Emit,
        Phase::BuildIndices,
        Phase::SaveFiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WarmRemote => "warm-remote",
            Self::ParseStores => "parse-stores",
            Self::LoadStores => "load-stores",
            Self::Link => "link",
            Self::Extract => "extract",
            Self::Enrich => "enrich",
            Self::Emit => "emit",
            Self::BuildIndices => "build-indices",
            Self::SaveFiles => "save-files",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = HssError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| HssError::config(format!("unknown phase `{s}`")))
    }
}

// ---------------------------------------------------------------------------
// PhaseStats
// ---------------------------------------------------------------------------

/// Counters of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseStats {
    /// Resources the phase considered.
    pub total: usize,
    /// Resources on which at least one step ran (or that were loaded / emitted).
    pub processed: usize,
    /// Step invocations skipped because their cached result was still valid.
    pub cache_hits: usize,
    /// Step invocations that ran.
    pub steps_run: usize,
    pub failed: usize,
}

/// Thread-safe accumulator behind [`PhaseStats`].
#[derive(Debug, Default)]
pub(crate) struct PhaseCounters {
    pub total: AtomicUsize,
    pub processed: AtomicUsize,
    pub cache_hits: AtomicUsize,
    pub steps_run: AtomicUsize,
    pub failed: AtomicUsize,
}

impl PhaseCounters {
    pub fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PhaseStats {
        PhaseStats {
            total: self.total.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            steps_run: self.steps_run.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

// ---------------------------------------------------------------------------
// BuildProgress
// ---------------------------------------------------------------------------

/// Progress callbacks, invoked synchronously. Implementations must not block.
pub trait BuildProgress: Send + Sync {
    /// Called when entering a phase.
    fn phase(&self, phase: Phase);
    /// Called once the number of resources a phase will process is known.
    fn discovered(&self, phase: Phase, total: usize);
    /// Called after each resource of a phase completes.
    fn processed(&self, phase: Phase, slug: &str, current: usize, total: usize);
    /// Fetch lifecycle event from any request cache.
    fn fetch(&self, _event: &FetchEvent) {}
    /// Running remote warming totals.
    fn warm(&self, _totals: WarmReport) {}
    /// Called when the build completes.
    fn done(&self, result: &BuildResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl BuildProgress for SilentProgress {
    fn phase(&self, _phase: Phase) {}
    fn discovered(&self, _phase: Phase, _total: usize) {}
    fn processed(&self, _phase: Phase, _slug: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &BuildResult) {}
}

/// Forwards fetch events from the HTTP layer to the build progress.
pub(crate) struct ProgressObserver(pub Arc<dyn BuildProgress>);

impl FetchObserver for ProgressObserver {
    fn on_fetch(&self, event: &FetchEvent) {
        self.0.fetch(event);
    }

    fn on_warm_progress(&self, totals: WarmReport) {
        self.0.warm(totals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names_roundtrip() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("render".parse::<Phase>().is_err());
    }

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::WarmRemote < Phase::ParseStores);
        assert!(Phase::Enrich < Phase::Emit);
        assert!(Phase::BuildIndices < Phase::SaveFiles);
    }
}
