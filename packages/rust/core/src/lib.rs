//! Incremental static build pipeline for IIIF Manifests and Collections.
//!
//! This crate ties stores, caches, and steps together into the phased
//! [`Builder::build`] run. It provides:
//! - the [`Step`] contract and [`StepRegistry`] (extraction, enrichment, linkers)
//! - the built-in steps ([`default_registry`])
//! - the phases and the orchestrator ([`Builder`], [`BuildOptions`], [`BuildResult`])
//! - progress hooks ([`BuildProgress`], [`SilentProgress`])

pub mod api;
pub mod build;
mod phases;
pub mod progress;
mod queue;
mod state;
pub mod step;
pub mod steps;

pub use api::{CanvasOwner, CanvasView, ResolvedRef, ResourceLookup, ResourceView, StepApi};
pub use build::{BUILD_HASH_FILE, BuildOptions, BuildResult, Builder, build};
pub use progress::{BuildProgress, Phase, PhaseStats, SilentProgress};
pub use step::{Step, StepContext, StepKind, StepOutput, StepRegistry};
pub use steps::default_registry;
