//! Shared types, error model, and configuration for the IIIF static build.
//!
//! This crate is the foundation depended on by all other `hss-*` crates.
//! It provides:
//! - [`HssError`]: the unified error type
//! - Resource types ([`ParsedResource`], [`ActiveResource`], [`SourceDescriptor`])
//! - Configuration ([`BuildConfig`], [`StoreConfig`], config loading)
//! - IIIF JSON helpers ([`ObjectGraph`] and the [`document`] readers)
//! - Layered option and run-list resolution

pub mod config;
pub mod document;
pub mod error;
pub mod hash;
pub mod json;
pub mod options;
pub mod slug;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    BuildConfig, CONFIG_FILE_NAME, ConcurrencyConfig, DEFAULT_RUN, DISK_STORE, FetchConfig,
    GeneratorConfig, REMOTE_STORE, ServerConfig, SlugTemplateConfig, StoreConfig, load_config,
    load_config_from, parse_config,
};
pub use document::{DocType, ObjectGraph};
pub use error::{HssError, Result};
pub use hash::{hash_str, structural_hash};
pub use options::{resolve_options, resolve_steps};
pub use slug::{SlugTemplate, glob_to_regex, slugify};
pub use types::{
    ActiveResource, ParsedResource, ResourceType, SharedGraph, SlugSource, SourceDescriptor,
};
