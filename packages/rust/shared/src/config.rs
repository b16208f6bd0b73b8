//! Build configuration.
//!
//! The project config lives in `hss.toml` at the project root. Every section
//! is optional; build options passed by the caller override the values here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HssError, Result};
use crate::hash::structural_hash;
use crate::slug::SlugTemplate;
use crate::types::ResourceType;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "hss.toml";

/// Store type reading IIIF JSON files from a directory.
pub const DISK_STORE: &str = "iiif-json";

/// Store type crawling a remote IIIF graph over HTTP.
pub const REMOTE_STORE: &str = "iiif-remote";

/// Step ids run when the config does not declare a `run` list.
pub const DEFAULT_RUN: &[&str] = &[
    "extract-label-string",
    "extract-slug-source",
    "extract-remote-source",
    "extract-thumbnail",
    "extract-topics",
    "extract-canvas-dims",
    "search-record",
];

// ---------------------------------------------------------------------------
// Config structs (matching hss.toml schema)
// ---------------------------------------------------------------------------

/// Top-level build config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Public output tree.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,

    /// Private cross-run cache tree.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Root of generator output directories.
    #[serde(default = "default_generated_dir")]
    pub generated_dir: PathBuf,

    /// Global ordered run-list of step ids.
    #[serde(default = "default_run")]
    pub run: Vec<String>,

    /// Global per-step configuration, keyed by step id.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,

    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,

    /// Named slug templates referenced by remote stores.
    #[serde(default)]
    pub slugs: BTreeMap<String, SlugTemplateConfig>,

    #[serde(default)]
    pub generators: BTreeMap<String, GeneratorConfig>,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            build_dir: default_build_dir(),
            cache_dir: default_cache_dir(),
            generated_dir: default_generated_dir(),
            run: default_run(),
            config: BTreeMap::new(),
            stores: BTreeMap::new(),
            slugs: BTreeMap::new(),
            generators: BTreeMap::new(),
            concurrency: ConcurrencyConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".iiif/cache")
}
fn default_generated_dir() -> PathBuf {
    PathBuf::from(".iiif/generated")
}
fn default_run() -> Vec<String> {
    DEFAULT_RUN.iter().map(|s| s.to_string()).collect()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Public base URL the output tree is served from.
    #[serde(default = "default_server_url")]
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:5173".into()
}

/// `[stores.<id>]` entry.
///
/// Origin fields depend on `type`: disk stores use `path`/`pattern`/`destination`,
/// remote stores use `url`/`urls`/`slug_template`/`overrides`/`save_manifests`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub store_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Glob matched against paths relative to `path` (default `**/*.json`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Slug prefix replacing the default `manifests`/`collections`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,

    /// Name of a `[slugs.<name>]` template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug_template: Option<String>,

    /// Directory of curated local copies, looked up as `<overrides>/<slug>.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<String>,

    /// Write remote documents into the output tree.
    #[serde(default)]
    pub save_manifests: bool,

    /// Step ids removed from the run-list for this store.
    #[serde(default)]
    pub skip: Vec<String>,

    /// Step ids appended to the run-list for this store.
    #[serde(default)]
    pub run: Vec<String>,

    /// Store-level per-step configuration.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,

    /// Resource-level per-step configuration, keyed by slug then step id.
    #[serde(default)]
    pub resources: BTreeMap<String, BTreeMap<String, Value>>,
}

impl StoreConfig {
    /// A disk store reading every JSON file under `path`.
    pub fn disk(path: impl Into<String>) -> Self {
        Self {
            store_type: DISK_STORE.into(),
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// A remote store rooted at `url`.
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            store_type: REMOTE_STORE.into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// All configured root URLs, `url` first.
    pub fn remote_urls(&self) -> Vec<&str> {
        self.url
            .iter()
            .chain(self.urls.iter())
            .map(String::as_str)
            .collect()
    }

    /// Resolved per-step config layers for `step` on resource `slug`.
    pub fn step_layers(&self, step: &str, slug: &str) -> (Option<&Value>, Option<&Value>) {
        (
            self.config.get(step),
            self.resources.get(slug).and_then(|r| r.get(step)),
        )
    }

    /// The part of the store config that decides which resources exist.
    fn origin(&self) -> Value {
        serde_json::json!({
            "type": self.store_type,
            "path": self.path,
            "pattern": self.pattern,
            "destination": self.destination,
            "url": self.url,
            "urls": self.urls,
            "slug_template": self.slug_template,
            "overrides": self.overrides,
            "save_manifests": self.save_manifests,
        })
    }
}

/// `[slugs.<name>]`: URL pattern ↔ slug template.
///
/// `pattern` uses `{name}` placeholders for one path segment and `{name*}`
/// for the remainder of the path, e.g. `/iiif/{id}/manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlugTemplateConfig {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub domain: String,
    #[serde(default)]
    pub prefix: String,
    pub pattern: String,
    /// Prepended to the captured values to form the slug.
    #[serde(default)]
    pub slug_prefix: String,
}

/// `[generators.<id>]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub generator_type: Option<String>,
    /// Explicit output target. Without one, a disk store reading the
    /// generator's own output directory is added to the build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub config: Value,
}

/// `[concurrency]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Resources processed at once within a phase.
    #[serde(default = "default_resource_concurrency")]
    pub resources: usize,
    /// Canvases processed at once within one Manifest.
    #[serde(default = "default_canvas_concurrency")]
    pub canvases: usize,
    /// Concurrent requests issued by the remote warmer and discovery.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            resources: default_resource_concurrency(),
            canvases: default_canvas_concurrency(),
            fetch: default_fetch_concurrency(),
        }
    }
}

fn default_resource_concurrency() -> usize {
    8
}
fn default_canvas_concurrency() -> usize {
    4
}
fn default_fetch_concurrency() -> usize {
    8
}

/// `[fetch]` section: HTTP timeouts and the shared retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retryable_statuses: default_retryable_statuses(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_retryable_statuses() -> Vec<u16> {
    vec![408, 425, 429, 500, 502, 503, 504]
}
fn default_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Derived views
// ---------------------------------------------------------------------------

impl BuildConfig {
    /// Configured stores plus one disk store per generator that has no
    /// explicit output target.
    ///
    /// Computed fresh on every call; the user configuration is never mutated.
    pub fn effective_stores(&self) -> BTreeMap<String, StoreConfig> {
        let mut stores = self.stores.clone();
        for (id, generator) in &self.generators {
            if generator.output.is_some() {
                continue;
            }
            let store_id = format!("generated-{id}");
            if stores.contains_key(&store_id) {
                continue;
            }
            let path = self.generated_dir.join(id);
            stores.insert(store_id, StoreConfig::disk(path.to_string_lossy()));
        }
        stores
    }

    /// Hash of everything that decides resource identity and output ids.
    ///
    /// A change invalidates the whole cache tree. Per-step configuration is
    /// not part of it.
    pub fn build_hash(&self) -> String {
        let stores: BTreeMap<String, Value> = self
            .effective_stores()
            .into_iter()
            .map(|(id, store)| (id, store.origin()))
            .collect();
        structural_hash(&serde_json::json!({
            "server": self.server.url,
            "stores": stores,
            "slugs": self.slugs,
        }))
    }

    /// Check that every store is well-formed. Fatal before any phase runs.
    pub fn validate(&self) -> Result<()> {
        for (name, template) in &self.slugs {
            SlugTemplate::compile(name, template)?;
        }
        for (id, store) in self.effective_stores() {
            match store.store_type.as_str() {
                DISK_STORE => {
                    if store.path.as_deref().is_none_or(str::is_empty) {
                        return Err(HssError::config(format!("store `{id}` has no path")));
                    }
                }
                REMOTE_STORE => {
                    if store.remote_urls().is_empty() {
                        return Err(HssError::config(format!("store `{id}` has no url")));
                    }
                    if let Some(name) = &store.slug_template {
                        if !self.slugs.contains_key(name) {
                            return Err(HssError::config(format!(
                                "store `{id}` references unknown slug template `{name}`"
                            )));
                        }
                    }
                }
                other => {
                    return Err(HssError::config(format!(
                        "store `{id}` has unknown type `{other}`"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the build config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<BuildConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HssError::io(path, e))?;
    parse_config(&content)
        .map_err(|e| HssError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Load `hss.toml` from `dir`. Returns defaults if the file does not exist.
pub fn load_config(dir: &Path) -> Result<BuildConfig> {
    let path = dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(BuildConfig::default());
    }
    load_config_from(&path)
}

/// Parse config TOML from a string.
pub fn parse_config(content: &str) -> std::result::Result<BuildConfig, toml::de::Error> {
    toml::from_str(content)
}
