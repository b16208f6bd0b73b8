#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use hss_core::{BuildOptions, BuildResult, Builder, SilentProgress};
use hss_shared::{BuildConfig, StoreConfig};

pub const SERVER: &str = "http://localhost:5173";

/// A throwaway project directory with `content/`, `build/` and `cache/`.
pub struct Project {
    pub root: PathBuf,
}

impl Project {
    pub fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!("hss-{name}-{}", Uuid::now_v7()));
        std::fs::create_dir_all(root.join("content")).unwrap();
        Self { root }
    }

    pub fn content(&self) -> PathBuf {
        self.root.join("content")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn write(&self, rel: &str, value: &Value) -> PathBuf {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    pub fn read(&self, rel: &str) -> Value {
        read(&self.root.join(rel))
    }

    /// Config with a single disk store over `content/`.
    pub fn config(&self) -> BuildConfig {
        let mut config = BuildConfig {
            build_dir: self.build_dir(),
            cache_dir: self.cache_dir(),
            generated_dir: self.root.join("generated"),
            ..Default::default()
        };
        config.server.url = SERVER.into();
        config
            .stores
            .insert("content".into(), StoreConfig::disk(self.content().to_string_lossy()));
        config
    }
}

pub fn read(path: &Path) -> Value {
    let content = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
    serde_json::from_str(&content).unwrap()
}

pub fn options(cache: bool) -> BuildOptions {
    BuildOptions {
        cache,
        warm: false,
        ..Default::default()
    }
}

pub async fn run(builder: &Builder, options: BuildOptions) -> BuildResult {
    builder.build(options, Arc::new(SilentProgress)).await.unwrap()
}

pub fn manifest(id: &str, label: &str) -> Value {
    serde_json::json!({
        "@context": "http://iiif.io/api/presentation/3/context.json",
        "id": id,
        "type": "Manifest",
        "label": { "en": [label] },
    })
}
