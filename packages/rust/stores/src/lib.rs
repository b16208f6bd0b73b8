//! Resource origins for the IIIF static build.
//!
//! A [`Store`] turns a `[stores.<id>]` entry into parsed resources and loads
//! their documents. Two store types ship by default:
//! - `iiif-json` ([`DiskStore`]): files under a local directory
//! - `iiif-remote` ([`RemoteStore`]): a remote graph crawled over HTTP

mod disk;
mod file_types;
mod remote;
mod store;

use std::collections::HashMap;
use std::sync::Arc;

pub use disk::DiskStore;
pub use file_types::FileTypeCache;
pub use remote::{RemoteStore, default_slug};
pub use store::{LOAD_CACHE_KEY, LoadResult, Store, StoreContext};

/// Store implementations keyed by their config `type`.
#[derive(Clone)]
pub struct StoreRegistry {
    stores: HashMap<&'static str, Arc<dyn Store>>,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        let mut registry = Self {
            stores: HashMap::new(),
        };
        registry.register(Arc::new(DiskStore));
        registry.register(Arc::new(RemoteStore));
        registry
    }
}

impl StoreRegistry {
    /// Add or replace the store for its type.
    pub fn register(&mut self, store: Arc<dyn Store>) {
        self.stores.insert(store.store_type(), store);
    }

    pub fn get(&self, store_type: &str) -> Option<Arc<dyn Store>> {
        self.stores.get(store_type).cloned()
    }
}
