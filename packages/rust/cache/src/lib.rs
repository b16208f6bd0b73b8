//! Cross-run cache tree for the IIIF static build.
//!
//! - [`ResourceCache`]: the per-resource facade over four merge-on-read documents
//! - [`LinkerCache`]: per-linker records of config and tracked files
//! - [`file_signature`]: mtime/ctime/size change detection

mod doc;
mod linker;
mod resource;
mod signature;

pub use doc::{CacheDoc, MergeMode, merge_into};
pub use linker::{LinkerCache, LinkerCacheEntry};
pub use resource::{ResourceCache, SaveReport};
pub use signature::{FileSignature, file_signature, signatures};
