//! Remote IIIF access: HTTP with retry, per-store request caches,
//! paginated discovery, and the remote warmer.

mod client;
mod discover;
mod request_cache;
mod retry;
mod warmer;

pub use client::{FetchEvent, FetchObserver, HttpClient, SilentObserver, WarmReport};
pub use discover::{DiscoveredNode, Discovery, discover};
pub use request_cache::RequestCache;
pub use retry::{RetryPolicy, parse_retry_after};
pub use warmer::{RemoteWarmer, WarmTarget};
