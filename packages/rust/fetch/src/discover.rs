//! Breadth-first discovery of a remote IIIF graph.
//!
//! Collections and their pages are fetched level by level with bounded
//! concurrency; Manifests are recorded from their references and never
//! fetched here. Every URL is visited once, so cycles and shared children
//! are harmless.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use hss_shared::document::{child_refs, doc_id, doc_type, first_page, next_page};
use hss_shared::{DocType, HssError, ResourceType, Result};

use crate::request_cache::RequestCache;

/// One resource found while walking a remote graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNode {
    pub url: String,
    pub resource_type: ResourceType,
    /// Collection that referenced this node.
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Resources in discovery order, root first.
    pub nodes: Vec<DiscoveredNode>,
    /// `(url, error)` of collections or pages that could not be fetched.
    pub failures: Vec<(String, String)>,
}

impl Discovery {
    pub fn manifests(&self) -> impl Iterator<Item = &DiscoveredNode> {
        self.nodes
            .iter()
            .filter(|n| n.resource_type == ResourceType::Manifest)
    }
}

/// A collection or page waiting to be fetched.
#[derive(Debug, Clone)]
struct Visit {
    url: String,
    /// Set for pages: the collection the page belongs to.
    owner: Option<String>,
    parent: Option<String>,
}

/// Walk everything reachable from `root`.
///
/// Fails only when the root itself cannot be fetched or is neither a
/// Manifest nor a Collection.
#[instrument(skip_all, fields(root = %root))]
pub async fn discover(cache: &RequestCache, root: &str, concurrency: usize) -> Result<Discovery> {
    let root_doc = cache.fetch(root).await?;
    let mut discovery = Discovery::default();

    match doc_type(&root_doc) {
        DocType::Manifest => {
            discovery.nodes.push(DiscoveredNode {
                url: root.to_string(),
                resource_type: ResourceType::Manifest,
                parent: None,
            });
            return Ok(discovery);
        }
        DocType::Collection | DocType::CollectionPage => {}
        other => {
            return Err(HssError::parse(format!(
                "{root}: expected a Manifest or Collection, found {other:?}"
            )));
        }
    }

    let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
    let root_visit = Visit {
        url: root.to_string(),
        owner: None,
        parent: None,
    };
    let mut frontier = expand(&root_visit, &root_doc, &mut visited, &mut discovery);

    while !frontier.is_empty() {
        let batch = std::mem::take(&mut frontier);
        let fetched: Vec<(Visit, Result<Value>)> = stream::iter(batch)
            .map(|visit| async move {
                let result = cache.fetch(&visit.url).await;
                (visit, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (visit, result) in fetched {
            match result {
                Ok(doc) => frontier.extend(expand(&visit, &doc, &mut visited, &mut discovery)),
                Err(e) => {
                    warn!(url = %visit.url, error = %e, "failed to fetch collection");
                    discovery.failures.push((visit.url, e.to_string()));
                }
            }
        }
    }

    info!(
        resources = discovery.nodes.len(),
        failures = discovery.failures.len(),
        "discovery complete"
    );
    Ok(discovery)
}

/// Record `doc` and its children; return the collections and pages still to fetch.
fn expand(
    visit: &Visit,
    doc: &Value,
    visited: &mut HashSet<String>,
    discovery: &mut Discovery,
) -> Vec<Visit> {
    let collection = match &visit.owner {
        Some(owner) => owner.clone(),
        None => {
            discovery.nodes.push(DiscoveredNode {
                url: visit.url.clone(),
                resource_type: ResourceType::Collection,
                parent: visit.parent.clone(),
            });
            visit.url.clone()
        }
    };

    let mut pending = Vec::new();
    for child in child_refs(doc) {
        let Some(id) = doc_id(child) else {
            continue;
        };
        let kind = doc_type(child);
        match kind {
            DocType::Manifest | DocType::Collection => {}
            _ => {
                debug!(id, ?kind, "skipping untyped child reference");
                continue;
            }
        }
        if !visited.insert(id.to_string()) {
            continue;
        }
        if kind == DocType::Manifest {
            discovery.nodes.push(DiscoveredNode {
                url: id.to_string(),
                resource_type: ResourceType::Manifest,
                parent: Some(collection.clone()),
            });
        } else {
            pending.push(Visit {
                url: id.to_string(),
                owner: None,
                parent: Some(collection.clone()),
            });
        }
    }

    for page in [first_page(doc), next_page(doc)].into_iter().flatten() {
        let page = absolute(&visit.url, &page);
        if visited.insert(page.clone()) {
            pending.push(Visit {
                url: page,
                owner: Some(collection.clone()),
                parent: visit.parent.clone(),
            });
        }
    }
    pending
}

/// `href` resolved against the page it appeared on; unparseable bases pass it through.
fn absolute(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}
