//! Layered option merging and per-resource step resolution.

use std::collections::HashSet;

use serde_json::{Map, Value};

/// Merge step configuration from global → store → resource layers.
///
/// Later layers override earlier ones key by key. A non-object layer
/// replaces everything before it.
pub fn resolve_options(layers: &[Option<&Value>]) -> Value {
    let mut merged = Value::Object(Map::new());
    for layer in layers.iter().flatten() {
        let Value::Object(over) = layer else {
            merged = Value::clone(layer);
            continue;
        };
        if !merged.is_object() {
            merged = Value::Object(Map::new());
        }
        if let Some(base) = merged.as_object_mut() {
            for (key, value) in over {
                base.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Resolve the ordered, deduplicated list of step ids for one resource.
///
/// `skip` removes ids from `defaults`, `run` appends ids that are missing,
/// and the result is reordered to `declared` order (registration order).
/// Ids absent from `declared` keep their relative position at the end.
pub fn resolve_steps(
    defaults: &[String],
    skip: &[String],
    run: &[String],
    declared: &[String],
) -> Vec<String> {
    let skip: HashSet<&str> = skip.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut steps: Vec<String> = defaults
        .iter()
        .chain(run.iter())
        .filter(|id| !skip.contains(id.as_str()) || run.contains(id))
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();

    let position = |id: &str| {
        declared
            .iter()
            .position(|d| d == id)
            .unwrap_or(declared.len())
    };
    steps.sort_by_key(|id| position(id));
    steps
}
