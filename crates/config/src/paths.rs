//! Dotted path resolution over the configuration tree
//!
//! Paths are walked over the JSON form of [`AuditConfig`], but only paths that
//! exist in the typed schema are accepted. The closed set is derived once from
//! the serialized baseline, so adding a field to a schema struct is the only
//! way to make a new path addressable.

use crate::schema::AuditConfig;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use types::ConfigPathError;

/// Fields maintained by the manager and never written through `update_config`
pub const READ_ONLY_PATHS: [&str; 3] = ["environment", "version", "lastUpdated"];

/// Fields excluded from reload diffs
pub const METADATA_PATHS: [&str; 2] = ["version", "lastUpdated"];

struct KnownPaths {
    leaves: BTreeSet<String>,
    sections: BTreeSet<String>,
}

static KNOWN: Lazy<KnownPaths> = Lazy::new(|| {
    let baseline = serde_json::to_value(AuditConfig::default()).unwrap_or(Value::Null);
    let mut leaves = BTreeSet::new();
    let mut sections = BTreeSet::new();
    collect(&baseline, "", &mut leaves, &mut sections);
    KnownPaths { leaves, sections }
});

fn collect(value: &Value, prefix: &str, leaves: &mut BTreeSet<String>, sections: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if !prefix.is_empty() {
                sections.insert(prefix.to_string());
            }
            for (key, child) in map {
                collect(child, &join(prefix, key), leaves, sections);
            }
        }
        _ => {
            leaves.insert(prefix.to_string());
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// What a known path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Leaf,
    Section,
}

/// Check `path` against the schema
pub fn resolve(path: &str) -> Result<PathKind, ConfigPathError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ConfigPathError::Empty);
    }
    if KNOWN.leaves.contains(path) {
        Ok(PathKind::Leaf)
    } else if KNOWN.sections.contains(path) {
        Ok(PathKind::Section)
    } else {
        Err(ConfigPathError::NotFound {
            path: path.to_string(),
        })
    }
}

/// Resolve a path that an update may write to
pub fn resolve_writable(path: &str) -> Result<(), ConfigPathError> {
    match resolve(path)? {
        PathKind::Section => Err(ConfigPathError::NotALeaf {
            path: path.to_string(),
        }),
        PathKind::Leaf if READ_ONLY_PATHS.contains(&path) => Err(ConfigPathError::ReadOnly {
            path: path.to_string(),
        }),
        PathKind::Leaf => Ok(()),
    }
}

/// Every leaf path of the schema, sorted
pub fn known_leaf_paths() -> impl Iterator<Item = &'static str> {
    KNOWN.leaves.iter().map(String::as_str)
}

/// Walk `path` through `value`
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Replace the value at an existing `path`, returning the previous value
///
/// Intermediate objects are never created: the parent of the leaf must exist.
pub fn set(value: &mut Value, path: &str, new_value: Value) -> Result<Value, ConfigPathError> {
    let not_found = || ConfigPathError::NotFound {
        path: path.to_string(),
    };

    let (parent_path, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };

    let parent = match parent_path {
        Some(parent_path) => parent_path
            .split('.')
            .try_fold(&mut *value, |current, segment| {
                current.as_object_mut()?.get_mut(segment)
            })
            .ok_or_else(not_found)?,
        None => value,
    };

    let slot = parent
        .as_object_mut()
        .and_then(|map| map.get_mut(leaf))
        .ok_or_else(not_found)?;

    Ok(std::mem::replace(slot, new_value))
}

/// Flatten a tree into `path -> leaf value`; arrays count as leaves
pub fn leaves(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten(value, "", &mut out);
    out
}

fn flatten(value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() || prefix.is_empty() => {
            for (key, child) in map {
                flatten(child, &join(prefix, key), out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

/// One differing leaf between two trees
#[derive(Debug, Clone, PartialEq)]
pub struct LeafChange {
    pub path: String,
    pub previous_value: Value,
    pub new_value: Value,
}

/// Leaf-by-leaf difference, ignoring manager metadata
pub fn diff(previous: &Value, current: &Value) -> Vec<LeafChange> {
    let before = leaves(previous);
    let after = leaves(current);

    let paths: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    paths
        .into_iter()
        .filter(|path| !METADATA_PATHS.contains(&path.as_str()))
        .filter_map(|path| {
            let old = before.get(path).cloned().unwrap_or(Value::Null);
            let new = after.get(path).cloned().unwrap_or(Value::Null);
            (old != new).then(|| LeafChange {
                path: path.clone(),
                previous_value: old,
                new_value: new,
            })
        })
        .collect()
}

/// Copy of `value` without manager metadata, used for content digests
pub fn without_metadata(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let filtered: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| !METADATA_PATHS.contains(&key.as_str()))
                .map(|(key, child)| (key.clone(), child.clone()))
                .collect();
            Value::Object(filtered)
        }
        other => other.clone(),
    }
}
