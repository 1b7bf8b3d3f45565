//! Loading, merging and normalizing YAML configuration documents.

use serde_yaml_ng::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ConfigError;

/// Config file that may be missing without error.
pub const DEFAULT_CONFIG_FILE: &str = "./dqd.yaml";

/// Where configuration comes from, in merge order.
#[derive(Debug, Clone, Default)]
pub struct ConfigInputs {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    pub overrides: Vec<String>,
}

/// Read every input and produce one normalized document.
pub fn load(inputs: &ConfigInputs) -> Result<Value, ConfigError> {
    let mut root = Value::Mapping(Mapping::new());

    for dir in &inputs.dirs {
        for path in yaml_files(dir)? {
            merge(&mut root, read_document(&path)?);
        }
    }

    for file in &inputs.files {
        if !file.exists() && file == Path::new(DEFAULT_CONFIG_FILE) {
            debug!(path = %file.display(), "Default config file not found, skipping");
            continue;
        }
        merge(&mut root, read_document(file)?);
    }

    for entry in &inputs.overrides {
        apply_override(&mut root, entry)?;
    }

    normalize(&mut root)?;
    Ok(root)
}

/// Parse one YAML document from a string and normalize it.
pub fn from_str(yaml: &str) -> Result<Value, ConfigError> {
    let mut root: Value = serde_yaml_ng::from_str(yaml).map_err(|source| ConfigError::Parse {
        path: PathBuf::from("<inline>"),
        source,
    })?;
    if root.is_null() {
        root = Value::Mapping(Mapping::new());
    }
    normalize(&mut root)?;
    Ok(root)
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    if !dir.is_dir() {
        debug!(path = %dir.display(), "Config dir not found, skipping");
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();
    Ok(files)
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Loaded config file");
    let value: Value = serde_yaml_ng::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(value)
}

/// Deep-merge `overlay` into `base`. Mappings merge key by key; anything
/// else in the overlay replaces the base value. A null overlay is ignored.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply a `dotted.key=value` override. The value is read as a YAML scalar
/// so numbers and booleans keep their type.
pub fn apply_override(root: &mut Value, entry: &str) -> Result<(), ConfigError> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidOverride(entry.to_string()))?;
    if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(ConfigError::InvalidOverride(entry.to_string()));
    }

    let value = if raw.is_empty() {
        Value::String(String::new())
    } else {
        serde_yaml_ng::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    };

    let mut node = root;
    for segment in key.split('.') {
        if !node.is_mapping() {
            *node = Value::Mapping(Mapping::new());
        }
        node = match node {
            Value::Mapping(map) => map
                .entry(Value::String(segment.to_string()))
                .or_insert(Value::Null),
            _ => return Err(ConfigError::InvalidOverride(entry.to_string())),
        };
    }
    *node = value;
    Ok(())
}

/// Rewrite singular and list forms of `source`/`pipe` into keyed maps.
pub fn normalize(root: &mut Value) -> Result<(), ConfigError> {
    let Value::Mapping(map) = root else {
        return Err(ConfigError::NotAMapping);
    };
    normalize_entity(map, "source", "sources")?;
    normalize_entity(map, "pipe", "pipes")?;
    Ok(())
}

fn normalize_entity(
    map: &mut Mapping,
    singular: &'static str,
    plural: &'static str,
) -> Result<(), ConfigError> {
    let one = map.remove(singular).filter(|v| !v.is_null());
    let many = map.get(plural).filter(|v| !v.is_null()).cloned();

    match (one, many) {
        (Some(_), Some(_)) => Err(ConfigError::Conflict { singular, plural }),
        (Some(one), None) => {
            let mut keyed = Mapping::new();
            keyed.insert(Value::String(super::model::DEFAULT_SOURCE.to_string()), one);
            map.insert(Value::String(plural.to_string()), Value::Mapping(keyed));
            Ok(())
        }
        (None, Some(Value::Sequence(items))) => {
            let keyed: Mapping = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::String(format!("{}{}", plural, i)), item))
                .collect();
            map.insert(Value::String(plural.to_string()), Value::Mapping(keyed));
            Ok(())
        }
        _ => Ok(()),
    }
}
