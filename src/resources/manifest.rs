//! Manifest parsing
//!
//! Turns multi-document YAML (or JSON) into ordered [`Resource`]s. `List`
//! kinds (`v1/List`, `ConfigMapList`, ...) are expanded into their items.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::resource::Resource;
use crate::error::{Error, Result};

/// Parse YAML documents into resources, preserving document order
pub fn parse_manifest(bytes: &[u8]) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();

    for (idx, document) in serde_yaml::Deserializer::from_slice(bytes).enumerate() {
        let yaml = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::Parse(format!("document {}: {}", idx + 1, e)))?;
        if yaml.is_null() {
            continue;
        }

        let value: Value = serde_json::to_value(&yaml)
            .map_err(|e| Error::Parse(format!("document {}: {}", idx + 1, e)))?;
        collect_resources(value, idx + 1, &mut resources)?;
    }

    Ok(resources)
}

/// Read manifest files in the order given; directories contribute their
/// `.yaml`/`.yml`/`.json` files sorted by name
pub fn read_manifest_files(paths: &[PathBuf]) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for path in paths {
        for file in expand_path(path)? {
            let bytes = std::fs::read(&file)
                .map_err(|e| Error::Parse(format!("reading {}: {}", file.display(), e)))?;
            let parsed = parse_manifest(&bytes).map_err(|e| match e {
                Error::Parse(msg) => Error::Parse(format!("{}: {}", file.display(), msg)),
                other => other,
            })?;
            resources.extend(parsed);
        }
    }
    Ok(resources)
}

fn expand_path(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let entries = std::fs::read_dir(path)
        .map_err(|e| Error::Parse(format!("reading {}: {}", path.display(), e)))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn collect_resources(value: Value, doc: usize, out: &mut Vec<Resource>) -> Result<()> {
    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with("List"))
        && value.get("items").is_some_and(Value::is_array);

    if is_list {
        if let Value::Object(mut map) = value {
            if let Some(Value::Array(items)) = map.remove("items") {
                for item in items {
                    collect_resources(item, doc, out)?;
                }
            }
        }
        return Ok(());
    }

    let res = Resource::from_value(value).map_err(|e| match e {
        Error::InvalidResource(msg) => Error::Parse(format!("document {}: {}", doc, msg)),
        other => other,
    })?;
    out.push(res);
    Ok(())
}
