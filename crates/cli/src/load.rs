//! Multi-document YAML loading into declared objects.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value as Json;
use skiff_core::{Origin, ResourceObject};
use tracing::debug;

pub fn max_yaml_bytes() -> usize {
    std::env::var("SKIFF_MAX_YAML_BYTES").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(1_000_000)
}

/// Parse every non-empty document of `text`, tagging each with its file and index.
pub fn parse_documents(text: &str, path: &Path) -> Result<Vec<ResourceObject>> {
    if text.len() > max_yaml_bytes() {
        return Err(anyhow!("{}: YAML payload too large (>{} bytes)", path.display(), max_yaml_bytes()));
    }
    let mut out = Vec::new();
    for (index, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("{}: parsing document {}", path.display(), index))?;
        if val.is_null() {
            continue;
        }
        let json: Json = serde_json::to_value(val).with_context(|| format!("{}: converting document {} to JSON", path.display(), index))?;
        let origin = Origin::Yaml { path: path.display().to_string(), index };
        let obj = ResourceObject::from_document(json, origin).with_context(|| format!("{}: document {}", path.display(), index))?;
        out.push(obj);
    }
    debug!(path = %path.display(), objects = out.len(), "loaded");
    Ok(out)
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
}

/// Expand directories (one level, sorted by name) into their YAML files.
fn expand(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for p in paths {
        if p.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(p)
                .with_context(|| format!("reading directory {}", p.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|e| e.is_file() && is_yaml(e))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(p.clone());
        }
    }
    Ok(files)
}

pub fn load_paths(paths: &[PathBuf]) -> Result<Vec<ResourceObject>> {
    let mut out = Vec::new();
    for file in expand(paths)? {
        let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
        out.extend(parse_documents(&text, &file)?);
    }
    Ok(out)
}
