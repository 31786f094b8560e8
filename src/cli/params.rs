//! Parameter sources for graph templates: positional and `-S` source ids,
//! the `-t` parameter file and explicit `-P` values, merged into one map.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::errors::AppError;

/// Role and node id given to the first positional source.
pub const SOURCE_PRODUCT: &str = "sourceProduct";
/// Variable holding every positional source as an escaped file list.
pub const SOURCE_PRODUCTS: &str = "sourceProducts";
const SOURCE_PRODUCT_PREFIX: &str = "sourceProduct.";

/// A source product named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub id: String,
    /// Further ids that name the same source in graph templates.
    pub aliases: Vec<String>,
    pub path: PathBuf,
}

impl SourceSpec {
    fn new(id: &str, path: PathBuf) -> Self {
        Self {
            id: id.to_string(),
            aliases: Vec::new(),
            path,
        }
    }

    /// The id followed by the aliases.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Source specs for the positional files followed by the `-S` ones.
///
/// The first positional file is `sourceProduct` (alias `sourceProduct.1`),
/// file `n` (1-based) is `sourceProduct.n`. A `-S` id replaces any positional
/// id or alias of the same name.
pub fn source_specs(positional: &[PathBuf], named: &[(String, String)]) -> Vec<SourceSpec> {
    let mut specs: Vec<SourceSpec> = positional
        .iter()
        .enumerate()
        .map(|(i, path)| {
            if i == 0 {
                let mut spec = SourceSpec::new(SOURCE_PRODUCT, path.clone());
                spec.aliases.push(format!("{SOURCE_PRODUCT}.1"));
                spec
            } else {
                SourceSpec::new(&format!("{SOURCE_PRODUCT}.{}", i + 1), path.clone())
            }
        })
        .collect();
    for (id, path) in named {
        specs.retain(|s| &s.id != id);
        for spec in specs.iter_mut() {
            spec.aliases.retain(|a| a != id);
        }
        specs.push(SourceSpec::new(id, PathBuf::from(path)));
    }
    specs
}

/// Absolute, symlink-free form of `path` used to recognise the same file
/// under different spellings. Paths that do not exist yet are made absolute.
pub fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Parses `key=value` (or `key: value`) lines; `#` and `!` start comments.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let split = line
            .find(['=', ':'])
            .map(|i| (&line[..i], &line[i + 1..]));
        if let Some((key, value)) = split {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

fn parse_json_params(text: &str, path: &Path) -> Result<BTreeMap<String, String>, AppError> {
    let bad = |reason: String| AppError::ParamFile {
        path: path.display().to_string(),
        reason,
    };
    let value: Value = serde_json::from_str(text).map_err(|e| bad(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(bad("expected a JSON object".into()));
    };
    object
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => return Err(bad(format!("'{key}' must be a scalar, got {other}"))),
            };
            Ok((key, text))
        })
        .collect()
}

pub fn read_param_file(path: &Path) -> Result<BTreeMap<String, String>, AppError> {
    let text = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        parse_json_params(&text, path)
    } else {
        Ok(parse_properties(&text))
    }
}

/// Merges the substitution sources; later layers win.
pub fn merge_variables(
    sources: &[SourceSpec],
    param_file: &BTreeMap<String, String>,
    explicit: &[(String, String)],
) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for spec in sources {
        for id in spec.ids() {
            vars.insert(id.to_string(), spec.path.display().to_string());
        }
    }
    let positional: Vec<String> = sources
        .iter()
        .filter(|s| {
            s.ids()
                .any(|id| id == SOURCE_PRODUCT || id.starts_with(SOURCE_PRODUCT_PREFIX))
        })
        .map(|s| s.path.display().to_string())
        .collect();
    if !positional.is_empty() {
        vars.insert(
            SOURCE_PRODUCTS.to_string(),
            sargraph::graph::escape_file_list(&positional),
        );
    }
    vars.extend(param_file.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars.extend(explicit.iter().cloned());
    vars
}

/// Parses a byte count such as `1048576`, `512K`, `512M` or `2G`.
pub fn parse_cache_size(value: &str) -> Result<u64, AppError> {
    let invalid = || AppError::InvalidCacheSize {
        value: value.to_string(),
    };
    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();
    let digits = upper.strip_suffix('B').unwrap_or(&upper);
    let (digits, shift) = match digits.chars().last() {
        Some('K') => (&digits[..digits.len() - 1], 10),
        Some('M') => (&digits[..digits.len() - 1], 20),
        Some('G') => (&digits[..digits.len() - 1], 30),
        _ => (digits, 0),
    };
    let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
    n.checked_mul(1u64 << shift)
        .filter(|&bytes| bytes > 0)
        .ok_or_else(invalid)
}
