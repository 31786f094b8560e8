//! Operator interface, the contexts handed to operators, parameter
//! descriptors and the string-alias operator registry.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::Array2;

use crate::core::progress::ProgressMonitor;
use crate::core::scheduler::Execution;
use crate::core::tile::{NodeIndex, Rect, Tile};
use crate::error::{Error, Result};
use crate::graph::Config;
use crate::io::RasterIo;
use crate::types::{Disposal, ProductInfo};

/// Computation behind a graph node.
///
/// `initialize` runs once per execution, before any tile is requested, and
/// returns the shape of the node's output. `compute_tile` may then be called
/// concurrently from several workers for different rectangles and bands.
pub trait Operator: Send + Sync {
    fn initialize(&mut self, ctx: &InitContext<'_>) -> Result<ProductInfo>;

    /// Samples of `band` over `rect`, shaped `(rect.height, rect.width)`.
    fn compute_tile(&self, ctx: &TileContext<'_>, band: usize, rect: Rect) -> Result<Array2<f32>>;

    /// Called once when the owning execution completes or aborts.
    fn dispose(&mut self, _disposal: Disposal) -> Result<()> {
        Ok(())
    }
}

/// Declared operator parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<&'static str>,
}

impl ParameterSpec {
    pub const fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: true,
            default: None,
        }
    }

    pub const fn optional(
        name: &'static str,
        description: &'static str,
        default: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            description,
            required: false,
            default,
        }
    }
}

/// Upstream product resolved for one source edge.
#[derive(Debug, Clone)]
pub struct SourceProduct {
    pub role: String,
    pub node: NodeIndex,
    pub node_id: String,
    pub info: Arc<ProductInfo>,
}

/// Everything an operator may consult while initializing.
pub struct InitContext<'a> {
    pub node_id: &'a str,
    pub config: &'a Config,
    pub parameters: &'a [ParameterSpec],
    pub sources: &'a [SourceProduct],
    pub io: &'a Arc<dyn RasterIo>,
}

impl<'a> InitContext<'a> {
    /// Configured value of `name`, falling back to the declared default.
    pub fn param(&self, name: &str) -> Option<&'a str> {
        self.config
            .get_str(name)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| {
                self.parameters
                    .iter()
                    .find(|p| p.name == name)
                    .and_then(|p| p.default)
            })
    }

    pub fn require_param(&self, name: &str) -> Result<&'a str> {
        self.param(name).ok_or_else(|| Error::MissingParameter {
            operator: self.node_id.to_string(),
            param: name.to_string(),
        })
    }

    /// Parses `name` into `T`; absent values yield `Ok(None)`.
    pub fn parse_param<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.param(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| Error::InvalidParameter {
                    param: name.to_string(),
                    value: raw.to_string(),
                }),
        }
    }

    pub fn source(&self, index: usize) -> Result<&'a SourceProduct> {
        self.sources.get(index).ok_or_else(|| {
            Error::Processing(format!(
                "node '{}' expects at least {} source(s), found {}",
                self.node_id,
                index + 1,
                self.sources.len()
            ))
        })
    }

    pub fn io(&self) -> Arc<dyn RasterIo> {
        self.io.clone()
    }
}

/// Per-tile view handed to `Operator::compute_tile`.
pub struct TileContext<'a> {
    pub(crate) execution: &'a Execution<'a>,
    pub(crate) sources: &'a [SourceProduct],
    pub(crate) target: &'a ProductInfo,
    pub(crate) progress: &'a ProgressMonitor,
}

impl<'a> TileContext<'a> {
    /// Pulls a tile of a source product through the scheduler.
    pub fn source_tile(&self, source: usize, band: usize, rect: Rect) -> Result<Arc<Tile>> {
        let product = self.sources.get(source).ok_or_else(|| {
            Error::Processing(format!("source index {source} out of range"))
        })?;
        self.execution
            .request_tile(product.node, band, rect, self.progress)
    }

    /// Pulls every band of a source over `rect`.
    pub fn source_tile_stack(&self, source: usize, rect: Rect) -> Result<Vec<Arc<Tile>>> {
        let product = self.sources.get(source).ok_or_else(|| {
            Error::Processing(format!("source index {source} out of range"))
        })?;
        self.execution
            .request_tile_stack(product.node, rect, self.progress)
    }

    pub fn sources(&self) -> &[SourceProduct] {
        self.sources
    }

    pub fn target(&self) -> &ProductInfo {
        self.target
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.progress.check_cancelled()
    }
}

pub type OperatorFactory = Arc<dyn Fn() -> Box<dyn Operator> + Send + Sync>;

/// Registered operator: descriptor plus constructor.
#[derive(Clone)]
pub struct OperatorEntry {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    factory: OperatorFactory,
}

impl fmt::Debug for OperatorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorEntry")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl OperatorEntry {
    pub fn new<F>(name: &str, description: &str, parameters: Vec<ParameterSpec>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Operator> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            factory: Arc::new(factory),
        }
    }

    pub fn create(&self) -> Box<dyn Operator> {
        (self.factory)()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Rejects unknown parameter names and missing required ones.
    pub fn validate(&self, config: &Config) -> Result<()> {
        if let Some(unknown) = config.names().find(|n| self.parameter(n).is_none()) {
            return Err(Error::UnknownParameter {
                operator: self.name.clone(),
                param: unknown.to_string(),
            });
        }
        for spec in self.parameters.iter().filter(|p| p.required) {
            let present = config
                .get_str(spec.name)
                .is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(Error::MissingParameter {
                    operator: self.name.clone(),
                    param: spec.name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Usage text listing the declared parameters.
    pub fn usage(&self) -> String {
        let mut out = format!("Usage:\n  sargraph {} [options] <source-file>...\n\n", self.name);
        out.push_str(&format!("Description:\n  {}\n\nParameter options:\n", self.description));
        for p in &self.parameters {
            let mut line = format!("  -P{}=<value>", p.name);
            while line.len() < 32 {
                line.push(' ');
            }
            line.push_str(p.description);
            if p.required {
                line.push_str(" (required)");
            }
            if let Some(d) = p.default {
                line.push_str(&format!("\n{:32}Default value is '{}'.", "", d));
            }
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

/// Operator registry keyed by alias.
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    entries: BTreeMap<String, OperatorEntry>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an operator under its alias.
    pub fn register(&mut self, entry: OperatorEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn resolve(&self, name: &str) -> Result<&OperatorEntry> {
        self.entries.get(name).ok_or_else(|| Error::UnknownOperator {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &OperatorEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl Operator for Nop {
        fn initialize(&mut self, _ctx: &InitContext<'_>) -> Result<ProductInfo> {
            Ok(ProductInfo::new("nop", 1, 1, vec![]))
        }

        fn compute_tile(&self, _ctx: &TileContext<'_>, _band: usize, rect: Rect) -> Result<Array2<f32>> {
            Ok(Array2::zeros(rect.shape()))
        }
    }

    fn entry() -> OperatorEntry {
        OperatorEntry::new(
            "Nop",
            "Does nothing",
            vec![
                ParameterSpec::required("file", "Input file"),
                ParameterSpec::optional("size", "Window size", Some("3")),
            ],
            || Box::new(Nop),
        )
    }

    #[test]
    fn test_resolve_unknown_operator() {
        let mut registry = OperatorRegistry::new();
        registry.register(entry());
        assert!(registry.resolve("Nop").is_ok());
        assert!(matches!(
            registry.resolve("Missing"),
            Err(Error::UnknownOperator { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_parameter() {
        let config = Config::new().with("file", "a").with("bogus", "1");
        assert!(matches!(
            entry().validate(&config),
            Err(Error::UnknownParameter { param, .. }) if param == "bogus"
        ));
    }

    #[test]
    fn test_validate_requires_parameters() {
        assert!(matches!(
            entry().validate(&Config::new().with("size", "5")),
            Err(Error::MissingParameter { param, .. }) if param == "file"
        ));
        assert!(entry().validate(&Config::new().with("file", "a")).is_ok());
    }

    #[test]
    fn test_param_defaults_and_parsing() {
        let e = entry();
        let config = Config::new().with("file", "a.tif");
        let io: Arc<dyn RasterIo> = Arc::new(crate::io::FileIo);
        let ctx = InitContext {
            node_id: "n",
            config: &config,
            parameters: &e.parameters,
            sources: &[],
            io: &io,
        };
        assert_eq!(ctx.param("file"), Some("a.tif"));
        assert_eq!(ctx.parse_param::<usize>("size").unwrap(), Some(3));
        assert_eq!(ctx.parse_param::<usize>("missing").unwrap(), None);
        assert!(ctx.source(0).is_err());
    }

    #[test]
    fn test_usage_lists_parameters() {
        let usage = entry().usage();
        assert!(usage.contains("-Pfile=<value>"));
        assert!(usage.contains("Default value is '3'"));
    }
}
