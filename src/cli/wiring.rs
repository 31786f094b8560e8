//! Completes user graphs before execution: Read nodes for command-line
//! sources, a trailing Write node, and the Read -> operator -> Write graph
//! of a single-operator invocation.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use sargraph::core::OperatorEntry;
use sargraph::graph::{Config, Graph, Node, PRODUCT_SET_READER, READ_OPERATOR, parse_file_list};
use sargraph::operators::WRITE_OPERATOR;
use sargraph::types::ProductFormat;
use sargraph::{Error, GraphError};

use super::errors::AppError;
use super::params::{SourceSpec, canonical};

/// What auto-wiring added to a graph.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Wiring {
    pub reads: Vec<String>,
    pub write: Option<String>,
}

/// Output format: explicit, else inferred from the target extension, else BEAM-DIMAP.
pub fn output_format(target: &Path, format: Option<ProductFormat>) -> ProductFormat {
    format
        .or_else(|| ProductFormat::from_path(target))
        .unwrap_or(ProductFormat::BeamDimap)
}

fn write_node(id: &str, source: &str, target: &Path, format: ProductFormat) -> Node {
    Node::new(id, WRITE_OPERATOR)
        .with_config(
            Config::new()
                .with("file", target.display().to_string())
                .with("formatName", format.name()),
        )
        .with_source("sourceProduct", source)
}

fn read_node(id: &str, path: &Path) -> Node {
    Node::new(id, READ_OPERATOR).with_config(Config::new().with("file", path.display().to_string()))
}

/// Groups source specs by the file they name, keeping first-seen order.
fn group_by_file(sources: &[SourceSpec]) -> Vec<(PathBuf, Vec<&SourceSpec>)> {
    let mut groups: Vec<(PathBuf, Vec<&SourceSpec>)> = Vec::new();
    for spec in sources {
        let path = canonical(&spec.path);
        match groups.iter_mut().find(|(p, _)| *p == path) {
            Some((_, specs)) => specs.push(spec),
            None => groups.push((path, vec![spec])),
        }
    }
    groups
}

/// True when some node has a source edge naming `id`.
fn is_referenced(graph: &Graph, id: &str) -> bool {
    graph.nodes().iter().any(|n| n.has_source(id))
}

/// Points every edge naming a missing node `alias` at `target` instead.
fn redirect_dangling(graph: &mut Graph, alias: &str, target: &str) {
    if graph.contains(alias) {
        return;
    }
    let consumers: Vec<String> = graph
        .nodes()
        .iter()
        .filter(|n| n.has_source(alias))
        .map(|n| n.id.clone())
        .collect();
    for consumer in consumers {
        if let Some(node) = graph.find_node_mut(&consumer) {
            for source in node.sources.iter_mut().filter(|s| s.node_id == alias) {
                debug!(consumer = %consumer, alias, to = target, "Redirecting source edge");
                source.node_id = target.to_string();
            }
        }
    }
}

/// Files already read by the graph: Read `file` values and the entries of
/// product-set file lists, mapped to the node reading them.
fn files_read_by(graph: &Graph) -> HashMap<PathBuf, String> {
    let mut files = HashMap::new();
    for node in graph.nodes() {
        let paths = match node.operator.as_str() {
            READ_OPERATOR => node.config.get_str("file").map(|f| vec![f.to_string()]),
            PRODUCT_SET_READER => node.config.get_str("fileList").map(parse_file_list),
            _ => None,
        };
        for path in paths.unwrap_or_default() {
            files
                .entry(canonical(Path::new(&path)))
                .or_insert_with(|| node.id.clone());
        }
    }
    files
}

/// Adds a Read node for every source not yet represented in the graph, then a
/// Write node after the original last node unless that node already writes.
///
/// A source counts as represented when a node carries one of its ids, or a
/// Read node or product-set file list names the same file.
pub fn wire_graph(
    graph: &mut Graph,
    sources: &[SourceSpec],
    target: &Path,
    format: Option<ProductFormat>,
) -> Result<Wiring, AppError> {
    let last = graph
        .last_node()
        .map(|n| (n.id.clone(), n.operator.clone()))
        .ok_or(Error::Graph(GraphError::Empty))?;

    let read_files = files_read_by(graph);

    let mut wiring = Wiring::default();
    for (path, specs) in group_by_file(sources) {
        let ids: Vec<&str> = specs.iter().flat_map(|s| s.ids()).collect();
        let existing = ids
            .iter()
            .find(|id| graph.contains(id))
            .map(|id| id.to_string())
            .or_else(|| read_files.get(&path).cloned());

        let representative = match existing {
            Some(id) => id,
            None => {
                if !ids.iter().any(|id| is_referenced(graph, id)) {
                    warn!(
                        ids = ?ids,
                        file = %specs[0].path.display(),
                        "Source is not referenced by any node, it will not be read"
                    );
                }
                let id = graph.unique_id(ids[0]);
                graph
                    .add_node(read_node(&id, &specs[0].path))
                    .map_err(Error::from)?;
                info!(node = %id, file = %specs[0].path.display(), "Added Read node for source");
                wiring.reads.push(id.clone());
                id
            }
        };
        for alias in ids.iter().filter(|id| **id != representative) {
            redirect_dangling(graph, alias, &representative);
        }
    }

    let (last_id, last_operator) = last;
    if last_operator != WRITE_OPERATOR {
        let format = output_format(target, format);
        let id = graph.unique_id(WRITE_OPERATOR);
        graph
            .add_node(write_node(&id, &last_id, target, format))
            .map_err(Error::from)?;
        info!(node = %id, source = %last_id, output = %target.display(), %format, "Added Write node");
        wiring.write = Some(id);
    }
    Ok(wiring)
}

/// Builds `Read... -> <operator> -> Write` for a single-operator invocation.
///
/// `-P` values are checked against the operator's parameter descriptors first;
/// unknown or missing parameters are usage errors. Each distinct file gets
/// one Read node; the operator gets one source edge per source spec.
pub fn operator_graph(
    entry: &OperatorEntry,
    params: &[(String, String)],
    sources: &[SourceSpec],
    target: &Path,
    format: Option<ProductFormat>,
) -> Result<Graph, AppError> {
    let mut config = Config::new();
    for (name, value) in params {
        config.set(name, value.as_str());
    }
    entry
        .validate(&config)
        .map_err(|e| AppError::usage(e.to_string(), entry.usage()))?;

    let mut graph = Graph::new();
    let mut reads: HashMap<PathBuf, String> = HashMap::new();
    let mut edges = Vec::with_capacity(sources.len());
    for spec in sources {
        let path = canonical(&spec.path);
        let read_id = match reads.get(&path) {
            Some(id) => id.clone(),
            None => {
                let id = graph.unique_id(READ_OPERATOR);
                graph
                    .add_node(read_node(&id, &spec.path))
                    .map_err(Error::from)?;
                reads.insert(path, id.clone());
                id
            }
        };
        edges.push((spec.id.clone(), read_id));
    }

    let op_id = graph.unique_id(&entry.name);
    let mut node = Node::new(&op_id, &entry.name).with_config(config);
    for (role, producer) in &edges {
        node = node.with_source(role, producer);
    }
    graph.add_node(node).map_err(Error::from)?;

    if entry.name != WRITE_OPERATOR {
        let format = output_format(target, format);
        let id = graph.unique_id(WRITE_OPERATOR);
        graph
            .add_node(write_node(&id, &op_id, target, format))
            .map_err(Error::from)?;
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::params::source_specs;
    use pretty_assertions::assert_eq;
    use sargraph::operators::builtin_registry;
    use sargraph::core::{EngineConfig, Scheduler};
    use sargraph::io::MemoryIo;
    use std::sync::Arc;

    fn source_ids(graph: &Graph, id: &str) -> Vec<String> {
        graph
            .find_node(id)
            .map(|n| n.sources.iter().map(|s| s.node_id.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_output_format() {
        assert_eq!(output_format(Path::new("a.tif"), None), ProductFormat::GeoTiff);
        assert_eq!(output_format(Path::new("a"), None), ProductFormat::BeamDimap);
        assert_eq!(
            output_format(Path::new("a.tif"), Some(ProductFormat::Jpeg)),
            ProductFormat::Jpeg
        );
    }

    #[test]
    fn test_reads_synthesized_for_referenced_sources() {
        let mut graph = Graph::new();
        graph
            .add_node(
                Node::new("filter", "Image-Filter").with_source("sourceProduct", "sourceProduct.1"),
            )
            .unwrap();
        let sources = source_specs(&[PathBuf::from("in.dim")], &[]);
        let wiring = wire_graph(&mut graph, &sources, Path::new("out.tif"), None).unwrap();

        assert_eq!(wiring.reads, vec!["sourceProduct"]);
        assert_eq!(wiring.write.as_deref(), Some("Write"));
        assert_eq!(source_ids(&graph, "filter"), vec!["sourceProduct"]);
        assert_eq!(source_ids(&graph, "Write"), vec!["filter"]);
        let write = graph.find_node("Write").unwrap();
        assert_eq!(write.config.get_str("formatName"), Some("GeoTIFF"));
        graph.validate().unwrap();
    }

    #[test]
    fn test_unreferenced_source_read_is_not_a_terminal() {
        let mut graph = Graph::new();
        graph
            .add_node(
                Node::new("filter", "Image-Filter").with_source("sourceProduct", "sourceProduct"),
            )
            .unwrap();
        let sources = source_specs(
            &[PathBuf::from("in.dim")],
            &[("unused".into(), "other.dim".into())],
        );
        let wiring = wire_graph(&mut graph, &sources, Path::new("out.dim"), None).unwrap();

        assert_eq!(wiring.reads, vec!["sourceProduct", "unused"]);
        assert!(graph.consumers_of("unused").is_empty());

        let scheduler = Scheduler::new(
            EngineConfig::default(),
            Arc::new(builtin_registry()),
            Arc::new(MemoryIo::new()),
        )
        .unwrap();
        let execution = scheduler.prepare(&graph).unwrap();
        let terminals: Vec<&str> = execution
            .terminals()
            .iter()
            .map(|&idx| execution.node_id(idx))
            .collect();
        assert_eq!(terminals, vec!["Write"]);
    }

    #[test]
    fn test_existing_read_of_same_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("in.dim");
        std::fs::write(&file, "").unwrap();

        let mut graph = Graph::new();
        graph
            .add_node(
                Node::new("reader", READ_OPERATOR)
                    .with_config(Config::new().with("file", file.display().to_string())),
            )
            .unwrap();
        let spelled = dir.path().join(".").join("in.dim");
        let sources = source_specs(&[spelled], &[]);
        let wiring = wire_graph(&mut graph, &sources, Path::new("out.dim"), None).unwrap();

        assert!(wiring.reads.is_empty());
        assert_eq!(graph.len(), 2);
        assert_eq!(source_ids(&graph, "Write"), vec!["reader"]);
    }

    #[test]
    fn test_product_set_files_count_as_read() {
        let mut graph = Graph::new();
        graph
            .add_node(
                Node::new("set", PRODUCT_SET_READER)
                    .with_config(Config::new().with("fileList", "a.dim,b.dim")),
            )
            .unwrap();
        let sources = source_specs(&[PathBuf::from("a.dim"), PathBuf::from("b.dim")], &[]);
        let wiring = wire_graph(&mut graph, &sources, Path::new("out.dim"), None).unwrap();
        assert!(wiring.reads.is_empty());
        assert_eq!(source_ids(&graph, "Write"), vec!["set"]);
    }

    #[test]
    fn test_graph_ending_in_write_is_left_alone() {
        let mut graph = Graph::new();
        graph
            .add_node(
                Node::new("read", READ_OPERATOR).with_config(Config::new().with("file", "x.dim")),
            )
            .unwrap();
        graph
            .add_node(
                Node::new("save", WRITE_OPERATOR)
                    .with_config(Config::new().with("file", "y.dim"))
                    .with_source("sourceProduct", "read"),
            )
            .unwrap();
        let wiring = wire_graph(&mut graph, &[], Path::new("target.dim"), None).unwrap();
        assert_eq!(wiring, Wiring::default());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_empty_graph_is_rejected() {
        let mut graph = Graph::new();
        assert!(wire_graph(&mut graph, &[], Path::new("t.dim"), None).is_err());
    }

    #[test]
    fn test_operator_graph_dedupes_files() {
        let registry = builtin_registry();
        let entry = registry.resolve("Band-Arithmetic").unwrap();
        let sources = source_specs(
            &[PathBuf::from("a.dim"), PathBuf::from("b.dim"), PathBuf::from("a.dim")],
            &[],
        );
        let graph = operator_graph(
            entry,
            &[("operation".into(), "ratio".into())],
            &sources,
            Path::new("out.dim"),
            None,
        )
        .unwrap();

        let reads: Vec<&str> = graph
            .nodes()
            .iter()
            .filter(|n| n.operator == READ_OPERATOR)
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(reads, vec!["Read", "Read(2)"]);
        assert_eq!(
            source_ids(&graph, "Band-Arithmetic"),
            vec!["Read", "Read(2)", "Read"]
        );
        assert_eq!(source_ids(&graph, "Write"), vec!["Band-Arithmetic"]);
        graph.validate().unwrap();
    }

    #[test]
    fn test_operator_graph_rejects_unknown_parameter() {
        let registry = builtin_registry();
        let entry = registry.resolve("Image-Filter").unwrap();
        let err = operator_graph(
            entry,
            &[("filterSise".into(), "5".into())],
            &source_specs(&[PathBuf::from("a.dim")], &[]),
            Path::new("out.dim"),
            None,
        )
        .unwrap_err();
        match err {
            AppError::Usage { message, usage } => {
                assert!(message.contains("filterSise"));
                assert!(usage.contains("-PfilterSize"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
