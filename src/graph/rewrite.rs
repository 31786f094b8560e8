//! Product-set expansion.
//!
//! A product-set node names many input files as one logical source. The
//! execution model pulls exactly one tile stream per source edge, so before a
//! graph runs every product-set node is replaced by one `Read` node per file,
//! and each consumer receives one edge per file (a stacking operator thus sees
//! N distinct inputs).
use tracing::{debug, info};

use super::GraphError;
use super::model::{Config, Graph, Node};

/// Operator alias of the bulk multi-file input node.
pub const PRODUCT_SET_READER: &str = "ProductSet-Reader";
/// Operator alias of the single-file read node.
pub const READ_OPERATOR: &str = "Read";
/// Parameter holding the escaped, comma-separated file list.
pub const FILE_LIST_PARAM: &str = "fileList";
/// Escape sequence producers use for a literal comma inside a path.
pub const ESCAPED_COMMA: &str = "$comma$";

/// Product-set node extracted during a rewrite pass.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProductSetSpec {
    node_id: String,
    files: Vec<String>,
}

/// Summary of a rewrite pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    /// Product-set nodes that were replaced.
    pub expanded: Vec<String>,
    /// Read nodes created in their place, in creation order.
    pub created: Vec<String>,
}

impl RewriteReport {
    pub fn is_noop(&self) -> bool {
        self.expanded.is_empty() && self.created.is_empty()
    }
}

/// Joins paths into a `fileList` value, escaping literal commas.
pub fn escape_file_list<S: AsRef<str>>(paths: &[S]) -> String {
    paths
        .iter()
        .map(|p| p.as_ref().replace(',', ESCAPED_COMMA))
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits a `fileList` value into paths, dropping blank tokens.
pub fn parse_file_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.replace(ESCAPED_COMMA, ","))
        .collect()
}

fn collect_product_sets(graph: &Graph) -> Result<Vec<ProductSetSpec>, GraphError> {
    let mut specs = Vec::new();
    for node in graph.nodes() {
        if node.operator != PRODUCT_SET_READER {
            continue;
        }
        let value = node.config.get_str(FILE_LIST_PARAM).unwrap_or_default();
        if value.trim().is_empty() {
            return Err(GraphError::EmptyFileList {
                id: node.id.clone(),
            });
        }
        specs.push(ProductSetSpec {
            node_id: node.id.clone(),
            files: parse_file_list(value),
        });
    }
    Ok(specs)
}

/// Replaces every product-set node with one `Read` node per listed file.
///
/// Consumers keep their role: each edge to the product-set node is mirrored
/// once per file, then all edges to the product-set node are dropped and the
/// node itself is removed. A list that yields no paths leaves its node as is.
/// Running the rewrite again on its own output is a no-op.
pub fn rewrite_product_sets(graph: &mut Graph) -> Result<RewriteReport, GraphError> {
    let specs = collect_product_sets(graph)?;
    let mut report = RewriteReport::default();

    for spec in specs {
        if spec.files.is_empty() {
            debug!(node = %spec.node_id, "Product set lists no files, leaving it in place");
            continue;
        }

        // (consumer id, role) pairs, captured before any edge is touched.
        let target = spec.node_id.as_str();
        let edges: Vec<(String, String)> = graph
            .nodes()
            .iter()
            .flat_map(|n| {
                n.sources
                    .iter()
                    .filter(move |s| s.node_id == target)
                    .map(move |s| (n.id.clone(), s.role.clone()))
            })
            .collect();

        for (ordinal, file) in spec.files.iter().enumerate() {
            let id = graph.unique_id(&format!("{}.{}", spec.node_id, ordinal + 1));
            let node = Node::new(&id, READ_OPERATOR)
                .with_config(Config::new().with("file", file.as_str()));
            graph.add_node(node)?;
            for (consumer, role) in &edges {
                graph.connect(consumer, role, &id)?;
            }
            report.created.push(id);
        }

        let consumers = graph.consumers_of(&spec.node_id);
        for consumer in consumers {
            graph.disconnect_source(&consumer, &spec.node_id)?;
        }
        graph.remove_node(&spec.node_id);

        info!(
            node = %spec.node_id,
            files = spec.files.len(),
            consumers = edges.len(),
            "Expanded product set"
        );
        report.expanded.push(spec.node_id);
    }

    Ok(report)
}
