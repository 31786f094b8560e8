//! Operator graph: the in-memory node/source model with change notification,
//! the product-set rewriter that normalizes a graph before execution, and the
//! XML graph description reader used by the CLI.
pub mod description;
pub mod model;
pub mod rewrite;

pub use description::{parse_graph, read_graph_file, substitute, template_variables};
pub use model::{Config, ConfigValue, Graph, GraphEvent, Node, ObserverId, Source};
pub use rewrite::{
    PRODUCT_SET_READER, READ_OPERATOR, RewriteReport, escape_file_list, parse_file_list,
    rewrite_product_sets,
};

use thiserror::Error;

/// Structural errors raised while building, editing or rewriting a graph.
/// These are always reported before any computation starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node id: {id}")]
    DuplicateId { id: String },

    #[error("Unknown node: {id}")]
    UnknownNode { id: String },

    #[error("Node '{id}' has an empty file list")]
    EmptyFileList { id: String },

    #[error("Node '{node}' references missing source '{source_id}'")]
    DanglingSource { node: String, source_id: String },

    #[error("Graph contains a cycle through node '{id}'")]
    Cycle { id: String },

    #[error("Graph is empty")]
    Empty,

    #[error("Malformed graph description: {0}")]
    Malformed(String),
}
