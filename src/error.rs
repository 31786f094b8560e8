//! Crate-level error type and `Result` alias for stable, structured error handling.
//! Converts underlying I/O, XML, TIFF and graph errors, and provides semantic variants
//! for configuration and operator failures.
use std::sync::Arc;

use thiserror::Error;

use crate::graph::GraphError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("JPEG error: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Unknown operator: {name}")]
    UnknownOperator { name: String },

    #[error("Unknown parameter '{param}' for operator {operator}")]
    UnknownParameter { operator: String, param: String },

    #[error("Missing required parameter '{param}' for operator {operator}")]
    MissingParameter { operator: String, param: String },

    #[error("Invalid parameter: {param}={value}")]
    InvalidParameter { param: String, value: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Operator '{node}' failed: {source}")]
    Operator {
        node: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Processing error: {0}")]
    Processing(String),

    #[error(transparent)]
    Shared(Arc<Error>),
}

impl Error {
    pub fn processing<E: std::fmt::Display>(e: E) -> Self {
        Error::Processing(e.to_string())
    }

    /// Wraps a failure raised while a node was computing, unless it already
    /// carries a node attribution from further upstream.
    pub fn in_node(node: &str, err: Error) -> Self {
        match err {
            Error::Operator { .. }
            | Error::Cancelled
            | Error::Shared(_)
            | Error::UnknownOperator { .. }
            | Error::UnknownParameter { .. }
            | Error::MissingParameter { .. } => err,
            other => Error::Operator {
                node: node.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Recovers an owned error from one shared between single-flight waiters.
    pub fn from_shared(err: Arc<Error>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(Error::Shared)
    }

    /// True when the root cause of this error is a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Shared(inner) => inner.is_cancelled(),
            Error::Operator { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
