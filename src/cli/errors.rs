use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad invocation; carries the usage text to print alongside the message.
    #[error("{message}")]
    Usage { message: String, usage: String },

    #[error("Invalid cache size: {value}. Use bytes or a K/M/G suffix")]
    InvalidCacheSize { value: String },

    #[error("Invalid parameter file {path}: {reason}")]
    ParamFile { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] sargraph::Error),
}

impl AppError {
    pub fn usage(message: impl Into<String>, usage: impl Into<String>) -> Self {
        AppError::Usage {
            message: message.into(),
            usage: usage.into(),
        }
    }
}
