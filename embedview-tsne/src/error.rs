//! Error types for the command-line host.

use embedview_core::EmbedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine rejected the input or config
    #[error(transparent)]
    Engine(#[from] EmbedError),

    /// Dataset file is well-formed JSON but not a usable dataset
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Internal error
    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CliError>;
