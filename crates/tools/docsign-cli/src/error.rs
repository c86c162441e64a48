use docsign_core::{ServiceError, StorageError};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON Serialization/Deserialization Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Storage Error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("Invalid Input: {0}")]
    Input(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("{0:#}")]
    Any(#[from] anyhow::Error),
}

impl CliError {
    /// Message for the terminal. Service errors use their user-facing text
    /// unless `verbose` asks for the detail.
    pub fn display_message(&self, verbose: bool) -> String {
        match self {
            CliError::Service(e) if !verbose => e.user_message().to_string(),
            other => other.to_string(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Service(e) if e.is_conflict() => 2,
            _ => 1,
        }
    }
}

// Define the standard Result type alias
pub type CliResult<T = ()> = Result<T, CliError>;
