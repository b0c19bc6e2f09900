use thiserror::Error;

use crate::template::TemplateError;

/// Main error type for impactgraph
#[derive(Error, Debug)]
pub enum ImpactError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed input, correctable by the caller
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Asset, relation or context absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Template rejected by the sandbox or the grammar
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Remote graph endpoint errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stored data violates an invariant, or a round trip failed
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Convenient Result type using ImpactError
pub type Result<T> = std::result::Result<T, ImpactError>;
