// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for pkgtx
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Invalid install root or configuration value. Fatal for engine construction.
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    /// The package file could not be opened
    #[error("Can't open package file {}: {source}", path.display())]
    PackageReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The package header could not be parsed
    #[error("Failed to read package header from {}: {reason}", path.display())]
    PackageFormatError { path: PathBuf, reason: String },

    /// The header is already registered in the transaction
    #[error("The package already exists in the transaction: {0}")]
    DuplicateItemError(String),

    /// No installed package has the given database id
    #[error("Failed to find package with database id {0}")]
    PackageNotFoundError(u32),

    /// The item does not carry the kind of location the operation needs
    #[error("Invalid transaction item: {0}")]
    InvalidItem(String),

    /// The transaction set refused the element
    #[error("{0}")]
    ElementError(String),

    /// The transaction has already been executed
    #[error("Transaction has already been run")]
    AlreadyRun,

    /// Scriptlet output destination could not be opened or duplicated
    #[error("Can't set scriptlet output to {target}: {source}")]
    ScriptOutError {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using pkgtx's Error type
pub type Result<T> = std::result::Result<T, Error>;
