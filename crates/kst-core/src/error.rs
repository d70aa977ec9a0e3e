//! Error types for kst-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kst-core
///
/// These abort the operation that raised them. Problems local to a single
/// spreadsheet row are reported as [`crate::spreadsheet::RowError`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV parsing error from the csv crate
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Spreadsheet header lacks one of the reserved columns
    #[error("spreadsheet '{path}' is missing required column '{column}'")]
    MissingHeader { path: PathBuf, column: String },

    /// Malformed s-expression in a symbol library
    #[error("failed to parse '{path}' at line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Well-formed file that is not a symbol library
    #[error("invalid symbol library '{path}': {message}")]
    InvalidLibrary { path: PathBuf, message: String },

    /// Template symbol could not be found in its library
    #[error("template '{symbol}' not found in library '{library}'")]
    TemplateNotFound { library: String, symbol: String },

    /// A symbol references a template that was never resolved.
    ///
    /// Raised while building a library; the rows that needed an unresolved
    /// template should have been dropped while reading.
    #[error("template '{symbol}' from '{library}' is missing from the resolved template set")]
    MissingTemplate { library: String, symbol: String },

    /// Two symbols with the same name in one output library
    #[error("duplicate symbol name '{name}' in output library")]
    DuplicateSymbol { name: String },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
