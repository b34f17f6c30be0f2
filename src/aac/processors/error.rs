use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Error type covering the different failure cases that can occur when a
/// processor loads, rewrites, or saves a communication board.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Raised when a source is structurally corrupt or unsupported: a bad
    /// archive, a database whose header does not carry the SQLite magic, or
    /// a document whose root element cannot be parsed.
    #[error("failed to load {format} source: {reason}")]
    Load { format: &'static str, reason: String },

    /// Raised when a page is inserted under an id that is already taken.
    #[error("duplicate page id '{0}'")]
    DuplicateId(String),

    /// Raised when the destination cannot be written.
    #[error("failed to save to {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    /// A non-essential table or entry is absent. Processors recover from this
    /// locally; it only escapes through helpers that are asked for a
    /// resource explicitly.
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the zip implementation.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Errors bubbled up from SQLite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Raised when XML cannot be read or written.
    #[error("XML error: {0}")]
    Xml(String),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when no processor handles the requested file type.
    #[error("unsupported board format for {0}")]
    UnsupportedFormat(PathBuf),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl ProcessorError {
    /// Builds a [`ProcessorError::Load`] for the named format.
    pub fn load(format: &'static str, reason: impl Into<String>) -> Self {
        ProcessorError::Load {
            format,
            reason: reason.into(),
        }
    }

    /// Builds a [`ProcessorError::Save`] for the given destination.
    pub fn save(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        ProcessorError::Save {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Wraps any XML library error, whatever its concrete type.
    pub fn xml(err: impl std::fmt::Display) -> Self {
        ProcessorError::Xml(err.to_string())
    }
}
