//! Error types for the persistence loader.
//!
//! Two layers of errors exist:
//!
//! - [`BackendError`] is what a [`BackendAdapter`](crate::core::traits::BackendAdapter)
//!   returns. It separates "object already exists" from every other failure so
//!   callers can match on it instead of inspecting driver messages.
//! - [`LoaderError`] is the crate-wide error surfaced to callers and the CLI.

use std::path::PathBuf;

use thiserror::Error;

/// Kind of backend object reported as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Column,
    Index,
    Row,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectKind::Table => "table",
            ObjectKind::Column => "column",
            ObjectKind::Index => "index",
            ObjectKind::Row => "row",
        };
        f.write_str(s)
    }
}

/// Error returned by backend adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The object the statement tried to create is already present.
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ObjectKind, name: String },

    /// Any other DDL/DML failure.
    #[error("statement failed: {message}\n  Statement: {statement}")]
    Execution { statement: String, message: String },
}

impl BackendError {
    pub fn already_exists(kind: ObjectKind, name: impl Into<String>) -> Self {
        BackendError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn execution(statement: impl Into<String>, message: impl ToString) -> Self {
        BackendError::Execution {
            statement: statement.into(),
            message: message.to_string(),
        }
    }
}

/// Result type returned by backend adapters.
pub type AdapterResult<T> = std::result::Result<T, BackendError>;

/// Main error type for loader operations.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema document is inconsistent (missing attribute or class, duplicate table).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Type or index policy document is malformed.
    #[error("Policy error: {0}")]
    Policy(String),

    /// No adapter is registered for the requested dialect.
    #[error("Backend unsupported: {0}")]
    BackendUnsupported(String),

    /// DDL/DML failure reported by the backend.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A data-moving migration could not read the existing values.
    #[error("Refusing to migrate {table}.{column}: {message}")]
    DataLossRisk {
        table: String,
        column: String,
        message: String,
    },

    /// LDIF input could not be parsed.
    #[error("LDIF error in {}:{line}: {message}", path.display())]
    Ldif {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// An attribute value cannot be converted to its column type.
    #[error("Invalid value for {column}: {message}")]
    Value { column: String, message: String },

    /// The run lock could not be acquired.
    #[error("Lock error: {0}")]
    Lock(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoaderError {
    /// Create a DataLossRisk error.
    pub fn data_loss(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        LoaderError::DataLossRisk {
            table: table.into(),
            column: column.into(),
            message: message.to_string(),
        }
    }

    /// Create an Ldif error.
    pub fn ldif(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        LoaderError::Ldif {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Create a Value error.
    pub fn value(column: impl Into<String>, message: impl Into<String>) -> Self {
        LoaderError::Value {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoaderError::Config(_)
            | LoaderError::Policy(_)
            | LoaderError::Yaml(_)
            | LoaderError::Json(_) => 1,
            LoaderError::Schema(_) | LoaderError::Ldif { .. } | LoaderError::Value { .. } => 2,
            LoaderError::BackendUnsupported(_) => 3,
            LoaderError::Backend(_) => 4,
            LoaderError::DataLossRisk { .. } => 5,
            LoaderError::Lock(_) => 6,
            LoaderError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;
