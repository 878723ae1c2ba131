//! Error types for the Singularity engine.
//!
//! Every fallible operation returns [`Result`]. The variants follow the
//! engine's failure taxonomy: schema mutations, value validation, optimistic
//! concurrency conflicts and structural misuse are all distinct so callers can
//! react to each one differently.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a value was rejected by a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// The value's type does not match the column's declared type.
    TypeMismatch,
    /// Null assigned to a column that does not allow nulls.
    NullNotAllowed,
    /// Another row in the same table already holds the value.
    Duplicate,
    /// The column is read-only or calculated.
    ReadOnly,
    /// The column (or the referenced row) belongs to a different schema.
    WrongSchema,
}

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A schema mutation was rejected; the schema is unchanged.
    #[error("schema error: {0}")]
    Schema(String),

    /// A value was rejected before any mutation happened.
    #[error("invalid value for column '{column}' ({kind:?}): {message}")]
    Validation {
        column: String,
        kind: ValidationKind,
        message: String,
    },

    /// The database row was changed or deleted since it was last read.
    #[error("concurrency conflict on '{table}': row {key} was changed or deleted by another user")]
    Concurrency { table: String, key: String },

    /// Programmer error: the operation is impossible in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An expression failed to parse or evaluate.
    #[error("expression error: {0}")]
    Expression(String),

    /// The SQL provider reported a failure.
    #[error("SQL provider error: {0}")]
    Provider(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    pub(crate) fn validation(column: &str, kind: ValidationKind, message: impl Into<String>) -> Self {
        Error::Validation {
            column: column.to_string(),
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    /// Returns the validation kind if this is a value validation failure.
    pub fn validation_kind(&self) -> Option<ValidationKind> {
        match self {
            Error::Validation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true for optimistic-concurrency failures.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Error::Concurrency { .. })
    }
}
