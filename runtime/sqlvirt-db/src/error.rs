//! Error types shared by the virtualization layer.
//!
//! `Error::Sql` is the channel a caller already handles for a real database;
//! every other variant is a fatal harness failure that should abort the test.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::value::ValueKind;

/// Result type for virtualization operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A database error as the caller sees it, whether it came from a real
/// driver or was declared by the stub service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    pub reason: String,
    pub sql_state: String,
    pub vendor_code: i32,
}

impl SqlError {
    pub fn new(reason: impl Into<String>, sql_state: impl Into<String>, vendor_code: i32) -> Self {
        Self {
            reason: reason.into(),
            sql_state: sql_state.into(),
            vendor_code,
        }
    }

    pub(crate) fn invalid_column_index(index: usize, columns: usize) -> Self {
        Self::new(
            format!("invalid column index {index} (result has {columns} columns)"),
            "07009",
            0,
        )
    }

    pub(crate) fn invalid_parameter_index(position: usize) -> Self {
        Self::new(
            format!("invalid parameter index {position} (parameters are 1-based)"),
            "07009",
            0,
        )
    }

    pub(crate) fn no_current_row() -> Self {
        Self::new("cursor is not positioned on a row", "24000", 0)
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)?;
        if !self.sql_state.is_empty() {
            write!(f, " (SQLSTATE {})", self.sql_state)?;
        }
        if self.vendor_code != 0 {
            write!(f, " [vendor code {}]", self.vendor_code)?;
        }
        Ok(())
    }
}

impl std::error::Error for SqlError {}

/// Violations of the stub wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("missing 'reason' response header on declared error")]
    MissingReason,

    #[error("invalid 'vendorcode' response header: '{0}'")]
    InvalidVendorCode(String),

    #[error("invalid update count '{token}'")]
    InvalidUpdateCount { token: String },

    #[error("unreadable payload: {0}")]
    UnreadablePayload(String),
}

/// Why a pooled connection could not be handed out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("timed out waiting for a pooled connection")]
    Timeout,

    #[error("failed to open pooled connection: {0}")]
    Create(String),
}

/// Errors surfaced by virtualized statement executions.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("stub protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("stub endpoint {url} unreachable: {message}")]
    Transport { url: String, message: String },

    #[error("no type mapping for {kind} value; cannot record it without loss")]
    UnmappedType { kind: ValueKind },

    #[error("failed to write stub definition {}: {source}", path.display())]
    Record {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unmatched sql statement: '{sql}'")]
    UnmatchedStatement { sql: String },

    #[error(transparent)]
    Pool(#[from] AcquireError),
}

impl Error {
    /// Everything except a database error means the harness itself is broken.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Sql(_))
    }

    pub fn as_sql(&self) -> Option<&SqlError> {
        match self {
            Error::Sql(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn unreadable(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError::UnreadablePayload(message.into()))
    }
}
