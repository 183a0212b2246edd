//! Query errors.
//!
//! Every failure is reported as a [`QueryError`] record with a kind, a
//! message and, when known, the source position it relates to. Records are
//! serializable so they can be returned to callers alongside successful
//! period results.

use std::fmt;

use pulse_core::{DatastoreError, TransformError, ValidationError};
use serde::Serialize;
use thiserror::Error;

/// Line and column in the script source, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Category of a query failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Syntax error.
    ParseError,
    /// A function name that is not a built-in; detected before evaluation.
    QueryNotFoundError,
    /// Reference to an unbound variable.
    NameError,
    /// Argument or operand of the wrong type.
    TypeError,
    /// Argument of the right type but an unusable value.
    ValueError,
    /// Division or modulo by zero.
    ArithmeticError,
    /// The step budget ran out.
    ResourceLimitError,
    /// The datastore failed.
    DatastoreError,
    /// A value could not be turned into a valid event, bucket id or period.
    ValidationError,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "ParseError",
            Self::QueryNotFoundError => "QueryNotFoundError",
            Self::NameError => "NameError",
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::ArithmeticError => "ArithmeticError",
            Self::ResourceLimitError => "ResourceLimitError",
            Self::DatastoreError => "DatastoreError",
            Self::ValidationError => "ValidationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct QueryError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl QueryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
        }
    }

    /// Attaches a position unless one is already set.
    #[must_use]
    pub fn at(mut self, position: Position) -> Self {
        self.position.get_or_insert(position);
        self
    }

    pub fn parse(message: impl Into<String>, position: Position) -> Self {
        Self::new(ErrorKind::ParseError, message).at(position)
    }

    pub fn type_mismatch(function: &str, expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::TypeError,
            format!("{function}: expected {expected}, got {actual}"),
        )
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }
}

impl From<DatastoreError> for QueryError {
    fn from(err: DatastoreError) -> Self {
        Self::new(ErrorKind::DatastoreError, err.to_string())
    }
}

impl From<ValidationError> for QueryError {
    fn from(err: ValidationError) -> Self {
        Self::new(ErrorKind::ValidationError, err.to_string())
    }
}

impl From<TransformError> for QueryError {
    fn from(err: TransformError) -> Self {
        Self::new(ErrorKind::ValueError, err.to_string())
    }
}
