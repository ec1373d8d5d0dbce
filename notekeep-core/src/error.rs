//! Error types for notekeep storage.
//!
//! Writes rejected by SQLite surface as [`Error::Constraint`] with the kind of
//! constraint that failed, so callers can tell a duplicate email apart from a
//! dangling reference without matching on message text.

use std::fmt;

use rusqlite::ffi;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Constraint violation: {0}")]
    Constraint(ConstraintViolation),

    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("Failed to apply migration {version} ({name}): {source}")]
    Migration {
        version: &'static str,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Relation drift: {0}")]
    RelationDrift(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not determine data directory")]
    DataDirUnavailable,

    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, Error>;

/// The family of constraint SQLite reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    PrimaryKey,
    Check,
    ForeignKey,
    NotNull,
    Other,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::PrimaryKey => "primary_key",
            Self::Check => "check",
            Self::ForeignKey => "foreign_key",
            Self::NotNull => "not_null",
            Self::Other => "other",
        }
    }

    fn from_extended_code(code: i32) -> Self {
        match code {
            ffi::SQLITE_CONSTRAINT_UNIQUE => Self::Unique,
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Self::PrimaryKey,
            ffi::SQLITE_CONSTRAINT_CHECK => Self::Check,
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Self::ForeignKey,
            ffi::SQLITE_CONSTRAINT_NOTNULL => Self::NotNull,
            _ => Self::Other,
        }
    }
}

/// A write rejected at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    /// What SQLite named as failing, e.g. `users.email` or
    /// `note_shares.note_id, note_shares.user_id`. SQLite does not name the
    /// column for foreign key failures.
    pub target: Option<String>,
    pub message: String,
}

impl ConstraintViolation {
    /// True when the violation names `column` (as `table.column`).
    pub fn involves(&self, column: &str) -> bool {
        self.target
            .as_deref()
            .is_some_and(|target| target.split(", ").any(|part| part == column))
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{} on {}", self.kind.as_str(), target),
            None => write!(f, "{} ({})", self.kind.as_str(), self.message),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            if failure.code == ffi::ErrorCode::ConstraintViolation {
                let message = message
                    .clone()
                    .unwrap_or_else(|| "constraint failed".to_string());
                return Self::Constraint(ConstraintViolation {
                    kind: ConstraintKind::from_extended_code(failure.extended_code),
                    target: constraint_target(&message),
                    message,
                });
            }
        }
        Self::Database(err)
    }
}

// "UNIQUE constraint failed: users.email" -> "users.email"
// "CHECK constraint failed: note_type IN ('text', 'checklist')" -> the expression
fn constraint_target(message: &str) -> Option<String> {
    message
        .split_once("constraint failed: ")
        .map(|(_, target)| target.trim().to_string())
        .filter(|target| !target.is_empty())
}

impl Error {
    /// The constraint violation behind this error, if any.
    pub fn constraint(&self) -> Option<&ConstraintViolation> {
        match self {
            Self::Constraint(violation) => Some(violation),
            _ => None,
        }
    }
}
