//! Store error types shared by the Postgres and in-memory repositories

use crate::database::payment_repository::PaymentStatus;
use std::fmt;

#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Row does not exist
    NotFound { entity: String, id: String },
    /// A unique constraint rejected the write
    UniqueViolation { constraint: String },
    /// Compare-and-swap lost: the row is no longer in the expected state
    StaleState {
        id: String,
        expected: PaymentStatus,
        actual: PaymentStatus,
    },
    /// Requested transition leaves a terminal state or goes nowhere
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// Pool exhausted, connection refused, or timed out
    ConnectionError { message: String },
    /// Statement failed for a non-transient reason
    QueryError { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => DatabaseErrorKind::ConnectionError {
                message: err.to_string(),
            },
            sqlx::Error::Database(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::QueryError {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ConnectionError { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    /// True when a unique violation was raised by the named constraint.
    pub fn violates(&self, name: &str) -> bool {
        matches!(&self.kind, DatabaseErrorKind::UniqueViolation { constraint } if constraint == name)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} {} not found", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::StaleState {
                id,
                expected,
                actual,
            } => write!(
                f,
                "stale state for {}: expected {}, found {}",
                id, expected, actual
            ),
            DatabaseErrorKind::InvalidTransition { from, to } => {
                write!(f, "invalid status transition {} -> {}", from, to)
            }
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::QueryError { message } => write!(f, "query error: {}", message),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}
