//! Database errors

use thiserror::Error;

/// Unique key on processed gateway callback events
pub const GATEWAY_EVENTS_KEY: &str = "gateway_events_pkey";

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Record not found
    #[error("record not found")]
    NotFound,

    /// Optimistic concurrency check failed: the row changed since it was read
    #[error("version conflict")]
    VersionConflict,

    /// Unique constraint violated
    #[error("duplicate value violates {0}")]
    Duplicate(String),

    /// Check constraint violated
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Stored value could not be mapped to a domain type
    #[error("decode error: {0}")]
    Decode(String),
}

impl DbError {
    /// Map a SQLx error, classifying unique and check violations
    pub fn classify(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            let constraint = db.constraint().unwrap_or("unknown").to_string();
            if db.is_unique_violation() {
                return Self::Duplicate(constraint);
            }
            if db.is_check_violation() {
                return Self::Constraint(constraint);
            }
        }
        Self::Sqlx(err)
    }

    /// Whether the error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict)
    }

    /// Whether a gateway callback event was already recorded
    pub fn is_duplicate_event(&self) -> bool {
        matches!(self, Self::Duplicate(c) if c == GATEWAY_EVENTS_KEY)
    }
}

/// Database result type
pub type DbResult<T> = Result<T, DbError>;
