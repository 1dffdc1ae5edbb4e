//! Lifecycle errors

use salonpass_db::DbError;
use salonpass_types::SubscriptionStatus;
use thiserror::Error;

use crate::retry::RetryableError;

/// Error classes callers act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any state was touched
    Validation,
    /// Expected business rule failure
    Domain,
    /// Concurrent modification that outlived the retry budget
    Conflict,
    /// Persistence or payment gateway failure
    Fatal,
}

/// Lifecycle errors
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Malformed input
    #[error("validation error: {0}")]
    Validation(String),

    /// No visits remain
    #[error("quota exhausted")]
    QuotaExhausted,

    /// Subscription is not in a redeemable or renewable state
    #[error("subscription is {0}")]
    SubscriptionNotActive(SubscriptionStatus),

    /// Redemption attempted at another salon
    #[error("subscription belongs to a different salon")]
    SalonMismatch,

    /// Token is malformed or unknown
    #[error("invalid redemption token")]
    InvalidToken,

    /// Subscription already holds a token
    #[error("redemption token already issued")]
    AlreadyIssued,

    /// Edge not permitted by the state machine
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: SubscriptionStatus,
        /// Requested status
        to: SubscriptionStatus,
    },

    /// Gateway declined the charge
    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    /// Subscription not found
    #[error("subscription not found")]
    SubscriptionNotFound,

    /// Package not found
    #[error("package not found")]
    PackageNotFound,

    /// Payment not found
    #[error("payment not found")]
    PaymentNotFound,

    /// Customer acted on a subscription they do not own
    #[error("subscription belongs to another customer")]
    NotOwner,

    /// Optimistic concurrency check kept failing
    #[error("concurrent modification")]
    Conflict,

    /// Callback verification or parsing error
    #[error("webhook error: {0}")]
    Webhook(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[source] DbError),

    /// Payment gateway unreachable or timed out
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Error class
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Webhook(_) => ErrorKind::Validation,
            Self::QuotaExhausted
            | Self::SubscriptionNotActive(_)
            | Self::SalonMismatch
            | Self::InvalidToken
            | Self::AlreadyIssued
            | Self::InvalidTransition { .. }
            | Self::PaymentDeclined(_)
            | Self::SubscriptionNotFound
            | Self::PackageNotFound
            | Self::PaymentNotFound
            | Self::NotOwner => ErrorKind::Domain,
            Self::Conflict => ErrorKind::Conflict,
            Self::Database(_) | Self::Gateway(_) | Self::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Stable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::QuotaExhausted => "QUOTA_EXHAUSTED",
            Self::SubscriptionNotActive(_) => "SUBSCRIPTION_NOT_ACTIVE",
            Self::SalonMismatch => "SALON_MISMATCH",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::AlreadyIssued => "ALREADY_ISSUED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::PaymentDeclined(_) => "PAYMENT_DECLINED",
            Self::SubscriptionNotFound => "SUBSCRIPTION_NOT_FOUND",
            Self::PackageNotFound => "PACKAGE_NOT_FOUND",
            Self::PaymentNotFound => "PAYMENT_NOT_FOUND",
            Self::NotOwner => "NOT_OWNER",
            Self::Conflict => "CONFLICT",
            Self::Webhook(_) => "WEBHOOK_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionNotFound | Self::PackageNotFound | Self::PaymentNotFound
        )
    }
}

impl From<DbError> for LifecycleError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::VersionConflict => Self::Conflict,
            other => {
                tracing::error!("Database error: {}", other);
                Self::Database(other)
            }
        }
    }
}

impl RetryableError for LifecycleError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Lifecycle result type
pub type Result<T> = std::result::Result<T, LifecycleError>;
