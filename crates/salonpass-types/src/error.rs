//! Common error types

use thiserror::Error;

/// Errors raised while parsing stored or wire representations of domain types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Unknown subscription status
    #[error("unknown subscription status: {0}")]
    UnknownStatus(String),

    /// Unknown payment status
    #[error("unknown payment status: {0}")]
    UnknownPaymentStatus(String),

    /// Unknown payment kind
    #[error("unknown payment kind: {0}")]
    UnknownPaymentKind(String),

    /// Unknown transition reason
    #[error("unknown transition reason: {0}")]
    UnknownReason(String),

    /// Malformed actor string
    #[error("invalid actor: {0}")]
    InvalidActor(String),
}
