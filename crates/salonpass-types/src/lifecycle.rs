//! Lifecycle transition and audit types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AdminId, CustomerId, SubscriptionId, SubscriptionStatus, TypesError};

/// Who initiated a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// The subscription's customer
    Customer(CustomerId),
    /// A platform administrator
    Admin(AdminId),
    /// The engine itself (sweeps, gateway outcomes)
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer(id) => write!(f, "customer:{id}"),
            Self::Admin(id) => write!(f, "admin:{id}"),
            Self::System => f.write_str("system"),
        }
    }
}

impl std::str::FromStr for Actor {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" {
            return Ok(Self::System);
        }
        let invalid = || TypesError::InvalidActor(s.to_string());
        let (kind, id) = s.split_once(':').ok_or_else(invalid)?;
        match kind {
            "customer" => CustomerId::parse(id).map(Self::Customer).map_err(|_| invalid()),
            "admin" => AdminId::parse(id).map(Self::Admin).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// Reason code attached to every status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Subscription created from a successful purchase payment
    Purchase,
    /// The last visit was redeemed
    QuotaExhausted,
    /// The period end date passed
    PeriodEnded,
    /// A renewal charge failed
    RenewalPaymentFailed,
    /// A late renewal payment succeeded inside the grace window
    PaymentRecovered,
    /// The grace window elapsed without a successful payment
    GraceWindowElapsed,
    /// The customer cancelled
    CustomerCancelled,
    /// An administrator cancelled
    AdminCancelled,
    /// The purchase payment was refunded in full
    FullRefund,
    /// A further period was requested; only ever recorded as rejected
    Renewal,
}

impl TransitionReason {
    /// Storage representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::QuotaExhausted => "quota_exhausted",
            Self::PeriodEnded => "period_ended",
            Self::RenewalPaymentFailed => "renewal_payment_failed",
            Self::PaymentRecovered => "payment_recovered",
            Self::GraceWindowElapsed => "grace_window_elapsed",
            Self::CustomerCancelled => "customer_cancelled",
            Self::AdminCancelled => "admin_cancelled",
            Self::FullRefund => "full_refund",
            Self::Renewal => "renewal",
        }
    }
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransitionReason {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "quota_exhausted" => Ok(Self::QuotaExhausted),
            "period_ended" => Ok(Self::PeriodEnded),
            "renewal_payment_failed" => Ok(Self::RenewalPaymentFailed),
            "payment_recovered" => Ok(Self::PaymentRecovered),
            "grace_window_elapsed" => Ok(Self::GraceWindowElapsed),
            "customer_cancelled" => Ok(Self::CustomerCancelled),
            "admin_cancelled" => Ok(Self::AdminCancelled),
            "full_refund" => Ok(Self::FullRefund),
            "renewal" => Ok(Self::Renewal),
            other => Err(TypesError::UnknownReason(other.to_string())),
        }
    }
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The transition was committed
    Applied,
    /// The transition was refused; `code` is the error code
    Rejected {
        /// Stable error code
        code: String,
    },
}

impl AuditOutcome {
    /// Whether the transition was committed
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// One audit log line for a transition attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Subscription concerned
    pub subscription_id: SubscriptionId,
    /// Status before the attempt (`None` when the subscription is being created)
    pub from: Option<SubscriptionStatus>,
    /// Status the attempt targeted
    pub to: SubscriptionStatus,
    /// Reason code
    pub reason: TransitionReason,
    /// Who initiated the attempt
    pub actor: Actor,
    /// Applied or rejected
    pub outcome: AuditOutcome,
    /// When the attempt happened
    pub occurred_at: DateTime<Utc>,
}
