//! Payment types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PaymentId, SubscriptionId, TypesError};

/// What a payment was charged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// First charge that creates the subscription
    Purchase,
    /// Charge that starts a new period
    Renewal,
}

impl PaymentKind {
    /// Storage representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Renewal => "renewal",
        }
    }
}

impl std::fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "renewal" => Ok(Self::Renewal),
            other => Err(TypesError::UnknownPaymentKind(other.to_string())),
        }
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Funds reserved by the gateway
    Authorized,
    /// Funds collected
    Captured,
    /// Charge declined or errored at the gateway
    Failed,
    /// Part of the amount returned
    PartiallyRefunded,
    /// Whole amount returned
    Refunded,
}

impl PaymentStatus {
    /// Storage representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Authorized => "authorized",
            Self::Captured => "captured",
            Self::Failed => "failed",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Refunded => "refunded",
        }
    }

    /// Whether money moved (or is reserved) under this payment
    pub const fn is_successful(&self) -> bool {
        matches!(
            self,
            Self::Authorized | Self::Captured | Self::PartiallyRefunded | Self::Refunded
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorized" => Ok(Self::Authorized),
            "captured" => Ok(Self::Captured),
            "failed" => Ok(Self::Failed),
            "partially_refunded" => Ok(Self::PartiallyRefunded),
            "refunded" => Ok(Self::Refunded),
            other => Err(TypesError::UnknownPaymentStatus(other.to_string())),
        }
    }
}

/// Financial event tied to a subscription (reference only, never cascaded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID
    pub id: PaymentId,
    /// Subscription the payment belongs to
    pub subscription_id: SubscriptionId,
    /// Purchase or renewal
    pub kind: PaymentKind,
    /// Charged amount in cents
    pub amount_cents: i64,
    /// Currency (e.g., "usd")
    pub currency: String,
    /// Payment status
    pub status: PaymentStatus,
    /// Gateway-side reference
    pub gateway_reference: Option<String>,
    /// Cumulative refunded amount in cents
    pub refund_amount_cents: Option<i64>,
    /// When the most recent refund was recorded
    pub refunded_at: Option<DateTime<Utc>>,
    /// Gateway failure reason for failed charges
    pub failure_reason: Option<String>,
    /// When the payment was recorded
    pub created_at: DateTime<Utc>,
    /// When the payment was last modified
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Amount refunded so far
    pub fn refunded_cents(&self) -> i64 {
        self.refund_amount_cents.unwrap_or(0)
    }

    /// Amount that may still be refunded
    pub fn refundable_cents(&self) -> i64 {
        if self.status.is_successful() {
            self.amount_cents - self.refunded_cents()
        } else {
            0
        }
    }

    /// `refund_amount <= amount`
    pub fn refund_within_amount(&self) -> bool {
        self.refunded_cents() <= self.amount_cents
    }
}
