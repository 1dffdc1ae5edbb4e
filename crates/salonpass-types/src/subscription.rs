//! Subscription types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CustomerId, PackageId, SalonId, SubscriptionId, TypesError};

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Visits may be redeemed
    Active,
    /// Renewal payment failed; waiting out the grace window
    Suspended,
    /// Quota exhausted or period ended
    Expired,
    /// Cancelled by the customer, an admin, a refund, or an elapsed grace window
    Cancelled,
}

impl SubscriptionStatus {
    /// Storage representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses have no outgoing transitions
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Cancelled)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TypesError::UnknownStatus(other.to_string())),
        }
    }
}

/// Opaque code presented at a salon to redeem one visit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RedemptionToken(pub String);

impl RedemptionToken {
    /// Wrap a token string
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RedemptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A customer's instance of a purchased package
///
/// `salon_id` and `visit_count` are copied from the package at purchase time.
/// The package association never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription ID
    pub id: SubscriptionId,
    /// Owning customer
    pub customer_id: CustomerId,
    /// Package this subscription was bought from
    pub package_id: PackageId,
    /// Salon the package belongs to
    pub salon_id: SalonId,
    /// Total visits per period
    pub visit_count: u32,
    /// Visits consumed in the current period
    pub visits_used: u32,
    /// Visits left in the current period
    pub visits_remaining: u32,
    /// Lifecycle status
    pub status: SubscriptionStatus,
    /// Start of the current period
    pub start_date: DateTime<Utc>,
    /// End of the current period
    pub end_date: DateTime<Utc>,
    /// Redemption token issued at creation
    pub redemption_token: RedemptionToken,
    /// When the subscription entered `Suspended`, if it is suspended
    pub suspended_at: Option<DateTime<Utc>>,
    /// Number of successful renewals
    pub renewal_count: u32,
    /// Optimistic concurrency version, bumped on every commit
    pub version: i64,
    /// When the subscription was created
    pub created_at: DateTime<Utc>,
    /// When the subscription was last modified
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// `visits_used + visits_remaining == visit_count`
    pub fn quota_is_consistent(&self) -> bool {
        u64::from(self.visits_used) + u64::from(self.visits_remaining)
            == u64::from(self.visit_count)
    }

    /// No visits left in the current period
    pub fn is_exhausted(&self) -> bool {
        self.visits_remaining == 0
    }

    /// The current period has ended
    ///
    /// The end instant itself still belongs to the period.
    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        now > self.end_date
    }

    /// Whether a redemption may proceed at `now`
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && !self.is_exhausted() && !self.is_past_end(now)
    }
}
