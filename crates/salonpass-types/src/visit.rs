//! Visit types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CustomerId, SalonId, SubscriptionId, VisitId};

/// Immutable record of one successful redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    /// Visit ID
    pub id: VisitId,
    /// Subscription the visit was redeemed against (reference only)
    pub subscription_id: SubscriptionId,
    /// Customer who redeemed
    pub customer_id: CustomerId,
    /// Salon where the visit happened
    pub salon_id: SalonId,
    /// When the redemption was accepted
    pub redeemed_at: DateTime<Utc>,
}
