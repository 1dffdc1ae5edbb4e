//! Package types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{PackageId, SalonId};

/// Purchasable bundle of visits at a single salon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package ID
    pub id: PackageId,
    /// Salon that owns the package
    pub salon_id: SalonId,
    /// Display name
    pub name: String,
    /// Number of visits granted per period
    pub visit_count: u32,
    /// Length of one period in days
    pub validity_days: u32,
    /// Price per period in cents
    pub price_cents: i64,
    /// ISO currency code (e.g., "usd")
    pub currency: String,
    /// Whether the package can still be purchased
    pub active: bool,
    /// When the package was created
    pub created_at: DateTime<Utc>,
}

impl Package {
    /// Validity window as a duration
    pub fn validity(&self) -> Duration {
        Duration::days(i64::from(self.validity_days))
    }

    /// End of a period starting at `start`
    pub fn period_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + self.validity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_end_adds_validity_days() {
        let package = Package {
            id: PackageId::new(),
            salon_id: SalonId::new(),
            name: "Five cuts".to_string(),
            visit_count: 5,
            validity_days: 30,
            price_cents: 12_000,
            currency: "usd".to_string(),
            active: true,
            created_at: Utc::now(),
        };
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            package.period_end(start),
            Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap()
        );
    }
}
