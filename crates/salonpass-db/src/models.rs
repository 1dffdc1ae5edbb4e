//! Database row models
//!
//! These types map directly to database rows using SQLx's FromRow derive.
//! Each row converts into its `salonpass-types` domain type with `TryFrom`.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use salonpass_types::{
    AuditEntry, AuditOutcome, Package, Payment, RedemptionToken, Subscription, Visit,
};

use crate::DbError;

/// Package row from the database
#[derive(Debug, Clone, FromRow)]
pub struct PackageRow {
    pub id: Uuid,
    pub salon_id: Uuid,
    pub name: String,
    pub visit_count: i32,
    pub validity_days: i32,
    pub price_cents: i64,
    pub currency: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Subscription row from the database
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub package_id: Uuid,
    pub salon_id: Uuid,
    pub visit_count: i32,
    pub visits_used: i32,
    pub visits_remaining: i32,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub redemption_token: String,
    pub suspended_at: Option<DateTime<Utc>>,
    pub renewal_count: i32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Visit row from the database
#[derive(Debug, Clone, FromRow)]
pub struct VisitRow {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub salon_id: Uuid,
    pub redeemed_at: DateTime<Utc>,
}

/// Payment row from the database
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub kind: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub refund_amount_cents: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit row from the database
#[derive(Debug, Clone, FromRow)]
pub struct AuditRow {
    pub id: i64,
    pub subscription_id: Uuid,
    pub from_status: Option<String>,
    pub to_status: String,
    pub reason: String,
    pub actor: String,
    pub outcome: String,
    pub error_code: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

fn count(value: i32, column: &str) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::Decode(format!("negative {column}: {value}")))
}

fn decode<T, E: std::fmt::Display>(result: Result<T, E>) -> Result<T, DbError> {
    result.map_err(|e| DbError::Decode(e.to_string()))
}

/// Convert a domain counter into an INTEGER column value
pub(crate) fn to_column(value: u32, column: &str) -> Result<i32, DbError> {
    i32::try_from(value).map_err(|_| DbError::Decode(format!("{column} out of range: {value}")))
}

impl TryFrom<PackageRow> for Package {
    type Error = DbError;

    fn try_from(row: PackageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            salon_id: row.salon_id.into(),
            name: row.name,
            visit_count: count(row.visit_count, "visit_count")?,
            validity_days: count(row.validity_days, "validity_days")?,
            price_cents: row.price_cents,
            currency: row.currency,
            active: row.active,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DbError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            customer_id: row.customer_id.into(),
            package_id: row.package_id.into(),
            salon_id: row.salon_id.into(),
            visit_count: count(row.visit_count, "visit_count")?,
            visits_used: count(row.visits_used, "visits_used")?,
            visits_remaining: count(row.visits_remaining, "visits_remaining")?,
            status: decode(row.status.parse())?,
            start_date: row.start_date,
            end_date: row.end_date,
            redemption_token: RedemptionToken::new(row.redemption_token),
            suspended_at: row.suspended_at,
            renewal_count: count(row.renewal_count, "renewal_count")?,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<VisitRow> for Visit {
    fn from(row: VisitRow) -> Self {
        Self {
            id: row.id.into(),
            subscription_id: row.subscription_id.into(),
            customer_id: row.customer_id.into(),
            salon_id: row.salon_id.into(),
            redeemed_at: row.redeemed_at,
        }
    }
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DbError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            subscription_id: row.subscription_id.into(),
            kind: decode(row.kind.parse())?,
            amount_cents: row.amount_cents,
            currency: row.currency,
            status: decode(row.status.parse())?,
            gateway_reference: row.gateway_reference,
            refund_amount_cents: row.refund_amount_cents,
            refunded_at: row.refunded_at,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let outcome = match (row.outcome.as_str(), row.error_code) {
            ("applied", _) => AuditOutcome::Applied,
            ("rejected", code) => AuditOutcome::Rejected {
                code: code.unwrap_or_default(),
            },
            (other, _) => return Err(DbError::Decode(format!("unknown audit outcome: {other}"))),
        };
        Ok(Self {
            subscription_id: row.subscription_id.into(),
            from: row.from_status.map(|s| decode(s.parse())).transpose()?,
            to: decode(row.to_status.parse())?,
            reason: decode(row.reason.parse())?,
            actor: decode(row.actor.parse())?,
            outcome,
            occurred_at: row.occurred_at,
        })
    }
}

/// Storage columns for an audit outcome: `(outcome, error_code)`
pub(crate) fn outcome_columns(outcome: &AuditOutcome) -> (&'static str, Option<&str>) {
    match outcome {
        AuditOutcome::Applied => ("applied", None),
        AuditOutcome::Rejected { code } => ("rejected", Some(code.as_str())),
    }
}
