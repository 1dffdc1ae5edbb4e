//! Repository traits
//!
//! Define async repository interfaces for database operations. Both the
//! PostgreSQL repositories and [`crate::memory::MemoryStore`] implement them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use salonpass_types::{
    AuditEntry, Package, PackageId, Payment, PaymentId, RedemptionToken, SalonId, Subscription,
    SubscriptionId, Visit,
};

use crate::error::DbResult;

/// Package repository trait
#[async_trait]
pub trait PackageRepository: Send + Sync {
    /// Find a package by ID
    async fn find_by_id(&self, id: PackageId) -> DbResult<Option<Package>>;

    /// Create a new package
    async fn create(&self, package: CreatePackage) -> DbResult<Package>;
}

/// Create package input
#[derive(Debug, Clone)]
pub struct CreatePackage {
    pub id: PackageId,
    pub salon_id: SalonId,
    pub name: String,
    pub visit_count: u32,
    pub validity_days: u32,
    pub price_cents: i64,
    pub currency: String,
}

/// Subscription repository trait
///
/// Every mutation goes through [`SubscriptionRepository::commit`], which
/// applies the subscription row and its side records atomically and only
/// if the stored version still matches.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Find a subscription by ID
    async fn find_by_id(&self, id: SubscriptionId) -> DbResult<Option<Subscription>>;

    /// Find a subscription by its redemption token
    async fn find_by_token(&self, token: &RedemptionToken) -> DbResult<Option<Subscription>>;

    /// Find subscriptions the expiry sweep should look at
    ///
    /// Returns `Active` subscriptions past their end date or out of quota,
    /// and `Suspended` subscriptions suspended at or before `suspended_before`.
    async fn find_due_for_sweep(
        &self,
        now: DateTime<Utc>,
        suspended_before: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Subscription>>;

    /// Insert a new subscription with its purchase payment and creation audit entry
    async fn create(&self, input: CreateSubscription) -> DbResult<Subscription>;

    /// Apply one unit of work
    ///
    /// `commit.subscription.version` must equal the stored version; otherwise
    /// nothing is written and [`crate::DbError::VersionConflict`] is returned.
    /// Returns the stored subscription with its version incremented.
    async fn commit(&self, commit: SubscriptionCommit) -> DbResult<Subscription>;
}

/// Create subscription input
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub subscription: Subscription,
    pub payment: Payment,
    pub audit: AuditEntry,
    /// Gateway callback that produced this purchase, if any
    pub gateway_event: Option<String>,
}

/// Payment write carried by a commit
#[derive(Debug, Clone)]
pub enum PaymentWrite {
    /// Record a new payment
    Insert(Payment),
    /// Replace an existing payment's status and refund fields
    Update(Payment),
}

impl PaymentWrite {
    /// The payment being written
    pub fn payment(&self) -> &Payment {
        match self {
            Self::Insert(p) | Self::Update(p) => p,
        }
    }
}

/// One atomic unit of work against a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionCommit {
    /// New subscription state; `version` is the version it was loaded at
    pub subscription: Subscription,
    /// Visit created by a redemption
    pub visit: Option<Visit>,
    /// Payment inserted or updated by the reconciler
    pub payment: Option<PaymentWrite>,
    /// Applied transitions
    pub audit: Vec<AuditEntry>,
    /// Gateway callback event this unit consumes
    ///
    /// Stored under a unique key; a second commit carrying the same event
    /// fails with `Duplicate("gateway_events_pkey")` and writes nothing.
    pub gateway_event: Option<String>,
}

impl SubscriptionCommit {
    /// Commit for a subscription state change with nothing else attached
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            visit: None,
            payment: None,
            audit: Vec::new(),
            gateway_event: None,
        }
    }

    /// Attach a visit
    pub fn with_visit(mut self, visit: Visit) -> Self {
        self.visit = Some(visit);
        self
    }

    /// Attach a payment write
    pub fn with_payment(mut self, payment: PaymentWrite) -> Self {
        self.payment = Some(payment);
        self
    }

    /// Attach an applied audit entry
    pub fn with_audit(mut self, entry: AuditEntry) -> Self {
        self.audit.push(entry);
        self
    }

    /// Mark a gateway callback event as processed by this unit
    pub fn with_gateway_event(mut self, event_id: Option<&str>) -> Self {
        self.gateway_event = event_id.map(str::to_string);
        self
    }
}

/// Redemption token registry
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Reserve a token for a subscription
    ///
    /// Fails with `Duplicate("token")` if the token is taken and
    /// `Duplicate("subscription")` if the subscription already holds one.
    async fn reserve(
        &self,
        token: &RedemptionToken,
        subscription_id: SubscriptionId,
        issued_at: DateTime<Utc>,
    ) -> DbResult<()>;

    /// Look up the subscription a token was issued to
    async fn find_subscription_id(
        &self,
        token: &RedemptionToken,
    ) -> DbResult<Option<SubscriptionId>>;
}

/// Visit repository trait
#[async_trait]
pub trait VisitRepository: Send + Sync {
    /// All visits for a subscription, oldest first
    async fn find_by_subscription(&self, subscription_id: SubscriptionId) -> DbResult<Vec<Visit>>;

    /// Number of visits for a subscription
    async fn count_by_subscription(&self, subscription_id: SubscriptionId) -> DbResult<u64>;
}

/// Payment repository trait
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Find a payment by ID
    async fn find_by_id(&self, id: PaymentId) -> DbResult<Option<Payment>>;

    /// All payments for a subscription, oldest first
    async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> DbResult<Vec<Payment>>;

    /// Whether a gateway callback event has already been applied
    async fn event_processed(&self, event_id: &str) -> DbResult<bool>;
}

/// Append-only audit log
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append one entry outside a commit (rejected attempts)
    async fn append(&self, entry: AuditEntry) -> DbResult<()>;

    /// Entries for a subscription in insertion order
    async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> DbResult<Vec<AuditEntry>>;
}

/// Every repository behind a trait object
#[derive(Clone)]
pub struct Stores {
    pub packages: Arc<dyn PackageRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub visits: Arc<dyn VisitRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub audit: Arc<dyn AuditRepository>,
}
