//! In-memory repository implementations
//!
//! A DashMap-backed store with the same atomicity guarantees as the
//! PostgreSQL repositories: [`SubscriptionRepository::commit`] validates and
//! applies a whole unit while holding the subscription's map guard, so a
//! unit is either fully visible or not visible at all.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use salonpass_types::{
    AuditEntry, Package, PackageId, Payment, PaymentId, RedemptionToken, Subscription,
    SubscriptionId, SubscriptionStatus, Visit,
};

use crate::error::{DbError, DbResult, GATEWAY_EVENTS_KEY};
use crate::repo::{
    AuditRepository, CreatePackage, CreateSubscription, PackageRepository, PaymentRepository,
    PaymentWrite, Stores, SubscriptionCommit, SubscriptionRepository, TokenRepository,
    VisitRepository,
};

#[derive(Default)]
struct Tables {
    packages: DashMap<PackageId, Package>,
    subscriptions: DashMap<SubscriptionId, Subscription>,
    tokens: DashMap<String, SubscriptionId>,
    token_owners: DashMap<SubscriptionId, String>,
    visits: DashMap<SubscriptionId, Vec<Visit>>,
    payments: DashMap<PaymentId, Payment>,
    audit: DashMap<SubscriptionId, Vec<AuditEntry>>,
    gateway_events: DashMap<String, SubscriptionId>,
}

/// In-memory store implementing every repository trait
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this store as trait objects
    pub fn stores(&self) -> Stores {
        Stores {
            packages: Arc::new(self.clone()),
            subscriptions: Arc::new(self.clone()),
            tokens: Arc::new(self.clone()),
            visits: Arc::new(self.clone()),
            payments: Arc::new(self.clone()),
            audit: Arc::new(self.clone()),
        }
    }

    fn check_payment(&self, write: &PaymentWrite) -> DbResult<()> {
        let payment = write.payment();
        match write {
            PaymentWrite::Insert(_) if self.tables.payments.contains_key(&payment.id) => {
                return Err(DbError::Duplicate("payments_pkey".to_string()));
            }
            PaymentWrite::Update(_) if !self.tables.payments.contains_key(&payment.id) => {
                return Err(DbError::NotFound);
            }
            _ => {}
        }
        if !payment.refund_within_amount() {
            return Err(DbError::Constraint(
                "payments_refund_within_amount".to_string(),
            ));
        }
        Ok(())
    }

    /// Claim a gateway event for `subscription_id`
    fn claim_event(&self, event_id: Option<String>, subscription_id: SubscriptionId) -> DbResult<()> {
        let Some(event_id) = event_id else {
            return Ok(());
        };
        match self.tables.gateway_events.entry(event_id) {
            Entry::Occupied(_) => Err(DbError::Duplicate(GATEWAY_EVENTS_KEY.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(subscription_id);
                Ok(())
            }
        }
    }

    fn record(&self, visit: Option<Visit>, payment: Option<PaymentWrite>, audit: Vec<AuditEntry>) {
        if let Some(visit) = visit {
            self.tables
                .visits
                .entry(visit.subscription_id)
                .or_default()
                .push(visit);
        }
        if let Some(write) = payment {
            let payment = match write {
                PaymentWrite::Insert(p) | PaymentWrite::Update(p) => p,
            };
            self.tables.payments.insert(payment.id, payment);
        }
        for entry in audit {
            self.tables
                .audit
                .entry(entry.subscription_id)
                .or_default()
                .push(entry);
        }
    }
}

fn check_quota(sub: &Subscription) -> DbResult<()> {
    if sub.quota_is_consistent() {
        Ok(())
    } else {
        Err(DbError::Constraint(
            "subscriptions_quota_balanced".to_string(),
        ))
    }
}

#[async_trait]
impl PackageRepository for MemoryStore {
    async fn find_by_id(&self, id: PackageId) -> DbResult<Option<Package>> {
        Ok(self.tables.packages.get(&id).map(|p| p.clone()))
    }

    async fn create(&self, input: CreatePackage) -> DbResult<Package> {
        match self.tables.packages.entry(input.id) {
            Entry::Occupied(_) => Err(DbError::Duplicate("packages_pkey".to_string())),
            Entry::Vacant(slot) => {
                let package = Package {
                    id: input.id,
                    salon_id: input.salon_id,
                    name: input.name,
                    visit_count: input.visit_count,
                    validity_days: input.validity_days,
                    price_cents: input.price_cents,
                    currency: input.currency,
                    active: true,
                    created_at: Utc::now(),
                };
                slot.insert(package.clone());
                Ok(package)
            }
        }
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn find_by_id(&self, id: SubscriptionId) -> DbResult<Option<Subscription>> {
        Ok(self.tables.subscriptions.get(&id).map(|s| s.clone()))
    }

    async fn find_by_token(&self, token: &RedemptionToken) -> DbResult<Option<Subscription>> {
        let Some(id) = self.tables.tokens.get(token.as_str()).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.tables.subscriptions.get(&id).map(|s| s.clone()))
    }

    async fn find_due_for_sweep(
        &self,
        now: DateTime<Utc>,
        suspended_before: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Subscription>> {
        let mut due: Vec<Subscription> = self
            .tables
            .subscriptions
            .iter()
            .filter(|s| match s.status {
                SubscriptionStatus::Active => s.end_date < now || s.visits_remaining == 0,
                SubscriptionStatus::Suspended => {
                    s.suspended_at.is_some_and(|at| at <= suspended_before)
                }
                SubscriptionStatus::Expired | SubscriptionStatus::Cancelled => false,
            })
            .map(|s| s.clone())
            .collect();

        due.sort_by_key(|s| s.end_date);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn create(&self, input: CreateSubscription) -> DbResult<Subscription> {
        check_quota(&input.subscription)?;
        let payment = PaymentWrite::Insert(input.payment);
        self.check_payment(&payment)?;

        match self.tables.subscriptions.entry(input.subscription.id) {
            Entry::Occupied(_) => Err(DbError::Duplicate("subscriptions_pkey".to_string())),
            Entry::Vacant(slot) => {
                self.claim_event(input.gateway_event, input.subscription.id)?;
                slot.insert(input.subscription.clone());
                self.record(None, Some(payment), vec![input.audit]);
                Ok(input.subscription)
            }
        }
    }

    async fn commit(&self, commit: SubscriptionCommit) -> DbResult<Subscription> {
        let SubscriptionCommit {
            subscription,
            visit,
            payment,
            audit,
            gateway_event,
        } = commit;

        let mut stored = self
            .tables
            .subscriptions
            .get_mut(&subscription.id)
            .ok_or(DbError::NotFound)?;

        if stored.version != subscription.version {
            return Err(DbError::VersionConflict);
        }
        check_quota(&subscription)?;
        if let Some(write) = &payment {
            self.check_payment(write)?;
        }
        self.claim_event(gateway_event, subscription.id)?;

        let mut updated = subscription;
        updated.version += 1;
        *stored = updated.clone();
        self.record(visit, payment, audit);
        drop(stored);

        Ok(updated)
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn reserve(
        &self,
        token: &RedemptionToken,
        subscription_id: SubscriptionId,
        _issued_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let Entry::Vacant(owner) = self.tables.token_owners.entry(subscription_id) else {
            return Err(DbError::Duplicate("subscription".to_string()));
        };
        let Entry::Vacant(slot) = self.tables.tokens.entry(token.as_str().to_string()) else {
            return Err(DbError::Duplicate("token".to_string()));
        };
        slot.insert(subscription_id);
        owner.insert(token.as_str().to_string());
        Ok(())
    }

    async fn find_subscription_id(
        &self,
        token: &RedemptionToken,
    ) -> DbResult<Option<SubscriptionId>> {
        Ok(self.tables.tokens.get(token.as_str()).map(|id| *id))
    }
}

#[async_trait]
impl VisitRepository for MemoryStore {
    async fn find_by_subscription(&self, subscription_id: SubscriptionId) -> DbResult<Vec<Visit>> {
        Ok(self
            .tables
            .visits
            .get(&subscription_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn count_by_subscription(&self, subscription_id: SubscriptionId) -> DbResult<u64> {
        Ok(self
            .tables
            .visits
            .get(&subscription_id)
            .map_or(0, |v| v.len() as u64))
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn find_by_id(&self, id: PaymentId) -> DbResult<Option<Payment>> {
        Ok(self.tables.payments.get(&id).map(|p| p.clone()))
    }

    async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> DbResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .tables
            .payments
            .iter()
            .filter(|p| p.subscription_id == subscription_id)
            .map(|p| p.clone())
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn event_processed(&self, event_id: &str) -> DbResult<bool> {
        Ok(self.tables.gateway_events.contains_key(event_id))
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append(&self, entry: AuditEntry) -> DbResult<()> {
        self.record(None, None, vec![entry]);
        Ok(())
    }

    async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> DbResult<Vec<AuditEntry>> {
        Ok(self
            .tables
            .audit
            .get(&subscription_id)
            .map(|a| a.clone())
            .unwrap_or_default())
    }
}
