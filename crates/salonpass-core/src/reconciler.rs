//! Payment reconciler
//!
//! Applies gateway outcomes to subscriptions. Outcomes for one subscription
//! are serialized through [`SubscriptionLocks`]; the optimistic version check
//! still guards against writers in other processes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use salonpass_db::{CreateSubscription, PaymentWrite, Stores, SubscriptionCommit};
use salonpass_types::{
    Actor, AuditEntry, AuditOutcome, CustomerId, Package, PackageId, Payment, PaymentId,
    PaymentKind, PaymentStatus, Subscription, SubscriptionId, SubscriptionStatus,
    TransitionReason,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result};
use crate::metrics;
use crate::notify::{self, Notifier};
use crate::quota::QuotaLedger;
use crate::retry::with_retry;
use crate::state_machine;
use crate::token::TokenManager;
use crate::unit::{self, Committed};

/// What a charge was for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargePurpose {
    /// First payment; creates the subscription
    Purchase {
        customer_id: CustomerId,
        package_id: PackageId,
    },
    /// Payment for a further period
    Renewal,
}

/// Charge an outcome refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charge {
    pub payment_id: PaymentId,
    pub purpose: ChargePurpose,
    pub amount_cents: i64,
    pub currency: String,
    pub gateway_reference: Option<String>,
}

/// Gateway outcome for a charge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Funds reserved
    Authorized(Charge),
    /// Funds taken
    Captured(Charge),
    /// Charge declined
    Failed { charge: Charge, reason: String },
    /// Part or all of a payment returned
    Refunded {
        payment_id: PaymentId,
        amount_cents: i64,
    },
}

impl PaymentOutcome {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authorized(_) => "authorized",
            Self::Captured(_) => "captured",
            Self::Failed { .. } => "failed",
            Self::Refunded { .. } => "refunded",
        }
    }
}

/// Per-subscription async locks
///
/// Entries are dropped once no task holds or waits on them.
#[derive(Clone, Default)]
pub struct SubscriptionLocks {
    locks: Arc<DashMap<SubscriptionId, Arc<Mutex<()>>>>,
}

/// Held lock on one subscription
pub struct SubscriptionLockGuard {
    locks: Arc<DashMap<SubscriptionId, Arc<Mutex<()>>>>,
    subscription_id: SubscriptionId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SubscriptionLocks {
    /// Wait for exclusive access to a subscription
    pub async fn lock(&self, subscription_id: SubscriptionId) -> SubscriptionLockGuard {
        let mutex = self
            .locks
            .entry(subscription_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        SubscriptionLockGuard {
            locks: Arc::clone(&self.locks),
            subscription_id,
            guard: Some(guard),
        }
    }

    /// Number of subscriptions with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock entries are live
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for SubscriptionLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.subscription_id, |_, m| Arc::strong_count(m) == 1);
    }
}

/// Applies payment outcomes
pub struct PaymentReconciler {
    stores: Stores,
    tokens: Arc<TokenManager>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    locks: SubscriptionLocks,
}

impl PaymentReconciler {
    /// Create a reconciler
    pub fn new(
        stores: Stores,
        tokens: Arc<TokenManager>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            stores,
            tokens,
            notifier,
            clock,
            config,
            locks: SubscriptionLocks::default(),
        }
    }

    /// Locks shared with other writers in this process
    pub fn locks(&self) -> &SubscriptionLocks {
        &self.locks
    }

    /// Apply one synchronous gateway outcome to a subscription
    #[instrument(skip_all, fields(subscription_id = %subscription_id, outcome = outcome.kind()))]
    pub async fn apply_outcome(
        &self,
        subscription_id: SubscriptionId,
        outcome: PaymentOutcome,
    ) -> Result<Subscription> {
        let _guard = self.locks.lock(subscription_id).await;
        let committed = self.dispatch(subscription_id, &outcome, None).await?;

        notify::dispatch(self.notifier.as_ref(), committed.notifications()).await;
        Ok(committed.subscription)
    }

    /// Apply a gateway callback event at most once
    ///
    /// The event id is stored with the unit it drives. A redelivered event
    /// changes nothing and returns the current subscription.
    #[instrument(skip_all, fields(subscription_id = %subscription_id, event_id = %event_id, outcome = outcome.kind()))]
    pub async fn apply_event(
        &self,
        subscription_id: SubscriptionId,
        event_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Subscription> {
        let _guard = self.locks.lock(subscription_id).await;

        if self.stores.payments.event_processed(event_id).await? {
            debug!(event_id, "Gateway event already applied");
            return self.subscription(subscription_id).await;
        }

        let committed = match self.dispatch(subscription_id, &outcome, Some(event_id)).await {
            Ok(committed) => committed,
            Err(LifecycleError::Database(e)) if e.is_duplicate_event() => {
                debug!(event_id, "Gateway event applied by another writer");
                return self.subscription(subscription_id).await;
            }
            Err(e) => return Err(e),
        };

        notify::dispatch(self.notifier.as_ref(), committed.notifications()).await;
        Ok(committed.subscription)
    }

    async fn dispatch(
        &self,
        subscription_id: SubscriptionId,
        outcome: &PaymentOutcome,
        event: Option<&str>,
    ) -> Result<Committed> {
        match outcome {
            PaymentOutcome::Authorized(charge) => {
                self.on_success(subscription_id, charge, PaymentStatus::Authorized, event)
                    .await
            }
            PaymentOutcome::Captured(charge) => {
                self.on_success(subscription_id, charge, PaymentStatus::Captured, event)
                    .await
            }
            PaymentOutcome::Failed { charge, reason } => {
                self.on_failure(subscription_id, charge, reason, event).await
            }
            PaymentOutcome::Refunded {
                payment_id,
                amount_cents,
            } => {
                self.on_refund(subscription_id, *payment_id, *amount_cents, event)
                    .await
            }
        }
    }

    async fn on_success(
        &self,
        subscription_id: SubscriptionId,
        charge: &Charge,
        status: PaymentStatus,
        event: Option<&str>,
    ) -> Result<Committed> {
        validate_charge(charge)?;
        match charge.purpose {
            ChargePurpose::Purchase {
                customer_id,
                package_id,
            } => {
                self.activate(subscription_id, customer_id, package_id, charge, status, event)
                    .await
            }
            ChargePurpose::Renewal => {
                with_retry(&self.config.conflict_retry, move || {
                    self.renew_once(subscription_id, charge, status, event)
                })
                .await
            }
        }
    }

    async fn activate(
        &self,
        subscription_id: SubscriptionId,
        customer_id: CustomerId,
        package_id: PackageId,
        charge: &Charge,
        status: PaymentStatus,
        event: Option<&str>,
    ) -> Result<Committed> {
        if self.stores.payments.find_by_id(charge.payment_id).await?.is_some() {
            return with_retry(&self.config.conflict_retry, move || {
                self.upgrade_once(subscription_id, charge, status, event)
            })
            .await;
        }
        if self
            .stores
            .subscriptions
            .find_by_id(subscription_id)
            .await?
            .is_some()
        {
            return Err(LifecycleError::Validation(
                "subscription already exists".to_string(),
            ));
        }

        let package = self.package(package_id).await?;
        let token = self.tokens.issue(subscription_id).await?;
        let now = self.clock.now();

        let subscription = Subscription {
            id: subscription_id,
            customer_id,
            package_id,
            salon_id: package.salon_id,
            visit_count: package.visit_count,
            visits_used: 0,
            visits_remaining: package.visit_count,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: package.period_end(now),
            redemption_token: token,
            suspended_at: None,
            renewal_count: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let payment = new_payment(subscription_id, PaymentKind::Purchase, charge, status, now);
        let audit = AuditEntry {
            subscription_id,
            from: None,
            to: SubscriptionStatus::Active,
            reason: TransitionReason::Purchase,
            actor: Actor::Customer(customer_id),
            outcome: AuditOutcome::Applied,
            occurred_at: now,
        };

        let created = self
            .stores
            .subscriptions
            .create(CreateSubscription {
                subscription,
                payment,
                audit: audit.clone(),
                gateway_event: event.map(str::to_string),
            })
            .await?;
        metrics::record_transitions(std::slice::from_ref(&audit));

        info!(
            subscription_id = %subscription_id,
            customer_id = %customer_id,
            package_id = %package_id,
            "Subscription activated"
        );
        Ok(Committed::unchanged(created))
    }

    /// Record a later status for a payment already on file
    async fn upgrade_once(
        &self,
        subscription_id: SubscriptionId,
        charge: &Charge,
        status: PaymentStatus,
        event: Option<&str>,
    ) -> Result<Committed> {
        let sub = self.subscription(subscription_id).await?;
        let existing = self.existing_payment(subscription_id, charge.payment_id).await?;

        let Some(existing) = existing else {
            return Err(LifecycleError::PaymentNotFound);
        };
        if existing.status != PaymentStatus::Authorized || status != PaymentStatus::Captured {
            debug!(payment_id = %charge.payment_id, "Duplicate payment outcome ignored");
            return Ok(Committed::unchanged(sub));
        }

        let now = self.clock.now();
        let mut payment = existing;
        payment.status = PaymentStatus::Captured;
        payment.gateway_reference = charge
            .gateway_reference
            .clone()
            .or(payment.gateway_reference);
        payment.updated_at = now;

        let mut next = sub;
        next.updated_at = now;
        unit::commit(
            self.stores.subscriptions.as_ref(),
            SubscriptionCommit::new(next)
                .with_payment(PaymentWrite::Update(payment))
                .with_gateway_event(event),
        )
        .await
    }

    async fn renew_once(
        &self,
        subscription_id: SubscriptionId,
        charge: &Charge,
        status: PaymentStatus,
        event: Option<&str>,
    ) -> Result<Committed> {
        if self
            .existing_payment(subscription_id, charge.payment_id)
            .await?
            .is_some()
        {
            return self.upgrade_once(subscription_id, charge, status, event).await;
        }

        let sub = self.subscription(subscription_id).await?;
        let now = self.clock.now();
        let payment = new_payment(subscription_id, PaymentKind::Renewal, charge, status, now);

        let mut next = sub.clone();
        next.updated_at = now;
        let mut audit = Vec::new();

        match next.status {
            SubscriptionStatus::Expired | SubscriptionStatus::Cancelled => {
                debug!(status = %next.status, "Renewal payment recorded on terminal subscription");
            }
            SubscriptionStatus::Suspended
                if state_machine::grace_elapsed(&next, now, self.config.grace_period) =>
            {
                warn!(subscription_id = %subscription_id, "Renewal payment arrived after grace window");
                audit.push(state_machine::transition(
                    &mut next,
                    SubscriptionStatus::Cancelled,
                    TransitionReason::GraceWindowElapsed,
                    Actor::System,
                    now,
                )?);
            }
            SubscriptionStatus::Suspended => {
                let package = self.package(next.package_id).await?;
                start_period(&mut next, &package, now);
                audit.push(state_machine::transition(
                    &mut next,
                    SubscriptionStatus::Active,
                    TransitionReason::PaymentRecovered,
                    Actor::System,
                    now,
                )?);
            }
            SubscriptionStatus::Active => {
                let package = self.package(next.package_id).await?;
                start_period(&mut next, &package, now);
            }
        }

        let mut commit = SubscriptionCommit::new(next)
            .with_payment(PaymentWrite::Insert(payment))
            .with_gateway_event(event);
        commit.audit = audit;
        let committed = unit::commit(self.stores.subscriptions.as_ref(), commit).await?;

        info!(
            subscription_id = %subscription_id,
            status = %committed.subscription.status,
            end_date = %committed.subscription.end_date,
            "Renewal payment applied"
        );
        Ok(committed)
    }

    async fn on_failure(
        &self,
        subscription_id: SubscriptionId,
        charge: &Charge,
        reason: &str,
        event: Option<&str>,
    ) -> Result<Committed> {
        match charge.purpose {
            ChargePurpose::Purchase { customer_id, .. } => {
                warn!(customer_id = %customer_id, reason, "Purchase payment declined");
                Err(LifecycleError::PaymentDeclined(reason.to_string()))
            }
            ChargePurpose::Renewal => {
                with_retry(&self.config.conflict_retry, move || {
                    self.fail_once(subscription_id, charge, reason, event)
                })
                .await
            }
        }
    }

    async fn fail_once(
        &self,
        subscription_id: SubscriptionId,
        charge: &Charge,
        reason: &str,
        event: Option<&str>,
    ) -> Result<Committed> {
        let sub = self.subscription(subscription_id).await?;
        let now = self.clock.now();

        let write = match self
            .existing_payment(subscription_id, charge.payment_id)
            .await?
        {
            Some(existing) if existing.status == PaymentStatus::Failed => {
                debug!(payment_id = %charge.payment_id, "Duplicate failure ignored");
                return Ok(Committed::unchanged(sub));
            }
            Some(mut existing) => {
                existing.status = PaymentStatus::Failed;
                existing.failure_reason = Some(reason.to_string());
                existing.updated_at = now;
                PaymentWrite::Update(existing)
            }
            None => {
                let mut payment = new_payment(
                    subscription_id,
                    PaymentKind::Renewal,
                    charge,
                    PaymentStatus::Failed,
                    now,
                );
                payment.failure_reason = Some(reason.to_string());
                PaymentWrite::Insert(payment)
            }
        };

        let mut next = sub;
        next.updated_at = now;
        let mut commit = SubscriptionCommit::new(next)
            .with_payment(write)
            .with_gateway_event(event);
        if commit.subscription.status == SubscriptionStatus::Active {
            let entry = state_machine::transition(
                &mut commit.subscription,
                SubscriptionStatus::Suspended,
                TransitionReason::RenewalPaymentFailed,
                Actor::System,
                now,
            )?;
            commit = commit.with_audit(entry);
        }

        let committed = unit::commit(self.stores.subscriptions.as_ref(), commit).await?;
        warn!(
            subscription_id = %subscription_id,
            reason,
            status = %committed.subscription.status,
            "Renewal payment failed"
        );
        Ok(committed)
    }

    async fn on_refund(
        &self,
        subscription_id: SubscriptionId,
        payment_id: PaymentId,
        amount_cents: i64,
        event: Option<&str>,
    ) -> Result<Committed> {
        if amount_cents <= 0 {
            return Err(LifecycleError::Validation(
                "refund amount must be positive".to_string(),
            ));
        }
        with_retry(&self.config.conflict_retry, move || {
            self.refund_once(subscription_id, payment_id, amount_cents, event)
        })
        .await
    }

    async fn refund_once(
        &self,
        subscription_id: SubscriptionId,
        payment_id: PaymentId,
        amount_cents: i64,
        event: Option<&str>,
    ) -> Result<Committed> {
        let mut payment = self
            .existing_payment(subscription_id, payment_id)
            .await?
            .ok_or(LifecycleError::PaymentNotFound)?;
        let sub = self.subscription(subscription_id).await?;

        let refundable = payment.refundable_cents();
        if amount_cents > refundable {
            return Err(LifecycleError::Validation(format!(
                "refund of {amount_cents} exceeds refundable amount {refundable}"
            )));
        }

        let now = self.clock.now();
        let total = payment.refunded_cents() + amount_cents;
        let full = total == payment.amount_cents;
        payment.refund_amount_cents = Some(total);
        payment.refunded_at = Some(now);
        payment.status = if full {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        payment.updated_at = now;

        let mut next = sub;
        next.updated_at = now;
        let mut commit = SubscriptionCommit::new(next)
            .with_payment(PaymentWrite::Update(payment))
            .with_gateway_event(event);
        if full && commit.subscription.status != SubscriptionStatus::Cancelled {
            let entry = state_machine::transition(
                &mut commit.subscription,
                SubscriptionStatus::Cancelled,
                TransitionReason::FullRefund,
                Actor::System,
                now,
            )?;
            commit = commit.with_audit(entry);
        }

        let committed = unit::commit(self.stores.subscriptions.as_ref(), commit).await?;
        info!(
            subscription_id = %subscription_id,
            payment_id = %payment_id,
            refunded_cents = total,
            full,
            "Refund recorded"
        );
        Ok(committed)
    }

    async fn subscription(&self, id: SubscriptionId) -> Result<Subscription> {
        self.stores
            .subscriptions
            .find_by_id(id)
            .await?
            .ok_or(LifecycleError::SubscriptionNotFound)
    }

    async fn package(&self, id: PackageId) -> Result<Package> {
        self.stores
            .packages
            .find_by_id(id)
            .await?
            .ok_or(LifecycleError::PackageNotFound)
    }

    /// A payment on file, which must belong to `subscription_id`
    async fn existing_payment(
        &self,
        subscription_id: SubscriptionId,
        payment_id: PaymentId,
    ) -> Result<Option<Payment>> {
        match self.stores.payments.find_by_id(payment_id).await? {
            Some(p) if p.subscription_id != subscription_id => Err(LifecycleError::Validation(
                "payment belongs to another subscription".to_string(),
            )),
            other => Ok(other),
        }
    }
}

fn validate_charge(charge: &Charge) -> Result<()> {
    if charge.amount_cents < 0 {
        return Err(LifecycleError::Validation(
            "charge amount must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn new_payment(
    subscription_id: SubscriptionId,
    kind: PaymentKind,
    charge: &Charge,
    status: PaymentStatus,
    now: DateTime<Utc>,
) -> Payment {
    Payment {
        id: charge.payment_id,
        subscription_id,
        kind,
        amount_cents: charge.amount_cents,
        currency: charge.currency.clone(),
        status,
        gateway_reference: charge.gateway_reference.clone(),
        refund_amount_cents: None,
        refunded_at: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
    }
}

/// Begin a new period after a successful renewal
fn start_period(sub: &mut Subscription, package: &Package, now: DateTime<Utc>) {
    sub.end_date = sub.end_date.max(now) + package.validity();
    QuotaLedger::reset(sub);
    sub.renewal_count += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn lock_entries_are_released() {
        let locks = SubscriptionLocks::default();
        let id = SubscriptionId::new();

        {
            let _guard = locks.lock(id).await;
            assert_eq!(locks.len(), 1);
        }

        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn lock_serializes_holders() {
        let locks = SubscriptionLocks::default();
        let id = SubscriptionId::new();
        let guard = locks.lock(id).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[test]
    fn early_renewal_extends_from_current_end() {
        let now = Utc::now();
        let package = Package {
            id: PackageId::new(),
            salon_id: salonpass_types::SalonId::new(),
            name: "Monthly blowout".to_string(),
            visit_count: 4,
            validity_days: 30,
            price_cents: 8_000,
            currency: "usd".to_string(),
            active: true,
            created_at: now,
        };
        let mut sub = Subscription {
            id: SubscriptionId::new(),
            customer_id: CustomerId::new(),
            package_id: package.id,
            salon_id: package.salon_id,
            visit_count: 4,
            visits_used: 3,
            visits_remaining: 1,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: now + chrono::Duration::days(5),
            redemption_token: salonpass_types::RedemptionToken::new("RENEWTEST234"),
            suspended_at: None,
            renewal_count: 0,
            version: 3,
            created_at: now,
            updated_at: now,
        };

        start_period(&mut sub, &package, now);

        assert_eq!(sub.end_date, now + chrono::Duration::days(35));
        assert_eq!(sub.visits_remaining, 4);
        assert_eq!(sub.renewal_count, 1);
    }
}
