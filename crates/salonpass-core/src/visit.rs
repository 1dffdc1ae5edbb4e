//! Visit recorder
//!
//! A redemption is one unit: status check, salon check, quota decrement,
//! visit creation and the expiry it may trigger all commit together.
//! Redemptions refused for status or quota are audited as rejected
//! `Active -> Expired` attempts, the only edge a redemption can drive.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use salonpass_db::{AuditRepository, SubscriptionCommit, SubscriptionRepository};
use salonpass_types::{
    Actor, AuditEntry, SalonId, Subscription, SubscriptionId, SubscriptionStatus, TransitionReason, Visit,
    VisitId,
};
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, Result};
use crate::quota::QuotaLedger;
use crate::retry::{with_retry, RetryConfig};
use crate::state_machine;
use crate::token::TokenManager;
use crate::unit;

/// Result of a successful redemption
#[derive(Debug, Clone)]
pub struct Redemption {
    /// Visit that was recorded
    pub visit: Visit,
    /// Subscription after the redemption
    pub subscription: Subscription,
    /// Transitions committed with the visit
    pub applied: Vec<AuditEntry>,
}

impl Redemption {
    /// Whether this redemption used the last visit
    pub fn exhausted_quota(&self) -> bool {
        self.subscription.visits_remaining == 0
    }
}

/// Records redemptions against subscriptions
pub struct VisitRecorder {
    subscriptions: Arc<dyn SubscriptionRepository>,
    audit: Arc<dyn AuditRepository>,
    tokens: Arc<TokenManager>,
    retry: RetryConfig,
}

impl VisitRecorder {
    /// Create a visit recorder
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        audit: Arc<dyn AuditRepository>,
        tokens: Arc<TokenManager>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            subscriptions,
            audit,
            tokens,
            retry,
        }
    }

    /// Redeem one visit at `salon_id`
    pub async fn redeem(
        &self,
        token: &str,
        salon_id: SalonId,
        at: DateTime<Utc>,
    ) -> Result<Redemption> {
        let subscription_id = self.tokens.resolve(token).await?;
        with_retry(&self.retry, move || {
            self.redeem_once(subscription_id, salon_id, at)
        })
        .await
    }

    async fn redeem_once(
        &self,
        subscription_id: SubscriptionId,
        salon_id: SalonId,
        at: DateTime<Utc>,
    ) -> Result<Redemption> {
        let sub = self
            .subscriptions
            .find_by_id(subscription_id)
            .await?
            .ok_or(LifecycleError::InvalidToken)?;

        if sub.status != SubscriptionStatus::Active {
            let err = not_active(&sub);
            self.reject(&sub, at, &err).await;
            return Err(err);
        }

        if sub.is_past_end(at) {
            let mut next = sub;
            if let Some(entry) = state_machine::evaluate_expiry(&mut next, at) {
                unit::commit(
                    self.subscriptions.as_ref(),
                    SubscriptionCommit::new(next).with_audit(entry),
                )
                .await?;
            }
            debug!(subscription_id = %subscription_id, "Redemption after period end");
            return Err(LifecycleError::SubscriptionNotActive(
                SubscriptionStatus::Expired,
            ));
        }

        if sub.salon_id != salon_id {
            return Err(LifecycleError::SalonMismatch);
        }

        let mut next = sub.clone();
        let balance = match QuotaLedger::apply(&mut next) {
            Ok(balance) => balance,
            Err(err) => {
                self.reject(&sub, at, &err).await;
                return Err(err);
            }
        };
        next.updated_at = at;

        let visit = Visit {
            id: VisitId::new(),
            subscription_id,
            customer_id: next.customer_id,
            salon_id,
            redeemed_at: at,
        };

        let mut commit = SubscriptionCommit::new(next).with_visit(visit.clone());
        if balance.is_exhausted() {
            let entry = state_machine::transition(
                &mut commit.subscription,
                SubscriptionStatus::Expired,
                TransitionReason::QuotaExhausted,
                Actor::System,
                at,
            )?;
            commit = commit.with_audit(entry);
        }

        let committed = unit::commit(self.subscriptions.as_ref(), commit).await?;
        info!(
            subscription_id = %subscription_id,
            salon_id = %salon_id,
            visits_remaining = balance.visits_remaining,
            "Visit redeemed"
        );

        Ok(Redemption {
            visit,
            subscription: committed.subscription,
            applied: committed.applied,
        })
    }

    /// Append a refused redemption; failures are logged only
    async fn reject(&self, sub: &Subscription, at: DateTime<Utc>, err: &LifecycleError) {
        let entry = state_machine::rejected(
            sub,
            SubscriptionStatus::Expired,
            TransitionReason::QuotaExhausted,
            Actor::System,
            at,
            err,
        );
        if let Err(e) = self.audit.append(entry).await {
            warn!(subscription_id = %sub.id, error = %e, "Failed to audit rejected redemption");
        }
    }
}

/// Error for a redemption against a non-`Active` subscription
///
/// A subscription that ran out of visits reports `QuotaExhausted` even
/// though its status check fails first.
fn not_active(sub: &Subscription) -> LifecycleError {
    if sub.is_exhausted() {
        LifecycleError::QuotaExhausted
    } else {
        LifecycleError::SubscriptionNotActive(sub.status)
    }
}
