//! Quota ledger

use std::sync::Arc;

use salonpass_db::{SubscriptionCommit, SubscriptionRepository};
use salonpass_types::{Subscription, SubscriptionId};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{LifecycleError, Result};
use crate::retry::{with_retry, RetryConfig};
use crate::state_machine;
use crate::unit;

/// Counters after a decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaBalance {
    pub visits_used: u32,
    pub visits_remaining: u32,
}

impl QuotaBalance {
    /// Whether the last visit was consumed
    pub fn is_exhausted(&self) -> bool {
        self.visits_remaining == 0
    }
}

/// Visit quota bookkeeping
pub struct QuotaLedger {
    subscriptions: Arc<dyn SubscriptionRepository>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl QuotaLedger {
    /// Create a ledger over the subscription store
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            subscriptions,
            clock,
            retry,
        }
    }

    /// Consume one visit on an in-memory snapshot
    pub fn apply(sub: &mut Subscription) -> Result<QuotaBalance> {
        if sub.visits_remaining == 0 {
            return Err(LifecycleError::QuotaExhausted);
        }
        sub.visits_remaining -= 1;
        sub.visits_used += 1;
        Ok(QuotaBalance {
            visits_used: sub.visits_used,
            visits_remaining: sub.visits_remaining,
        })
    }

    /// Restore the full visit count for a new period
    pub fn reset(sub: &mut Subscription) {
        sub.visits_used = 0;
        sub.visits_remaining = sub.visit_count;
    }

    /// Consume one visit and persist the counters
    ///
    /// An `Active` subscription whose quota reaches zero is expired in the
    /// same commit.
    pub async fn decrement(&self, subscription_id: SubscriptionId) -> Result<QuotaBalance> {
        with_retry(&self.retry, move || self.decrement_once(subscription_id)).await
    }

    async fn decrement_once(&self, subscription_id: SubscriptionId) -> Result<QuotaBalance> {
        let mut sub = self
            .subscriptions
            .find_by_id(subscription_id)
            .await?
            .ok_or(LifecycleError::SubscriptionNotFound)?;

        let now = self.clock.now();
        let balance = Self::apply(&mut sub)?;
        sub.updated_at = now;

        let mut commit = SubscriptionCommit::new(sub.clone());
        if balance.is_exhausted() {
            if let Some(entry) = state_machine::evaluate_expiry(&mut commit.subscription, now) {
                commit = commit.with_audit(entry);
            }
        }

        unit::commit(self.subscriptions.as_ref(), commit).await?;

        debug!(
            subscription_id = %subscription_id,
            visits_remaining = balance.visits_remaining,
            "Quota decremented"
        );
        Ok(balance)
    }
}
