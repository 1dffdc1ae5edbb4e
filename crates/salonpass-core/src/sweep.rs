//! Expiry sweeper
//!
//! Periodically expires `Active` subscriptions whose period ended or quota
//! ran out, and cancels `Suspended` subscriptions whose grace window elapsed.
//! Each subscription is its own version-checked unit, so redundant or
//! overlapping runs never double-apply a transition.

use std::future::Future;
use std::sync::Arc;

use salonpass_db::{Stores, SubscriptionCommit};
use salonpass_types::{SubscriptionId, SubscriptionStatus};
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result};
use crate::metrics::{self, Operation, OperationTimer};
use crate::notify::{self, Notifier};
use crate::retry::with_retry;
use crate::state_machine;
use crate::unit::{self, Committed};

/// Counts from one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Subscriptions loaded
    pub examined: usize,
    /// Moved to `Expired`
    pub expired: usize,
    /// Moved to `Cancelled`
    pub cancelled: usize,
    /// Already handled by another writer
    pub skipped: usize,
    /// Failed with an error
    pub failed: usize,
}

impl SweepReport {
    /// Number of transitions applied
    pub fn transitions(&self) -> usize {
        self.expired + self.cancelled
    }
}

/// Expiry sweeper
pub struct ExpirySweeper {
    stores: Stores,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl ExpirySweeper {
    /// Create a sweeper
    pub fn new(
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            stores,
            notifier,
            clock,
            config,
        }
    }

    /// Run one pass over due subscriptions
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport> {
        let _timer = OperationTimer::start(Operation::Sweep);
        let now = self.clock.now();
        let due = self
            .stores
            .subscriptions
            .find_due_for_sweep(
                now,
                now - self.config.grace_period,
                self.config.sweep_batch_size,
            )
            .await?;

        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };

        for sub in due {
            let id = sub.id;
            match with_retry(&self.config.conflict_retry, move || self.sweep_one(id)).await {
                Ok(Some(committed)) => {
                    match committed.subscription.status {
                        SubscriptionStatus::Expired => report.expired += 1,
                        SubscriptionStatus::Cancelled => report.cancelled += 1,
                        _ => {}
                    }
                    metrics::record_sweep_transition(committed.subscription.status);
                    notify::dispatch(self.notifier.as_ref(), committed.notifications()).await;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!(subscription_id = %id, error = %e, "Sweep failed for subscription");
                    report.failed += 1;
                }
            }
        }

        if report.transitions() > 0 || report.failed > 0 {
            info!(
                examined = report.examined,
                expired = report.expired,
                cancelled = report.cancelled,
                skipped = report.skipped,
                failed = report.failed,
                "Sweep pass complete"
            );
        }
        Ok(report)
    }

    /// Sweep until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = self.config.sweep_interval.as_secs(), "Expiry sweeper started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Sweep pass failed");
                    }
                }
            }
        }
        info!("Expiry sweeper stopped");
    }

    /// Re-evaluate one subscription from a fresh load
    async fn sweep_one(&self, id: SubscriptionId) -> Result<Option<Committed>> {
        let Some(mut sub) = self.stores.subscriptions.find_by_id(id).await? else {
            return Err(LifecycleError::SubscriptionNotFound);
        };
        let now = self.clock.now();

        let entry = match sub.status {
            SubscriptionStatus::Active => state_machine::evaluate_expiry(&mut sub, now),
            SubscriptionStatus::Suspended => {
                state_machine::evaluate_grace(&mut sub, now, self.config.grace_period)
            }
            SubscriptionStatus::Expired | SubscriptionStatus::Cancelled => None,
        };
        let Some(entry) = entry else {
            debug!(subscription_id = %id, status = %sub.status, "Nothing to sweep");
            return Ok(None);
        };

        let committed = unit::commit(
            self.stores.subscriptions.as_ref(),
            SubscriptionCommit::new(sub).with_audit(entry),
        )
        .await?;
        Ok(Some(committed))
    }
}
