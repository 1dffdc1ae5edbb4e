//! Commit helper shared by every mutating unit

use salonpass_db::{SubscriptionCommit, SubscriptionRepository};
use salonpass_types::{AuditEntry, Subscription};

use crate::error::Result;
use crate::metrics;
use crate::notify::{self, Notification};

/// Result of a successful commit
#[derive(Debug, Clone)]
pub(crate) struct Committed {
    pub subscription: Subscription,
    pub applied: Vec<AuditEntry>,
}

impl Committed {
    /// Nothing was written; `subscription` is the current state
    pub fn unchanged(subscription: Subscription) -> Self {
        Self {
            subscription,
            applied: Vec::new(),
        }
    }

    /// Notifications owed for the applied transitions
    pub fn notifications(&self) -> Vec<Notification> {
        notify::for_entries(self.subscription.customer_id, &self.applied)
    }
}

/// Commit a unit and record its transitions
pub(crate) async fn commit(
    subscriptions: &dyn SubscriptionRepository,
    commit: SubscriptionCommit,
) -> Result<Committed> {
    let applied = commit.audit.clone();
    let subscription = subscriptions.commit(commit).await?;
    metrics::record_transitions(&applied);
    Ok(Committed {
        subscription,
        applied,
    })
}
