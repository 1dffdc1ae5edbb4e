//! Customer notifications
//!
//! Notifications are fire-and-forget: they are sent after a unit commits and
//! a failure to deliver never fails the operation that produced them.

use async_trait::async_trait;
use salonpass_types::{
    AuditEntry, CustomerId, SubscriptionId, SubscriptionStatus, TransitionReason,
};
use thiserror::Error;
use tracing::{info, warn};

/// Message for the notification collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Renewal failed; the subscription is waiting for payment
    Suspended {
        customer_id: CustomerId,
        subscription_id: SubscriptionId,
        reason: TransitionReason,
    },
    /// Period ended or quota used up
    Expired {
        customer_id: CustomerId,
        subscription_id: SubscriptionId,
        reason: TransitionReason,
    },
    /// Subscription cancelled
    Cancelled {
        customer_id: CustomerId,
        subscription_id: SubscriptionId,
        reason: TransitionReason,
    },
    /// Few visits left
    LowQuota {
        customer_id: CustomerId,
        subscription_id: SubscriptionId,
        remaining: u32,
    },
}

impl Notification {
    /// Notification for an applied transition, if its target status has one
    pub fn for_transition(customer_id: CustomerId, entry: &AuditEntry) -> Option<Self> {
        if !entry.outcome.is_applied() {
            return None;
        }
        let subscription_id = entry.subscription_id;
        let reason = entry.reason;
        match entry.to {
            SubscriptionStatus::Suspended => Some(Self::Suspended {
                customer_id,
                subscription_id,
                reason,
            }),
            SubscriptionStatus::Expired => Some(Self::Expired {
                customer_id,
                subscription_id,
                reason,
            }),
            SubscriptionStatus::Cancelled => Some(Self::Cancelled {
                customer_id,
                subscription_id,
                reason,
            }),
            SubscriptionStatus::Active => None,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Suspended { .. } => "suspended",
            Self::Expired { .. } => "expired",
            Self::Cancelled { .. } => "cancelled",
            Self::LowQuota { .. } => "low_quota",
        }
    }

    /// Subscription the notification is about
    pub fn subscription_id(&self) -> SubscriptionId {
        match self {
            Self::Suspended {
                subscription_id, ..
            }
            | Self::Expired {
                subscription_id, ..
            }
            | Self::Cancelled {
                subscription_id, ..
            }
            | Self::LowQuota {
                subscription_id, ..
            } => *subscription_id,
        }
    }
}

/// Notification delivery errors
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Delivery channel unavailable
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    /// Message refused by the channel
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Notification collaborator
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Notifier that writes structured log events
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        match &notification {
            Notification::LowQuota {
                customer_id,
                subscription_id,
                remaining,
            } => info!(
                customer_id = %customer_id,
                subscription_id = %subscription_id,
                remaining,
                "Low quota notification"
            ),
            Notification::Suspended {
                customer_id,
                subscription_id,
                reason,
            }
            | Notification::Expired {
                customer_id,
                subscription_id,
                reason,
            }
            | Notification::Cancelled {
                customer_id,
                subscription_id,
                reason,
            } => info!(
                customer_id = %customer_id,
                subscription_id = %subscription_id,
                reason = %reason,
                kind = notification.kind(),
                "Lifecycle notification"
            ),
        }
        Ok(())
    }
}

/// Send notifications, logging failures
pub(crate) async fn dispatch(notifier: &dyn Notifier, notifications: Vec<Notification>) {
    for notification in notifications {
        let kind = notification.kind();
        let subscription_id = notification.subscription_id();
        if let Err(e) = notifier.send(notification).await {
            warn!(
                subscription_id = %subscription_id,
                kind,
                error = %e,
                "Failed to send notification"
            );
        }
    }
}

/// Notifications for the applied transitions of a commit
pub(crate) fn for_entries(customer_id: CustomerId, entries: &[AuditEntry]) -> Vec<Notification> {
    entries
        .iter()
        .filter_map(|entry| Notification::for_transition(customer_id, entry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use salonpass_types::{Actor, AuditOutcome};

    fn entry(to: SubscriptionStatus, outcome: AuditOutcome) -> AuditEntry {
        AuditEntry {
            subscription_id: SubscriptionId::new(),
            from: Some(SubscriptionStatus::Active),
            to,
            reason: TransitionReason::RenewalPaymentFailed,
            actor: Actor::System,
            outcome,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn applied_suspension_notifies() {
        let customer = CustomerId::new();
        let note = Notification::for_transition(
            customer,
            &entry(SubscriptionStatus::Suspended, AuditOutcome::Applied),
        );
        assert!(matches!(note, Some(Notification::Suspended { .. })));
    }

    #[test]
    fn rejected_and_reactivation_entries_do_not_notify() {
        let customer = CustomerId::new();
        let rejected = entry(
            SubscriptionStatus::Cancelled,
            AuditOutcome::Rejected {
                code: "INVALID_TRANSITION".to_string(),
            },
        );
        let reactivated = entry(SubscriptionStatus::Active, AuditOutcome::Applied);

        assert!(for_entries(customer, &[rejected, reactivated]).is_empty());
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _notification: Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("smtp down".to_string()))
        }
    }

    #[tokio::test]
    async fn dispatch_swallows_failures() {
        let note = Notification::LowQuota {
            customer_id: CustomerId::new(),
            subscription_id: SubscriptionId::new(),
            remaining: 1,
        };
        dispatch(&FailingNotifier, vec![note.clone()]).await;
        dispatch(&LogNotifier, vec![note]).await;
    }
}
