//! Subscription state machine
//!
//! ```text
//! Active ──▶ Expired | Suspended | Cancelled
//! Suspended ──▶ Active | Cancelled
//! ```
//!
//! `Expired` and `Cancelled` are terminal, except that a full refund may
//! still cancel an `Expired` subscription. Every transition is bound to the
//! reason codes that may drive it.

use chrono::{DateTime, Duration, Utc};
use salonpass_types::{
    Actor, AuditEntry, AuditOutcome, Subscription, SubscriptionStatus, TransitionReason,
};

use crate::error::{LifecycleError, Result};

use SubscriptionStatus::{Active, Cancelled, Expired, Suspended};

/// Whether the base transition table contains `from -> to`
pub fn is_edge(from: SubscriptionStatus, to: SubscriptionStatus) -> bool {
    matches!(
        (from, to),
        (Active, Expired | Suspended | Cancelled) | (Suspended, Active | Cancelled)
    )
}

/// Whether `reason` may drive `from -> to`
pub fn permits(reason: TransitionReason, from: SubscriptionStatus, to: SubscriptionStatus) -> bool {
    use TransitionReason::*;

    match reason {
        QuotaExhausted | PeriodEnded => from == Active && to == Expired,
        RenewalPaymentFailed => from == Active && to == Suspended,
        PaymentRecovered => from == Suspended && to == Active,
        GraceWindowElapsed => from == Suspended && to == Cancelled,
        CustomerCancelled | AdminCancelled => is_edge(from, to) && to == Cancelled,
        FullRefund => to == Cancelled && matches!(from, Active | Suspended | Expired),
        Purchase | Renewal => false,
    }
}

/// Apply a transition to an in-memory subscription
///
/// Returns the applied audit entry; the caller commits both together.
pub fn transition(
    sub: &mut Subscription,
    to: SubscriptionStatus,
    reason: TransitionReason,
    actor: Actor,
    at: DateTime<Utc>,
) -> Result<AuditEntry> {
    let from = sub.status;
    if !permits(reason, from, to) {
        return Err(LifecycleError::InvalidTransition { from, to });
    }

    sub.status = to;
    sub.updated_at = at;
    match to {
        Suspended => sub.suspended_at = Some(at),
        Active => sub.suspended_at = None,
        Expired | Cancelled => {}
    }

    Ok(AuditEntry {
        subscription_id: sub.id,
        from: Some(from),
        to,
        reason,
        actor,
        outcome: AuditOutcome::Applied,
        occurred_at: at,
    })
}

/// Audit entry for a refused transition attempt
pub fn rejected(
    sub: &Subscription,
    to: SubscriptionStatus,
    reason: TransitionReason,
    actor: Actor,
    at: DateTime<Utc>,
    err: &LifecycleError,
) -> AuditEntry {
    AuditEntry {
        subscription_id: sub.id,
        from: Some(sub.status),
        to,
        reason,
        actor,
        outcome: AuditOutcome::Rejected {
            code: err.error_code().to_string(),
        },
        occurred_at: at,
    }
}

/// Expire an `Active` subscription whose period ended or quota ran out
///
/// Returns `None` when nothing applies, including for subscriptions that
/// are already `Expired`.
pub fn evaluate_expiry(sub: &mut Subscription, now: DateTime<Utc>) -> Option<AuditEntry> {
    if sub.status != Active {
        return None;
    }
    let reason = if sub.is_past_end(now) {
        TransitionReason::PeriodEnded
    } else if sub.is_exhausted() {
        TransitionReason::QuotaExhausted
    } else {
        return None;
    };
    transition(sub, Expired, reason, Actor::System, now).ok()
}

/// Whether a suspended subscription's grace window has elapsed at `now`
pub fn grace_elapsed(sub: &Subscription, now: DateTime<Utc>, grace: Duration) -> bool {
    sub.status == Suspended && sub.suspended_at.is_some_and(|at| at + grace <= now)
}

/// Cancel a `Suspended` subscription whose grace window elapsed
pub fn evaluate_grace(
    sub: &mut Subscription,
    now: DateTime<Utc>,
    grace: Duration,
) -> Option<AuditEntry> {
    if !grace_elapsed(sub, now, grace) {
        return None;
    }
    transition(
        sub,
        Cancelled,
        TransitionReason::GraceWindowElapsed,
        Actor::System,
        now,
    )
    .ok()
}
