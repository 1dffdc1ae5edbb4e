//! End-to-end lifecycle tests against the in-memory store
//!
//! Covers purchase through exhaustion, renewal failure and recovery, grace
//! expiry, token issuance, cancellation and refunds.

mod common;

use chrono::Duration;
use common::Harness;
use salonpass_core::{
    Actor, AdminId, AuditOutcome, Clock, CustomerId, LifecycleError, Notification, PaymentAuth,
    PaymentStatus, SalonId, SubscriptionId, SubscriptionStatus, TransitionReason,
};

// ============================================================================
// Purchase and redemption
// ============================================================================

#[tokio::test]
async fn purchase_then_redeem_until_exhausted() {
    let h = Harness::new();
    let sub = h.subscribe(5, 30).await;

    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.visits_remaining, 5);
    assert_eq!(sub.end_date, sub.start_date + Duration::days(30));

    let token = sub.redemption_token.as_str().to_string();
    for _ in 0..5 {
        h.engine.redeem(&token, h.salon_id).await.unwrap();
    }

    let sub = h.engine.subscription(sub.id).await.unwrap();
    assert_eq!(sub.visits_remaining, 0);
    assert_eq!(sub.visits_used, 5);
    assert_eq!(sub.status, SubscriptionStatus::Expired);

    let err = h.engine.redeem(&token, h.salon_id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::QuotaExhausted));
    assert_eq!(h.engine.visits(sub.id).await.unwrap().len(), 5);

    let trail = h.engine.audit_trail(sub.id).await.unwrap();
    let [.., expired, refused] = trail.as_slice() else {
        panic!("expected expiry and refusal entries, got {trail:?}");
    };
    assert_eq!(expired.to, SubscriptionStatus::Expired);
    assert_eq!(expired.reason, TransitionReason::QuotaExhausted);
    assert_eq!(expired.actor, Actor::System);
    assert!(expired.outcome.is_applied());

    assert_eq!(refused.from, Some(SubscriptionStatus::Expired));
    assert!(matches!(refused.outcome, AuditOutcome::Rejected { ref code } if code == "QUOTA_EXHAUSTED"));
}

#[tokio::test]
async fn ledger_decrement_expires_on_last_visit() {
    let h = Harness::new();
    let sub = h.subscribe(2, 30).await;

    let first = h.engine.quota().decrement(sub.id).await.unwrap();
    assert_eq!(first.visits_used, 1);
    assert_eq!(first.visits_remaining, 1);

    let last = h.engine.quota().decrement(sub.id).await.unwrap();
    assert!(last.is_exhausted());
    assert_eq!(
        h.engine.subscription(sub.id).await.unwrap().status,
        SubscriptionStatus::Expired
    );

    let err = h.engine.quota().decrement(sub.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::QuotaExhausted));
}

#[tokio::test]
async fn purchase_records_captured_payment_and_audit() {
    let h = Harness::new();
    let sub = h.subscribe(3, 30).await;

    let payments = h.engine.payments(sub.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Captured);
    assert_eq!(payments[0].amount_cents, 10_000);

    let trail = h.engine.audit_trail(sub.id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].from, None);
    assert_eq!(trail[0].reason, TransitionReason::Purchase);
    assert_eq!(trail[0].actor, Actor::Customer(h.customer_id));
}

#[tokio::test]
async fn declined_purchase_creates_nothing() {
    let h = Harness::new();
    let package = h.package(5, 30).await;
    h.gateway.decline_next("card_declined");

    let err = h
        .engine
        .purchase(h.customer_id, package.id, PaymentAuth::new("tok_chargeDeclined"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::PaymentDeclined(ref r) if r == "card_declined"));

    let request = &h.gateway.requests()[0];
    let err = h.engine.subscription(request.subscription_id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::SubscriptionNotFound));
}

#[tokio::test]
async fn purchase_requires_payment_authorization() {
    let h = Harness::new();
    let package = h.package(5, 30).await;

    let err = h
        .engine
        .purchase(h.customer_id, package.id, PaymentAuth::new("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Validation(_)));
    assert!(h.gateway.requests().is_empty());
}

#[tokio::test]
async fn gateway_outage_is_fatal() {
    let h = Harness::new();
    let package = h.package(5, 30).await;
    h.gateway.fail_next("connection reset");

    let err = h
        .engine
        .purchase(h.customer_id, package.id, PaymentAuth::new("tok_visa"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Gateway(_)));
}

#[tokio::test]
async fn redeem_at_other_salon_is_rejected_without_consuming() {
    let h = Harness::new();
    let sub = h.subscribe(2, 30).await;

    let err = h
        .engine
        .redeem(sub.redemption_token.as_str(), SalonId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::SalonMismatch));

    let sub = h.engine.subscription(sub.id).await.unwrap();
    assert_eq!(sub.visits_remaining, 2);
    assert!(h.engine.visits(sub.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn redeem_after_period_end_expires_inline() {
    let h = Harness::new();
    let sub = h.subscribe(5, 30).await;
    h.clock.advance(Duration::days(31));

    let err = h
        .engine
        .redeem(sub.redemption_token.as_str(), h.salon_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::SubscriptionNotActive(SubscriptionStatus::Expired)
    ));

    let sub = h.engine.subscription(sub.id).await.unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Expired);
    assert_eq!(sub.visits_remaining, 5);

    let last = h.engine.audit_trail(sub.id).await.unwrap().pop().unwrap();
    assert_eq!(last.reason, TransitionReason::PeriodEnded);
}

#[tokio::test]
async fn redemption_at_the_end_instant_is_allowed() {
    let h = Harness::new();
    let sub = h.subscribe(5, 30).await;
    let token = sub.redemption_token.as_str().to_string();

    h.clock.advance(Duration::days(30));
    assert_eq!(h.clock.now(), sub.end_date);
    assert_eq!(h.engine.sweeper().run_once().await.unwrap().examined, 0);
    h.engine.redeem(&token, h.salon_id).await.unwrap();

    h.clock.advance(Duration::seconds(1));
    let err = h.engine.redeem(&token, h.salon_id).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::SubscriptionNotActive(SubscriptionStatus::Expired)
    ));
    assert_eq!(h.engine.visits(sub.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn low_quota_notification_on_last_visit_left() {
    let h = Harness::new();
    let sub = h.subscribe(3, 30).await;
    let token = sub.redemption_token.as_str().to_string();

    h.engine.redeem(&token, h.salon_id).await.unwrap();
    assert!(h.notifier.sent().is_empty());

    h.engine.redeem(&token, h.salon_id).await.unwrap();
    assert_eq!(
        h.notifier.sent(),
        vec![Notification::LowQuota {
            customer_id: h.customer_id,
            subscription_id: sub.id,
            remaining: 1,
        }]
    );

    h.engine.redeem(&token, h.salon_id).await.unwrap();
    assert_eq!(h.notifier.kinds(), vec!["low_quota", "expired"]);
}

// ============================================================================
// Renewal and grace window
// ============================================================================

#[tokio::test]
async fn failed_renewal_suspends_then_recovers_inside_grace() {
    let h = Harness::new();
    let sub = h.subscribe(5, 30).await;
    let token = sub.redemption_token.as_str().to_string();
    h.engine.redeem(&token, h.salon_id).await.unwrap();
    h.clock.advance(Duration::days(1));

    h.gateway.decline_next("insufficient_funds");
    let err = h
        .engine
        .renew(sub.id, PaymentAuth::new("tok_visa"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::PaymentDeclined(_)));

    let suspended = h.engine.subscription(sub.id).await.unwrap();
    assert_eq!(suspended.status, SubscriptionStatus::Suspended);
    assert_eq!(suspended.suspended_at, Some(h.clock.now()));

    let err = h.engine.redeem(&token, h.salon_id).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::SubscriptionNotActive(SubscriptionStatus::Suspended)
    ));

    h.clock.advance(Duration::days(3));
    let recovered = h
        .engine
        .renew(sub.id, PaymentAuth::new("tok_visa"))
        .await
        .unwrap();
    assert_eq!(recovered.status, SubscriptionStatus::Active);
    assert_eq!(recovered.suspended_at, None);
    assert_eq!(recovered.renewal_count, 1);
    assert_eq!(recovered.visits_remaining, 5);
    assert_eq!(recovered.visits_used, 0);
    assert_eq!(recovered.end_date, sub.end_date + Duration::days(30));

    let trail = h.engine.audit_trail(sub.id).await.unwrap();
    let applied: Vec<_> = trail
        .iter()
        .filter(|e| e.outcome.is_applied())
        .map(|e| e.reason)
        .collect();
    assert_eq!(
        applied,
        vec![
            TransitionReason::Purchase,
            TransitionReason::RenewalPaymentFailed,
            TransitionReason::PaymentRecovered,
        ]
    );
    let refused: Vec<_> = trail.iter().filter(|e| !e.outcome.is_applied()).collect();
    assert_eq!(refused.len(), 1);
    assert_eq!(refused[0].from, Some(SubscriptionStatus::Suspended));
    assert!(matches!(
        refused[0].outcome,
        AuditOutcome::Rejected { ref code } if code == "SUBSCRIPTION_NOT_ACTIVE"
    ));

    let statuses: Vec<_> = h
        .engine
        .payments(sub.id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            PaymentStatus::Captured,
            PaymentStatus::Failed,
            PaymentStatus::Captured
        ]
    );
}

#[tokio::test]
async fn suspended_past_grace_is_cancelled_by_sweep() {
    let h = Harness::new();
    let sub = h.subscribe(5, 30).await;

    h.gateway.decline_next("expired_card");
    h.engine
        .renew(sub.id, PaymentAuth::new("tok_visa"))
        .await
        .unwrap_err();

    let sweeper = h.engine.sweeper();
    h.clock.advance(Duration::days(6));
    assert_eq!(sweeper.run_once().await.unwrap().transitions(), 0);

    h.clock.advance(Duration::days(2));
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.cancelled, 1);

    let sub = h.engine.subscription(sub.id).await.unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Cancelled);

    let last = h.engine.audit_trail(sub.id).await.unwrap().pop().unwrap();
    assert_eq!(last.reason, TransitionReason::GraceWindowElapsed);
    assert_eq!(last.actor, Actor::System);
    assert_eq!(h.notifier.kinds(), vec!["suspended", "cancelled"]);
}

#[tokio::test]
async fn late_payment_after_grace_cancels() {
    let h = Harness::new();
    let sub = h.subscribe(5, 30).await;

    h.gateway.decline_next("expired_card");
    h.engine
        .renew(sub.id, PaymentAuth::new("tok_visa"))
        .await
        .unwrap_err();

    h.clock.advance(Duration::days(10));
    let sub = h
        .engine
        .renew(sub.id, PaymentAuth::new("tok_visa"))
        .await
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Cancelled);
}

#[tokio::test]
async fn renewal_of_terminal_subscription_is_refused() {
    let h = Harness::new();
    let sub = h.subscribe(1, 30).await;
    h.engine
        .redeem(sub.redemption_token.as_str(), h.salon_id)
        .await
        .unwrap();

    let err = h
        .engine
        .renew(sub.id, PaymentAuth::new("tok_visa"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::SubscriptionNotActive(SubscriptionStatus::Expired)
    ));
    assert_eq!(h.gateway.requests().len(), 1);

    let last = h.engine.audit_trail(sub.id).await.unwrap().pop().unwrap();
    assert_eq!(last.from, Some(SubscriptionStatus::Expired));
    assert_eq!(last.to, SubscriptionStatus::Active);
    assert_eq!(last.reason, TransitionReason::Renewal);
    assert_eq!(last.actor, Actor::Customer(h.customer_id));
    assert!(matches!(
        last.outcome,
        AuditOutcome::Rejected { ref code } if code == "SUBSCRIPTION_NOT_ACTIVE"
    ));
}

// ============================================================================
// Tokens
// ============================================================================

#[tokio::test]
async fn token_resolution_and_single_issue() {
    let h = Harness::new();
    let sub = h.seed_with_token("ABC123", 5).await;

    assert_eq!(h.engine.tokens().resolve("ABC123").await.unwrap(), sub.id);

    let err = h.engine.tokens().issue(sub.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyIssued));

    let err = h.engine.tokens().resolve("ZZZ").await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidToken));

    let err = h.engine.tokens().resolve("abc123").await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidToken));

    let found = h.engine.subscription_by_token("ABC123").await.unwrap();
    assert_eq!(found.id, sub.id);
}

#[tokio::test]
async fn purchases_get_distinct_tokens() {
    let h = Harness::new();
    let a = h.subscribe(5, 30).await;
    let b = h.subscribe(5, 30).await;

    assert_ne!(a.redemption_token, b.redemption_token);
    assert_eq!(a.redemption_token.as_str().len(), 12);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn customer_cancels_own_subscription() {
    let h = Harness::new();
    let sub = h.subscribe(5, 30).await;

    let cancelled = h
        .engine
        .cancel(sub.id, Actor::Customer(h.customer_id))
        .await
        .unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);

    let last = h.engine.audit_trail(sub.id).await.unwrap().pop().unwrap();
    assert_eq!(last.reason, TransitionReason::CustomerCancelled);
    assert!(last.outcome.is_applied());
    assert_eq!(h.notifier.kinds(), vec!["cancelled"]);

    let err = h
        .engine
        .redeem(sub.redemption_token.as_str(), h.salon_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::SubscriptionNotActive(SubscriptionStatus::Cancelled)
    ));

    let refused = h.engine.audit_trail(sub.id).await.unwrap().pop().unwrap();
    assert_eq!(refused.from, Some(SubscriptionStatus::Cancelled));
    assert!(matches!(
        refused.outcome,
        AuditOutcome::Rejected { ref code } if code == "SUBSCRIPTION_NOT_ACTIVE"
    ));
    assert_eq!(h.engine.visits(sub.id).await.unwrap().len(), 0);
}

#[tokio::test]
async fn other_customer_cannot_cancel() {
    let h = Harness::new();
    let sub = h.subscribe(5, 30).await;

    let err = h
        .engine
        .cancel(sub.id, Actor::Customer(CustomerId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotOwner));

    let sub = h.engine.subscription(sub.id).await.unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);

    let last = h.engine.audit_trail(sub.id).await.unwrap().pop().unwrap();
    assert!(matches!(last.outcome, AuditOutcome::Rejected { ref code } if code == "NOT_OWNER"));
}

#[tokio::test]
async fn cancelling_a_terminal_subscription_is_an_invalid_transition() {
    let h = Harness::new();
    let sub = h.subscribe(5, 30).await;
    let admin = Actor::Admin(AdminId::new());
    h.engine.cancel(sub.id, admin).await.unwrap();

    let err = h.engine.cancel(sub.id, admin).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::InvalidTransition {
            from: SubscriptionStatus::Cancelled,
            to: SubscriptionStatus::Cancelled,
        }
    ));

    let trail = h.engine.audit_trail(sub.id).await.unwrap();
    assert_eq!(trail.len(), 3);
    assert_eq!(trail[1].reason, TransitionReason::AdminCancelled);
    assert!(!trail[2].outcome.is_applied());
}

#[tokio::test]
async fn unknown_subscription_is_not_found() {
    let h = Harness::new();
    let err = h
        .engine
        .cancel(SubscriptionId::new(), Actor::System)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// ============================================================================
// Sweep
// ============================================================================

#[tokio::test]
async fn sweep_expires_ended_periods_once() {
    let h = Harness::new();
    let ended = h.subscribe(5, 30).await;
    h.clock.advance(Duration::days(20));
    let running = h.subscribe(5, 30).await;
    h.clock.advance(Duration::days(11));

    let sweeper = h.engine.sweeper();
    let first = sweeper.run_once().await.unwrap();
    assert_eq!(first.examined, 1);
    assert_eq!(first.expired, 1);

    let audit_len = h.engine.audit_trail(ended.id).await.unwrap().len();
    let second = sweeper.run_once().await.unwrap();
    assert_eq!(second.examined, 0);
    assert_eq!(second.transitions(), 0);
    assert_eq!(h.engine.audit_trail(ended.id).await.unwrap().len(), audit_len);

    assert_eq!(
        h.engine.subscription(ended.id).await.unwrap().status,
        SubscriptionStatus::Expired
    );
    assert_eq!(
        h.engine.subscription(running.id).await.unwrap().status,
        SubscriptionStatus::Active
    );
}
