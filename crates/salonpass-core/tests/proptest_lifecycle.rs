//! Property-based tests for the state machine and the quota ledger
//!
//! These tests verify:
//! - Transitions succeed exactly when the reason permits the edge
//! - Terminal statuses accept nothing but a full refund of an expired subscription
//! - Any sequence of redemptions and clock moves keeps the quota balanced

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::Harness;
use proptest::prelude::*;
use salonpass_core::state_machine;
use salonpass_core::{
    Actor, CustomerId, LifecycleError, PackageId, RedemptionToken, SalonId, Subscription,
    SubscriptionId, SubscriptionStatus, TransitionReason,
};

// ============================================================================
// Strategies
// ============================================================================

fn arb_status() -> impl Strategy<Value = SubscriptionStatus> {
    prop_oneof![
        Just(SubscriptionStatus::Active),
        Just(SubscriptionStatus::Suspended),
        Just(SubscriptionStatus::Expired),
        Just(SubscriptionStatus::Cancelled),
    ]
}

fn arb_reason() -> impl Strategy<Value = TransitionReason> {
    prop_oneof![
        Just(TransitionReason::Purchase),
        Just(TransitionReason::QuotaExhausted),
        Just(TransitionReason::PeriodEnded),
        Just(TransitionReason::RenewalPaymentFailed),
        Just(TransitionReason::PaymentRecovered),
        Just(TransitionReason::GraceWindowElapsed),
        Just(TransitionReason::CustomerCancelled),
        Just(TransitionReason::AdminCancelled),
        Just(TransitionReason::FullRefund),
        Just(TransitionReason::Renewal),
    ]
}

#[derive(Debug, Clone)]
enum Step {
    Redeem,
    RedeemElsewhere,
    Advance(i64),
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        6 => Just(Step::Redeem),
        1 => Just(Step::RedeemElsewhere),
        1 => (1i64..20).prop_map(Step::Advance),
    ]
}

fn subscription(status: SubscriptionStatus) -> Subscription {
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    Subscription {
        id: SubscriptionId::new(),
        customer_id: CustomerId::new(),
        package_id: PackageId::new(),
        salon_id: SalonId::new(),
        visit_count: 3,
        visits_used: 1,
        visits_remaining: 2,
        status,
        start_date: now,
        end_date: now + Duration::days(30),
        redemption_token: RedemptionToken::new("PROPTEST"),
        suspended_at: None,
        renewal_count: 0,
        version: 1,
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// State machine properties
// ============================================================================

proptest! {
    /// Property: a transition is applied iff the reason permits the edge
    #[test]
    fn prop_transition_matches_permits(
        from in arb_status(),
        to in arb_status(),
        reason in arb_reason(),
    ) {
        let mut sub = subscription(from);
        let at = sub.start_date + Duration::hours(1);
        let result = state_machine::transition(&mut sub, to, reason, Actor::System, at);

        if state_machine::permits(reason, from, to) {
            let entry = result.unwrap();
            prop_assert_eq!(sub.status, to);
            prop_assert_eq!(entry.from, Some(from));
            prop_assert!(entry.outcome.is_applied());
        } else {
            let is_invalid = matches!(
                result,
                Err(LifecycleError::InvalidTransition { .. })
            );
            prop_assert!(is_invalid);
            prop_assert_eq!(sub.status, from);
        }
    }

    /// Property: permitted transitions stay on the table, apart from refund cancellation
    #[test]
    fn prop_permitted_edges_are_on_the_table(
        from in arb_status(),
        to in arb_status(),
        reason in arb_reason(),
    ) {
        if state_machine::permits(reason, from, to) {
            let refund_of_expired = reason == TransitionReason::FullRefund
                && from == SubscriptionStatus::Expired;
            prop_assert!(state_machine::is_edge(from, to) || refund_of_expired);
        }
    }

    /// Property: nothing leaves Cancelled
    #[test]
    fn prop_cancelled_is_terminal(to in arb_status(), reason in arb_reason()) {
        prop_assert!(!state_machine::permits(reason, SubscriptionStatus::Cancelled, to));
    }

    /// Property: suspension timestamps follow the status
    #[test]
    fn prop_suspended_at_tracks_status(reason in arb_reason(), to in arb_status()) {
        let mut sub = subscription(SubscriptionStatus::Active);
        let at = sub.start_date + Duration::days(2);
        if state_machine::transition(&mut sub, to, reason, Actor::System, at).is_ok() {
            prop_assert_eq!(sub.suspended_at.is_some(), sub.status == SubscriptionStatus::Suspended);
        }
    }
}

// ============================================================================
// Quota properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: used + remaining == count after any sequence, and visits match usage
    #[test]
    fn prop_quota_stays_balanced(
        visit_count in 1u32..8,
        steps in prop::collection::vec(arb_step(), 1..24),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let h = Harness::new();
            let sub = h.subscribe(visit_count, 30).await;
            let token = sub.redemption_token.as_str().to_string();
            let mut redeemed = 0u32;

            for step in steps {
                match step {
                    Step::Redeem => {
                        if h.engine.redeem(&token, h.salon_id).await.is_ok() {
                            redeemed += 1;
                        }
                    }
                    Step::RedeemElsewhere => {
                        let result = h.engine.redeem(&token, SalonId::new()).await;
                        prop_assert!(result.is_err());
                    }
                    Step::Advance(days) => h.clock.advance(Duration::days(days)),
                }

                let current = h.engine.subscription(sub.id).await.unwrap();
                prop_assert!(current.quota_is_consistent());
                prop_assert_eq!(current.visits_used, redeemed);
                if current.visits_remaining == 0 {
                    prop_assert_eq!(current.status, SubscriptionStatus::Expired);
                }
            }

            let visits = h.engine.visits(sub.id).await.unwrap();
            prop_assert_eq!(visits.len() as u32, redeemed);
            prop_assert!(redeemed <= visit_count);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
