//! Common test utilities for salonpass-core integration tests

pub mod fakes;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use salonpass_core::{
    Actor, AuditEntry, AuditOutcome, Clock, CustomerId, LifecycleConfig, ManualClock, Package,
    PaymentAuth, RedemptionToken, SalonId, Subscription, SubscriptionId, SubscriptionOrchestrator,
    SubscriptionStatus, TransitionReason,
};
use salonpass_db::{
    CreateSubscription, MemoryStore, PaymentRepository, SubscriptionRepository, TokenRepository,
};
use salonpass_types::{Payment, PaymentId, PaymentKind, PaymentStatus};

#[allow(unused_imports)]
pub use fakes::{RecordingNotifier, ScriptedGateway};

/// Shared secret used to sign gateway callbacks in tests
pub const CALLBACK_SECRET: &str = "whsec_test_secret";

/// Fixed starting instant for every harness clock
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Engine wired to in-memory collaborators
pub struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: SubscriptionOrchestrator,
    pub salon_id: SalonId,
    pub customer_id: CustomerId,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_config(LifecycleConfig::default().with_callback_secret(CALLBACK_SECRET))
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(epoch()));
        let gateway = Arc::new(ScriptedGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let engine = SubscriptionOrchestrator::builder(store.stores(), gateway.clone())
            .config(config)
            .clock(clock.clone())
            .notifier(notifier.clone())
            .build();

        Self {
            store,
            clock,
            gateway,
            notifier,
            engine,
            salon_id: SalonId::new(),
            customer_id: CustomerId::new(),
        }
    }

    /// Package at the harness salon priced at 100.00
    pub async fn package(&self, visit_count: u32, validity_days: u32) -> Package {
        self.engine
            .create_package(self.salon_id, "Blowout bundle", visit_count, validity_days, 10_000)
            .await
            .unwrap()
    }

    /// Buy a fresh package for the harness customer
    pub async fn subscribe(&self, visit_count: u32, validity_days: u32) -> Subscription {
        let package = self.package(visit_count, validity_days).await;
        self.engine
            .purchase(self.customer_id, package.id, PaymentAuth::new("tok_visa"))
            .await
            .unwrap()
    }

    /// Insert an active subscription holding a caller-chosen token
    pub async fn seed_with_token(&self, token: &str, visit_count: u32) -> Subscription {
        let package = self.package(visit_count, 30).await;
        let id = SubscriptionId::new();
        let now = self.clock.now();
        let token = RedemptionToken::new(token);

        TokenRepository::reserve(&self.store, &token, id, now)
            .await
            .unwrap();

        let subscription = Subscription {
            id,
            customer_id: self.customer_id,
            package_id: package.id,
            salon_id: package.salon_id,
            visit_count,
            visits_used: 0,
            visits_remaining: visit_count,
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
        let payment = Payment {
            id: PaymentId::new(),
            subscription_id: id,
            kind: PaymentKind::Purchase,
            amount_cents: package.price_cents,
            currency: package.currency.clone(),
            status: PaymentStatus::Captured,
            gateway_reference: Some("ch_seed".to_string()),
            refund_amount_cents: None,
            refunded_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        let audit = AuditEntry {
            subscription_id: id,
            from: None,
            to: SubscriptionStatus::Active,
            reason: TransitionReason::Purchase,
            actor: Actor::Customer(self.customer_id),
            outcome: AuditOutcome::Applied,
            occurred_at: now,
        };

        SubscriptionRepository::create(
            &self.store,
            CreateSubscription {
                subscription,
                payment,
                audit,
                gateway_event: None,
            },
        )
        .await
        .unwrap()
    }

    /// The purchase payment of a subscription
    pub async fn purchase_payment(&self, subscription_id: SubscriptionId) -> Payment {
        PaymentRepository::find_by_subscription(&self.store, subscription_id)
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.kind == PaymentKind::Purchase)
            .unwrap()
    }

    /// Sign a callback body the way the gateway does
    pub fn sign(&self, payload: &[u8]) -> String {
        salonpass_core::CallbackVerifier::new(CALLBACK_SECRET)
            .sign(payload, self.clock.now().timestamp())
            .unwrap()
    }
}
