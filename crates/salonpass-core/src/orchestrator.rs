//! Subscription orchestrator
//!
//! Public facade over the lifecycle engine. Each call is one external
//! transactional boundary composed from the ledger, token manager, state
//! machine, visit recorder and payment reconciler.

use std::sync::Arc;

use salonpass_db::{CreatePackage, Stores, SubscriptionCommit};
use salonpass_types::{
    Actor, AuditEntry, CustomerId, Package, PackageId, Payment, PaymentId, RedemptionToken,
    SalonId, Subscription, SubscriptionId, SubscriptionStatus, TransitionReason, Visit,
};
use tracing::{info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result};
use crate::gateway::{charge_with_timeout, ChargeRequest, GatewayResponse, PaymentAuth, PaymentGateway};
use crate::metrics::{self, Operation, OperationTimer};
use crate::notify::{self, LogNotifier, Notification, Notifier};
use crate::quota::QuotaLedger;
use crate::reconciler::{ChargePurpose, PaymentReconciler};
use crate::retry::with_retry;
use crate::state_machine;
use crate::sweep::ExpirySweeper;
use crate::token::TokenManager;
use crate::unit::{self, Committed};
use crate::visit::VisitRecorder;
use crate::webhook::CallbackVerifier;

/// Builder for [`SubscriptionOrchestrator`]
pub struct OrchestratorBuilder {
    stores: Stores,
    gateway: Arc<dyn PaymentGateway>,
    config: LifecycleConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl OrchestratorBuilder {
    /// Set the engine configuration
    #[must_use]
    pub fn config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the time source
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the notification collaborator
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Wire the engine components together
    pub fn build(self) -> SubscriptionOrchestrator {
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&self.stores.tokens),
            Arc::clone(&self.stores.subscriptions),
            Arc::clone(&self.clock),
            self.config.token_length,
        ));
        let quota = QuotaLedger::new(
            Arc::clone(&self.stores.subscriptions),
            Arc::clone(&self.clock),
            self.config.conflict_retry.clone(),
        );
        let recorder = VisitRecorder::new(
            Arc::clone(&self.stores.subscriptions),
            Arc::clone(&self.stores.audit),
            Arc::clone(&tokens),
            self.config.conflict_retry.clone(),
        );
        let reconciler = PaymentReconciler::new(
            self.stores.clone(),
            Arc::clone(&tokens),
            Arc::clone(&self.notifier),
            Arc::clone(&self.clock),
            self.config.clone(),
        );
        let callbacks = self.config.callback_secret.as_deref().map(CallbackVerifier::new);

        SubscriptionOrchestrator {
            stores: self.stores,
            gateway: self.gateway,
            config: self.config,
            clock: self.clock,
            notifier: self.notifier,
            tokens,
            quota,
            recorder,
            reconciler,
            callbacks,
        }
    }
}

/// Subscription lifecycle facade
pub struct SubscriptionOrchestrator {
    stores: Stores,
    gateway: Arc<dyn PaymentGateway>,
    config: LifecycleConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    tokens: Arc<TokenManager>,
    quota: QuotaLedger,
    recorder: VisitRecorder,
    reconciler: PaymentReconciler,
    callbacks: Option<CallbackVerifier>,
}

impl SubscriptionOrchestrator {
    /// Start building an orchestrator with default config, system clock and log notifier
    pub fn builder(stores: Stores, gateway: Arc<dyn PaymentGateway>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            stores,
            gateway,
            config: LifecycleConfig::default(),
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Token manager
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Quota ledger
    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    /// Payment reconciler
    pub fn reconciler(&self) -> &PaymentReconciler {
        &self.reconciler
    }

    /// Expiry sweeper sharing this engine's store, clock and notifier
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.stores.clone(),
            Arc::clone(&self.notifier),
            Arc::clone(&self.clock),
            self.config.clone(),
        )
    }

    /// Register a package a salon sells
    pub async fn create_package(
        &self,
        salon_id: SalonId,
        name: &str,
        visit_count: u32,
        validity_days: u32,
        price_cents: i64,
    ) -> Result<Package> {
        if name.trim().is_empty() {
            return Err(LifecycleError::Validation("package name is required".to_string()));
        }
        if visit_count == 0 || validity_days == 0 {
            return Err(LifecycleError::Validation(
                "visit count and validity must be positive".to_string(),
            ));
        }
        if price_cents < 0 {
            return Err(LifecycleError::Validation(
                "price must not be negative".to_string(),
            ));
        }

        let package = self
            .stores
            .packages
            .create(CreatePackage {
                id: PackageId::new(),
                salon_id,
                name: name.trim().to_string(),
                visit_count,
                validity_days,
                price_cents,
                currency: self.config.currency.clone(),
            })
            .await?;
        info!(package_id = %package.id, salon_id = %salon_id, "Package created");
        Ok(package)
    }

    /// Buy a package; the subscription exists once the payment succeeds
    #[instrument(skip_all, fields(customer_id = %customer_id, package_id = %package_id))]
    pub async fn purchase(
        &self,
        customer_id: CustomerId,
        package_id: PackageId,
        auth: PaymentAuth,
    ) -> Result<Subscription> {
        let _timer = OperationTimer::start(Operation::Purchase);
        require_auth(&auth)?;

        let package = self
            .stores
            .packages
            .find_by_id(package_id)
            .await?
            .ok_or(LifecycleError::PackageNotFound)?;
        if !package.active {
            return Err(LifecycleError::Validation(
                "package is not available for purchase".to_string(),
            ));
        }

        let request = ChargeRequest {
            payment_id: PaymentId::new(),
            subscription_id: SubscriptionId::new(),
            customer_id,
            purpose: ChargePurpose::Purchase {
                customer_id,
                package_id,
            },
            amount_cents: package.price_cents,
            currency: package.currency.clone(),
            auth,
        };
        let response =
            charge_with_timeout(self.gateway.as_ref(), request.clone(), self.config.gateway_timeout)
                .await?;

        self.reconciler
            .apply_outcome(request.subscription_id, response.into_outcome(&request))
            .await
    }

    /// Redeem one visit with a token at a salon
    #[instrument(skip_all, fields(salon_id = %salon_id))]
    pub async fn redeem(&self, token: &str, salon_id: SalonId) -> Result<Visit> {
        let _timer = OperationTimer::start(Operation::Redeem);
        let at = self.clock.now();

        let redemption = match self.recorder.redeem(token, salon_id, at).await {
            Ok(r) => r,
            Err(e) => {
                metrics::record_redemption(e.error_code());
                return Err(e);
            }
        };
        metrics::record_redemption("ok");

        let sub = &redemption.subscription;
        let mut notifications = notify::for_entries(sub.customer_id, &redemption.applied);
        if sub.visits_remaining > 0 && sub.visits_remaining <= self.config.low_quota_threshold {
            notifications.push(Notification::LowQuota {
                customer_id: sub.customer_id,
                subscription_id: sub.id,
                remaining: sub.visits_remaining,
            });
        }
        notify::dispatch(self.notifier.as_ref(), notifications).await;

        Ok(redemption.visit)
    }

    /// Cancel a subscription on behalf of its customer or an administrator
    #[instrument(skip_all, fields(subscription_id = %subscription_id, actor = %actor))]
    pub async fn cancel(&self, subscription_id: SubscriptionId, actor: Actor) -> Result<Subscription> {
        let _timer = OperationTimer::start(Operation::Cancel);
        let _guard = self.reconciler.locks().lock(subscription_id).await;

        let committed = with_retry(&self.config.conflict_retry, move || {
            self.cancel_once(subscription_id, actor)
        })
        .await?;

        info!(subscription_id = %subscription_id, "Subscription cancelled");
        notify::dispatch(self.notifier.as_ref(), committed.notifications()).await;
        Ok(committed.subscription)
    }

    async fn cancel_once(&self, subscription_id: SubscriptionId, actor: Actor) -> Result<Committed> {
        let sub = self.subscription(subscription_id).await?;
        let now = self.clock.now();
        let reason = match actor {
            Actor::Customer(_) => TransitionReason::CustomerCancelled,
            Actor::Admin(_) | Actor::System => TransitionReason::AdminCancelled,
        };

        if let Actor::Customer(customer_id) = actor {
            if customer_id != sub.customer_id {
                let err = LifecycleError::NotOwner;
                self.reject(&sub, SubscriptionStatus::Cancelled, reason, actor, &err)
                    .await;
                return Err(err);
            }
        }

        let mut next = sub.clone();
        match state_machine::transition(&mut next, SubscriptionStatus::Cancelled, reason, actor, now) {
            Ok(entry) => {
                unit::commit(
                    self.stores.subscriptions.as_ref(),
                    SubscriptionCommit::new(next).with_audit(entry),
                )
                .await
            }
            Err(err) => {
                self.reject(&sub, SubscriptionStatus::Cancelled, reason, actor, &err)
                    .await;
                Err(err)
            }
        }
    }

    /// Charge for a further period
    ///
    /// A declined charge suspends an `Active` subscription and then fails with
    /// `PaymentDeclined`.
    #[instrument(skip_all, fields(subscription_id = %subscription_id))]
    pub async fn renew(&self, subscription_id: SubscriptionId, auth: PaymentAuth) -> Result<Subscription> {
        let _timer = OperationTimer::start(Operation::Renew);
        require_auth(&auth)?;

        let sub = self.subscription(subscription_id).await?;
        if !matches!(sub.status, SubscriptionStatus::Active | SubscriptionStatus::Suspended) {
            let err = LifecycleError::SubscriptionNotActive(sub.status);
            let actor = Actor::Customer(sub.customer_id);
            self.reject(&sub, SubscriptionStatus::Active, TransitionReason::Renewal, actor, &err)
                .await;
            return Err(err);
        }
        let package = self
            .stores
            .packages
            .find_by_id(sub.package_id)
            .await?
            .ok_or(LifecycleError::PackageNotFound)?;

        let request = ChargeRequest {
            payment_id: PaymentId::new(),
            subscription_id,
            customer_id: sub.customer_id,
            purpose: ChargePurpose::Renewal,
            amount_cents: package.price_cents,
            currency: package.currency.clone(),
            auth,
        };
        let response =
            charge_with_timeout(self.gateway.as_ref(), request.clone(), self.config.gateway_timeout)
                .await?;
        let declined = match &response {
            GatewayResponse::Failed { reason, .. } => Some(reason.clone()),
            GatewayResponse::Authorized { .. } | GatewayResponse::Captured { .. } => None,
        };

        let updated = self
            .reconciler
            .apply_outcome(subscription_id, response.into_outcome(&request))
            .await?;

        match declined {
            Some(reason) => Err(LifecycleError::PaymentDeclined(reason)),
            None => Ok(updated),
        }
    }

    /// Verify and apply an asynchronous gateway callback
    #[instrument(skip_all)]
    pub async fn handle_gateway_callback(&self, payload: &[u8], signature: &str) -> Result<Subscription> {
        let _timer = OperationTimer::start(Operation::Callback);
        let verifier = self.callbacks.as_ref().ok_or_else(|| {
            LifecycleError::Webhook("callback verification is not configured".to_string())
        })?;

        let callback = verifier.verify_and_parse(payload, signature, self.clock.now())?;
        info!(
            event_id = %callback.id,
            subscription_id = %callback.subscription_id,
            outcome = callback.outcome.kind(),
            "Applying gateway callback"
        );

        self.reconciler
            .apply_event(callback.subscription_id, &callback.id, callback.outcome)
            .await
    }

    /// Subscription by ID
    pub async fn subscription(&self, id: SubscriptionId) -> Result<Subscription> {
        self.stores
            .subscriptions
            .find_by_id(id)
            .await?
            .ok_or(LifecycleError::SubscriptionNotFound)
    }

    /// Subscription holding a redemption token
    pub async fn subscription_by_token(&self, token: &str) -> Result<Subscription> {
        if !TokenManager::is_well_formed(token) {
            return Err(LifecycleError::InvalidToken);
        }
        self.stores
            .subscriptions
            .find_by_token(&RedemptionToken::new(token))
            .await?
            .ok_or(LifecycleError::InvalidToken)
    }

    /// Visits redeemed against a subscription
    pub async fn visits(&self, subscription_id: SubscriptionId) -> Result<Vec<Visit>> {
        Ok(self.stores.visits.find_by_subscription(subscription_id).await?)
    }

    /// Payments recorded for a subscription
    pub async fn payments(&self, subscription_id: SubscriptionId) -> Result<Vec<Payment>> {
        Ok(self.stores.payments.find_by_subscription(subscription_id).await?)
    }

    /// Transition history for a subscription
    pub async fn audit_trail(&self, subscription_id: SubscriptionId) -> Result<Vec<AuditEntry>> {
        Ok(self.stores.audit.find_by_subscription(subscription_id).await?)
    }

    /// Append a rejected attempt; failures are logged only
    async fn reject(
        &self,
        sub: &Subscription,
        to: SubscriptionStatus,
        reason: TransitionReason,
        actor: Actor,
        err: &LifecycleError,
    ) {
        let entry = state_machine::rejected(sub, to, reason, actor, self.clock.now(), err);
        if let Err(e) = self.stores.audit.append(entry).await {
            warn!(subscription_id = %sub.id, error = %e, "Failed to audit rejected transition");
        }
    }
}

fn require_auth(auth: &PaymentAuth) -> Result<()> {
    if auth.is_blank() {
        return Err(LifecycleError::Validation(
            "payment authorization is required".to_string(),
        ));
    }
    Ok(())
}
