//! SalonPass Core - Subscription lifecycle and redemption engine
//!
//! Sells prepaid salon packages and tracks each resulting subscription
//! through its lifecycle: purchase, visit redemption, renewal, suspension,
//! expiry and cancellation. All writes go through optimistic version checks
//! so concurrent redemptions can never overdraw a quota.
//!
//! # Example
//!
//! ```rust,ignore
//! use salonpass_core::{LifecycleConfig, PaymentAuth, SubscriptionOrchestrator};
//! use salonpass_db::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let engine = SubscriptionOrchestrator::builder(store.stores(), gateway)
//!     .config(LifecycleConfig::default().with_callback_secret("whsec_..."))
//!     .build();
//!
//! let package = engine.create_package(salon_id, "Ten blowouts", 10, 30, 25_000).await?;
//! let sub = engine.purchase(customer_id, package.id, PaymentAuth::new("tok_visa")).await?;
//!
//! // At the salon front desk
//! let visit = engine.redeem(sub.redemption_token.as_str(), salon_id).await?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod quota;
pub mod reconciler;
pub mod retry;
pub mod state_machine;
pub mod sweep;
pub mod token;
mod unit;
pub mod visit;
pub mod webhook;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LifecycleConfig;
pub use error::{ErrorKind, LifecycleError, Result};
pub use gateway::{ChargeRequest, GatewayError, GatewayResponse, PaymentAuth, PaymentGateway};
pub use notify::{LogNotifier, Notification, Notifier, NotifyError};
pub use orchestrator::{OrchestratorBuilder, SubscriptionOrchestrator};
pub use quota::{QuotaBalance, QuotaLedger};
pub use reconciler::{Charge, ChargePurpose, PaymentOutcome, PaymentReconciler, SubscriptionLocks};
pub use retry::RetryConfig;
pub use sweep::{ExpirySweeper, SweepReport};
pub use token::TokenManager;
pub use visit::{Redemption, VisitRecorder};
pub use webhook::{CallbackEventType, CallbackVerifier, GatewayCallback};

// Re-export domain types for convenience
pub use salonpass_types::{
    Actor, AdminId, AuditEntry, AuditOutcome, CustomerId, Package, PackageId, Payment, PaymentId,
    PaymentKind, PaymentStatus, RedemptionToken, SalonId, Subscription, SubscriptionId,
    SubscriptionStatus, TransitionReason, Visit, VisitId,
};
