//! Payment gateway seam

use std::time::Duration;

use async_trait::async_trait;
use salonpass_types::{CustomerId, PaymentId, SubscriptionId};
use thiserror::Error;
use tracing::{error, instrument};

use crate::error::{LifecycleError, Result};
use crate::reconciler::{Charge, ChargePurpose, PaymentOutcome};

/// Opaque payment authorization supplied by the caller (card token, mandate id)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAuth(String);

impl PaymentAuth {
    /// Wrap an authorization
    pub fn new(auth: impl Into<String>) -> Self {
        Self(auth.into())
    }

    /// Raw authorization
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the authorization carries anything
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Charge sent to the gateway
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_id: PaymentId,
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub purpose: ChargePurpose,
    pub amount_cents: i64,
    pub currency: String,
    pub auth: PaymentAuth,
}

/// Synchronous gateway answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResponse {
    /// Funds reserved
    Authorized { reference: String },
    /// Funds taken
    Captured { reference: String },
    /// Charge declined
    Failed {
        reason: String,
        reference: Option<String>,
    },
}

impl GatewayResponse {
    /// Outcome to hand to the reconciler
    pub fn into_outcome(self, request: &ChargeRequest) -> PaymentOutcome {
        let charge = |reference: Option<String>| Charge {
            payment_id: request.payment_id,
            purpose: request.purpose,
            amount_cents: request.amount_cents,
            currency: request.currency.clone(),
            gateway_reference: reference,
        };
        match self {
            Self::Authorized { reference } => PaymentOutcome::Authorized(charge(Some(reference))),
            Self::Captured { reference } => PaymentOutcome::Captured(charge(Some(reference))),
            Self::Failed { reason, reference } => PaymentOutcome::Failed {
                charge: charge(reference),
                reason,
            },
        }
    }
}

/// Gateway transport errors
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Gateway could not be reached
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// Gateway returned something unusable
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

/// Payment gateway collaborator
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Attempt a charge
    async fn charge(&self, request: ChargeRequest) -> std::result::Result<GatewayResponse, GatewayError>;
}

/// Charge with an upper bound on the call duration
///
/// Transport failures and timeouts are fatal and not retried here.
#[instrument(skip(gateway, request), fields(payment_id = %request.payment_id))]
pub(crate) async fn charge_with_timeout(
    gateway: &dyn PaymentGateway,
    request: ChargeRequest,
    timeout: Duration,
) -> Result<GatewayResponse> {
    match tokio::time::timeout(timeout, gateway.charge(request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            error!(error = %e, "Payment gateway call failed");
            Err(LifecycleError::Gateway(e.to_string()))
        }
        Err(_) => {
            error!(timeout_ms = timeout.as_millis() as u64, "Payment gateway call timed out");
            Err(LifecycleError::Gateway(format!(
                "no response within {}ms",
                timeout.as_millis()
            )))
        }
    }
}
