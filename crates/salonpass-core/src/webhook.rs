//! Signed gateway callback handling
//!
//! Asynchronous payment outcomes arrive as JSON bodies signed with
//! HMAC-SHA256. The signature header has the form `t=<unix>,v1=<hex>`
//! computed over `"{t}.{body}"`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use salonpass_types::{CustomerId, PackageId, PaymentId, SubscriptionId};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, error, instrument, warn};

use crate::error::{LifecycleError, Result};
use crate::reconciler::{Charge, ChargePurpose, PaymentOutcome};

/// Maximum accepted clock skew between signer and receiver, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

/// Callback event types we handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackEventType {
    /// Funds reserved
    PaymentAuthorized,
    /// Funds taken
    PaymentCaptured,
    /// Charge declined
    PaymentFailed,
    /// Funds returned
    PaymentRefunded,
}

impl std::str::FromStr for CallbackEventType {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "payment.authorized" => Ok(Self::PaymentAuthorized),
            "payment.captured" => Ok(Self::PaymentCaptured),
            "payment.failed" => Ok(Self::PaymentFailed),
            "payment.refunded" => Ok(Self::PaymentRefunded),
            other => Err(LifecycleError::Webhook(format!(
                "unsupported event type: {other}"
            ))),
        }
    }
}

/// Verified and parsed callback
#[derive(Debug, Clone)]
pub struct GatewayCallback {
    /// Event ID
    pub id: String,
    /// Event type
    pub event_type: CallbackEventType,
    /// Subscription the outcome applies to
    pub subscription_id: SubscriptionId,
    /// Outcome to reconcile
    pub outcome: PaymentOutcome,
    /// When the event was created (Unix timestamp)
    pub created: i64,
}

/// Verifies and parses gateway callbacks
#[derive(Clone)]
pub struct CallbackVerifier {
    secret: String,
}

impl CallbackVerifier {
    /// Create a verifier for a shared secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Compute the signature header for a payload
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let mac = self.mac(timestamp, payload)?;
        Ok(format!(
            "t={timestamp},v1={}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Verify a signature and parse the payload
    #[instrument(skip(self, payload, signature))]
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<GatewayCallback> {
        self.verify_signature(payload, signature, now)?;

        let raw: RawCallback = serde_json::from_slice(payload)
            .map_err(|e| LifecycleError::Webhook(e.to_string()))?;

        debug!(event_id = %raw.id, event_type = %raw.event_type, "Parsed gateway callback");

        let event_type: CallbackEventType = raw.event_type.parse()?;
        let subscription_id = raw.data.subscription_id;
        let outcome = raw.data.into_outcome(event_type)?;

        Ok(GatewayCallback {
            id: raw.id,
            event_type,
            subscription_id,
            outcome,
            created: raw.created,
        })
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| LifecycleError::Internal("HMAC error".to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    fn verify_signature(&self, payload: &[u8], signature: &str, now: DateTime<Utc>) -> Result<()> {
        let mut timestamp: Option<&str> = None;
        let mut sig_v1: Option<&str> = None;

        for part in signature.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                match key {
                    "t" => timestamp = Some(value),
                    "v1" => sig_v1 = Some(value),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            warn!("Missing timestamp in callback signature");
            LifecycleError::Webhook("Missing timestamp".to_string())
        })?;
        let sig_v1 = sig_v1.ok_or_else(|| {
            warn!("Missing v1 signature in callback signature");
            LifecycleError::Webhook("Missing signature".to_string())
        })?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| LifecycleError::Webhook("Invalid timestamp format".to_string()))?;
        let provided = hex::decode(sig_v1)
            .map_err(|_| LifecycleError::Webhook("Invalid signature encoding".to_string()))?;

        // verify_slice compares in constant time
        if self.mac(ts, payload)?.verify_slice(&provided).is_err() {
            error!("Callback signature verification failed");
            return Err(LifecycleError::Webhook(
                "Signature verification failed".to_string(),
            ));
        }

        let now = now.timestamp();
        if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
            warn!(timestamp = ts, now, "Callback timestamp outside tolerance");
            return Err(LifecycleError::Webhook("Timestamp too old".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawCallback {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: RawPayment,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawPurpose {
    Purchase,
    Renewal,
}

#[derive(Debug, Deserialize)]
struct RawPayment {
    subscription_id: SubscriptionId,
    payment_id: PaymentId,
    purpose: Option<RawPurpose>,
    customer_id: Option<CustomerId>,
    package_id: Option<PackageId>,
    amount_cents: Option<i64>,
    currency: Option<String>,
    refund_amount_cents: Option<i64>,
    gateway_reference: Option<String>,
    failure_reason: Option<String>,
}

fn missing(field: &str) -> LifecycleError {
    LifecycleError::Webhook(format!("missing field: {field}"))
}

impl RawPayment {
    fn into_outcome(self, event_type: CallbackEventType) -> Result<PaymentOutcome> {
        if event_type == CallbackEventType::PaymentRefunded {
            return Ok(PaymentOutcome::Refunded {
                payment_id: self.payment_id,
                amount_cents: self
                    .refund_amount_cents
                    .ok_or_else(|| missing("refund_amount_cents"))?,
            });
        }

        let purpose = match self.purpose.ok_or_else(|| missing("purpose"))? {
            RawPurpose::Purchase => ChargePurpose::Purchase {
                customer_id: self.customer_id.ok_or_else(|| missing("customer_id"))?,
                package_id: self.package_id.ok_or_else(|| missing("package_id"))?,
            },
            RawPurpose::Renewal => ChargePurpose::Renewal,
        };
        let charge = Charge {
            payment_id: self.payment_id,
            purpose,
            amount_cents: self.amount_cents.ok_or_else(|| missing("amount_cents"))?,
            currency: self.currency.ok_or_else(|| missing("currency"))?,
            gateway_reference: self.gateway_reference,
        };

        Ok(match event_type {
            CallbackEventType::PaymentAuthorized => PaymentOutcome::Authorized(charge),
            CallbackEventType::PaymentCaptured => PaymentOutcome::Captured(charge),
            _ => PaymentOutcome::Failed {
                charge,
                reason: self
                    .failure_reason
                    .unwrap_or_else(|| "declined".to_string()),
            },
        })
    }
}
