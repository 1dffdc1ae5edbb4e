//! Lifecycle engine configuration

use std::time::Duration;

use crate::retry::RetryConfig;

/// Default length of generated redemption tokens
pub const DEFAULT_TOKEN_LENGTH: usize = 12;

/// Lifecycle engine configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a suspended subscription may wait for a late payment
    pub grace_period: chrono::Duration,
    /// Remaining-visit count at or below which a low-quota warning is sent
    pub low_quota_threshold: u32,
    /// Length of generated redemption tokens
    pub token_length: usize,
    /// Upper bound on a single payment gateway call
    pub gateway_timeout: Duration,
    /// Maximum subscriptions examined per sweep pass
    pub sweep_batch_size: u32,
    /// Delay between sweep passes
    pub sweep_interval: Duration,
    /// Retry policy for optimistic concurrency conflicts
    pub conflict_retry: RetryConfig,
    /// Currency charged for purchases and renewals
    pub currency: String,
    /// Shared secret for signed gateway callbacks
    pub callback_secret: Option<String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period: chrono::Duration::days(7),
            low_quota_threshold: 1,
            token_length: DEFAULT_TOKEN_LENGTH,
            gateway_timeout: Duration::from_secs(15),
            sweep_batch_size: 500,
            sweep_interval: Duration::from_secs(60),
            conflict_retry: RetryConfig::default(),
            currency: "usd".to_string(),
            callback_secret: None,
        }
    }
}

impl LifecycleConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the grace window for suspended subscriptions
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: chrono::Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set the low-quota warning threshold
    #[must_use]
    pub fn with_low_quota_threshold(mut self, threshold: u32) -> Self {
        self.low_quota_threshold = threshold;
        self
    }

    /// Set the redemption token length
    #[must_use]
    pub fn with_token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    /// Set the gateway call timeout
    #[must_use]
    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Set sweep batch size and interval
    #[must_use]
    pub fn with_sweep(mut self, batch_size: u32, interval: Duration) -> Self {
        self.sweep_batch_size = batch_size;
        self.sweep_interval = interval;
        self
    }

    /// Set the conflict retry policy
    #[must_use]
    pub fn with_conflict_retry(mut self, retry: RetryConfig) -> Self {
        self.conflict_retry = retry;
        self
    }

    /// Set the charge currency
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Enable signed gateway callbacks
    #[must_use]
    pub fn with_callback_secret(mut self, secret: impl Into<String>) -> Self {
        self.callback_secret = Some(secret.into());
        self
    }
}
