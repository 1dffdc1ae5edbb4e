//! Redemption token issuance and resolution

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::Rng;
use salonpass_db::{DbError, SubscriptionRepository, TokenRepository};
use salonpass_types::{RedemptionToken, SubscriptionId};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{LifecycleError, Result};

/// Characters used in generated tokens (no 0/O/1/I)
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Longest token accepted for lookup
pub const MAX_TOKEN_LENGTH: usize = 64;

/// Fresh tokens tried before giving up on collisions
const ISSUE_ATTEMPTS: u32 = 5;

/// Issues and resolves redemption tokens
pub struct TokenManager {
    tokens: Arc<dyn TokenRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    clock: Arc<dyn Clock>,
    length: usize,
}

impl TokenManager {
    /// Create a token manager
    pub fn new(
        tokens: Arc<dyn TokenRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        clock: Arc<dyn Clock>,
        length: usize,
    ) -> Self {
        Self {
            tokens,
            subscriptions,
            clock,
            length: length.clamp(1, MAX_TOKEN_LENGTH),
        }
    }

    /// Draw a random token from the OS CSPRNG
    pub fn generate(&self) -> RedemptionToken {
        let mut rng = OsRng;
        let token: String = (0..self.length)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect();
        RedemptionToken::new(token)
    }

    /// Whether a presented token is worth looking up
    pub fn is_well_formed(token: &str) -> bool {
        !token.is_empty()
            && token.len() <= MAX_TOKEN_LENGTH
            && token
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    }

    /// Issue the one token a subscription will ever have
    pub async fn issue(&self, subscription_id: SubscriptionId) -> Result<RedemptionToken> {
        let issued_at = self.clock.now();

        for attempt in 1..=ISSUE_ATTEMPTS {
            let token = self.generate();
            match self.tokens.reserve(&token, subscription_id, issued_at).await {
                Ok(()) => {
                    debug!(subscription_id = %subscription_id, "Issued redemption token");
                    return Ok(token);
                }
                Err(DbError::Duplicate(what)) if what == "subscription" => {
                    return Err(LifecycleError::AlreadyIssued);
                }
                Err(DbError::Duplicate(_)) => {
                    warn!(attempt, "Redemption token collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LifecycleError::Internal(
            "could not generate a unique redemption token".to_string(),
        ))
    }

    /// Resolve a presented token to its subscription
    pub async fn resolve(&self, token: &str) -> Result<SubscriptionId> {
        if !Self::is_well_formed(token) {
            return Err(LifecycleError::InvalidToken);
        }

        let subscription_id = self
            .tokens
            .find_subscription_id(&RedemptionToken::new(token))
            .await?
            .ok_or(LifecycleError::InvalidToken)?;

        // Reservations whose subscription was never created do not resolve.
        if self.subscriptions.find_by_id(subscription_id).await?.is_none() {
            return Err(LifecycleError::InvalidToken);
        }

        Ok(subscription_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use salonpass_db::MemoryStore;

    fn manager(store: &MemoryStore) -> TokenManager {
        let stores = store.stores();
        TokenManager::new(stores.tokens, stores.subscriptions, Arc::new(SystemClock), 12)
    }

    #[test]
    fn generated_tokens_use_the_alphabet() {
        let store = MemoryStore::new();
        let token = manager(&store).generate();

        assert_eq!(token.as_str().len(), 12);
        assert!(token.as_str().bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(TokenManager::is_well_formed("ABC123"));
        assert!(!TokenManager::is_well_formed(""));
        assert!(!TokenManager::is_well_formed("abc123"));
        assert!(!TokenManager::is_well_formed("ABC-123"));
        assert!(!TokenManager::is_well_formed(&"A".repeat(MAX_TOKEN_LENGTH + 1)));
    }

    #[tokio::test]
    async fn second_issue_fails() {
        let store = MemoryStore::new();
        let tokens = manager(&store);
        let id = SubscriptionId::new();

        tokens.issue(id).await.unwrap();
        let err = tokens.issue(id).await.unwrap_err();

        assert!(matches!(err, LifecycleError::AlreadyIssued));
    }

    #[tokio::test]
    async fn reservation_without_subscription_does_not_resolve() {
        let store = MemoryStore::new();
        let tokens = manager(&store);
        let token = tokens.issue(SubscriptionId::new()).await.unwrap();

        let err = tokens.resolve(token.as_str()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidToken));
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let store = MemoryStore::new();
        let err = manager(&store).resolve("ZZZ").await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidToken));
    }
}
