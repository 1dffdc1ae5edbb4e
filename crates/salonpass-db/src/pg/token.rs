//! PostgreSQL redemption token registry

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use salonpass_types::{RedemptionToken, SubscriptionId};

use crate::error::{DbError, DbResult};
use crate::repo::TokenRepository;

/// PostgreSQL token repository
#[derive(Clone)]
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    /// Create a new token repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn reserve(
        &self,
        token: &RedemptionToken,
        subscription_id: SubscriptionId,
        issued_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "INSERT INTO redemption_tokens (token, subscription_id, issued_at) VALUES ($1, $2, $3)",
        )
        .bind(token.as_str())
        .bind(subscription_id.0)
        .bind(issued_at)
        .execute(&self.pool)
        .await;

        match result.map_err(DbError::classify) {
            Ok(_) => Ok(()),
            Err(DbError::Duplicate(constraint)) if constraint.contains("subscription_id") => {
                Err(DbError::Duplicate("subscription".to_string()))
            }
            Err(DbError::Duplicate(_)) => Err(DbError::Duplicate("token".to_string())),
            Err(e) => Err(e),
        }
    }

    async fn find_subscription_id(
        &self,
        token: &RedemptionToken,
    ) -> DbResult<Option<SubscriptionId>> {
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT subscription_id FROM redemption_tokens WHERE token = $1")
                .bind(token.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(id.map(SubscriptionId::from))
    }
}
