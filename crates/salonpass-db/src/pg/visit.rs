//! PostgreSQL visit repository implementation

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use salonpass_types::{SubscriptionId, Visit};

use crate::error::{DbError, DbResult};
use crate::models::VisitRow;
use crate::repo::VisitRepository;

/// PostgreSQL visit repository
#[derive(Clone)]
pub struct PgVisitRepository {
    pool: PgPool,
}

impl PgVisitRepository {
    /// Create a new visit repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn insert_visit(conn: &mut PgConnection, visit: &Visit) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO visits (id, subscription_id, customer_id, salon_id, redeemed_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(visit.id.0)
    .bind(visit.subscription_id.0)
    .bind(visit.customer_id.0)
    .bind(visit.salon_id.0)
    .bind(visit.redeemed_at)
    .execute(conn)
    .await
    .map_err(DbError::classify)?;

    Ok(())
}

#[async_trait]
impl VisitRepository for PgVisitRepository {
    async fn find_by_subscription(&self, subscription_id: SubscriptionId) -> DbResult<Vec<Visit>> {
        let rows = sqlx::query_as::<_, VisitRow>(
            r#"
            SELECT id, subscription_id, customer_id, salon_id, redeemed_at
            FROM visits
            WHERE subscription_id = $1
            ORDER BY redeemed_at ASC
            "#,
        )
        .bind(subscription_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Visit::from).collect())
    }

    async fn count_by_subscription(&self, subscription_id: SubscriptionId) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visits WHERE subscription_id = $1")
            .bind(subscription_id.0)
            .fetch_one(&self.pool)
            .await?;

        u64::try_from(count).map_err(|_| DbError::Decode(format!("negative count: {count}")))
    }
}
