//! PostgreSQL audit log

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use salonpass_types::{AuditEntry, SubscriptionId};

use crate::error::DbResult;
use crate::models::{outcome_columns, AuditRow};
use crate::repo::AuditRepository;

/// PostgreSQL audit repository
#[derive(Clone)]
pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    /// Create a new audit repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn insert_audit(conn: &mut PgConnection, entry: &AuditEntry) -> DbResult<()> {
    let (outcome, error_code) = outcome_columns(&entry.outcome);
    sqlx::query(
        r#"
        INSERT INTO subscription_audit (subscription_id, from_status, to_status, reason, actor,
                                        outcome, error_code, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.subscription_id.0)
    .bind(entry.from.map(|s| s.as_str()))
    .bind(entry.to.as_str())
    .bind(entry.reason.as_str())
    .bind(entry.actor.to_string())
    .bind(outcome)
    .bind(error_code)
    .bind(entry.occurred_at)
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn append(&self, entry: AuditEntry) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_audit(&mut conn, &entry).await
    }

    async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> DbResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, subscription_id, from_status, to_status, reason, actor, outcome,
                   error_code, occurred_at
            FROM subscription_audit
            WHERE subscription_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(subscription_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}
