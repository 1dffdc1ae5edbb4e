//! PostgreSQL subscription repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use salonpass_types::{RedemptionToken, Subscription, SubscriptionId};

use crate::error::{DbError, DbResult};
use crate::models::{to_column, SubscriptionRow};
use crate::repo::{CreateSubscription, PaymentWrite, SubscriptionCommit, SubscriptionRepository};

use super::audit::insert_audit;
use super::payment::{insert_gateway_event, write_payment};
use super::visit::insert_visit;

/// PostgreSQL subscription repository
#[derive(Clone)]
pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    /// Create a new subscription repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_subscription(conn: &mut PgConnection, sub: &Subscription) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO subscriptions (id, customer_id, package_id, salon_id, visit_count,
                                   visits_used, visits_remaining, status, start_date, end_date,
                                   redemption_token, suspended_at, renewal_count, version,
                                   created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(sub.id.0)
    .bind(sub.customer_id.0)
    .bind(sub.package_id.0)
    .bind(sub.salon_id.0)
    .bind(to_column(sub.visit_count, "visit_count")?)
    .bind(to_column(sub.visits_used, "visits_used")?)
    .bind(to_column(sub.visits_remaining, "visits_remaining")?)
    .bind(sub.status.as_str())
    .bind(sub.start_date)
    .bind(sub.end_date)
    .bind(sub.redemption_token.as_str())
    .bind(sub.suspended_at)
    .bind(to_column(sub.renewal_count, "renewal_count")?)
    .bind(sub.version)
    .bind(sub.created_at)
    .bind(sub.updated_at)
    .execute(conn)
    .await
    .map_err(DbError::classify)?;

    Ok(())
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn find_by_id(&self, id: SubscriptionId) -> DbResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, customer_id, package_id, salon_id, visit_count, visits_used,
                   visits_remaining, status, start_date, end_date, redemption_token,
                   suspended_at, renewal_count, version, created_at, updated_at
            FROM subscriptions
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_token(&self, token: &RedemptionToken) -> DbResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, customer_id, package_id, salon_id, visit_count, visits_used,
                   visits_remaining, status, start_date, end_date, redemption_token,
                   suspended_at, renewal_count, version, created_at, updated_at
            FROM subscriptions
            WHERE redemption_token = $1
            "#,
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_due_for_sweep(
        &self,
        now: DateTime<Utc>,
        suspended_before: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, customer_id, package_id, salon_id, visit_count, visits_used,
                   visits_remaining, status, start_date, end_date, redemption_token,
                   suspended_at, renewal_count, version, created_at, updated_at
            FROM subscriptions
            WHERE (status = 'active' AND (end_date < $1 OR visits_remaining = 0))
               OR (status = 'suspended' AND suspended_at <= $2)
            ORDER BY end_date ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(suspended_before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn create(&self, input: CreateSubscription) -> DbResult<Subscription> {
        let mut tx = self.pool.begin().await?;

        insert_subscription(&mut tx, &input.subscription).await?;
        write_payment(&mut tx, &PaymentWrite::Insert(input.payment)).await?;
        insert_audit(&mut tx, &input.audit).await?;
        if let Some(event_id) = &input.gateway_event {
            let sub = &input.subscription;
            insert_gateway_event(&mut tx, event_id, sub.id, sub.created_at).await?;
        }

        tx.commit().await?;
        Ok(input.subscription)
    }

    async fn commit(&self, commit: SubscriptionCommit) -> DbResult<Subscription> {
        let sub = &commit.subscription;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            UPDATE subscriptions
            SET visits_used = $2, visits_remaining = $3, status = $4, start_date = $5,
                end_date = $6, suspended_at = $7, renewal_count = $8, updated_at = $9,
                version = version + 1
            WHERE id = $1 AND version = $10
            RETURNING id, customer_id, package_id, salon_id, visit_count, visits_used,
                      visits_remaining, status, start_date, end_date, redemption_token,
                      suspended_at, renewal_count, version, created_at, updated_at
            "#,
        )
        .bind(sub.id.0)
        .bind(to_column(sub.visits_used, "visits_used")?)
        .bind(to_column(sub.visits_remaining, "visits_remaining")?)
        .bind(sub.status.as_str())
        .bind(sub.start_date)
        .bind(sub.end_date)
        .bind(sub.suspended_at)
        .bind(to_column(sub.renewal_count, "renewal_count")?)
        .bind(sub.updated_at)
        .bind(sub.version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::classify)?;

        // Dropping `tx` rolls back.
        let Some(row) = row else {
            debug!(subscription_id = %sub.id, version = sub.version, "Version conflict on commit");
            return Err(DbError::VersionConflict);
        };

        if let Some(visit) = &commit.visit {
            insert_visit(&mut tx, visit).await?;
        }
        if let Some(payment) = &commit.payment {
            write_payment(&mut tx, payment).await?;
        }
        for entry in &commit.audit {
            insert_audit(&mut tx, entry).await?;
        }
        if let Some(event_id) = &commit.gateway_event {
            insert_gateway_event(&mut tx, event_id, sub.id, sub.updated_at).await?;
        }

        tx.commit().await?;
        Subscription::try_from(row)
    }
}
