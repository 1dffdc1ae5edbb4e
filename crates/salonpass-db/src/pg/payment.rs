//! PostgreSQL payment repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use salonpass_types::{Payment, PaymentId, SubscriptionId};

use crate::error::{DbError, DbResult};
use crate::models::PaymentRow;
use crate::repo::{PaymentRepository, PaymentWrite};

/// PostgreSQL payment repository
#[derive(Clone)]
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    /// Create a new payment repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn write_payment(conn: &mut PgConnection, write: &PaymentWrite) -> DbResult<()> {
    match write {
        PaymentWrite::Insert(payment) => {
            sqlx::query(
                r#"
                INSERT INTO payments (id, subscription_id, kind, amount_cents, currency, status,
                                      gateway_reference, refund_amount_cents, refunded_at,
                                      failure_reason, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(payment.id.0)
            .bind(payment.subscription_id.0)
            .bind(payment.kind.as_str())
            .bind(payment.amount_cents)
            .bind(&payment.currency)
            .bind(payment.status.as_str())
            .bind(&payment.gateway_reference)
            .bind(payment.refund_amount_cents)
            .bind(payment.refunded_at)
            .bind(&payment.failure_reason)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .execute(conn)
            .await
            .map_err(DbError::classify)?;
        }
        PaymentWrite::Update(payment) => {
            let result = sqlx::query(
                r#"
                UPDATE payments
                SET status = $2, gateway_reference = $3, refund_amount_cents = $4,
                    refunded_at = $5, failure_reason = $6, updated_at = $7
                WHERE id = $1
                "#,
            )
            .bind(payment.id.0)
            .bind(payment.status.as_str())
            .bind(&payment.gateway_reference)
            .bind(payment.refund_amount_cents)
            .bind(payment.refunded_at)
            .bind(&payment.failure_reason)
            .bind(payment.updated_at)
            .execute(conn)
            .await
            .map_err(DbError::classify)?;

            if result.rows_affected() == 0 {
                return Err(DbError::NotFound);
            }
        }
    }

    Ok(())
}

pub(crate) async fn insert_gateway_event(
    conn: &mut PgConnection,
    event_id: &str,
    subscription_id: SubscriptionId,
    processed_at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO gateway_events (event_id, subscription_id, processed_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(event_id)
    .bind(subscription_id.0)
    .bind(processed_at)
    .execute(conn)
    .await
    .map_err(DbError::classify)?;

    Ok(())
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn find_by_id(&self, id: PaymentId) -> DbResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, subscription_id, kind, amount_cents, currency, status, gateway_reference,
                   refund_amount_cents, refunded_at, failure_reason, created_at, updated_at
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> DbResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, subscription_id, kind, amount_cents, currency, status, gateway_reference,
                   refund_amount_cents, refunded_at, failure_reason, created_at, updated_at
            FROM payments
            WHERE subscription_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(subscription_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn event_processed(&self, event_id: &str) -> DbResult<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT event_id FROM gateway_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(found.is_some())
    }
}
