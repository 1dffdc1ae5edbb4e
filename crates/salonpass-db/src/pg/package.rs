//! PostgreSQL package repository implementation

use async_trait::async_trait;
use sqlx::PgPool;

use salonpass_types::{Package, PackageId};

use crate::error::{DbError, DbResult};
use crate::models::{to_column, PackageRow};
use crate::repo::{CreatePackage, PackageRepository};

/// PostgreSQL package repository
#[derive(Clone)]
pub struct PgPackageRepository {
    pool: PgPool,
}

impl PgPackageRepository {
    /// Create a new package repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PackageRepository for PgPackageRepository {
    async fn find_by_id(&self, id: PackageId) -> DbResult<Option<Package>> {
        let row = sqlx::query_as::<_, PackageRow>(
            r#"
            SELECT id, salon_id, name, visit_count, validity_days, price_cents,
                   currency, active, created_at
            FROM packages
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Package::try_from).transpose()
    }

    async fn create(&self, package: CreatePackage) -> DbResult<Package> {
        let row = sqlx::query_as::<_, PackageRow>(
            r#"
            INSERT INTO packages (id, salon_id, name, visit_count, validity_days,
                                  price_cents, currency)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, salon_id, name, visit_count, validity_days, price_cents,
                      currency, active, created_at
            "#,
        )
        .bind(package.id.0)
        .bind(package.salon_id.0)
        .bind(&package.name)
        .bind(to_column(package.visit_count, "visit_count")?)
        .bind(to_column(package.validity_days, "validity_days")?)
        .bind(package.price_cents)
        .bind(&package.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::classify)?;

        Package::try_from(row)
    }
}
