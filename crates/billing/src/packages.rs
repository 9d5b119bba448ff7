//! Coin packages: one-off LeadCoin top-ups purchasable outside a plan.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct CoinPackage {
    pub id: Uuid,
    pub name: String,
    pub lead_coins: i64,
    pub price_cents: i64,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PackageParams {
    pub name: String,
    pub lead_coins: i64,
    pub price_cents: i64,
    pub active: bool,
}

#[derive(Clone)]
pub struct PackageService {
    pool: PgPool,
}

impl PackageService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_active(&self) -> BillingResult<Vec<CoinPackage>> {
        let packages = sqlx::query_as::<_, CoinPackage>(
            r#"
            SELECT id, name, lead_coins, price_cents, active, created_at
            FROM coin_packages
            WHERE active = TRUE
            ORDER BY price_cents ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(packages)
    }

    pub async fn list_all(&self) -> BillingResult<Vec<CoinPackage>> {
        let packages = sqlx::query_as::<_, CoinPackage>(
            r#"
            SELECT id, name, lead_coins, price_cents, active, created_at
            FROM coin_packages
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(packages)
    }

    pub async fn get_active(&self, package_id: Uuid) -> BillingResult<CoinPackage> {
        let package = sqlx::query_as::<_, CoinPackage>(
            r#"
            SELECT id, name, lead_coins, price_cents, active, created_at
            FROM coin_packages
            WHERE id = $1 AND active = TRUE
            "#,
        )
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await?;

        package.ok_or(BillingError::PackageNotFound(package_id))
    }

    pub async fn create(&self, params: &PackageParams) -> BillingResult<CoinPackage> {
        let package = sqlx::query_as::<_, CoinPackage>(
            r#"
            INSERT INTO coin_packages (name, lead_coins, price_cents, active)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, lead_coins, price_cents, active, created_at
            "#,
        )
        .bind(&params.name)
        .bind(params.lead_coins)
        .bind(params.price_cents)
        .bind(params.active)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(package_id = %package.id, name = %package.name, "Coin package created");
        Ok(package)
    }

    pub async fn update(
        &self,
        package_id: Uuid,
        params: &PackageParams,
    ) -> BillingResult<CoinPackage> {
        let package = sqlx::query_as::<_, CoinPackage>(
            r#"
            UPDATE coin_packages
            SET name = $2, lead_coins = $3, price_cents = $4, active = $5
            WHERE id = $1
            RETURNING id, name, lead_coins, price_cents, active, created_at
            "#,
        )
        .bind(package_id)
        .bind(&params.name)
        .bind(params.lead_coins)
        .bind(params.price_cents)
        .bind(params.active)
        .fetch_optional(&self.pool)
        .await?;

        package.ok_or(BillingError::PackageNotFound(package_id))
    }

    pub async fn deactivate(&self, package_id: Uuid) -> BillingResult<bool> {
        let rows = sqlx::query("UPDATE coin_packages SET active = FALSE WHERE id = $1")
            .bind(package_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }
}
