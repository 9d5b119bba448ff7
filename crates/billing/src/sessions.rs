//! Payment session persistence.
//!
//! A payment session is our own handle for one purchase attempt. It wraps
//! the gateway object (a Checkout Session or a PaymentIntent), carries the
//! client-facing fields (payment URL, client secret, QR code) and a bounded
//! lifetime. State transitions only ever move forward; terminal rows are
//! immutable.

use leadforge_shared::{PaymentSessionKind, PaymentSessionStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PaymentSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub kind: PaymentSessionKind,
    /// Plan id for subscription purchases, package id for coin purchases.
    pub target_id: Uuid,
    /// Stripe object id (`cs_...` or `pi_...`).
    pub gateway_id: String,
    pub client_secret: Option<String>,
    pub payment_url: Option<String>,
    pub qr_code_data_url: Option<String>,
    pub amount_cents: i64,
    /// Coins granted on fulfilment.
    pub coins: i64,
    pub status: PaymentSessionStatus,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl PaymentSession {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

pub async fn load(pool: &PgPool, session_id: Uuid) -> BillingResult<Option<PaymentSession>> {
    let session = sqlx::query_as::<_, PaymentSession>(
        r#"
        SELECT session_id, user_id, kind, target_id, gateway_id, client_secret,
               payment_url, qr_code_data_url, amount_cents, coins, status,
               expires_at, created_at
        FROM payment_sessions
        WHERE session_id = $1
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

pub async fn load_by_gateway_id(
    pool: &PgPool,
    gateway_id: &str,
) -> BillingResult<Option<PaymentSession>> {
    let session = sqlx::query_as::<_, PaymentSession>(
        r#"
        SELECT session_id, user_id, kind, target_id, gateway_id, client_secret,
               payment_url, qr_code_data_url, amount_cents, coins, status,
               expires_at, created_at
        FROM payment_sessions
        WHERE gateway_id = $1
        "#,
    )
    .bind(gateway_id)
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

/// Mark a session paid. Only valid from `created`; returns whether a row
/// transitioned.
pub async fn mark_paid(pool: &PgPool, session_id: Uuid) -> BillingResult<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE payment_sessions
        SET status = 'paid', updated_at = NOW()
        WHERE session_id = $1
          AND status = 'created'
        "#,
    )
    .bind(session_id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows > 0)
}

/// Mark a session expired. Paid sessions are not expired: money that
/// arrived before the TTL must still be credited.
pub async fn mark_expired(pool: &PgPool, session_id: Uuid) -> BillingResult<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE payment_sessions
        SET status = 'expired', updated_at = NOW()
        WHERE session_id = $1
          AND status = 'created'
        "#,
    )
    .bind(session_id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows > 0)
}

pub async fn mark_failed(pool: &PgPool, session_id: Uuid, reason: &str) -> BillingResult<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE payment_sessions
        SET status = 'failed', failure_reason = $2, updated_at = NOW()
        WHERE session_id = $1
          AND status IN ('created', 'paid')
        "#,
    )
    .bind(session_id)
    .bind(reason)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows > 0)
}

/// Sessions still awaiting payment whose TTL has elapsed (worker sweep).
pub async fn sweep_expired(pool: &PgPool) -> BillingResult<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE payment_sessions
        SET status = 'expired', updated_at = NOW()
        WHERE status = 'created'
          AND expires_at <= NOW()
        "#,
    )
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows)
}

/// Paid sessions whose fulfilment has not run yet, e.g. because the client
/// disappeared mid-poll after a redirect flow. The worker re-verifies these.
pub async fn list_paid_uncredited(pool: &PgPool, limit: i64) -> BillingResult<Vec<PaymentSession>> {
    let sessions = sqlx::query_as::<_, PaymentSession>(
        r#"
        SELECT session_id, user_id, kind, target_id, gateway_id, client_secret,
               payment_url, qr_code_data_url, amount_cents, coins, status,
               expires_at, created_at
        FROM payment_sessions
        WHERE status = 'paid'
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(sessions)
}
