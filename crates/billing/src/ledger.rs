//! LeadCoin ledger.
//!
//! Every balance mutation goes through this module and writes a
//! `coin_transactions` audit row carrying the post-mutation balance, in
//! the same database transaction as the balance update itself. Debits for
//! lead views also decrement the plan-scoped `lead_coins_left` counter of
//! the current verified subscription.

use leadforge_shared::CoinTransactionKind;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct CoinTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: CoinTransactionKind,
    /// Signed: grants positive, debits negative.
    pub amount: i64,
    pub balance_after: i64,
    /// Session id, lead id, or admin note tying the entry to its cause.
    pub reference: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Result of a lead-view debit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LeadViewCharge {
    /// Zero when the lead was already unlocked by this user.
    pub coins_charged: i64,
    pub balance_after: i64,
}

#[derive(Clone)]
pub struct CoinLedger {
    pool: PgPool,
}

impl CoinLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn balance(&self, user_id: Uuid) -> BillingResult<i64> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT lead_coins FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        balance.ok_or_else(|| BillingError::Internal(format!("no such user: {user_id}")))
    }

    /// Credit coins to a user. `amount` must be positive.
    pub async fn grant(
        &self,
        user_id: Uuid,
        amount: i64,
        kind: CoinTransactionKind,
        reference: Option<&str>,
    ) -> BillingResult<i64> {
        if amount <= 0 {
            return Err(BillingError::Internal(format!(
                "grant amount must be positive, got {amount}"
            )));
        }

        let mut tx = self.pool.begin().await?;
        let balance_after = credit_in_tx(&mut tx, user_id, amount, kind, reference).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            kind = kind.as_str(),
            balance_after = balance_after,
            "Coins granted"
        );

        Ok(balance_after)
    }

    /// Admin-initiated signed adjustment. Removals are floored at the
    /// available balance so the account never goes negative.
    pub async fn admin_adjust(
        &self,
        user_id: Uuid,
        amount: i64,
        reference: Option<&str>,
    ) -> BillingResult<i64> {
        if amount == 0 {
            return self.balance(user_id).await;
        }

        if amount > 0 {
            return self
                .grant(user_id, amount, CoinTransactionKind::AdminGrant, reference)
                .await;
        }

        let mut tx = self.pool.begin().await?;

        let available: Option<i64> =
            sqlx::query_scalar("SELECT lead_coins FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let available =
            available.ok_or_else(|| BillingError::Internal(format!("no such user: {user_id}")))?;

        let removed = amount.abs().min(available);
        if removed == 0 {
            tx.rollback().await?;
            return Ok(available);
        }

        let balance_after: i64 = sqlx::query_scalar(
            "UPDATE users SET lead_coins = lead_coins - $2, updated_at = NOW() WHERE id = $1 RETURNING lead_coins",
        )
        .bind(user_id)
        .bind(removed)
        .fetch_one(&mut *tx)
        .await?;

        insert_transaction(
            &mut tx,
            user_id,
            CoinTransactionKind::AdminRemoval,
            -removed,
            balance_after,
            reference,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            removed = removed,
            balance_after = balance_after,
            "Coins removed by admin"
        );

        Ok(balance_after)
    }

    /// Charge a user for unlocking a lead's contact details.
    ///
    /// Idempotent per (user, lead): a second view of an unlocked lead
    /// charges nothing. The debit decrements both the global balance and
    /// the current subscription's `lead_coins_left` (floored at zero).
    pub async fn debit_lead_view(
        &self,
        user_id: Uuid,
        lead_id: Uuid,
        price_coins: i64,
    ) -> BillingResult<LeadViewCharge> {
        let mut tx = self.pool.begin().await?;

        // Claim the unlock first. A conflict means this user already paid
        // for the lead, possibly in a concurrent request.
        let claimed = sqlx::query(
            r#"
            INSERT INTO lead_views (user_id, lead_id, coins_charged)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, lead_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(lead_id)
        .bind(price_coins)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            let balance = self.balance(user_id).await?;
            return Ok(LeadViewCharge {
                coins_charged: 0,
                balance_after: balance,
            });
        }

        let available: Option<i64> =
            sqlx::query_scalar("SELECT lead_coins FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let available =
            available.ok_or_else(|| BillingError::Internal(format!("no such user: {user_id}")))?;

        if available < price_coins {
            tx.rollback().await?;
            return Err(BillingError::InsufficientCoins {
                needed: price_coins,
                available,
            });
        }

        let balance_after: i64 = sqlx::query_scalar(
            "UPDATE users SET lead_coins = lead_coins - $2, updated_at = NOW() WHERE id = $1 RETURNING lead_coins",
        )
        .bind(user_id)
        .bind(price_coins)
        .fetch_one(&mut *tx)
        .await?;

        // The plan-scoped counter tracks consumption against the current
        // allotment; it floors at zero rather than erroring because the
        // global balance is the spendable source of truth.
        sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET lead_coins_left = GREATEST(lead_coins_left - $2, 0)
            WHERE user_id = $1
              AND status = 'active'
              AND payment_verified = TRUE
            "#,
        )
        .bind(user_id)
        .bind(price_coins)
        .execute(&mut *tx)
        .await?;

        insert_transaction(
            &mut tx,
            user_id,
            CoinTransactionKind::LeadView,
            -price_coins,
            balance_after,
            Some(&lead_id.to_string()),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            lead_id = %lead_id,
            coins_charged = price_coins,
            balance_after = balance_after,
            "Lead unlocked"
        );

        Ok(LeadViewCharge {
            coins_charged: price_coins,
            balance_after,
        })
    }

    /// Recent ledger entries, newest first.
    pub async fn history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<CoinTransaction>> {
        let entries = sqlx::query_as::<_, CoinTransaction>(
            r#"
            SELECT id, user_id, kind, amount, balance_after, reference, created_at
            FROM coin_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

/// Credit coins inside an existing transaction. Used by payment fulfilment
/// so the session claim, the balance update and the audit row commit
/// atomically.
pub(crate) async fn credit_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    amount: i64,
    kind: CoinTransactionKind,
    reference: Option<&str>,
) -> BillingResult<i64> {
    let balance_after: i64 = sqlx::query_scalar(
        "UPDATE users SET lead_coins = lead_coins + $2, updated_at = NOW() WHERE id = $1 RETURNING lead_coins",
    )
    .bind(user_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    insert_transaction(tx, user_id, kind, amount, balance_after, reference).await?;

    Ok(balance_after)
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    kind: CoinTransactionKind,
    amount: i64,
    balance_after: i64,
    reference: Option<&str>,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        INSERT INTO coin_transactions (user_id, kind, amount, balance_after, reference)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(amount)
    .bind(balance_after)
    .bind(reference)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
