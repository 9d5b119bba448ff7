//! Subscription plans and user subscriptions.

use leadforge_shared::SubscriptionStatus;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub duration_days: i32,
    /// Allotment granted on purchase.
    pub lead_coins: i64,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct UserSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub payment_verified: bool,
    pub lead_coins_left: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub payment_session_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Parameters for creating or updating a plan.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PlanParams {
    pub name: String,
    pub price_cents: i64,
    pub duration_days: i32,
    pub lead_coins: i64,
    pub active: bool,
}

#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_active_plans(&self) -> BillingResult<Vec<Plan>> {
        let plans = sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, name, price_cents, duration_days, lead_coins, active, created_at
            FROM subscription_plans
            WHERE active = TRUE
            ORDER BY price_cents ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    pub async fn list_all_plans(&self) -> BillingResult<Vec<Plan>> {
        let plans = sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, name, price_cents, duration_days, lead_coins, active, created_at
            FROM subscription_plans
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    pub async fn get_active_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan = sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, name, price_cents, duration_days, lead_coins, active, created_at
            FROM subscription_plans
            WHERE id = $1 AND active = TRUE
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or(BillingError::PlanNotFound(plan_id))
    }

    pub async fn create_plan(&self, params: &PlanParams) -> BillingResult<Plan> {
        let plan = sqlx::query_as::<_, Plan>(
            r#"
            INSERT INTO subscription_plans (name, price_cents, duration_days, lead_coins, active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, price_cents, duration_days, lead_coins, active, created_at
            "#,
        )
        .bind(&params.name)
        .bind(params.price_cents)
        .bind(params.duration_days)
        .bind(params.lead_coins)
        .bind(params.active)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(plan_id = %plan.id, name = %plan.name, "Subscription plan created");
        Ok(plan)
    }

    pub async fn update_plan(&self, plan_id: Uuid, params: &PlanParams) -> BillingResult<Plan> {
        let plan = sqlx::query_as::<_, Plan>(
            r#"
            UPDATE subscription_plans
            SET name = $2, price_cents = $3, duration_days = $4, lead_coins = $5, active = $6
            WHERE id = $1
            RETURNING id, name, price_cents, duration_days, lead_coins, active, created_at
            "#,
        )
        .bind(plan_id)
        .bind(&params.name)
        .bind(params.price_cents)
        .bind(params.duration_days)
        .bind(params.lead_coins)
        .bind(params.active)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or(BillingError::PlanNotFound(plan_id))
    }

    /// Plans are templates referenced by historical subscriptions, so
    /// deletion is a soft deactivation.
    pub async fn deactivate_plan(&self, plan_id: Uuid) -> BillingResult<bool> {
        let rows = sqlx::query("UPDATE subscription_plans SET active = FALSE WHERE id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    /// Record the pending subscription created alongside a payment session.
    pub async fn create_pending(
        &self,
        user_id: Uuid,
        plan: &Plan,
        payment_session_id: Uuid,
    ) -> BillingResult<UserSubscription> {
        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            INSERT INTO user_subscriptions
                (user_id, plan_id, status, payment_verified, lead_coins_left, payment_session_id)
            VALUES ($1, $2, 'pending', FALSE, $3, $4)
            RETURNING id, user_id, plan_id, status, payment_verified, lead_coins_left,
                      start_date, end_date, payment_session_id, created_at
            "#,
        )
        .bind(user_id)
        .bind(plan.id)
        .bind(plan.lead_coins)
        .bind(payment_session_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// The at-most-one active, payment-verified subscription, with its plan.
    pub async fn current(&self, user_id: Uuid) -> BillingResult<Option<(UserSubscription, Plan)>> {
        let row = sqlx::query_as::<_, CurrentSubscriptionRow>(
            r#"
            SELECT s.id, s.user_id, s.plan_id, s.status, s.payment_verified,
                   s.lead_coins_left, s.start_date, s.end_date, s.payment_session_id,
                   s.created_at,
                   p.name AS plan_name, p.price_cents, p.duration_days,
                   p.lead_coins AS plan_lead_coins, p.active AS plan_active,
                   p.created_at AS plan_created_at
            FROM user_subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.user_id = $1
              AND s.status = 'active'
              AND s.payment_verified = TRUE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CurrentSubscriptionRow::split))
    }

    /// Flip past-`end_date` subscriptions to expired. Run hourly by the
    /// worker.
    pub async fn expire_overdue(&self) -> BillingResult<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET status = 'expired'
            WHERE status = 'active'
              AND end_date IS NOT NULL
              AND end_date <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            tracing::info!(expired = rows, "Expired overdue subscriptions");
        }

        Ok(rows)
    }
}

/// Activate the pending subscription tied to a credited payment session,
/// inside the fulfilment transaction. Any previously active subscription
/// is expired first so the single-active invariant holds.
pub(crate) async fn activate_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    plan_id: Uuid,
    payment_session_id: Uuid,
    allotment: i64,
    duration_days: i32,
) -> BillingResult<Uuid> {
    sqlx::query(
        r#"
        UPDATE user_subscriptions
        SET status = 'expired'
        WHERE user_id = $1
          AND status = 'active'
        "#,
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    let now = OffsetDateTime::now_utc();
    let end_date = now + Duration::days(i64::from(duration_days));

    // The pending row was created with the session; if it went missing
    // (e.g. manual cleanup) fulfilment still succeeds by inserting fresh.
    let activated: Option<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE user_subscriptions
        SET status = 'active', payment_verified = TRUE, lead_coins_left = $2,
            start_date = $3, end_date = $4
        WHERE payment_session_id = $1
          AND status = 'pending'
        RETURNING id
        "#,
    )
    .bind(payment_session_id)
    .bind(allotment)
    .bind(now)
    .bind(end_date)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(id) = activated {
        return Ok(id);
    }

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO user_subscriptions
            (user_id, plan_id, status, payment_verified, lead_coins_left,
             start_date, end_date, payment_session_id)
        VALUES ($1, $2, 'active', TRUE, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(plan_id)
    .bind(allotment)
    .bind(now)
    .bind(end_date)
    .bind(payment_session_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

#[derive(sqlx::FromRow)]
struct CurrentSubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    plan_id: Uuid,
    status: SubscriptionStatus,
    payment_verified: bool,
    lead_coins_left: i64,
    start_date: Option<OffsetDateTime>,
    end_date: Option<OffsetDateTime>,
    payment_session_id: Option<Uuid>,
    created_at: OffsetDateTime,
    plan_name: String,
    price_cents: i64,
    duration_days: i32,
    plan_lead_coins: i64,
    plan_active: bool,
    plan_created_at: OffsetDateTime,
}

impl CurrentSubscriptionRow {
    fn split(self) -> (UserSubscription, Plan) {
        (
            UserSubscription {
                id: self.id,
                user_id: self.user_id,
                plan_id: self.plan_id,
                status: self.status,
                payment_verified: self.payment_verified,
                lead_coins_left: self.lead_coins_left,
                start_date: self.start_date,
                end_date: self.end_date,
                payment_session_id: self.payment_session_id,
                created_at: self.created_at,
            },
            Plan {
                id: self.plan_id,
                name: self.plan_name,
                price_cents: self.price_cents,
                duration_days: self.duration_days,
                lead_coins: self.plan_lead_coins,
                active: self.plan_active,
                created_at: self.plan_created_at,
            },
        )
    }
}
