//! Platform admin routes.
//!
//! User management, coin adjustments, plan and package catalogs, and the
//! billing invariant runner. All handlers here sit behind the admin role
//! guard.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use leadforge_billing::{
    CoinPackage, InvariantChecker, PackageParams, Plan, PlanParams, UsageSummary,
};
use leadforge_shared::Role;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{sessions, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub lead_coins: i64,
    pub suspended: bool,
    pub has_active_subscription: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserListResponse {
    pub users: Vec<AdminUserSummary>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct SuspendRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustCoinsRequest {
    /// Signed: positive grants, negative removals.
    pub amount: i64,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvariantsQuery {
    /// Run a single named check instead of the full set.
    pub check: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: Role,
    lead_coins: i64,
    suspended_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

// =============================================================================
// Users
// =============================================================================

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<AdminUserListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(25).clamp(1, 100);
    let offset = (page - 1) * limit;
    let search = query
        .search
        .as_deref()
        .map(|s| format!("%{}%", s.trim()))
        .unwrap_or_else(|| "%".to_string());

    let users = sqlx::query_as::<_, AdminUserSummary>(
        r#"
        SELECT u.id, u.name, u.email, u.role, u.lead_coins,
               u.suspended_at IS NOT NULL AS suspended,
               EXISTS (
                   SELECT 1 FROM user_subscriptions s
                   WHERE s.user_id = u.id
                     AND s.status = 'active'
                     AND s.payment_verified = TRUE
               ) AS has_active_subscription,
               u.created_at
        FROM users u
        WHERE (u.email ILIKE $1 OR u.name ILIKE $1)
          AND ($2::user_role IS NULL OR u.role = $2)
        ORDER BY u.created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(&search)
    .bind(query.role)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM users u
        WHERE (u.email ILIKE $1 OR u.name ILIKE $1)
          AND ($2::user_role IS NULL OR u.role = $2)
        "#,
    )
    .bind(&search)
    .bind(query.role)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(AdminUserListResponse {
        users,
        total,
        page,
        limit,
    }))
}

pub async fn user_detail(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let user: Option<UserRow> = sqlx::query_as(
        r#"
        SELECT id, name, email, role, lead_coins, suspended_at, created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?;
    let user = user.ok_or(ApiError::NotFound)?;

    let current = state.billing.subscriptions.current(user_id).await?;
    let usage = UsageSummary::derive(
        user.lead_coins,
        current.as_ref().map(|(_, plan)| plan.lead_coins),
    );
    let transactions = state.billing.ledger.history(user_id, 25).await?;
    let active_sessions = sessions::list_sessions(&state.pool, user_id).await?;

    Ok(Json(json!({
        "user": {
            "id": user.id,
            "name": user.name,
            "email": user.email,
            "role": user.role,
            "leadCoins": user.lead_coins,
            "suspendedAt": user.suspended_at.map(|t| t.unix_timestamp()),
            "createdAt": user.created_at.unix_timestamp(),
        },
        "subscription": current.as_ref().map(|(sub, plan)| json!({
            "subscription": sub,
            "plan": plan,
        })),
        "usage": usage,
        "recentTransactions": transactions,
        "activeSessions": active_sessions.len(),
    })))
}

pub async fn suspend_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<SuspendRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if user_id == admin.user_id {
        return Err(ApiError::BadRequest(
            "you cannot suspend your own account".to_string(),
        ));
    }

    let rows = sqlx::query(
        r#"
        UPDATE users
        SET suspended_at = NOW(), suspended_reason = $2, updated_at = NOW()
        WHERE id = $1
          AND suspended_at IS NULL
        "#,
    )
    .bind(user_id)
    .bind(body.reason.as_deref())
    .execute(&state.pool)
    .await?
    .rows_affected();

    if rows == 0 {
        return Err(ApiError::Conflict(
            "user not found or already suspended".to_string(),
        ));
    }

    // A suspended account keeps no live sessions.
    let revoked = sessions::revoke_all_sessions(&state.pool, user_id, "suspended").await?;

    tracing::warn!(
        user_id = %user_id,
        admin_id = %admin.user_id,
        revoked_sessions = revoked,
        "User suspended"
    );

    Ok(Json(json!({ "success": true, "revokedSessions": revoked })))
}

pub async fn unsuspend_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let rows = sqlx::query(
        r#"
        UPDATE users
        SET suspended_at = NULL, suspended_reason = NULL, updated_at = NOW()
        WHERE id = $1
          AND suspended_at IS NOT NULL
        "#,
    )
    .bind(user_id)
    .execute(&state.pool)
    .await?
    .rows_affected();

    if rows == 0 {
        return Err(ApiError::Conflict(
            "user not found or not suspended".to_string(),
        ));
    }

    tracing::info!(user_id = %user_id, admin_id = %admin.user_id, "User unsuspended");

    Ok(Json(json!({ "success": true })))
}

pub async fn adjust_coins(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<AdjustCoinsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.amount == 0 {
        return Err(ApiError::BadRequest("amount must be non-zero".to_string()));
    }

    let note = body
        .note
        .unwrap_or_else(|| format!("adjusted by {}", admin.email));
    let balance_after = state
        .billing
        .ledger
        .admin_adjust(user_id, body.amount, Some(&note))
        .await?;

    state
        .cache
        .invalidate_prefix(&format!("user:{user_id}:"))
        .await;

    Ok(Json(json!({
        "success": true,
        "balanceAfter": balance_after,
    })))
}

// =============================================================================
// Plans
// =============================================================================

pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    Ok(Json(state.billing.subscriptions.list_all_plans().await?))
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(params): Json<PlanParams>,
) -> ApiResult<(StatusCode, Json<Plan>)> {
    validate_plan(&params)?;
    let plan = state.billing.subscriptions.create_plan(&params).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Json(params): Json<PlanParams>,
) -> ApiResult<Json<Plan>> {
    validate_plan(&params)?;
    Ok(Json(
        state.billing.subscriptions.update_plan(plan_id, &params).await?,
    ))
}

pub async fn deactivate_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.billing.subscriptions.deactivate_plan(plan_id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({ "success": true })))
}

fn validate_plan(params: &PlanParams) -> ApiResult<()> {
    if params.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if params.price_cents < 0 || params.lead_coins < 0 {
        return Err(ApiError::BadRequest(
            "price and coins must not be negative".to_string(),
        ));
    }
    if params.duration_days <= 0 {
        return Err(ApiError::BadRequest(
            "duration must be positive".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// Coin packages
// =============================================================================

pub async fn list_packages(State(state): State<AppState>) -> ApiResult<Json<Vec<CoinPackage>>> {
    Ok(Json(state.billing.packages.list_all().await?))
}

pub async fn create_package(
    State(state): State<AppState>,
    Json(params): Json<PackageParams>,
) -> ApiResult<(StatusCode, Json<CoinPackage>)> {
    validate_package(&params)?;
    let package = state.billing.packages.create(&params).await?;
    Ok((StatusCode::CREATED, Json(package)))
}

pub async fn update_package(
    State(state): State<AppState>,
    Path(package_id): Path<Uuid>,
    Json(params): Json<PackageParams>,
) -> ApiResult<Json<CoinPackage>> {
    validate_package(&params)?;
    Ok(Json(
        state.billing.packages.update(package_id, &params).await?,
    ))
}

pub async fn deactivate_package(
    State(state): State<AppState>,
    Path(package_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.billing.packages.deactivate(package_id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({ "success": true })))
}

fn validate_package(params: &PackageParams) -> ApiResult<()> {
    if params.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if params.price_cents < 0 || params.lead_coins <= 0 {
        return Err(ApiError::BadRequest(
            "package must grant coins and price must not be negative".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// Invariants
// =============================================================================

pub async fn run_invariants(
    State(state): State<AppState>,
    Query(query): Query<InvariantsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    match query.check {
        Some(name) => {
            if !InvariantChecker::available_checks().contains(&name.as_str()) {
                return Err(ApiError::BadRequest(format!("unknown check: {name}")));
            }
            let violations = state.billing.invariants.run_check(&name).await?;
            Ok(Json(json!({ "check": name, "violations": violations })))
        }
        None => {
            let summary = state.billing.invariants.run_all_checks().await?;
            Ok(Json(serde_json::to_value(summary).map_err(|e| {
                ApiError::Internal(format!("summary serialization failed: {e}"))
            })?))
        }
    }
}
