//! Authentication routes.

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use leadforge_billing::UsageSummary;
use leadforge_shared::Role;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::middleware::extract_client_ip_from_headers;
use crate::auth::{
    generate_impossible_hash, hash_password, sessions, validate_password_strength,
    verify_password, AuthUser, TokenType,
};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserSummary,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub lead_coins: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct LoginRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: Role,
    lead_coins: i64,
    suspended_at: Option<OffsetDateTime>,
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(255).collect())
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let email = body.email.trim().to_lowercase();
    let name = body.name.trim();

    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if !email.contains('@') || email.len() > 255 {
        return Err(ApiError::BadRequest("invalid email address".to_string()));
    }
    validate_password_strength(&body.password).map_err(ApiError::BadRequest)?;

    let password_hash = hash_password(&body.password)?;

    let user: Option<UserSummary> = sqlx::query_as(
        r#"
        INSERT INTO users (name, email, password_hash, role, lead_coins)
        VALUES ($1, $2, $3, 'user', 0)
        ON CONFLICT (email) DO NOTHING
        RETURNING id, name, email, role, lead_coins
        "#,
    )
    .bind(name)
    .bind(&email)
    .bind(&password_hash)
    .fetch_optional(&state.pool)
    .await?;

    let user = user.ok_or_else(|| {
        ApiError::Conflict("an account with this email already exists".to_string())
    })?;

    let pair = state.jwt_manager.generate_pair(user.id, user.role)?;
    sessions::save_session(
        &state.pool,
        user.id,
        &pair,
        extract_client_ip_from_headers(&headers).as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;

    tracing::info!(user_id = %user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = body.email.trim().to_lowercase();

    let row: Option<LoginRow> = sqlx::query_as(
        r#"
        SELECT id, name, email, password_hash, role, lead_coins, suspended_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?;

    // Verify against a dummy hash when the account is missing so both
    // failure paths cost roughly the same.
    let password_ok = match &row {
        Some(row) => verify_password(&body.password, &row.password_hash)?,
        None => {
            let _ = verify_password(&body.password, &generate_impossible_hash()?);
            false
        }
    };

    let Some(row) = row else {
        return Err(ApiError::Unauthorized);
    };
    if !password_ok {
        tracing::info!(user_id = %row.id, "Failed login attempt");
        return Err(ApiError::Unauthorized);
    }
    if row.suspended_at.is_some() {
        return Err(ApiError::Forbidden);
    }

    let pair = state.jwt_manager.generate_pair(row.id, row.role)?;
    sessions::save_session(
        &state.pool,
        row.id,
        &pair,
        extract_client_ip_from_headers(&headers).as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;

    tracing::info!(user_id = %row.id, "User logged in");

    Ok(Json(AuthResponse {
        user: UserSummary {
            id: row.id,
            name: row.name,
            email: row.email,
            role: row.role,
            lead_coins: row.lead_coins,
        },
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    }))
}

/// Rotate a refresh token into a fresh pair. The old refresh session is
/// revoked so each token is single-use.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let claims = state
        .jwt_manager
        .verify(&body.refresh_token, TokenType::Refresh)?;

    if !sessions::is_session_valid(&state.pool, &claims.jti, claims.sub).await? {
        return Err(ApiError::Unauthorized);
    }

    let user: Option<UserSummary> = sqlx::query_as(
        r#"
        SELECT id, name, email, role, lead_coins
        FROM users
        WHERE id = $1 AND suspended_at IS NULL
        "#,
    )
    .bind(claims.sub)
    .fetch_optional(&state.pool)
    .await?;
    let user = user.ok_or(ApiError::Unauthorized)?;

    sessions::revoke_session(&state.pool, &claims.jti, "rotated").await?;

    let pair = state.jwt_manager.generate_pair(user.id, user.role)?;
    sessions::save_session(
        &state.pool,
        user.id,
        &pair,
        extract_client_ip_from_headers(&headers).as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;

    Ok(Json(AuthResponse {
        user,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Option<Json<LogoutRequest>>,
) -> ApiResult<Json<serde_json::Value>> {
    sessions::revoke_session(&state.pool, &user.session_jti, "logout").await?;

    // Also retire the refresh token when the client hands it over.
    if let Some(Json(LogoutRequest {
        refresh_token: Some(token),
    })) = body
    {
        if let Ok(claims) = state.jwt_manager.verify(&token, TokenType::Refresh) {
            if claims.sub == user.user_id {
                sessions::revoke_session(&state.pool, &claims.jti, "logout").await?;
            }
        }
    }

    tracing::info!(user_id = %user.user_id, "User logged out");

    Ok(Json(json!({ "success": true })))
}

/// Current user with balance, subscription and derived usage. Served
/// read-through from the query cache; purchase and debit paths invalidate
/// the `user:<id>:` prefix.
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let cache_key = format!("user:{}:me", user.user_id);
    if let Some(cached) = state.cache.get(&cache_key).await {
        return Ok(Json(cached));
    }

    let summary: UserSummary = sqlx::query_as(
        "SELECT id, name, email, role, lead_coins FROM users WHERE id = $1",
    )
    .bind(user.user_id)
    .fetch_one(&state.pool)
    .await?;

    let current = state.billing.subscriptions.current(user.user_id).await?;
    let usage = UsageSummary::derive(
        summary.lead_coins,
        current.as_ref().map(|(_, plan)| plan.lead_coins),
    );

    let response = json!({
        "user": summary,
        "subscription": current.as_ref().map(|(sub, plan)| json!({
            "subscription": sub,
            "plan": plan,
        })),
        "usage": usage,
    });

    state.cache.put(&cache_key, response.clone()).await;

    Ok(Json(response))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<sessions::UserSession>>> {
    Ok(Json(sessions::list_sessions(&state.pool, user.user_id).await?))
}
