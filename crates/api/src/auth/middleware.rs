//! Authentication middleware for Axum.

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use leadforge_shared::Role;
use serde_json::json;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{jwt::JwtManager, sessions, TokenType};

/// Authenticated user information attached to the request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
    pub email: String,
    /// JTI of the access token, for logout.
    pub session_jti: String,
}

/// State needed by the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub pool: PgPool,
}

/// Cookie fallback for SPA clients that keep the token in an HttpOnly
/// cookie instead of a header.
fn extract_token_from_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            for cookie in cookies.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie.strip_prefix("leadforge_token=") {
                    return Some(token.to_string());
                }
            }
            None
        })
}

/// Bearer token from the Authorization header, with cookie fallback.
fn extract_bearer_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    extract_token_from_cookie(request)
}

/// IP address from proxy headers, for session records.
pub fn extract_client_ip_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("X-Forwarded-For") {
        if let Ok(xff_str) = xff.to_str() {
            return xff_str.split(',').next().map(|s| s.trim().to_string());
        }
    }
    if let Some(real_ip) = headers.get("X-Real-IP") {
        if let Ok(ip) = real_ip.to_str() {
            return Some(ip.to_string());
        }
    }
    None
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn forbidden(message: &str) -> Response {
    (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
}

#[derive(Debug, sqlx::FromRow)]
struct AuthUserRow {
    email: String,
    role: Role,
    suspended_at: Option<OffsetDateTime>,
}

/// Middleware that requires a valid, unrevoked access token.
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&request) else {
        return unauthorized("authentication required");
    };

    let claims = match auth_state.jwt_manager.verify(&token, TokenType::Access) {
        Ok(claims) => claims,
        Err(_) => return unauthorized("invalid or expired token"),
    };

    // Signature alone is not enough: the session row may have been revoked
    // by logout, password change, or an admin.
    match sessions::is_session_valid(&auth_state.pool, &claims.jti, claims.sub).await {
        Ok(true) => {}
        Ok(false) => return unauthorized("session expired"),
        Err(e) => {
            tracing::error!(error = %e, "Session lookup failed");
            return unauthorized("session expired");
        }
    }

    let row: Option<AuthUserRow> = match sqlx::query_as(
        "SELECT email, role, suspended_at FROM users WHERE id = $1",
    )
    .bind(claims.sub)
    .fetch_optional(&auth_state.pool)
    .await
    {
        Ok(row) => row,
        Err(e) => {
            tracing::error!(error = %e, "User lookup failed");
            return unauthorized("session expired");
        }
    };

    let Some(row) = row else {
        return unauthorized("session expired");
    };

    if row.suspended_at.is_some() {
        return forbidden("account suspended");
    }

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        // The database is authoritative for the role; the claim can lag a
        // promotion or demotion by up to the token lifetime.
        role: row.role,
        email: row.email,
        session_jti: claims.jti,
    });

    next.run(request).await
}

/// Requires an admin or subadmin. Layered inside `require_auth`.
pub async fn require_staff(request: Request, next: Next) -> Response {
    match request.extensions().get::<AuthUser>() {
        Some(user) if user.role.is_staff() => next.run(request).await,
        Some(_) => forbidden("staff access required"),
        None => unauthorized("authentication required"),
    }
}

/// Requires an admin. Layered inside `require_auth`.
pub async fn require_admin(request: Request, next: Next) -> Response {
    match request.extensions().get::<AuthUser>() {
        Some(user) if user.role == Role::Admin => next.run(request).await,
        Some(_) => forbidden("admin access required"),
        None => unauthorized("authentication required"),
    }
}
