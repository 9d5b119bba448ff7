//! User session management for JWT revocation.
//!
//! Sessions are tracked in the `user_sessions` table keyed by JTI, so
//! tokens can be revoked before they expire. The refresh token is the
//! parent session; its access token is a child row.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::TokenPair;
use crate::error::ApiResult;

/// Maximum concurrent refresh sessions per user. Past the limit the
/// oldest session is revoked rather than rejecting the login.
const MAX_SESSIONS_PER_USER: i64 = 10;

/// Save both halves of a fresh token pair.
///
/// Called immediately after generating the pair; storing the JTIs is what
/// makes later revocation possible.
pub async fn save_session(
    pool: &PgPool,
    user_id: Uuid,
    pair: &TokenPair,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;

    let session_count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM user_sessions
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND expires_at > NOW()
          AND token_type = 'refresh'
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    if session_count.0 >= MAX_SESSIONS_PER_USER {
        tracing::info!(
            user_id = %user_id,
            current_sessions = session_count.0,
            max_sessions = MAX_SESSIONS_PER_USER,
            "Revoking oldest session due to max sessions limit"
        );

        sqlx::query(
            r#"
            UPDATE user_sessions
            SET revoked_at = NOW(),
                revocation_reason = 'max_sessions_exceeded'
            WHERE id IN (
                SELECT id FROM user_sessions
                WHERE user_id = $1
                  AND revoked_at IS NULL
                  AND token_type = 'refresh'
                ORDER BY created_at ASC
                LIMIT 1
            )
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    let refresh_session_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO user_sessions (user_id, jti, expires_at, ip_address, user_agent, token_type)
        VALUES ($1, $2, $3, $4, $5, 'refresh')
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(&pair.refresh_jti)
    .bind(pair.refresh_expires_at)
    .bind(ip_address)
    .bind(user_agent)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO user_sessions
            (user_id, jti, expires_at, ip_address, user_agent, token_type, parent_session_id)
        VALUES ($1, $2, $3, $4, $5, 'access', $6)
        "#,
    )
    .bind(user_id)
    .bind(&pair.access_jti)
    .bind(pair.access_expires_at)
    .bind(ip_address)
    .bind(user_agent)
    .bind(refresh_session_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Whether a JTI is live: exists, owned by the expected user, not revoked,
/// not expired. Run by the middleware on every authenticated request.
pub async fn is_session_valid(pool: &PgPool, jti: &str, expected_user_id: Uuid) -> ApiResult<bool> {
    let result: Option<(bool,)> = sqlx::query_as(
        r#"
        SELECT TRUE
        FROM user_sessions
        WHERE jti = $1
          AND user_id = $2
          AND revoked_at IS NULL
          AND expires_at > NOW()
        "#,
    )
    .bind(jti)
    .bind(expected_user_id)
    .fetch_optional(pool)
    .await?;

    Ok(result.is_some())
}

/// Revoke one session by JTI. Returns whether anything was revoked.
pub async fn revoke_session(pool: &PgPool, jti: &str, reason: &str) -> ApiResult<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = $2
        WHERE jti = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(jti)
    .bind(reason)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Revoke every session a user holds: password change, suspension, or an
/// admin-forced logout.
pub async fn revoke_all_sessions(pool: &PgPool, user_id: Uuid, reason: &str) -> ApiResult<u64> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE user_sessions
        SET revoked_at = NOW(),
            revocation_reason = $2
        WHERE user_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(user_id)
    .bind(reason)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected)
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct UserSession {
    pub id: Uuid,
    pub jti: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Active refresh sessions for a user, newest first.
pub async fn list_sessions(pool: &PgPool, user_id: Uuid) -> ApiResult<Vec<UserSession>> {
    let sessions = sqlx::query_as::<_, UserSession>(
        r#"
        SELECT id, jti, created_at, expires_at, ip_address, user_agent
        FROM user_sessions
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND expires_at > NOW()
          AND token_type = 'refresh'
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(sessions)
}

/// Delete long-dead session rows. Run daily by the worker.
pub async fn purge_stale(pool: &PgPool, older_than_days: i32) -> ApiResult<u64> {
    let rows = sqlx::query(
        r#"
        DELETE FROM user_sessions
        WHERE (revoked_at IS NOT NULL OR expires_at < NOW())
          AND created_at < NOW() - ($1 || ' days')::INTERVAL
        "#,
    )
    .bind(older_than_days)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows)
}
