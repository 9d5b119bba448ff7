//! Support ticket routes.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use leadforge_shared::TicketStatus;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Short human-friendly code quoted in support conversations.
    pub reference: String,
    pub subject: String,
    pub body: String,
    pub status: TicketStatus,
    pub reply: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub reply: String,
}

#[derive(Debug, Deserialize)]
pub struct TicketListQuery {
    pub status: Option<TicketStatus>,
}

fn new_reference() -> String {
    let code: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("TKT-{}", code.to_uppercase())
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateTicketRequest>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    if body.subject.trim().is_empty() || body.body.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "subject and body are required".to_string(),
        ));
    }

    let ticket = sqlx::query_as::<_, Ticket>(
        r#"
        INSERT INTO support_tickets (user_id, reference, subject, body, status)
        VALUES ($1, $2, $3, $4, 'open')
        RETURNING id, user_id, reference, subject, body, status, reply,
                  created_at, updated_at
        "#,
    )
    .bind(user.user_id)
    .bind(new_reference())
    .bind(body.subject.trim())
    .bind(body.body.trim())
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(ticket_id = %ticket.id, user_id = %user.user_id, "Support ticket opened");

    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_own(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Ticket>>> {
    let tickets = sqlx::query_as::<_, Ticket>(
        r#"
        SELECT id, user_id, reference, subject, body, status, reply,
               created_at, updated_at
        FROM support_tickets
        WHERE user_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(tickets))
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<Ticket>> {
    let ticket = load_ticket(&state, ticket_id).await?;
    if ticket.user_id != user.user_id && !user.role.is_staff() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(ticket))
}

pub async fn list_all(
    State(state): State<AppState>,
    Query(query): Query<TicketListQuery>,
) -> ApiResult<Json<Vec<Ticket>>> {
    let tickets = match query.status {
        Some(status) => {
            sqlx::query_as::<_, Ticket>(
                r#"
                SELECT id, user_id, reference, subject, body, status, reply,
                       created_at, updated_at
                FROM support_tickets
                WHERE status = $1
                ORDER BY created_at ASC
                "#,
            )
            .bind(status)
            .fetch_all(&state.pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Ticket>(
                r#"
                SELECT id, user_id, reference, subject, body, status, reply,
                       created_at, updated_at
                FROM support_tickets
                ORDER BY created_at ASC
                "#,
            )
            .fetch_all(&state.pool)
            .await?
        }
    };

    Ok(Json(tickets))
}

pub async fn reply(
    State(state): State<AppState>,
    Extension(staff): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
    Json(body): Json<ReplyRequest>,
) -> ApiResult<Json<Ticket>> {
    if body.reply.trim().is_empty() {
        return Err(ApiError::BadRequest("reply is required".to_string()));
    }

    let ticket = sqlx::query_as::<_, Ticket>(
        r#"
        UPDATE support_tickets
        SET reply = $2, status = 'answered', updated_at = NOW()
        WHERE id = $1
          AND status <> 'closed'
        RETURNING id, user_id, reference, subject, body, status, reply,
                  created_at, updated_at
        "#,
    )
    .bind(ticket_id)
    .bind(body.reply.trim())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::Conflict("ticket is closed or does not exist".to_string()))?;

    tracing::info!(
        ticket_id = %ticket.id,
        staff_id = %staff.user_id,
        "Support ticket answered"
    );

    Ok(Json(ticket))
}

pub async fn close(
    State(state): State<AppState>,
    Extension(staff): Extension<AuthUser>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let rows = sqlx::query(
        r#"
        UPDATE support_tickets
        SET status = 'closed', updated_at = NOW()
        WHERE id = $1
          AND status <> 'closed'
        "#,
    )
    .bind(ticket_id)
    .execute(&state.pool)
    .await?
    .rows_affected();

    if rows == 0 {
        return Err(ApiError::NotFound);
    }

    tracing::info!(ticket_id = %ticket_id, staff_id = %staff.user_id, "Support ticket closed");

    Ok(Json(json!({ "success": true })))
}

async fn load_ticket(state: &AppState, ticket_id: Uuid) -> ApiResult<Ticket> {
    let ticket = sqlx::query_as::<_, Ticket>(
        r#"
        SELECT id, user_id, reference, subject, body, status, reply,
               created_at, updated_at
        FROM support_tickets
        WHERE id = $1
        "#,
    )
    .bind(ticket_id)
    .fetch_optional(&state.pool)
    .await?;

    ticket.ok_or(ApiError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_format() {
        let reference = new_reference();
        assert!(reference.starts_with("TKT-"));
        assert_eq!(reference.len(), 10);
        assert!(reference[4..]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_references_are_unique_enough() {
        let a = new_reference();
        let b = new_reference();
        assert_ne!(a, b);
    }
}
