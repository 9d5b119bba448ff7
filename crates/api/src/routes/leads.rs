//! Lead routes.
//!
//! Contact details are the product: list and detail responses redact them
//! until the caller has unlocked the lead with a coin debit. Staff see
//! everything and manage the catalog under `/api/admin/leads`.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub title: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub price_coins: i64,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Listing row: contact fields omitted, unlock state included.
#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSummary {
    pub id: Uuid,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub price_coins: i64,
    pub description: Option<String>,
    pub unlocked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct LeadListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadParams {
    pub title: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub price_coins: i64,
    pub description: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<LeadListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * limit;
    let search = query
        .search
        .as_deref()
        .map(|s| format!("%{}%", s.trim()))
        .unwrap_or_else(|| "%".to_string());

    let leads = sqlx::query_as::<_, LeadSummary>(
        r#"
        SELECT l.id, l.title, l.company, l.location, l.price_coins, l.description,
               EXISTS (
                   SELECT 1 FROM lead_views v
                   WHERE v.lead_id = l.id AND v.user_id = $1
               ) AS unlocked,
               l.created_at
        FROM leads l
        WHERE l.active = TRUE
          AND (l.title ILIKE $2 OR l.company ILIKE $2 OR l.location ILIKE $2)
        ORDER BY l.created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(user.user_id)
    .bind(&search)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM leads l
        WHERE l.active = TRUE
          AND (l.title ILIKE $1 OR l.company ILIKE $1 OR l.location ILIKE $1)
        "#,
    )
    .bind(&search)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(json!({
        "leads": leads,
        "total": total,
        "page": page,
        "limit": limit,
    })))
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let lead = load_lead(&state, lead_id).await?;
    if !lead.active && !user.role.is_staff() {
        return Err(ApiError::NotFound);
    }

    let unlocked: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM lead_views WHERE lead_id = $1 AND user_id = $2)",
    )
    .bind(lead_id)
    .bind(user.user_id)
    .fetch_one(&state.pool)
    .await?;

    if unlocked || user.role.is_staff() {
        Ok(Json(json!({ "lead": lead, "unlocked": true })))
    } else {
        // Same shape as the full lead, with the contact fields withheld.
        let mut redacted = serde_json::to_value(&lead)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if let Some(map) = redacted.as_object_mut() {
            map.remove("contactName");
            map.remove("contactEmail");
            map.remove("contactPhone");
        }
        Ok(Json(json!({ "lead": redacted, "unlocked": false })))
    }
}

/// Unlock a lead's contact details by spending coins. Idempotent: viewing
/// an already-unlocked lead charges nothing and returns the same data.
pub async fn view(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let lead = load_lead(&state, lead_id).await?;
    if !lead.active {
        return Err(ApiError::NotFound);
    }

    let charge = state
        .billing
        .ledger
        .debit_lead_view(user.user_id, lead_id, lead.price_coins)
        .await?;

    if charge.coins_charged > 0 {
        state
            .cache
            .invalidate_prefix(&format!("user:{}:", user.user_id))
            .await;
    }

    Ok(Json(json!({
        "lead": lead,
        "charge": charge,
    })))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<LeadParams>,
) -> ApiResult<(StatusCode, Json<Lead>)> {
    validate_params(&body)?;

    let lead = sqlx::query_as::<_, Lead>(
        r#"
        INSERT INTO leads
            (title, contact_name, contact_email, contact_phone, company,
             location, price_coins, description, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, title, contact_name, contact_email, contact_phone, company,
                  location, price_coins, description, created_by, active, created_at
        "#,
    )
    .bind(&body.title)
    .bind(&body.contact_name)
    .bind(&body.contact_email)
    .bind(&body.contact_phone)
    .bind(&body.company)
    .bind(&body.location)
    .bind(body.price_coins)
    .bind(&body.description)
    .bind(user.user_id)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(lead_id = %lead.id, created_by = %user.user_id, "Lead created");

    Ok((StatusCode::CREATED, Json(lead)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
    Json(body): Json<LeadParams>,
) -> ApiResult<Json<Lead>> {
    validate_params(&body)?;

    let lead = sqlx::query_as::<_, Lead>(
        r#"
        UPDATE leads
        SET title = $2, contact_name = $3, contact_email = $4, contact_phone = $5,
            company = $6, location = $7, price_coins = $8, description = $9,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, title, contact_name, contact_email, contact_phone, company,
                  location, price_coins, description, created_by, active, created_at
        "#,
    )
    .bind(lead_id)
    .bind(&body.title)
    .bind(&body.contact_name)
    .bind(&body.contact_email)
    .bind(&body.contact_phone)
    .bind(&body.company)
    .bind(&body.location)
    .bind(body.price_coins)
    .bind(&body.description)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::NotFound)?;

    Ok(Json(lead))
}

/// Soft delete; `lead_views` history keeps referencing the row.
pub async fn remove(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let rows = sqlx::query("UPDATE leads SET active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(lead_id)
        .execute(&state.pool)
        .await?
        .rows_affected();

    if rows == 0 {
        return Err(ApiError::NotFound);
    }

    Ok(Json(json!({ "success": true })))
}

async fn load_lead(state: &AppState, lead_id: Uuid) -> ApiResult<Lead> {
    let lead = sqlx::query_as::<_, Lead>(
        r#"
        SELECT id, title, contact_name, contact_email, contact_phone, company,
               location, price_coins, description, created_by, active, created_at
        FROM leads
        WHERE id = $1
        "#,
    )
    .bind(lead_id)
    .fetch_optional(&state.pool)
    .await?;

    lead.ok_or(ApiError::NotFound)
}

fn validate_params(params: &LeadParams) -> ApiResult<()> {
    if params.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    if !params.contact_email.contains('@') {
        return Err(ApiError::BadRequest(
            "contact email is invalid".to_string(),
        ));
    }
    if params.price_coins < 0 {
        return Err(ApiError::BadRequest(
            "price must not be negative".to_string(),
        ));
    }
    Ok(())
}
