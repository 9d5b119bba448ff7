//! Stripe webhook endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Receives Stripe events. Authentication is the signature header; the
/// body must stay raw for verification, so this handler takes it as a
/// string rather than parsed JSON.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing Stripe-Signature header".to_string()))?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;

    tracing::info!(
        event_id = %event.id,
        event_type = %event.type_,
        "Stripe webhook received"
    );

    state.billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}
