//! Subscription and coin purchase routes.
//!
//! These endpoints keep the SPA's wire contract: camelCase field names,
//! `subscriptionId` in purchase bodies (also for coin packages), and the
//! polymorphic verify-payment envelope, rendered here from the tagged
//! verification outcome.

use axum::extract::{Extension, Query, State};
use axum::Json;
use leadforge_billing::{
    CoinPackage, CoinTransaction, PaymentSession, Plan, UsageSummary, VerificationOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Checkout attempts per user per minute.
const CHECKOUT_RATE_LIMIT: i64 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    /// Plan id for `/purchase`; package id for `/buy-coins` (the SPA has
    /// always sent it under this name for both).
    pub subscription_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    pub session_id: Uuid,
    /// Advisory only; the server-side package amount is authoritative.
    #[allow(dead_code)]
    pub coins: Option<i64>,
}

/// Client-facing payment session envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSessionEnvelope {
    pub session_id: Uuid,
    pub client_secret: Option<String>,
    pub payment_url: Option<String>,
    pub qr_code_data_url: Option<String>,
    /// Epoch seconds.
    pub expires_at: i64,
    pub amount_cents: i64,
    pub coins: i64,
}

impl From<PaymentSession> for PaymentSessionEnvelope {
    fn from(session: PaymentSession) -> Self {
        Self {
            session_id: session.session_id,
            client_secret: session.client_secret,
            payment_url: session.payment_url,
            qr_code_data_url: session.qr_code_data_url,
            expires_at: session.expires_at.unix_timestamp(),
            amount_cents: session.amount_cents,
            coins: session.coins,
        }
    }
}

pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    Ok(Json(state.billing.subscriptions.list_active_plans().await?))
}

pub async fn list_packages(State(state): State<AppState>) -> ApiResult<Json<Vec<CoinPackage>>> {
    Ok(Json(state.billing.packages.list_active().await?))
}

async fn check_checkout_rate(state: &AppState, user_id: Uuid) -> ApiResult<()> {
    let result = state
        .rate_limiter
        .check(user_id, "checkout", CHECKOUT_RATE_LIMIT)
        .await
        .map_err(|e| ApiError::Internal(format!("rate limiter unavailable: {e}")))?;

    if !result.allowed {
        return Err(ApiError::RateLimited {
            retry_after: result.retry_after_seconds.unwrap_or(60),
        });
    }
    Ok(())
}

pub async fn purchase(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<PurchaseRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    check_checkout_rate(&state, user.user_id).await?;

    let plan = state
        .billing
        .subscriptions
        .get_active_plan(body.subscription_id)
        .await?;

    let session = state
        .billing
        .checkout
        .create_plan_session(user.user_id, &user.email, &plan)
        .await?;

    Ok(Json(json!({
        "paymentSession": PaymentSessionEnvelope::from(session),
    })))
}

pub async fn buy_coins(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<PurchaseRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    check_checkout_rate(&state, user.user_id).await?;

    let package = state
        .billing
        .packages
        .get_active(body.subscription_id)
        .await?;

    let session = state
        .billing
        .checkout
        .create_package_session(user.user_id, &user.email, &package)
        .await?;

    let envelope = PaymentSessionEnvelope::from(session);

    Ok(Json(json!({
        "sessionId": envelope.session_id,
        "url": envelope.payment_url,
        "paymentSession": envelope,
    })))
}

/// Poll one verification attempt for a session the caller owns.
///
/// The response envelope is a serialization of the tagged outcome:
/// exactly one of the terminal/non-terminal shapes, never a mixture.
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<VerifyQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    // Ownership check before anything else; session ids are bearer-ish.
    let session = leadforge_billing::sessions::load(&state.pool, query.session_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;
    if session.user_id != user.user_id {
        return Err(ApiError::NotFound);
    }

    let outcome = state.billing.verification.check(query.session_id).await?;

    let response = match outcome {
        VerificationOutcome::Verified {
            kind: _,
            coins_credited,
            subscription_id,
        } => {
            // Everything balance-derived for this user is stale now.
            state
                .cache
                .invalidate_prefix(&format!("user:{}:", user.user_id))
                .await;

            let user_subscription = match subscription_id {
                Some(_) => state
                    .billing
                    .subscriptions
                    .current(user.user_id)
                    .await?
                    .map(|(sub, plan)| json!({ "subscription": sub, "plan": plan })),
                None => None,
            };

            json!({
                "verified": true,
                "userSubscription": user_subscription,
                "coinPurchase": if subscription_id.is_none() {
                    Some(json!({ "coins": coins_credited }))
                } else {
                    None
                },
            })
        }
        VerificationOutcome::Processing => json!({
            "verified": false,
            "sessionStatus": "paid",
        }),
        VerificationOutcome::Pending => json!({
            "verified": false,
            "pending": true,
        }),
        VerificationOutcome::Expired => json!({
            "verified": false,
            "sessionStatus": "expired",
        }),
        VerificationOutcome::Failed(reason) => json!({
            "verified": false,
            "error": reason,
        }),
    };

    Ok(Json(response))
}

pub async fn current(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let balance = state.billing.ledger.balance(user.user_id).await?;
    let current = state.billing.subscriptions.current(user.user_id).await?;
    let usage = UsageSummary::derive(
        balance,
        current.as_ref().map(|(_, plan)| plan.lead_coins),
    );

    Ok(Json(json!({
        "subscription": current.as_ref().map(|(sub, _)| sub),
        "plan": current.as_ref().map(|(_, plan)| plan),
        "leadCoins": balance,
        "usage": usage,
    })))
}

pub async fn transactions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<CoinTransaction>>> {
    Ok(Json(state.billing.ledger.history(user.user_id, 100).await?))
}
