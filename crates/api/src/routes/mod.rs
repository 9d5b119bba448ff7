//! Route assembly.

pub mod admin;
pub mod auth;
pub mod leads;
pub mod reports;
pub mod subscriptions;
pub mod tickets;
pub mod webhooks;

use axum::{
    extract::State,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;

use crate::auth::{require_admin, require_auth, require_staff};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // No authentication: login/registration, public catalogs, the Stripe
    // webhook (authenticated by signature), and the SPA bootstrap config.
    let public = Router::new()
        .route("/api/health", get(health))
        .route("/api/config/public", get(public_config))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/subscriptions", get(subscriptions::list_plans))
        .route("/api/coin-packages", get(subscriptions::list_packages))
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook));

    // Any authenticated user.
    let authed = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/sessions", get(auth::list_sessions))
        .route("/api/subscriptions/purchase", post(subscriptions::purchase))
        .route("/api/subscriptions/buy-coins", post(subscriptions::buy_coins))
        .route(
            "/api/subscriptions/verify-payment",
            get(subscriptions::verify_payment),
        )
        .route("/api/subscriptions/current", get(subscriptions::current))
        .route("/api/coins/transactions", get(subscriptions::transactions))
        .route("/api/leads", get(leads::list))
        .route("/api/leads/{id}", get(leads::detail))
        .route("/api/leads/{id}/view", post(leads::view))
        .route("/api/tickets", get(tickets::list_own).post(tickets::create))
        .route("/api/tickets/{id}", get(tickets::detail));

    // Admins and subadmins: lead management, ticket handling, lead export.
    let staff = Router::new()
        .route("/api/admin/leads", post(leads::create))
        .route("/api/admin/leads/{id}", put(leads::update))
        .route("/api/admin/leads/{id}", delete(leads::remove))
        .route("/api/admin/tickets", get(tickets::list_all))
        .route("/api/admin/tickets/{id}/reply", post(tickets::reply))
        .route("/api/admin/tickets/{id}/close", post(tickets::close))
        .route("/api/reports/leads.csv", get(reports::leads_csv))
        .route_layer(middleware::from_fn(require_staff));

    // Admins only: user and catalog management, coin adjustments,
    // invariants, financial export.
    let admin = Router::new()
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users/{id}", get(admin::user_detail))
        .route("/api/admin/users/{id}/suspend", post(admin::suspend_user))
        .route(
            "/api/admin/users/{id}/unsuspend",
            post(admin::unsuspend_user),
        )
        .route("/api/admin/users/{id}/coins", post(admin::adjust_coins))
        .route(
            "/api/admin/plans",
            get(admin::list_plans).post(admin::create_plan),
        )
        .route(
            "/api/admin/plans/{id}",
            put(admin::update_plan).delete(admin::deactivate_plan),
        )
        .route(
            "/api/admin/packages",
            get(admin::list_packages).post(admin::create_package),
        )
        .route(
            "/api/admin/packages/{id}",
            put(admin::update_package).delete(admin::deactivate_package),
        )
        .route(
            "/api/admin/billing/invariants",
            get(admin::run_invariants),
        )
        .route(
            "/api/reports/transactions.csv",
            get(reports::transactions_csv),
        )
        .route_layer(middleware::from_fn(require_admin));

    let protected = authed
        .merge(staff)
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    public.merge(protected).with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Configuration the SPA needs before login, notably the Stripe
/// publishable key for Elements.
async fn public_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "stripePublishableKey": state.billing.publishable_key(),
    }))
}
