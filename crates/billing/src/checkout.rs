//! Payment session creation.
//!
//! Subscription plans go through hosted Stripe Checkout (the SPA shows the
//! payment URL and a QR code for handoff to a phone); coin packages create
//! a PaymentIntent whose client secret drives Stripe Elements in the modal.
//! Both paths record a `payment_sessions` row keyed by our own session id,
//! which is what the client polls against.

use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use leadforge_shared::PaymentSessionKind;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    CreatePaymentIntent, CreatePaymentIntentAutomaticPaymentMethods, PaymentIntent,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::packages::CoinPackage;
use crate::sessions::PaymentSession;
use crate::subscriptions::{Plan, SubscriptionService};

/// How long a payment session stays payable. Mirrored to Stripe for
/// checkout sessions so both sides expire together.
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Gateway rate-limit retries: capped linear backoff.
const CREATE_RETRY_ATTEMPTS: usize = 3;
const CREATE_RETRY_STEP_MS: u64 = 500;

#[derive(Clone)]
pub struct CheckoutService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Create a payment session for a subscription plan purchase. Also
    /// records the pending `user_subscriptions` row tied to the session.
    pub async fn create_plan_session(
        &self,
        user_id: Uuid,
        user_email: &str,
        plan: &Plan,
    ) -> BillingResult<PaymentSession> {
        let session_id = Uuid::new_v4();
        let expires_at = OffsetDateTime::now_utc() + SESSION_TTL;
        let session_ref = session_id.to_string();
        let config = self.stripe.config().clone();

        let mut metadata = HashMap::new();
        metadata.insert("session_id".to_string(), session_ref.clone());
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("plan_id".to_string(), plan.id.to_string());

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.customer_email = Some(user_email);
        params.client_reference_id = Some(&session_ref);
        params.success_url = Some(&config.checkout_success_url);
        params.cancel_url = Some(&config.checkout_cancel_url);
        params.expires_at = Some(expires_at.unix_timestamp());
        params.metadata = Some(metadata);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: config.currency,
                unit_amount: Some(plan.price_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: plan.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let client = self.stripe.inner().clone();
        let checkout = with_gateway_retry(
            || CheckoutSession::create(&client, params.clone()),
            is_rate_limited,
        )
        .await?;

        let payment_url = checkout
            .url
            .clone()
            .ok_or_else(|| BillingError::Gateway("checkout session has no url".to_string()))?;
        let qr_code_data_url = qr_data_url(&payment_url)?;

        let session = self
            .insert_session(
                session_id,
                user_id,
                PaymentSessionKind::Subscription,
                plan.id,
                checkout.id.as_str(),
                None,
                Some(&payment_url),
                Some(&qr_code_data_url),
                plan.price_cents,
                plan.lead_coins,
                expires_at,
            )
            .await?;

        SubscriptionService::new(self.pool.clone())
            .create_pending(user_id, plan, session_id)
            .await?;

        tracing::info!(
            session_id = %session_id,
            user_id = %user_id,
            plan_id = %plan.id,
            gateway_id = %checkout.id,
            "Plan payment session created"
        );

        Ok(session)
    }

    /// Create a payment session for a coin package purchase.
    pub async fn create_package_session(
        &self,
        user_id: Uuid,
        user_email: &str,
        package: &CoinPackage,
    ) -> BillingResult<PaymentSession> {
        let session_id = Uuid::new_v4();
        let expires_at = OffsetDateTime::now_utc() + SESSION_TTL;
        let config = self.stripe.config().clone();

        let mut metadata = HashMap::new();
        metadata.insert("session_id".to_string(), session_id.to_string());
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("package_id".to_string(), package.id.to_string());

        let mut params = CreatePaymentIntent::new(package.price_cents, config.currency);
        params.metadata = Some(metadata);
        params.receipt_email = Some(user_email);
        params.description = Some("LeadCoin package purchase");
        params.automatic_payment_methods = Some(CreatePaymentIntentAutomaticPaymentMethods {
            enabled: true,
            allow_redirects: None,
        });

        let client = self.stripe.inner().clone();
        let intent = with_gateway_retry(
            || PaymentIntent::create(&client, params.clone()),
            is_rate_limited,
        )
        .await?;

        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            BillingError::Gateway("payment intent has no client secret".to_string())
        })?;

        let session = self
            .insert_session(
                session_id,
                user_id,
                PaymentSessionKind::CoinPackage,
                package.id,
                intent.id.as_str(),
                Some(&client_secret),
                None,
                None,
                package.price_cents,
                package.lead_coins,
                expires_at,
            )
            .await?;

        tracing::info!(
            session_id = %session_id,
            user_id = %user_id,
            package_id = %package.id,
            gateway_id = %intent.id,
            "Coin package payment session created"
        );

        Ok(session)
    }

    #[allow(clippy::too_many_arguments)] // Column-per-argument insert
    async fn insert_session(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        kind: PaymentSessionKind,
        target_id: Uuid,
        gateway_id: &str,
        client_secret: Option<&str>,
        payment_url: Option<&str>,
        qr_code_data_url: Option<&str>,
        amount_cents: i64,
        coins: i64,
        expires_at: OffsetDateTime,
    ) -> BillingResult<PaymentSession> {
        let session = sqlx::query_as::<_, PaymentSession>(
            r#"
            INSERT INTO payment_sessions
                (session_id, user_id, kind, target_id, gateway_id, client_secret,
                 payment_url, qr_code_data_url, amount_cents, coins, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'created', $11)
            RETURNING session_id, user_id, kind, target_id, gateway_id, client_secret,
                      payment_url, qr_code_data_url, amount_cents, coins, status,
                      expires_at, created_at
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(kind)
        .bind(target_id)
        .bind(gateway_id)
        .bind(client_secret)
        .bind(payment_url)
        .bind(qr_code_data_url)
        .bind(amount_cents)
        .bind(coins)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }
}

/// Retry a gateway call on transient rate-limit errors with capped linear
/// backoff (500 ms, 1 s, 1.5 s). Anything else fails immediately.
pub(crate) async fn with_gateway_retry<T, E, F, Fut, P>(
    mut op: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let strategy =
        (1..=CREATE_RETRY_ATTEMPTS as u64).map(|i| Duration::from_millis(CREATE_RETRY_STEP_MS * i));

    tokio_retry::RetryIf::spawn(strategy, || op(), |e: &E| is_transient(e)).await
}

fn is_rate_limited(e: &stripe::StripeError) -> bool {
    matches!(e, stripe::StripeError::Stripe(req) if req.http_status == 429)
}

/// Render a payment URL as a PNG QR code data URL.
fn qr_data_url(url: &str) -> BillingResult<String> {
    let code = qrcode::QrCode::new(url.as_bytes())
        .map_err(|e| BillingError::Internal(format!("qr encode failed: {e}")))?;
    let png = code
        .render::<image::Luma<u8>>()
        .min_dimensions(240, 240)
        .build();

    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(png)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| BillingError::Internal(format!("qr render failed: {e}")))?;

    Ok(format!("data:image/png;base64,{}", BASE64.encode(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum FakeError {
        RateLimited,
        Fatal,
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let attempts = AtomicU32::new(0);

        let result = with_gateway_retry(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FakeError::RateLimited)
                    } else {
                        Ok("created")
                    }
                }
            },
            |e| *e == FakeError::RateLimited,
        )
        .await;

        assert_eq!(result, Ok("created"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_cap() {
        let attempts = AtomicU32::new(0);

        let result: Result<&str, FakeError> = with_gateway_retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::RateLimited) }
            },
            |e| *e == FakeError::RateLimited,
        )
        .await;

        assert_eq!(result, Err(FakeError::RateLimited));
        // Initial attempt plus the capped retries.
        assert_eq!(
            attempts.load(Ordering::SeqCst),
            1 + CREATE_RETRY_ATTEMPTS as u32
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_do_not_retry() {
        let attempts = AtomicU32::new(0);

        let result: Result<&str, FakeError> = with_gateway_retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::Fatal) }
            },
            |e| *e == FakeError::RateLimited,
        )
        .await;

        assert_eq!(result, Err(FakeError::Fatal));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_qr_data_url_shape() {
        let url = qr_data_url("https://checkout.stripe.com/c/pay/cs_test_123").unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert!(url.len() > 100, "Encoded PNG should not be empty");
    }
}
