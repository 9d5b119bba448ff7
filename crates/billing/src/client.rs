//! Stripe client wrapper and configuration.

use stripe::Currency;

use crate::error::{BillingError, BillingResult};

/// Stripe configuration loaded from the environment.
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Served to the SPA so it can initialize Stripe Elements.
    pub publishable_key: String,
    pub currency: Currency,
    /// Where hosted checkout redirects after payment. The SPA resumes
    /// verification from these pages.
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        let webhook_secret = require_env("STRIPE_WEBHOOK_SECRET")?;
        let publishable_key = require_env("STRIPE_PUBLIC_KEY")?;

        let currency = match std::env::var("BILLING_CURRENCY")
            .unwrap_or_else(|_| "usd".to_string())
            .to_lowercase()
            .as_str()
        {
            "usd" => Currency::USD,
            "eur" => Currency::EUR,
            "gbp" => Currency::GBP,
            "inr" => Currency::INR,
            other => {
                return Err(BillingError::Config(format!(
                    "unsupported BILLING_CURRENCY: {other}"
                )))
            }
        };

        let base_url = std::env::var("APP_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            secret_key,
            webhook_secret,
            publishable_key,
            currency,
            checkout_success_url: format!("{base_url}/payment/success"),
            checkout_cancel_url: format!("{base_url}/payment/cancelled"),
        })
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BillingError::Config(format!("{name} must be set")))
}

/// Thin wrapper owning the `stripe::Client` and its config.
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
