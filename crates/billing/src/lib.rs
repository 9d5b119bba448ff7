// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Payment session inserts are column-per-argument
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LeadForge Billing Module
//!
//! Handles Stripe integration for subscription plans and LeadCoin
//! purchases, and owns the coin ledger those purchases feed.
//!
//! ## Features
//!
//! - **Payment Sessions**: Hosted checkout for plans, PaymentIntents for
//!   coin packages, with QR handoff and a bounded lifetime
//! - **Verification**: Idempotent session verification with a tagged
//!   outcome, and a single-timer polling state machine to drive it
//! - **Coin Ledger**: Audited balance mutations (grants, purchases,
//!   lead-view debits) with per-entry running balances
//! - **Subscriptions**: Plan templates, activation, expiry
//! - **Webhooks**: Stripe event handling with atomic idempotency
//! - **Invariants**: Runnable consistency checks over the ledger

pub mod balance;
pub mod checkout;
pub mod client;
pub mod error;
pub mod invariants;
pub mod ledger;
pub mod packages;
pub mod poller;
pub mod sessions;
pub mod subscriptions;
pub mod verification;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Balance reconciliation
pub use balance::UsageSummary;

// Checkout
pub use checkout::{CheckoutService, SESSION_TTL};

// Client
pub use client::{StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{CoinLedger, CoinTransaction, LeadViewCharge};

// Packages
pub use packages::{CoinPackage, PackageParams, PackageService};

// Poller
pub use poller::{PollState, PollerConfig, PollerHandle, VerificationPoller, Verify};

// Sessions
pub use sessions::PaymentSession;

// Subscriptions
pub use subscriptions::{Plan, PlanParams, SubscriptionService, UserSubscription};

// Verification
pub use verification::{VerificationOutcome, VerificationService};

// Webhooks
pub use webhooks::WebhookHandler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub invariants: InvariantChecker,
    pub ledger: CoinLedger,
    pub packages: PackageService,
    pub subscriptions: SubscriptionService,
    pub verification: VerificationService,
    pub webhooks: WebhookHandler,
    stripe: StripeClient,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_client(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_client(StripeClient::new(config), pool)
    }

    fn with_client(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            ledger: CoinLedger::new(pool.clone()),
            packages: PackageService::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool.clone()),
            verification: VerificationService::new(stripe.clone(), pool.clone()),
            webhooks: WebhookHandler::new(stripe.clone(), pool),
            stripe,
        }
    }

    /// Publishable key the SPA needs to initialize Stripe Elements.
    pub fn publishable_key(&self) -> &str {
        &self.stripe.config().publishable_key
    }

    /// A poller over this service's verifier with the default cadence.
    pub fn poller(&self) -> VerificationPoller<VerificationService> {
        VerificationPoller::new(
            std::sync::Arc::new(self.verification.clone()),
            PollerConfig::default(),
        )
    }
}
