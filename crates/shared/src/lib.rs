// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LeadForge Shared
//!
//! Types and infrastructure shared between the API server, the billing
//! crate, and the background worker: database pool construction, the core
//! domain enums, the request rate limiter, and the query cache.

pub mod cache;
pub mod db;
pub mod rate_limit;
pub mod types;

pub use cache::{CacheEvent, QueryCache};
pub use db::{create_migration_pool, create_pool, run_migrations};
pub use rate_limit::{RateLimitError, RateLimitResult, RateLimiter};
pub use types::{
    CoinTransactionKind, PaymentSessionKind, PaymentSessionStatus, Role, SubscriptionStatus,
    TicketStatus,
};
