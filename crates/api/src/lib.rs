// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! LeadForge API Library
//!
//! This crate contains the API server components for LeadForge:
//! authentication, lead management, subscription and coin purchase
//! endpoints, support tickets, CSV reporting, and the admin surface.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
