//! Authentication module for LeadForge

#[cfg(test)]
mod edge_case_tests;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod sessions;

pub use jwt::{Claims, JwtManager, TokenPair, TokenType};
pub use middleware::{
    extract_client_ip_from_headers, require_admin, require_auth, require_staff, AuthState,
    AuthUser,
};
pub use password::{
    generate_impossible_hash, hash_password, validate_password_strength, verify_password,
};
