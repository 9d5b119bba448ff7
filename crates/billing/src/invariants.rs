//! Billing invariants.
//!
//! Runnable consistency checks over the coin ledger and subscription
//! state. Each invariant is a real SQL query that only reads, and every
//! violation carries enough context to debug the affected accounts. The
//! worker runs the full set daily; admins can trigger it on demand.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - users may be charged or credited incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    user_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct NegativeBalanceRow {
    user_id: Uuid,
    email: String,
    lead_coins: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct OverAllotmentRow {
    user_id: Uuid,
    subscription_id: Uuid,
    lead_coins_left: i64,
    plan_allotment: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct UncreditedSessionRow {
    user_id: Uuid,
    session_id: Uuid,
    coins: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct StalePendingSessionRow {
    user_id: Uuid,
    session_id: Uuid,
    status: String,
    expires_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerDriftRow {
    user_id: Uuid,
    lead_coins: i64,
    ledger_balance: i64,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_active_subscription().await?);
        violations.extend(self.check_no_negative_balance().await?);
        violations.extend(self.check_coins_left_within_allotment().await?);
        violations.extend(self.check_credited_sessions_have_ledger_entry().await?);
        violations.extend(self.check_no_stale_pending_sessions().await?);
        violations.extend(self.check_ledger_matches_balance().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most 1 active, payment-verified subscription per user
    ///
    /// Two live subscriptions would double-grant allotments and make the
    /// balance reconciliation ambiguous.
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) as sub_count
            FROM user_subscriptions
            WHERE status = 'active'
              AND payment_verified = TRUE
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User has {} active verified subscriptions (expected at most 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Balances never go negative
    ///
    /// The debit path checks funds under a row lock and the column carries
    /// a CHECK constraint; a negative balance means a write bypassed both.
    async fn check_no_negative_balance(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeBalanceRow> = sqlx::query_as(
            r#"
            SELECT id as user_id, email, lead_coins
            FROM users
            WHERE lead_coins < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_negative_balance".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User '{}' has negative balance {}",
                    row.email, row.lead_coins
                ),
                context: serde_json::json!({
                    "email": row.email,
                    "lead_coins": row.lead_coins,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Remaining allotment never exceeds the plan's grant
    async fn check_coins_left_within_allotment(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OverAllotmentRow> = sqlx::query_as(
            r#"
            SELECT s.user_id, s.id as subscription_id,
                   s.lead_coins_left, p.lead_coins as plan_allotment
            FROM user_subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.status = 'active'
              AND s.lead_coins_left > p.lead_coins
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "coins_left_within_allotment".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Subscription has {} coins left against an allotment of {}",
                    row.lead_coins_left, row.plan_allotment
                ),
                context: serde_json::json!({
                    "subscription_id": row.subscription_id,
                    "lead_coins_left": row.lead_coins_left,
                    "plan_allotment": row.plan_allotment,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Every credited session has its ledger entry
    ///
    /// Fulfilment writes the session transition and the ledger row in one
    /// transaction; a credited session without a ledger row means a user
    /// paid and received nothing.
    async fn check_credited_sessions_have_ledger_entry(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UncreditedSessionRow> = sqlx::query_as(
            r#"
            SELECT ps.user_id, ps.session_id, ps.coins
            FROM payment_sessions ps
            WHERE ps.status = 'credited'
              AND NOT EXISTS (
                  SELECT 1 FROM coin_transactions ct
                  WHERE ct.user_id = ps.user_id
                    AND ct.reference = ps.session_id::TEXT
                    AND ct.amount > 0
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "credited_sessions_have_ledger_entry".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Credited session {} has no matching ledger entry for {} coins",
                    row.session_id, row.coins
                ),
                context: serde_json::json!({
                    "session_id": row.session_id,
                    "coins": row.coins,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: No live session past its lifetime
    ///
    /// The sweep job and the expiry-first verification rule should retire
    /// these; a survivor past the grace window means neither ran.
    async fn check_no_stale_pending_sessions(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StalePendingSessionRow> = sqlx::query_as(
            r#"
            SELECT user_id, session_id, status::TEXT as status, expires_at
            FROM payment_sessions
            WHERE status IN ('created', 'paid')
              AND expires_at < NOW() - INTERVAL '1 hour'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_stale_pending_sessions".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Session {} still '{}' {} after its expiry",
                    row.session_id, row.status, row.expires_at
                ),
                context: serde_json::json!({
                    "session_id": row.session_id,
                    "status": row.status,
                    "expires_at": row.expires_at.to_string(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 6: Latest ledger entry agrees with the live balance
    async fn check_ledger_matches_balance(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<LedgerDriftRow> = sqlx::query_as(
            r#"
            SELECT u.id as user_id, u.lead_coins, ct.balance_after as ledger_balance
            FROM users u
            JOIN LATERAL (
                SELECT balance_after
                FROM coin_transactions
                WHERE user_id = u.id
                ORDER BY created_at DESC, id DESC
                LIMIT 1
            ) ct ON TRUE
            WHERE u.lead_coins <> ct.balance_after
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "ledger_matches_balance".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Live balance {} disagrees with latest ledger entry {}",
                    row.lead_coins, row.ledger_balance
                ),
                context: serde_json::json!({
                    "lead_coins": row.lead_coins,
                    "ledger_balance": row.ledger_balance,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_active_subscription" => self.check_single_active_subscription().await,
            "no_negative_balance" => self.check_no_negative_balance().await,
            "coins_left_within_allotment" => self.check_coins_left_within_allotment().await,
            "credited_sessions_have_ledger_entry" => {
                self.check_credited_sessions_have_ledger_entry().await
            }
            "no_stale_pending_sessions" => self.check_no_stale_pending_sessions().await,
            "ledger_matches_balance" => self.check_ledger_matches_balance().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_active_subscription",
            "no_negative_balance",
            "coins_left_within_allotment",
            "credited_sessions_have_ledger_entry",
            "no_stale_pending_sessions",
            "ledger_matches_balance",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"single_active_subscription"));
        assert!(checks.contains(&"ledger_matches_balance"));
    }
}
