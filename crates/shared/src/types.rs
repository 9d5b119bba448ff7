//! Core domain enums.
//!
//! Each enum maps to a Postgres enum type of the same (snake_case) name,
//! created in the initial migration.

use serde::{Deserialize, Serialize};

/// Account role. Subadmins can manage leads and support tickets but not
/// users, plans, or coin balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Subadmin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Subadmin => "subadmin",
            Role::User => "user",
        }
    }

    /// Whether this role may manage leads and tickets.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Subadmin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a purchased subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a payment session.
///
/// `Paid` means the gateway confirmed payment but fulfilment has not run
/// yet; `Credited` is the terminal success state after coins/subscription
/// were granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentSessionStatus {
    Created,
    Paid,
    Credited,
    Expired,
    Failed,
}

impl PaymentSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSessionStatus::Created => "created",
            PaymentSessionStatus::Paid => "paid",
            PaymentSessionStatus::Credited => "credited",
            PaymentSessionStatus::Expired => "expired",
            PaymentSessionStatus::Failed => "failed",
        }
    }

    /// Terminal states never change again; verification of a terminal
    /// session is an idempotent no-op.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentSessionStatus::Credited
                | PaymentSessionStatus::Expired
                | PaymentSessionStatus::Failed
        )
    }
}

impl std::fmt::Display for PaymentSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a payment session purchases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_session_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentSessionKind {
    Subscription,
    CoinPackage,
}

impl PaymentSessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSessionKind::Subscription => "subscription",
            PaymentSessionKind::CoinPackage => "coin_package",
        }
    }
}

/// Support ticket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Answered,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Answered => "answered",
            TicketStatus::Closed => "closed",
        }
    }
}

/// Kind of a coin ledger entry. Signed amounts: grants are positive,
/// `LeadView` and `AdminRemoval` are negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "coin_transaction_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CoinTransactionKind {
    Purchase,
    SubscriptionGrant,
    AdminGrant,
    AdminRemoval,
    LeadView,
}

impl CoinTransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoinTransactionKind::Purchase => "purchase",
            CoinTransactionKind::SubscriptionGrant => "subscription_grant",
            CoinTransactionKind::AdminGrant => "admin_grant",
            CoinTransactionKind::AdminRemoval => "admin_removal",
            CoinTransactionKind::LeadView => "lead_view",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_staff() {
        assert!(Role::Admin.is_staff());
        assert!(Role::Subadmin.is_staff());
        assert!(!Role::User.is_staff());
    }

    #[test]
    fn test_terminal_session_states() {
        assert!(!PaymentSessionStatus::Created.is_terminal());
        assert!(!PaymentSessionStatus::Paid.is_terminal());
        assert!(PaymentSessionStatus::Credited.is_terminal());
        assert!(PaymentSessionStatus::Expired.is_terminal());
        assert!(PaymentSessionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&CoinTransactionKind::SubscriptionGrant).unwrap(),
            "\"subscription_grant\""
        );
        assert_eq!(serde_json::to_string(&Role::Subadmin).unwrap(), "\"subadmin\"");
    }
}
