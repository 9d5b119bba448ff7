//! Balance reconciliation.
//!
//! Produces the "percent of allotment consumed" figure shown on the
//! account dashboard. Two counters move independently: the user's global
//! spendable balance (`users.lead_coins`) and the plan-scoped
//! `lead_coins_left` of the current subscription. Neither is a single
//! source of truth on its own, so the summary is re-derived from the
//! freshest values on every read instead of being persisted.

use serde::Serialize;

/// Derived usage figures for the current allotment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    /// Allotment baseline the percentage is computed against.
    pub total: i64,
    /// Coins consumed out of `total`.
    pub used: i64,
    /// Rounded, clamped to [0, 100].
    pub percent: u8,
}

impl UsageSummary {
    /// Derive the summary from the user's live balance and the nominal
    /// allotment of the current plan, if any.
    ///
    /// The baseline is `max(plan allotment, live balance)`: an admin grant
    /// mid-period can push the balance above the plan's nominal allotment,
    /// and a stale baseline smaller than the balance would otherwise
    /// produce a negative "used" figure.
    pub fn derive(user_coins: i64, plan_allotment: Option<i64>) -> Self {
        let user_coins = user_coins.max(0);

        let Some(allotment) = plan_allotment else {
            // No active subscription: nothing is "consumed". The baseline
            // falls back to the raw balance, or 100 when that is zero so
            // downstream progress bars never divide by zero.
            let total = if user_coins == 0 { 100 } else { user_coins };
            return Self {
                total,
                used: 0,
                percent: 0,
            };
        };

        let total = allotment.max(user_coins);
        if total <= 0 {
            return Self {
                total: 0,
                used: 0,
                percent: 0,
            };
        }

        let used = total - user_coins;
        let percent = ((used * 100 + total / 2) / total).clamp(0, 100) as u8;

        Self {
            total,
            used,
            percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_always_in_range() {
        for coins in [0, 1, 30, 70, 100, 150, 10_000] {
            for allotment in [None, Some(0), Some(1), Some(100), Some(10_000)] {
                let summary = UsageSummary::derive(coins, allotment);
                assert!(
                    summary.percent <= 100,
                    "percent {} out of range for coins={coins} allotment={allotment:?}",
                    summary.percent
                );
                assert!(summary.used >= 0, "used must never go negative");
            }
        }
    }

    #[test]
    fn test_plan_100_after_spending_30() {
        // Plan grants 100 coins; 30 were spent viewing leads.
        let summary = UsageSummary::derive(70, Some(100));
        assert_eq!(summary.total, 100);
        assert_eq!(summary.used, 30);
        assert_eq!(summary.percent, 30);
    }

    #[test]
    fn test_balance_increase_never_raises_percent() {
        // A coin purchase with no subscription change must not push the
        // usage percentage up.
        let mut last = UsageSummary::derive(40, Some(100)).percent;
        for coins in 41..=200 {
            let percent = UsageSummary::derive(coins, Some(100)).percent;
            assert!(
                percent <= last,
                "percent rose from {last} to {percent} at coins={coins}"
            );
            last = percent;
        }
    }

    #[test]
    fn test_admin_grant_above_allotment() {
        // Balance above the nominal allotment: baseline follows the
        // balance and consumption reads as zero.
        let summary = UsageSummary::derive(150, Some(100));
        assert_eq!(summary.total, 150);
        assert_eq!(summary.used, 0);
        assert_eq!(summary.percent, 0);
    }

    #[test]
    fn test_fully_consumed() {
        let summary = UsageSummary::derive(0, Some(100));
        assert_eq!(summary.percent, 100);
        assert_eq!(summary.used, 100);
    }

    #[test]
    fn test_no_subscription_defaults() {
        let summary = UsageSummary::derive(0, None);
        assert_eq!(summary.total, 100, "Zero balance falls back to 100");
        assert_eq!(summary.percent, 0);

        let summary = UsageSummary::derive(55, None);
        assert_eq!(summary.total, 55);
        assert_eq!(summary.used, 0);
        assert_eq!(summary.percent, 0);
    }

    #[test]
    fn test_rounding_is_nearest() {
        // 1 of 3 consumed: 33.33% rounds to 33; 2 of 3: 66.67% rounds to 67.
        assert_eq!(UsageSummary::derive(2, Some(3)).percent, 33);
        assert_eq!(UsageSummary::derive(1, Some(3)).percent, 67);
    }

    #[test]
    fn test_negative_balance_treated_as_zero() {
        // The DB constraint forbids negative balances; the clamp covers a
        // stale cached value that slipped below zero anyway.
        let summary = UsageSummary::derive(-5, Some(100));
        assert_eq!(summary.percent, 100);
    }
}
