// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing System
//!
//! Tests critical boundary conditions in:
//! - Balance reconciliation (LF-B01 to LF-B07)
//! - Verification polling (LF-P01 to LF-P05)
//! - Outcome classification (LF-V01 to LF-V03)

#[cfg(test)]
mod balance_tests {
    use crate::balance::UsageSummary;

    // =========================================================================
    // LF-B01: Baseline consumption scenario - plan 100, 30 spent
    // =========================================================================
    #[test]
    fn test_plan_consumption_baseline() {
        let summary = UsageSummary::derive(70, Some(100));
        assert_eq!((summary.total, summary.used, summary.percent), (100, 30, 30));
    }

    // =========================================================================
    // LF-B02: Exact boundary - untouched allotment reads 0%
    // =========================================================================
    #[test]
    fn test_untouched_allotment() {
        let summary = UsageSummary::derive(100, Some(100));
        assert_eq!(summary.percent, 0);
        assert_eq!(summary.used, 0);
    }

    // =========================================================================
    // LF-B03: Exact boundary - fully drained allotment reads 100%
    // =========================================================================
    #[test]
    fn test_drained_allotment() {
        let summary = UsageSummary::derive(0, Some(100));
        assert_eq!(summary.percent, 100);
    }

    // =========================================================================
    // LF-B04: Coin purchase mid-period lowers the percentage
    // =========================================================================
    #[test]
    fn test_purchase_lowers_percentage() {
        let before = UsageSummary::derive(40, Some(100));
        // A 50-coin package lands without any subscription change.
        let after = UsageSummary::derive(90, Some(100));
        assert!(after.percent < before.percent);
    }

    // =========================================================================
    // LF-B05: Zero-coin plan never divides by zero
    // =========================================================================
    #[test]
    fn test_zero_allotment_plan() {
        let summary = UsageSummary::derive(0, Some(0));
        assert_eq!(summary.percent, 0);
    }

    // =========================================================================
    // LF-B06: 1-coin plan, single consumption step
    // =========================================================================
    #[test]
    fn test_single_coin_plan() {
        assert_eq!(UsageSummary::derive(1, Some(1)).percent, 0);
        assert_eq!(UsageSummary::derive(0, Some(1)).percent, 100);
    }

    // =========================================================================
    // LF-B07: Huge balances do not overflow the percentage maths
    // =========================================================================
    #[test]
    fn test_large_values_no_overflow() {
        let summary = UsageSummary::derive(1, Some(i64::MAX / 200));
        assert!(summary.percent <= 100);
        assert!(summary.used >= 0);
    }
}

#[cfg(test)]
mod poller_tests {
    use crate::error::BillingError;
    use crate::poller::{PollState, PollerConfig, VerificationPoller, Verify};
    use crate::verification::VerificationOutcome;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use uuid::Uuid;

    struct Scripted {
        responses: Mutex<VecDeque<BillingResult>>,
        calls: AtomicU32,
    }

    type BillingResult = Result<VerificationOutcome, BillingError>;

    impl Scripted {
        fn new(responses: Vec<BillingResult>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    impl Verify for Scripted {
        fn check(&self, _session_id: Uuid) -> impl Future<Output = BillingResult> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let response = if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                match responses.front() {
                    Some(Ok(o)) => Ok(o.clone()),
                    Some(Err(e)) => Err(BillingError::Internal(e.to_string())),
                    None => Ok(VerificationOutcome::Pending),
                }
            };
            async move { response }
        }
    }

    // =========================================================================
    // LF-P01: Failure response on the very first poll is terminal
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_immediate_failure_is_terminal() {
        let verifier = Scripted::new(vec![Ok(VerificationOutcome::Failed(
            "card declined".to_string(),
        ))]);
        let poller = VerificationPoller::new(verifier.clone(), PollerConfig::default());
        let mut handle = poller.spawn(Uuid::new_v4());

        let terminal = handle.wait().await;
        assert_eq!(terminal, PollState::Failed("card declined".to_string()));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    // =========================================================================
    // LF-P02: Error, error, success - two errors are under the cap
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_two_errors_then_success() {
        let verifier = Scripted::new(vec![
            Err(BillingError::Internal("timeout".to_string())),
            Err(BillingError::Internal("timeout".to_string())),
            Ok(VerificationOutcome::Verified {
                kind: leadforge_shared::PaymentSessionKind::CoinPackage,
                coins_credited: 200,
                subscription_id: None,
            }),
        ]);
        let poller = VerificationPoller::new(verifier.clone(), PollerConfig::default());
        let mut handle = poller.spawn(Uuid::new_v4());

        let terminal = handle.wait().await;
        assert_eq!(terminal, PollState::Verified { coins_credited: 200 });
    }

    // =========================================================================
    // LF-P03: Custom error cap of 1 stops at the first error
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_error_cap_of_one() {
        let config = PollerConfig {
            max_consecutive_errors: 1,
            ..PollerConfig::default()
        };
        let verifier = Scripted::new(vec![Err(BillingError::Internal("boom".to_string()))]);
        let poller = VerificationPoller::new(verifier.clone(), config);
        let mut handle = poller.spawn(Uuid::new_v4());

        let terminal = handle.wait().await;
        assert!(matches!(terminal, PollState::Failed(_)));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    // =========================================================================
    // LF-P04: Sub-second cadence config is honored
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_fast_cadence() {
        let config = PollerConfig {
            initial_delay: Duration::from_millis(100),
            interval: Duration::from_millis(100),
            ..PollerConfig::default()
        };
        let verifier = Scripted::new(vec![
            Ok(VerificationOutcome::Pending),
            Ok(VerificationOutcome::Expired),
        ]);
        let poller = VerificationPoller::new(verifier.clone(), config);
        let started = tokio::time::Instant::now();
        let mut handle = poller.spawn(Uuid::new_v4());

        let terminal = handle.wait().await;
        assert_eq!(terminal, PollState::Expired);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    // =========================================================================
    // LF-P05: State snapshot before the first poll is Pending
    // =========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_initial_state_pending() {
        let verifier = Scripted::new(vec![Ok(VerificationOutcome::Pending)]);
        let poller = VerificationPoller::new(verifier, PollerConfig::default());
        let handle = poller.spawn(Uuid::new_v4());

        assert_eq!(handle.state(), PollState::Pending);
    }
}

#[cfg(test)]
mod outcome_tests {
    use crate::verification::VerificationOutcome;
    use leadforge_shared::PaymentSessionKind;

    // =========================================================================
    // LF-V01: Terminality of each outcome variant
    // =========================================================================
    #[test]
    fn test_outcome_terminality() {
        let verified = VerificationOutcome::Verified {
            kind: PaymentSessionKind::Subscription,
            coins_credited: 100,
            subscription_id: None,
        };
        assert!(verified.is_terminal());
        assert!(VerificationOutcome::Expired.is_terminal());
        assert!(VerificationOutcome::Failed("x".to_string()).is_terminal());
        assert!(!VerificationOutcome::Processing.is_terminal());
        assert!(!VerificationOutcome::Pending.is_terminal());
    }

    // =========================================================================
    // LF-V02: Wire serialization keeps the variant tag
    // =========================================================================
    #[test]
    fn test_outcome_serializes() {
        let json = serde_json::to_value(VerificationOutcome::Processing).unwrap();
        assert_eq!(json, serde_json::json!("Processing"));
    }

    // =========================================================================
    // LF-V03: Failed carries its reason through serialization
    // =========================================================================
    #[test]
    fn test_failed_reason_preserved() {
        let json =
            serde_json::to_value(VerificationOutcome::Failed("declined".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"Failed": "declined"}));
    }
}
