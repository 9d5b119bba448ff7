//! Verification polling.
//!
//! Drives a payment session from creation to a terminal state by
//! re-checking it on a single self-rescheduling timer: first poll after
//! `initial_delay` (the gateway needs a moment to register the attempt),
//! then one poll per `interval`, re-armed from the last response. One
//! timer, one authoritative state machine; there are no overlapping
//! intervals or redundant one-off checks to race with each other.
//!
//! Observers subscribe to a watch channel of [`PollState`] snapshots.
//! Dropping the [`PollerHandle`] aborts the task, so an abandoned modal
//! leaves no timer behind to keep firing gateway calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::verification::{VerificationOutcome, VerificationService};

/// Source of verification outcomes. The production impl is
/// [`VerificationService`]; tests script their own sequences.
pub trait Verify: Send + Sync + 'static {
    fn check(
        &self,
        session_id: Uuid,
    ) -> impl Future<Output = BillingResult<VerificationOutcome>> + Send;
}

impl Verify for VerificationService {
    fn check(
        &self,
        session_id: Uuid,
    ) -> impl Future<Output = BillingResult<VerificationOutcome>> + Send {
        VerificationService::check(self, session_id)
    }
}

/// Observable state of one polling run.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// No payment seen yet.
    Pending,
    /// Payment received, settlement in flight. Published at most once.
    Processing,
    /// Terminal success.
    Verified { coins_credited: i64 },
    /// Published once, `auto_close` after `Verified`, so observers can
    /// dismiss their success view.
    Closed { coins_credited: i64 },
    /// Terminal: session lifetime elapsed before payment.
    Expired,
    /// Terminal: gateway failure, or the consecutive-error cap was hit.
    Failed(String),
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Verified { .. }
                | PollState::Closed { .. }
                | PollState::Expired
                | PollState::Failed(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay before the first poll.
    pub initial_delay: Duration,
    /// Delay between subsequent polls.
    pub interval: Duration,
    /// Consecutive transport errors tolerated before giving up.
    pub max_consecutive_errors: u32,
    /// Delay between `Verified` and `Closed`.
    pub auto_close: Duration,
    /// Hard ceiling on one polling run; the session TTL plus slack.
    pub deadline: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            interval: Duration::from_secs(5),
            max_consecutive_errors: 3,
            auto_close: Duration::from_secs(3),
            deadline: Duration::from_secs(35 * 60),
        }
    }
}

pub struct VerificationPoller<V: Verify> {
    verifier: Arc<V>,
    config: PollerConfig,
}

impl<V: Verify> VerificationPoller<V> {
    pub fn new(verifier: Arc<V>, config: PollerConfig) -> Self {
        Self { verifier, config }
    }

    /// Start polling a session. The run ends at the first terminal state,
    /// at the consecutive-error cap, at the deadline, or when the handle
    /// is dropped.
    pub fn spawn(&self, session_id: Uuid) -> PollerHandle {
        let (tx, rx) = watch::channel(PollState::Pending);
        let verifier = Arc::clone(&self.verifier);
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            run(verifier, config, session_id, tx).await;
        });

        PollerHandle { state: rx, task }
    }
}

/// Handle to a running poll. Dropping it aborts the task.
pub struct PollerHandle {
    state: watch::Receiver<PollState>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Latest published state.
    pub fn state(&self) -> PollState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.clone()
    }

    /// Wait for the first terminal state.
    pub async fn wait(&mut self) -> PollState {
        loop {
            let current = self.state.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if self.state.changed().await.is_err() {
                return self.state.borrow().clone();
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<V: Verify>(
    verifier: Arc<V>,
    config: PollerConfig,
    session_id: Uuid,
    tx: watch::Sender<PollState>,
) {
    let started = tokio::time::Instant::now();
    let mut consecutive_errors = 0u32;
    let mut processing_published = false;
    let mut delay = config.initial_delay;

    loop {
        tokio::time::sleep(delay).await;
        delay = config.interval;

        if started.elapsed() >= config.deadline {
            tracing::warn!(session_id = %session_id, "Verification polling hit deadline");
            let _ = tx.send(PollState::Expired);
            return;
        }

        match verifier.check(session_id).await {
            Ok(VerificationOutcome::Verified { coins_credited, .. }) => {
                let _ = tx.send(PollState::Verified { coins_credited });
                tokio::time::sleep(config.auto_close).await;
                let _ = tx.send(PollState::Closed { coins_credited });
                return;
            }
            Ok(VerificationOutcome::Expired) => {
                let _ = tx.send(PollState::Expired);
                return;
            }
            Ok(VerificationOutcome::Failed(reason)) => {
                let _ = tx.send(PollState::Failed(reason));
                return;
            }
            Ok(VerificationOutcome::Processing) => {
                consecutive_errors = 0;
                if !processing_published {
                    processing_published = true;
                    let _ = tx.send(PollState::Processing);
                    tracing::info!(
                        session_id = %session_id,
                        "Payment received, awaiting settlement"
                    );
                }
            }
            Ok(VerificationOutcome::Pending) => {
                consecutive_errors = 0;
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    consecutive = consecutive_errors,
                    "Verification poll failed"
                );
                if consecutive_errors >= config.max_consecutive_errors {
                    let _ = tx.send(PollState::Failed(format!(
                        "verification gave up after {consecutive_errors} consecutive errors"
                    )));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BillingError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted sequence of outcomes; the last entry repeats.
    struct Scripted {
        responses: Mutex<VecDeque<BillingResult<VerificationOutcome>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(responses: Vec<BillingResult<VerificationOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Verify for Scripted {
        fn check(
            &self,
            _session_id: Uuid,
        ) -> impl Future<Output = BillingResult<VerificationOutcome>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let response = if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().map(clone_result)
            };
            let response = response.unwrap_or(Ok(VerificationOutcome::Pending));
            async move { response }
        }
    }

    fn clone_result(
        r: &BillingResult<VerificationOutcome>,
    ) -> BillingResult<VerificationOutcome> {
        match r {
            Ok(o) => Ok(o.clone()),
            Err(e) => Err(BillingError::Internal(e.to_string())),
        }
    }

    fn verified(coins: i64) -> VerificationOutcome {
        VerificationOutcome::Verified {
            kind: leadforge_shared::PaymentSessionKind::CoinPackage,
            coins_credited: coins,
            subscription_id: None,
        }
    }

    fn test_config() -> PollerConfig {
        PollerConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_pending_verified_transitions_once() {
        let verifier = Scripted::new(vec![
            Ok(VerificationOutcome::Pending),
            Ok(VerificationOutcome::Pending),
            Ok(verified(500)),
        ]);
        let poller = VerificationPoller::new(verifier.clone(), test_config());
        let mut handle = poller.spawn(Uuid::new_v4());

        let mut rx = handle.subscribe();
        let terminal = handle.wait().await;
        assert_eq!(terminal, PollState::Verified { coins_credited: 500 });
        assert_eq!(verifier.calls(), 3, "Three polls: pending, pending, verified");

        // Exactly one success transition, then exactly one auto-close.
        let mut verified_seen = 0;
        let mut closed_seen = 0;
        loop {
            if matches!(*rx.borrow_and_update(), PollState::Verified { .. }) {
                verified_seen += 1;
            }
            if matches!(*rx.borrow_and_update(), PollState::Closed { .. }) {
                closed_seen += 1;
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        assert_eq!(verified_seen, 1);
        assert_eq!(closed_seen, 1);
        assert_eq!(
            verifier.calls(),
            3,
            "No further polls after the terminal state"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_waits_initial_delay() {
        let verifier = Scripted::new(vec![Ok(verified(100))]);
        let poller = VerificationPoller::new(verifier.clone(), test_config());
        let started = tokio::time::Instant::now();
        let mut handle = poller.spawn(Uuid::new_v4());

        let terminal = handle.wait().await;
        assert_eq!(terminal, PollState::Verified { coins_credited: 100 });
        assert!(
            started.elapsed() >= Duration::from_secs(5),
            "First poll must not fire before the initial delay"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_polling() {
        let verifier = Scripted::new(vec![Ok(VerificationOutcome::Pending)]);
        let poller = VerificationPoller::new(verifier.clone(), test_config());
        let handle = poller.spawn(Uuid::new_v4());

        // Let a couple of polls happen, then abandon the run.
        tokio::time::sleep(Duration::from_secs(11)).await;
        let polls_before_drop = verifier.calls();
        assert!(polls_before_drop >= 1, "Poller should have started polling");

        drop(handle);
        tokio::task::yield_now().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            verifier.calls(),
            polls_before_drop,
            "No polls may fire after the handle is dropped"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_terminal_even_while_gateway_says_pending() {
        // The verifier reports Expired (the session TTL elapsed) even
        // though earlier responses were Pending; the poller must land on
        // Expired and stop.
        let verifier = Scripted::new(vec![
            Ok(VerificationOutcome::Pending),
            Ok(VerificationOutcome::Expired),
        ]);
        let poller = VerificationPoller::new(verifier.clone(), test_config());
        let mut handle = poller.spawn(Uuid::new_v4());

        let terminal = handle.wait().await;
        assert_eq!(terminal, PollState::Expired);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(verifier.calls(), 2, "Expired is terminal; polling stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_published_once() {
        let verifier = Scripted::new(vec![
            Ok(VerificationOutcome::Processing),
            Ok(VerificationOutcome::Processing),
            Ok(VerificationOutcome::Processing),
            Ok(verified(50)),
        ]);
        let poller = VerificationPoller::new(verifier.clone(), test_config());
        let mut handle = poller.spawn(Uuid::new_v4());

        let mut rx = handle.subscribe();
        let mut processing_seen = 0;
        loop {
            if matches!(*rx.borrow_and_update(), PollState::Processing) {
                processing_seen += 1;
            }
            if rx.borrow().is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }

        let terminal = handle.wait().await;
        assert_eq!(terminal, PollState::Verified { coins_credited: 50 });
        assert_eq!(
            processing_seen, 1,
            "Processing must be surfaced at most once, not once per poll"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_consecutive_errors() {
        let verifier = Scripted::new(vec![Err(BillingError::Internal("boom".to_string()))]);
        let poller = VerificationPoller::new(verifier.clone(), test_config());
        let mut handle = poller.spawn(Uuid::new_v4());

        let terminal = handle.wait().await;
        assert!(
            matches!(terminal, PollState::Failed(_)),
            "Consecutive errors must end the run, got {terminal:?}"
        );
        assert_eq!(verifier.calls(), 3, "Default cap is three consecutive errors");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(verifier.calls(), 3, "No polling through the error state");
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_counter_resets_on_success() {
        let verifier = Scripted::new(vec![
            Err(BillingError::Internal("blip".to_string())),
            Err(BillingError::Internal("blip".to_string())),
            Ok(VerificationOutcome::Pending),
            Err(BillingError::Internal("blip".to_string())),
            Err(BillingError::Internal("blip".to_string())),
            Ok(verified(25)),
        ]);
        let poller = VerificationPoller::new(verifier.clone(), test_config());
        let mut handle = poller.spawn(Uuid::new_v4());

        let terminal = handle.wait().await;
        assert_eq!(
            terminal,
            PollState::Verified { coins_credited: 25 },
            "Interleaved successes reset the consecutive-error counter"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_the_run() {
        let mut config = test_config();
        config.deadline = Duration::from_secs(60);
        let verifier = Scripted::new(vec![Ok(VerificationOutcome::Pending)]);
        let poller = VerificationPoller::new(verifier.clone(), config);
        let mut handle = poller.spawn(Uuid::new_v4());

        let terminal = handle.wait().await;
        assert_eq!(terminal, PollState::Expired, "Deadline forces a terminal state");
    }
}
