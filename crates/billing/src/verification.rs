//! Payment verification.
//!
//! Classifies a payment session into a tagged outcome and, on payment,
//! runs fulfilment (subscription activation or coin credit) exactly once.
//! Verification is idempotent: re-checking a terminal session returns the
//! same outcome without touching the gateway, so the poller, the webhook
//! handler and the worker's resume job can all race safely.

use leadforge_shared::{CoinTransactionKind, PaymentSessionKind, PaymentSessionStatus};
use sqlx::PgPool;
use std::str::FromStr;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionPaymentStatus, CheckoutSessionStatus,
    PaymentIntent, PaymentIntentId, PaymentIntentStatus,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::sessions::{self, PaymentSession};
use crate::subscriptions;

/// Terminal-or-not classification of one verification attempt.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum VerificationOutcome {
    /// Payment settled and fulfilment ran (now or on an earlier check).
    Verified {
        kind: PaymentSessionKind,
        coins_credited: i64,
        subscription_id: Option<Uuid>,
    },
    /// The gateway confirmed payment but settlement is still in flight.
    Processing,
    /// No payment yet; keep polling.
    Pending,
    /// The session's lifetime elapsed before payment. Terminal.
    Expired,
    /// The gateway rejected or cancelled the payment. Terminal.
    Failed(String),
}

impl VerificationOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerificationOutcome::Verified { .. }
                | VerificationOutcome::Expired
                | VerificationOutcome::Failed(_)
        )
    }
}

/// What the gateway said about the underlying object.
enum GatewayState {
    Paid,
    Processing,
    Unpaid,
    Expired,
    Failed(String),
}

#[derive(Clone)]
pub struct VerificationService {
    stripe: StripeClient,
    pool: PgPool,
}

impl VerificationService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Check one session and drive it toward a terminal state.
    pub async fn check(&self, session_id: Uuid) -> BillingResult<VerificationOutcome> {
        let session = sessions::load(&self.pool, session_id)
            .await?
            .ok_or(BillingError::SessionNotFound(session_id))?;

        // Terminal rows answer from the database alone.
        match session.status {
            PaymentSessionStatus::Credited => {
                return Ok(self.verified_outcome(&session).await?);
            }
            PaymentSessionStatus::Expired => return Ok(VerificationOutcome::Expired),
            PaymentSessionStatus::Failed => {
                return Ok(VerificationOutcome::Failed(
                    "payment was declined or cancelled".to_string(),
                ))
            }
            PaymentSessionStatus::Created | PaymentSessionStatus::Paid => {}
        }

        // Expiry wins over whatever an in-flight gateway poll might still
        // report. A session that already reached paid is exempt: money that
        // arrived before the TTL must be credited.
        if session.status == PaymentSessionStatus::Created
            && session.is_expired_at(OffsetDateTime::now_utc())
        {
            sessions::mark_expired(&self.pool, session.session_id).await?;
            tracing::info!(session_id = %session.session_id, "Payment session expired before payment");
            return Ok(VerificationOutcome::Expired);
        }

        match self.gateway_state(&session).await? {
            GatewayState::Paid => self.fulfil(&session).await,
            GatewayState::Processing => {
                // Settlement in flight: remember that money is on the way so
                // the worker's resume job keeps re-checking even if the
                // client goes away.
                sessions::mark_paid(&self.pool, session.session_id).await?;
                Ok(VerificationOutcome::Processing)
            }
            GatewayState::Unpaid => Ok(VerificationOutcome::Pending),
            GatewayState::Expired => {
                sessions::mark_expired(&self.pool, session.session_id).await?;
                Ok(VerificationOutcome::Expired)
            }
            GatewayState::Failed(reason) => {
                sessions::mark_failed(&self.pool, session.session_id, &reason).await?;
                Ok(VerificationOutcome::Failed(reason))
            }
        }
    }

    async fn gateway_state(&self, session: &PaymentSession) -> BillingResult<GatewayState> {
        match session.kind {
            PaymentSessionKind::Subscription => {
                let id = CheckoutSessionId::from_str(&session.gateway_id)?;
                let checkout = CheckoutSession::retrieve(self.stripe.inner(), &id, &[]).await?;
                Ok(classify_checkout(&checkout))
            }
            PaymentSessionKind::CoinPackage => {
                let id = PaymentIntentId::from_str(&session.gateway_id)?;
                let intent = PaymentIntent::retrieve(self.stripe.inner(), &id, &[]).await?;
                Ok(classify_intent(&intent))
            }
        }
    }

    /// Credit the purchase exactly once.
    ///
    /// The session row is the idempotency key: the transition to
    /// `credited` happens via a conditional UPDATE in the same transaction
    /// as the balance mutation, so a concurrent verifier and webhook
    /// cannot both fulfil.
    pub(crate) async fn fulfil(
        &self,
        session: &PaymentSession,
    ) -> BillingResult<VerificationOutcome> {
        let mut tx = self.pool.begin().await?;

        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE payment_sessions
            SET status = 'credited', updated_at = NOW()
            WHERE session_id = $1
              AND status IN ('created', 'paid')
            RETURNING session_id
            "#,
        )
        .bind(session.session_id)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            // Someone else fulfilled concurrently; report their result.
            tx.rollback().await?;
            return self.verified_outcome(session).await;
        }

        let subscription_id = match session.kind {
            PaymentSessionKind::Subscription => {
                let (allotment, duration_days): (i64, i32) = sqlx::query_as(
                    "SELECT lead_coins, duration_days FROM subscription_plans WHERE id = $1",
                )
                .bind(session.target_id)
                .fetch_one(&mut *tx)
                .await?;

                let id = subscriptions::activate_in_tx(
                    &mut tx,
                    session.user_id,
                    session.target_id,
                    session.session_id,
                    allotment,
                    duration_days,
                )
                .await?;

                crate::ledger::credit_in_tx(
                    &mut tx,
                    session.user_id,
                    allotment,
                    CoinTransactionKind::SubscriptionGrant,
                    Some(&session.session_id.to_string()),
                )
                .await?;

                Some(id)
            }
            PaymentSessionKind::CoinPackage => {
                crate::ledger::credit_in_tx(
                    &mut tx,
                    session.user_id,
                    session.coins,
                    CoinTransactionKind::Purchase,
                    Some(&session.session_id.to_string()),
                )
                .await?;

                None
            }
        };

        tx.commit().await?;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            kind = session.kind.as_str(),
            coins_credited = session.coins,
            "Payment fulfilled"
        );

        Ok(VerificationOutcome::Verified {
            kind: session.kind,
            coins_credited: session.coins,
            subscription_id,
        })
    }

    /// Rebuild the `Verified` outcome for an already-credited session.
    async fn verified_outcome(
        &self,
        session: &PaymentSession,
    ) -> BillingResult<VerificationOutcome> {
        let subscription_id: Option<Uuid> = match session.kind {
            PaymentSessionKind::Subscription => {
                sqlx::query_scalar(
                    "SELECT id FROM user_subscriptions WHERE payment_session_id = $1",
                )
                .bind(session.session_id)
                .fetch_optional(&self.pool)
                .await?
            }
            PaymentSessionKind::CoinPackage => None,
        };

        Ok(VerificationOutcome::Verified {
            kind: session.kind,
            coins_credited: session.coins,
            subscription_id,
        })
    }
}

fn classify_checkout(checkout: &CheckoutSession) -> GatewayState {
    if checkout.status == Some(CheckoutSessionStatus::Expired) {
        return GatewayState::Expired;
    }

    match checkout.payment_status {
        CheckoutSessionPaymentStatus::Paid | CheckoutSessionPaymentStatus::NoPaymentRequired => {
            GatewayState::Paid
        }
        CheckoutSessionPaymentStatus::Unpaid => GatewayState::Unpaid,
    }
}

fn classify_intent(intent: &PaymentIntent) -> GatewayState {
    match intent.status {
        PaymentIntentStatus::Succeeded => GatewayState::Paid,
        PaymentIntentStatus::Processing => GatewayState::Processing,
        PaymentIntentStatus::Canceled => {
            GatewayState::Failed("payment was cancelled".to_string())
        }
        PaymentIntentStatus::RequiresPaymentMethod
        | PaymentIntentStatus::RequiresConfirmation
        | PaymentIntentStatus::RequiresAction
        | PaymentIntentStatus::RequiresCapture => GatewayState::Unpaid,
    }
}
