//! LeadForge Background Worker
//!
//! Handles scheduled jobs:
//! - Payment session expiry sweep (every minute)
//! - Resume verification of paid-but-uncredited sessions (every minute)
//! - Subscription expiry (hourly)
//! - Stale auth session and webhook event purge (daily)
//! - Billing invariant run (daily)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use leadforge_billing::{BillingService, VerificationOutcome};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Re-verify sessions the gateway marked paid but whose fulfilment never
/// ran: the client disappeared mid-poll, or returned from a redirect and
/// never called verify-payment again.
async fn resume_pending_verifications(billing: &BillingService, pool: &sqlx::PgPool) {
    let sessions = match leadforge_billing::sessions::list_paid_uncredited(pool, 50).await {
        Ok(sessions) => sessions,
        Err(e) => {
            error!(error = %e, "Failed to list paid uncredited sessions");
            return;
        }
    };

    if sessions.is_empty() {
        return;
    }

    info!(count = sessions.len(), "Resuming pending verifications");

    let mut credited = 0;
    let mut still_processing = 0;
    let mut errors = 0;

    for session in sessions {
        match billing.verification.check(session.session_id).await {
            Ok(VerificationOutcome::Verified { .. }) => credited += 1,
            Ok(VerificationOutcome::Processing) | Ok(VerificationOutcome::Pending) => {
                still_processing += 1
            }
            Ok(VerificationOutcome::Expired) | Ok(VerificationOutcome::Failed(_)) => {}
            Err(e) => {
                errors += 1;
                warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Resume verification failed"
                );
            }
        }
    }

    info!(
        credited = credited,
        still_processing = still_processing,
        errors = errors,
        "Resume verification cycle complete"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting LeadForge Worker");

    let pool = create_db_pool().await?;

    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // Without Stripe config only the DB-side sweeps make sense;
            // run in minimal mode rather than crash-looping.
            warn!(error = %e, "Failed to create billing service - running in minimal mode");

            loop {
                if let Err(e) = leadforge_billing::sessions::sweep_expired(&pool)
                    .await
                    .map(|swept| {
                        if swept > 0 {
                            info!(swept = swept, "Expired stale payment sessions");
                        }
                    })
                {
                    error!(error = %e, "Session sweep failed");
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Expire payment sessions past their TTL (every minute)
    let sweep_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let pool = sweep_pool.clone();
            Box::pin(async move {
                match leadforge_billing::sessions::sweep_expired(&pool).await {
                    Ok(swept) if swept > 0 => {
                        info!(swept = swept, "Expired stale payment sessions")
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Session sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Payment session expiry sweep (every minute)");

    // Job 2: Resume verification of paid-but-uncredited sessions (every
    // minute, offset from the sweep)
    let resume_pool = pool.clone();
    let resume_billing = billing.clone();
    scheduler
        .add(Job::new_async("30 * * * * *", move |_uuid, _l| {
            let pool = resume_pool.clone();
            let billing = resume_billing.clone();
            Box::pin(async move {
                resume_pending_verifications(&billing, &pool).await;
            })
        })?)
        .await?;
    info!("Scheduled: Pending verification resume (every minute)");

    // Job 3: Expire overdue subscriptions (hourly)
    let expiry_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 5 * * * *", move |_uuid, _l| {
            let billing = expiry_billing.clone();
            Box::pin(async move {
                if let Err(e) = billing.subscriptions.expire_overdue().await {
                    error!(error = %e, "Subscription expiry failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Subscription expiry (hourly)");

    // Job 4: Purge stale auth sessions and old webhook events (daily at
    // 3:00 AM UTC)
    let purge_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let pool = purge_pool.clone();
            Box::pin(async move {
                match leadforge_api::auth::sessions::purge_stale(&pool, 30).await {
                    Ok(purged) => info!(purged = purged, "Purged stale auth sessions"),
                    Err(e) => error!(error = %e, "Auth session purge failed"),
                }

                let result = sqlx::query(
                    r#"
                    DELETE FROM stripe_webhook_events
                    WHERE created_at < NOW() - INTERVAL '90 days'
                    "#,
                )
                .execute(&pool)
                .await;

                match result {
                    Ok(r) => info!(deleted = r.rows_affected(), "Purged old webhook events"),
                    Err(e) => error!(error = %e, "Webhook event purge failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Stale session and webhook purge (daily at 3:00 AM UTC)");

    // Job 5: Billing invariant run (daily at 4:30 AM UTC)
    let invariants_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 30 4 * * *", move |_uuid, _l| {
            let billing = invariants_billing.clone();
            Box::pin(async move {
                match billing.invariants.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(checks = summary.checks_run, "Billing invariants healthy")
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            warn!(
                                invariant = %violation.invariant,
                                severity = %violation.severity,
                                description = %violation.description,
                                "Billing invariant violated"
                            );
                        }
                        warn!(
                            failed = summary.checks_failed,
                            violations = summary.violations.len(),
                            "Billing invariant run found violations"
                        );
                    }
                    Err(e) => error!(error = %e, "Invariant run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing invariant run (daily at 4:30 AM UTC)");

    // Job 6: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("LeadForge Worker started successfully with 6 scheduled jobs");

    // The scheduler runs jobs in background tasks; keep the main task
    // alive.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
