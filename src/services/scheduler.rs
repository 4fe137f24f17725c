use std::time::Duration;

use chrono::{Datelike, Timelike};
use tokio::time::sleep;

use crate::state::AppState;

/// Spawn the background scheduler that runs periodic jobs.
///
/// Each job runs in its own `tokio::spawn` so a failure in one job never
/// crashes the scheduler loop or other jobs. The sweeps themselves are
/// idempotent and isolate per-record failures, so an interrupted run leaves
/// no partial state; the next tick simply picks up where it left off.
pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("Background scheduler started");

    let pool = match state.db_pool.as_ref() {
        Some(pool) => pool.clone(),
        None => {
            tracing::warn!("Scheduler: no database pool configured, exiting");
            return;
        }
    };

    let message_interval =
        Duration::from_secs(state.config.message_poll_interval_seconds.max(15));

    let mut last_message_run = tokio::time::Instant::now();
    let mut last_daily_run: Option<u32> = None;

    loop {
        sleep(Duration::from_secs(15)).await;

        let now_instant = tokio::time::Instant::now();
        let now_local = state.config.local_now();
        let today = now_local.date_naive();

        // --- Outbound message queue (every N seconds) ---
        if now_instant.duration_since(last_message_run) >= message_interval {
            last_message_run = now_instant;
            let pool = pool.clone();
            let client = state.http_client.clone();
            let config = state.config.clone();
            tokio::spawn(async move {
                let (sent, failed) =
                    crate::services::messaging::process_queued_messages(&pool, &client, &config)
                        .await;
                if sent > 0 || failed > 0 {
                    tracing::info!(sent, failed, "Scheduler: message queue drained");
                }
            });
        }

        // --- Daily jobs (run once per local calendar day) ---
        let today_ordinal = today.ordinal();
        if last_daily_run == Some(today_ordinal) {
            continue;
        }
        if now_local.hour() < state.config.daily_jobs_hour {
            continue;
        }

        last_daily_run = Some(today_ordinal);
        tracing::info!("Scheduler: running daily jobs for {today}");

        // Overdue invoice sweep
        {
            let pool = pool.clone();
            tokio::spawn(async move {
                let result =
                    crate::services::invoice_lifecycle::run_overdue_sweep(&pool, today).await;
                tracing::info!(
                    flagged = result.flagged,
                    notices = result.notices_queued,
                    errors = result.errors,
                    "Scheduler: overdue sweep completed"
                );
            });
        }

        // Contract expiry sweep
        {
            let pool = pool.clone();
            tokio::spawn(async move {
                let result =
                    crate::services::contract_lifecycle::run_expiry_sweep(&pool, today).await;
                tracing::info!(
                    ended = result.ended,
                    errors = result.errors,
                    "Scheduler: contract expiry sweep completed"
                );
            });
        }

        // Renewal-status reconciliation
        {
            let pool = pool.clone();
            let window_days = state.config.renewal_window_days;
            tokio::spawn(async move {
                let result = crate::services::contract_lifecycle::run_renewal_reconciliation(
                    &pool,
                    today,
                    window_days,
                )
                .await;
                tracing::info!(
                    examined = result.examined,
                    updated = result.updated,
                    errors = result.errors,
                    "Scheduler: renewal reconciliation completed"
                );
            });
        }
    }
}
