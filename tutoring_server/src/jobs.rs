//! Periodic background jobs: classroom completion sweep and payout settlement.

use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tutoring::{
    classroom::ClassroomManager,
    payout::{PayoutError, PayoutManager, SettlementReport},
};

/// Run one settlement; an overlapping run is reported and skipped
pub async fn run_settlement(payouts: &PayoutManager) -> Option<SettlementReport> {
    match payouts.settle(Utc::now()).await {
        Ok(report) => {
            crate::metrics::job_runs_total("payout_settlement", true);
            Some(report)
        }
        Err(PayoutError::SettlementInProgress) => {
            tracing::info!("Settlement already running, skipping this tick");
            None
        }
        Err(e) => {
            crate::metrics::job_runs_total("payout_settlement", false);
            tracing::error!(error = %e, "Payout settlement failed");
            None
        }
    }
}

/// Complete due classrooms, returning how many changed
pub async fn run_completion_sweep(classrooms: &ClassroomManager) -> usize {
    match classrooms.complete_due(Utc::now()).await {
        Ok(completed) => {
            crate::metrics::job_runs_total("completion_sweep", true);
            completed.len()
        }
        Err(e) => {
            crate::metrics::job_runs_total("completion_sweep", false);
            tracing::error!(error = %e, "Completion sweep failed");
            0
        }
    }
}

/// Settle payouts every `every`; the first run happens after one interval
pub fn spawn_settlement(payouts: Arc<PayoutManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_after(every);
        loop {
            ticker.tick().await;
            run_settlement(&payouts).await;
        }
    })
}

/// Sweep for finished classrooms every `every`
pub fn spawn_completion_sweep(
    classrooms: Arc<ClassroomManager>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_after(every);
        loop {
            ticker.tick().await;
            run_completion_sweep(&classrooms).await;
        }
    })
}

fn interval_after(every: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
