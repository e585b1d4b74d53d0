use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::state::AppState;
use crate::workflows;

/// Periodically syncs every ACTIVE connection whose last sync is older than
/// its polling interval. The first pass runs immediately on startup.
pub fn start_poll_scheduler(state: AppState, tick: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_secs = tick.as_secs(), "Poll scheduler started");

        loop {
            ticker.tick().await;

            let due = match state.store.due_connections(Utc::now()).await {
                Ok(due) => due,
                Err(e) => {
                    error!(error = %e, "Failed to query due connections");
                    continue;
                }
            };

            if due.is_empty() {
                debug!("No connections due for sync");
                continue;
            }

            info!(count = due.len(), "Scheduling due connection syncs");
            for connection in due {
                let run_id = workflows::spawn_sync(&state, connection.id.clone());
                debug!(connection_id = %connection.id, run_id = %run_id, "Sync scheduled");
            }
        }
    });
}
