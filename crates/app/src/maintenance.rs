use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use livebanner_storage::Database;

/// Must outlive Twitch's redelivery window.
const MESSAGE_TTL_HOURS: i64 = 72;
const BATCH_LIMIT: i64 = 1000;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Background worker that expires old EventSub message ids.
#[derive(Clone)]
pub struct MaintenanceWorker {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    interval: Duration,
}

impl MaintenanceWorker {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            clock: Arc::new(Utc::now),
            interval: DEFAULT_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(stage = "storage", error = %err, "maintenance run failed");
            }
        }
    }

    /// Executes one TTL sweep and returns how many ids were deleted.
    pub async fn run_once(&self) -> Result<u64, MaintenanceError> {
        let threshold = (self.clock)() - ChronoDuration::hours(MESSAGE_TTL_HOURS);
        let mut deleted = 0u64;
        let mut busy = false;

        loop {
            match self
                .database
                .eventsub_messages()
                .delete_received_before(threshold, BATCH_LIMIT)
                .await
            {
                Ok(0) => break,
                Ok(batch) => {
                    deleted += batch;
                    counter!("db_ttl_deleted_total", "table" => "eventsub_messages")
                        .increment(batch);
                }
                Err(err) if is_sqlite_busy(&err) => {
                    busy = true;
                    counter!("db_busy_total", "op" => "ttl").increment(1);
                    warn!(stage = "storage", table = "eventsub_messages", error = %err, "ttl delete hit busy timeout");
                    break;
                }
                Err(err) => {
                    return Err(MaintenanceError::TtlDelete {
                        table: "eventsub_messages",
                        source: err,
                    })
                }
            }
        }

        info!(
            stage = "storage",
            table = "eventsub_messages",
            deleted,
            busy,
            threshold = %threshold.to_rfc3339(),
            "eventsub_messages TTL sweep completed"
        );
        Ok(deleted)
    }
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("failed to delete expired rows from {table}")]
    TtlDelete {
        table: &'static str,
        #[source]
        source: SqlxError,
    },
}

fn is_sqlite_busy(err: &SqlxError) -> bool {
    match err {
        SqlxError::Database(db_err) => matches!(db_err.code().as_deref(), Some("5") | Some("6")),
        _ => false,
    }
}
