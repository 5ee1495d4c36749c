use chrono::{DateTime, Utc};
use tracing::info;

use livebanner_storage::{Database, LiveInsertOutcome, NewLiveStream, RepositoryError};

/// Outcome of recording a `stream.online` for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineOutcome {
    /// A new live record was written; streamup should run.
    Started,
    /// The user is already live on this stream.
    AlreadyLive,
}

/// Maintains the one-row-per-user live-state table.
///
/// Both guards are single SQL statements, so concurrent deliveries for the same
/// user cannot both observe "not live".
#[derive(Clone)]
pub struct LiveStateTracker {
    db: Database,
}

impl LiveStateTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn go_live(
        &self,
        user_id: &str,
        current_stream_id: &str,
        stream_link: &str,
        now: DateTime<Utc>,
    ) -> Result<OnlineOutcome, RepositoryError> {
        let repo = self.db.live_streams();

        if repo.purge_stale(user_id, current_stream_id).await? {
            info!(
                stage = "live_state",
                user_id,
                current_stream_id,
                "removed live record of a previous stream"
            );
        }

        let outcome = repo
            .try_insert(&NewLiveStream {
                user_id,
                twitch_stream_id: current_stream_id,
                stream_link,
                created_at: now,
            })
            .await?;

        Ok(match outcome {
            LiveInsertOutcome::Inserted => OnlineOutcome::Started,
            LiveInsertOutcome::AlreadyLive => OnlineOutcome::AlreadyLive,
        })
    }

    /// Returns whether a record existed.
    pub async fn go_offline(&self, user_id: &str) -> Result<bool, RepositoryError> {
        self.db.live_streams().delete(user_id).await
    }
}
