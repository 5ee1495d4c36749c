use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use livebanner_core::LiveStream;

use crate::{parse_rfc3339, to_rfc3339, RepositoryError};

/// Repository for `live_streams`, at most one row per user.
///
/// Every guard is a single statement so concurrent deliveries for the same
/// user cannot both pass the "not live yet" check.
#[derive(Clone)]
pub struct LiveStreamRepository {
    pool: SqlitePool,
}

/// Data required to mark a user live.
pub struct NewLiveStream<'a> {
    pub user_id: &'a str,
    pub twitch_stream_id: &'a str,
    pub stream_link: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Result of the conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveInsertOutcome {
    Inserted,
    AlreadyLive,
}

impl LiveStreamRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn fetch(&self, user_id: &str) -> Result<Option<LiveStream>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, twitch_stream_id, stream_link, twitter_link, created_at \
             FROM live_streams WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at: String = row.get("created_at");
        Ok(Some(LiveStream {
            user_id: row.get("user_id"),
            twitch_stream_id: row.get("twitch_stream_id"),
            stream_link: row.get("stream_link"),
            twitter_link: row.get("twitter_link"),
            created_at: parse_rfc3339(&created_at)?,
        }))
    }

    /// Deletes the user's record when it belongs to a different stream than `current_stream_id`.
    pub async fn purge_stale(&self, user_id: &str, current_stream_id: &str) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM live_streams WHERE user_id = ? AND twitch_stream_id <> ?")
                .bind(user_id)
                .bind(current_stream_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Inserts the record unless the user is already marked live.
    pub async fn try_insert(&self, record: &NewLiveStream<'_>) -> Result<LiveInsertOutcome, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO live_streams (user_id, twitch_stream_id, stream_link, created_at) \
             VALUES (?, ?, ?, ?) ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(record.user_id)
        .bind(record.twitch_stream_id)
        .bind(record.stream_link)
        .bind(to_rfc3339(record.created_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(LiveInsertOutcome::AlreadyLive)
        } else {
            Ok(LiveInsertOutcome::Inserted)
        }
    }

    /// Removes the record; returns `false` when the user was not marked live.
    pub async fn delete(&self, user_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM live_streams WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_twitter_link(&self, user_id: &str, twitter_link: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE live_streams SET twitter_link = ? WHERE user_id = ?")
            .bind(twitter_link)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
