use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{to_rfc3339, RepositoryError};

/// Ledger of EventSub message ids already accepted.
#[derive(Clone)]
pub struct EventSubMessageRepository {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    First,
    Redelivery,
}

impl MessageOutcome {
    pub fn is_redelivery(self) -> bool {
        matches!(self, Self::Redelivery)
    }
}

impl EventSubMessageRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        message_id: &str,
        message_type: &str,
        received_at: DateTime<Utc>,
    ) -> Result<MessageOutcome, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO eventsub_messages (message_id, message_type, received_at) VALUES (?, ?, ?) \
             ON CONFLICT(message_id) DO NOTHING",
        )
        .bind(message_id)
        .bind(message_type)
        .bind(to_rfc3339(received_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(MessageOutcome::Redelivery)
        } else {
            Ok(MessageOutcome::First)
        }
    }

    /// Drops a recorded id so a redelivery of the same message is processed again.
    pub async fn forget(&self, message_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM eventsub_messages WHERE message_id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes up to `limit` ids received before `threshold`, returning the number removed.
    pub async fn delete_received_before(
        &self,
        threshold: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM eventsub_messages WHERE message_id IN \
             (SELECT message_id FROM eventsub_messages WHERE received_at < ? LIMIT ?)",
        )
        .bind(to_rfc3339(threshold))
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
