use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use livebanner_core::FeatureName;

use crate::{parse_rfc3339, to_rfc3339, RepositoryError};

/// Pre-live upstream values restored on streamdown.
#[derive(Clone)]
pub struct OriginalValueRepository {
    pool: SqlitePool,
}

/// A captured backup. `value` is `None` when there was nothing upstream (e.g. no banner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalValue {
    pub value: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl OriginalValueRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn fetch(
        &self,
        user_id: &str,
        feature: FeatureName,
    ) -> Result<Option<OriginalValue>, RepositoryError> {
        let row = sqlx::query(
            "SELECT value, captured_at FROM original_values WHERE user_id = ? AND feature = ?",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let captured_at: String = row.get("captured_at");
        Ok(Some(OriginalValue {
            value: row.get("value"),
            captured_at: parse_rfc3339(&captured_at)?,
        }))
    }

    /// First write wins: returns `false` when a backup already exists.
    pub async fn insert_if_absent(
        &self,
        user_id: &str,
        feature: FeatureName,
        value: Option<&str>,
        captured_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO original_values (user_id, feature, value, captured_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id, feature) DO NOTHING",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .bind(value)
        .bind(to_rfc3339(captured_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, user_id: &str, feature: FeatureName) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM original_values WHERE user_id = ? AND feature = ?")
            .bind(user_id)
            .bind(feature.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
