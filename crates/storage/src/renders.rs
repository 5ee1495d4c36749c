use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use livebanner_core::FeatureName;

use crate::{parse_rfc3339, to_rfc3339, RepositoryError};

/// Tracks when each user's cached render was produced.
#[derive(Clone)]
pub struct RenderedImageRepository {
    pool: SqlitePool,
}

impl RenderedImageRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn last_rendered(
        &self,
        user_id: &str,
        feature: FeatureName,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let row = sqlx::query(
            "SELECT last_rendered FROM rendered_images WHERE user_id = ? AND feature = ?",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let raw: String = row.get("last_rendered");
            parse_rfc3339(&raw)
        })
        .transpose()
    }

    pub async fn mark_rendered(
        &self,
        user_id: &str,
        feature: FeatureName,
        rendered_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO rendered_images (user_id, feature, last_rendered) VALUES (?, ?, ?) \
             ON CONFLICT(user_id, feature) DO UPDATE SET last_rendered = excluded.last_rendered",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .bind(to_rfc3339(rendered_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
