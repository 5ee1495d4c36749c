use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use livebanner_core::{FeatureName, FeatureSettings, Props, TemplateSpec};

use crate::{parse_rfc3339, to_rfc3339, RepositoryError};

/// Repository over `feature_settings`, one row per user per feature.
#[derive(Clone)]
pub struct FeatureSettingsRepository {
    pool: SqlitePool,
}

impl FeatureSettingsRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Lists the features whose `enabled` flag is set, always read fresh.
    pub async fn list_enabled(&self, user_id: &str) -> Result<Vec<FeatureName>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT feature FROM feature_settings WHERE user_id = ? AND enabled = 1 ORDER BY feature",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let raw: String = row.get("feature");
                raw.parse::<FeatureName>()
                    .map_err(|err| RepositoryError::Decode(err.to_string()))
            })
            .collect()
    }

    pub async fn fetch(
        &self,
        user_id: &str,
        feature: FeatureName,
    ) -> Result<Option<FeatureSettings>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, enabled, foreground_id, background_id, foreground_props, \
             background_props, content, updated_at \
             FROM feature_settings WHERE user_id = ? AND feature = ?",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_settings(&row, feature)).transpose()
    }

    /// Flips the enabled flag, creating an empty settings row when none exists.
    ///
    /// `updated_at` is left untouched on existing rows so cached renders stay valid.
    pub async fn set_enabled(
        &self,
        user_id: &str,
        feature: FeatureName,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO feature_settings (user_id, feature, enabled, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id, feature) DO UPDATE SET enabled = excluded.enabled",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .bind(enabled)
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Writes the full settings row.
    pub async fn save(&self, settings: &FeatureSettings) -> Result<(), RepositoryError> {
        let foreground = serde_json::to_string(&settings.template.foreground_props)
            .map_err(|err| RepositoryError::Decode(err.to_string()))?;
        let background = serde_json::to_string(&settings.template.background_props)
            .map_err(|err| RepositoryError::Decode(err.to_string()))?;

        sqlx::query(
            "INSERT INTO feature_settings \
             (user_id, feature, enabled, foreground_id, background_id, foreground_props, \
              background_props, content, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(user_id, feature) DO UPDATE SET \
               enabled = excluded.enabled, \
               foreground_id = excluded.foreground_id, \
               background_id = excluded.background_id, \
               foreground_props = excluded.foreground_props, \
               background_props = excluded.background_props, \
               content = excluded.content, \
               updated_at = excluded.updated_at",
        )
        .bind(&settings.user_id)
        .bind(settings.feature.as_str())
        .bind(settings.enabled)
        .bind(&settings.template.foreground_id)
        .bind(&settings.template.background_id)
        .bind(foreground)
        .bind(background)
        .bind(&settings.content)
        .bind(to_rfc3339(settings.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn decode_settings(row: &SqliteRow, feature: FeatureName) -> Result<FeatureSettings, RepositoryError> {
    let updated_at: String = row.get("updated_at");
    Ok(FeatureSettings {
        user_id: row.get("user_id"),
        feature,
        enabled: row.get("enabled"),
        template: TemplateSpec {
            foreground_id: row.get("foreground_id"),
            background_id: row.get("background_id"),
            foreground_props: decode_props(row.get("foreground_props"))?,
            background_props: decode_props(row.get("background_props"))?,
        },
        content: row.get("content"),
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

fn decode_props(raw: String) -> Result<Props, RepositoryError> {
    serde_json::from_str(&raw).map_err(|err| RepositoryError::Decode(format!("props: {err}")))
}
