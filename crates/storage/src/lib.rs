use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use thiserror::Error;

pub mod features;
pub mod live;
pub mod messages;
pub mod objects;
pub mod originals;
pub mod renders;
pub mod users;

pub use features::FeatureSettingsRepository;
pub use live::{LiveInsertOutcome, LiveStreamRepository, NewLiveStream};
pub use messages::{EventSubMessageRepository, MessageOutcome};
pub use objects::{FsObjectStore, MemoryObjectStore, ObjectStore, ObjectStoreError};
pub use originals::{OriginalValue, OriginalValueRepository};
pub use renders::RenderedImageRepository;
pub use users::{TwitchAccount, TwitterAccount, UserRepository};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the SQLite database behind `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    pub fn feature_settings(&self) -> FeatureSettingsRepository {
        FeatureSettingsRepository::new(self.pool.clone())
    }

    pub fn live_streams(&self) -> LiveStreamRepository {
        LiveStreamRepository::new(self.pool.clone())
    }

    pub fn rendered_images(&self) -> RenderedImageRepository {
        RenderedImageRepository::new(self.pool.clone())
    }

    pub fn original_values(&self) -> OriginalValueRepository {
        OriginalValueRepository::new(self.pool.clone())
    }

    pub fn eventsub_messages(&self) -> EventSubMessageRepository {
        EventSubMessageRepository::new(self.pool.clone())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

/// Errors returned by the repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Decode(String),
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("invalid timestamp {value:?}: {err}")))
}
