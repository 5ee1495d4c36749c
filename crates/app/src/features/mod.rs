//! The four stream features and the plumbing they share.
//!
//! Every feature follows the same streamup shape: load settings, re-validate
//! the Twitter account, back up the upstream value once, produce the live value
//! and push it. Streamdown pushes the backup back and forgets it.

mod banner;
mod profile_image;
mod tweet;
mod twitter_name;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use livebanner_core::{FeatureName, FeatureSettings};
use livebanner_render::{RenderError, Renderer};
use livebanner_storage::{
    Database, ObjectStore, ObjectStoreError, OriginalValue, RepositoryError, TwitchAccount,
};
use livebanner_twitter::{AccessToken, TwitterApi, TwitterError, TwitterProfile};

use crate::gateway::{GatewayError, TwitchApi};
use crate::render_cache::{RenderCache, RenderCacheError};
use crate::router::Clock;

pub use banner::BannerFeature;
pub use profile_image::ProfileImageFeature;
pub use tweet::TweetFeature;
pub use twitter_name::TwitterNameFeature;

#[async_trait]
pub trait StreamFeature: Send + Sync {
    fn name(&self) -> FeatureName;
    async fn is_enabled(&self, user_id: &str) -> Result<bool, FeatureError>;
    /// Streamup: push the live value to Twitter.
    async fn apply_live(&self, user_id: &str) -> Result<FeatureOutcome, FeatureError>;
    /// Streamdown: put back whatever was there before the stream.
    async fn restore(&self, user_id: &str) -> Result<FeatureOutcome, FeatureError>;
}

/// Builds the full feature set in a stable order.
pub fn all(deps: FeatureDeps) -> Vec<Arc<dyn StreamFeature>> {
    vec![
        Arc::new(BannerFeature::new(deps.clone())),
        Arc::new(ProfileImageFeature::new(deps.clone())),
        Arc::new(TwitterNameFeature::new(deps.clone())),
        Arc::new(TweetFeature::new(deps)),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FeatureOutcome {
    Applied,
    Restored,
    Skipped { reason: &'static str },
}

impl FeatureOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Restored => "restored",
            Self::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(&'static str),
    #[error("twitter authorization is no longer valid")]
    Unauthenticated,
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl FeatureError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingPrerequisite(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingPrerequisite(_) => "missing_prerequisite",
            Self::Unauthenticated => "unauthenticated",
            Self::NotFound(_) => "not_found",
            Self::Upstream(_) => "upstream_error",
            Self::Storage(_) => "storage_error",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl From<RepositoryError> for FeatureError {
    fn from(value: RepositoryError) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<ObjectStoreError> for FeatureError {
    fn from(value: ObjectStoreError) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<TwitterError> for FeatureError {
    fn from(value: TwitterError) -> Self {
        if value.is_unauthorized() {
            Self::Unauthenticated
        } else {
            Self::Upstream(format!("twitter: {value}"))
        }
    }
}

impl From<RenderError> for FeatureError {
    fn from(value: RenderError) -> Self {
        Self::Upstream(format!("renderer: {value}"))
    }
}

impl From<GatewayError> for FeatureError {
    fn from(value: GatewayError) -> Self {
        Self::Upstream(format!("twitch: {value}"))
    }
}

impl From<RenderCacheError> for FeatureError {
    fn from(value: RenderCacheError) -> Self {
        match value {
            RenderCacheError::Render(err) => err.into(),
            RenderCacheError::Storage(err) => err.into(),
            RenderCacheError::Objects(err) => err.into(),
        }
    }
}

#[derive(Clone)]
pub struct FeatureDeps {
    pub db: Database,
    pub twitter: Arc<dyn TwitterApi>,
    pub twitch: Arc<dyn TwitchApi>,
    pub renderer: Arc<dyn Renderer>,
    pub objects: Arc<dyn ObjectStore>,
    pub render_cache: RenderCache,
    pub clock: Clock,
}

/// Everything a streamup handler needs once the preconditions hold.
pub(crate) struct LiveContext {
    pub settings: FeatureSettings,
    pub token: AccessToken,
    pub profile: TwitterProfile,
}

pub(crate) fn original_bucket(feature: FeatureName) -> String {
    format!("original-{}", feature.as_str())
}

impl FeatureDeps {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub(crate) async fn is_enabled(
        &self,
        user_id: &str,
        feature: FeatureName,
    ) -> Result<bool, FeatureError> {
        Ok(self
            .db
            .feature_settings()
            .fetch(user_id, feature)
            .await?
            .is_some_and(|settings| settings.enabled))
    }

    /// Checks settings and Twitter auth. `None` means the feature is switched off.
    pub(crate) async fn prepare_live(
        &self,
        user_id: &str,
        feature: FeatureName,
    ) -> Result<Option<LiveContext>, FeatureError> {
        let settings = self
            .db
            .feature_settings()
            .fetch(user_id, feature)
            .await?
            .ok_or(FeatureError::MissingPrerequisite("feature is not configured"))?;
        if !settings.enabled {
            return Ok(None);
        }

        let token = self.twitter_token(user_id).await?;
        let profile = self.twitter.verify_credentials(&token).await?;
        Ok(Some(LiveContext {
            settings,
            token,
            profile,
        }))
    }

    pub(crate) async fn twitter_token(&self, user_id: &str) -> Result<AccessToken, FeatureError> {
        let account = self
            .db
            .users()
            .fetch_twitter_account(user_id)
            .await?
            .ok_or(FeatureError::MissingPrerequisite("twitter account is not linked"))?;
        Ok(AccessToken::new(
            account.oauth_token,
            account.oauth_token_secret,
        ))
    }

    pub(crate) async fn twitch_account(&self, user_id: &str) -> Result<TwitchAccount, FeatureError> {
        self.db
            .users()
            .fetch_twitch_account(user_id)
            .await?
            .ok_or(FeatureError::MissingPrerequisite("twitch account is not linked"))
    }

    pub(crate) async fn original(
        &self,
        user_id: &str,
        feature: FeatureName,
    ) -> Result<Option<OriginalValue>, FeatureError> {
        Ok(self.db.original_values().fetch(user_id, feature).await?)
    }

    /// Stores an image backup in the object store and records its key.
    /// `None` records that there was no image upstream.
    pub(crate) async fn capture_image(
        &self,
        user_id: &str,
        feature: FeatureName,
        image: Option<&str>,
    ) -> Result<(), FeatureError> {
        let key = match image {
            Some(image) => {
                self.objects
                    .upload(&original_bucket(feature), user_id, image)
                    .await?;
                Some(user_id)
            }
            None => None,
        };
        self.db
            .original_values()
            .insert_if_absent(user_id, feature, key, self.now())
            .await?;
        info!(stage = "feature", user_id, feature = %feature, has_value = key.is_some(), "captured original");
        Ok(())
    }

    pub(crate) async fn load_image(
        &self,
        feature: FeatureName,
        key: &str,
    ) -> Result<String, FeatureError> {
        self.objects
            .download(&original_bucket(feature), key)
            .await?
            .ok_or(FeatureError::NotFound("original image is missing from storage"))
    }

    /// Forgets the backup so the next stream captures a fresh one.
    pub(crate) async fn finish_restore(
        &self,
        user_id: &str,
        feature: FeatureName,
    ) -> Result<FeatureOutcome, FeatureError> {
        self.db.original_values().delete(user_id, feature).await?;
        Ok(FeatureOutcome::Restored)
    }
}

pub(crate) const NO_ORIGINAL: FeatureOutcome = FeatureOutcome::Skipped {
    reason: "no original to restore",
};

pub(crate) const DISABLED: FeatureOutcome = FeatureOutcome::Skipped {
    reason: "feature is disabled",
};
