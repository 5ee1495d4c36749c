use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use livebanner_twitch::{
    CreateSubscriptionRequest, EventSubSubscription, HelixClient, HelixError, HelixUser,
    OAuthError, TwitchOAuthClient,
};

use crate::router::Clock;

/// Twitch calls made with the application's access token.
#[async_trait]
pub trait TwitchApi: Send + Sync {
    /// Id of the broadcaster's current stream, `None` while Helix has not listed it.
    async fn current_stream_id(&self, broadcaster_id: &str) -> Result<Option<String>, GatewayError>;
    async fn user(&self, twitch_user_id: &str) -> Result<Option<HelixUser>, GatewayError>;
    async fn subscriptions(&self, broadcaster_id: &str)
        -> Result<Vec<EventSubSubscription>, GatewayError>;
    async fn subscribe(
        &self,
        subscription_type: &str,
        broadcaster_id: &str,
        callback: &str,
    ) -> Result<(), GatewayError>;
    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("helix request failed: {0}")]
    Helix(#[from] HelixError),
    #[error("app token request failed: {0}")]
    OAuth(#[from] OAuthError),
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Helix client plus a cached app access token, refreshed shortly before expiry.
#[derive(Clone)]
pub struct TwitchGateway {
    helix: HelixClient,
    oauth: TwitchOAuthClient,
    eventsub_secret: Arc<str>,
    token: Arc<Mutex<Option<CachedToken>>>,
    clock: Clock,
}

impl TwitchGateway {
    pub fn new(
        helix: HelixClient,
        oauth: TwitchOAuthClient,
        eventsub_secret: Arc<str>,
        clock: Clock,
    ) -> Self {
        Self {
            helix,
            oauth,
            eventsub_secret,
            token: Arc::new(Mutex::new(None)),
            clock,
        }
    }

    async fn app_token(&self) -> Result<String, GatewayError> {
        let now = (self.clock)();
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at - Duration::minutes(1) > now {
                return Ok(cached.access_token.clone());
            }
        }

        let response = self.oauth.app_access_token().await?;
        let cached = CachedToken {
            access_token: response.access_token.clone(),
            expires_at: response.expires_at(now),
        };
        info!(
            stage = "gateway",
            expires_at = %cached.expires_at.to_rfc3339(),
            "refreshed twitch app token"
        );
        *guard = Some(cached);
        Ok(response.access_token)
    }

    // A rejected token is dropped so the next call fetches a fresh one.
    async fn observe<T>(&self, result: Result<T, HelixError>) -> Result<T, GatewayError> {
        if let Err(HelixError::Status { status, .. }) = &result {
            if *status == StatusCode::UNAUTHORIZED {
                debug!(stage = "gateway", "app token rejected, clearing cache");
                self.token.lock().await.take();
            }
        }
        result.map_err(GatewayError::from)
    }
}

#[async_trait]
impl TwitchApi for TwitchGateway {
    async fn current_stream_id(&self, broadcaster_id: &str) -> Result<Option<String>, GatewayError> {
        let token = self.app_token().await?;
        let stream = self
            .observe(self.helix.get_stream_by_user_id(&token, broadcaster_id).await)
            .await?;
        Ok(stream.map(|stream| stream.id))
    }

    async fn user(&self, twitch_user_id: &str) -> Result<Option<HelixUser>, GatewayError> {
        let token = self.app_token().await?;
        self.observe(self.helix.get_user_by_id(&token, twitch_user_id).await)
            .await
    }

    async fn subscriptions(
        &self,
        broadcaster_id: &str,
    ) -> Result<Vec<EventSubSubscription>, GatewayError> {
        let token = self.app_token().await?;
        self.observe(
            self.helix
                .list_subscriptions_for_user(&token, broadcaster_id)
                .await,
        )
        .await
    }

    async fn subscribe(
        &self,
        subscription_type: &str,
        broadcaster_id: &str,
        callback: &str,
    ) -> Result<(), GatewayError> {
        let token = self.app_token().await?;
        let request = CreateSubscriptionRequest {
            subscription_type,
            broadcaster_user_id: broadcaster_id,
            callback,
            secret: &self.eventsub_secret,
        };
        self.observe(self.helix.create_subscription(&token, &request).await)
            .await
            .map(|_| ())
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), GatewayError> {
        let token = self.app_token().await?;
        self.observe(self.helix.delete_subscription(&token, subscription_id).await)
            .await
    }
}
