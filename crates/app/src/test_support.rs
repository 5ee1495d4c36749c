//! Fakes and fixtures shared by the app tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration as StdDuration,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use tempfile::TempDir;
use url::Url;

use livebanner_core::{FeatureName, FeatureSettings, TemplateSpec};
use livebanner_render::{RenderError, Renderer};
use livebanner_storage::{Database, MemoryObjectStore, TwitchAccount};
use livebanner_twitch::{EventSubSubscription, HelixError, HelixUser, SubscriptionTransport};
use livebanner_twitter::{AccessToken, TwitterApi, TwitterError, TwitterProfile};

use crate::features::StreamFeature;
use crate::gateway::{GatewayError, TwitchApi};
use crate::render_cache::RenderCache;
use crate::router::{AppState, Clock, Services};
use crate::telemetry;

pub const USER_ID: &str = "user-1";
pub const TEST_SECRET: &str = "eventsub-test-secret";
pub const PROFILE_IMAGE_URL: &str = "https://pbs.twimg.com/profile_images/1/alice_normal.png";

#[derive(Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid start time");
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().unwrap())
    }
}

/// Twitter writes recorded by [`FakeTwitter`]. Reads are not recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwitterCall {
    UpdateBanner(String),
    RemoveBanner,
    UpdateProfileImage(String),
    UpdateName(String),
    PostTweet(String),
}

#[derive(Debug)]
struct TwitterState {
    name: String,
    banner_url: Option<String>,
    expired: bool,
    fail_banner_uploads: bool,
    panic_on_tweet: bool,
    tweets: usize,
    calls: Vec<TwitterCall>,
}

#[derive(Debug)]
pub struct FakeTwitter {
    state: Mutex<TwitterState>,
}

impl FakeTwitter {
    fn new() -> Self {
        Self {
            state: Mutex::new(TwitterState {
                name: "Alice".to_string(),
                banner_url: None,
                expired: false,
                fail_banner_uploads: false,
                panic_on_tweet: false,
                tweets: 0,
                calls: Vec::new(),
            }),
        }
    }

    pub fn set_banner(&self, url: Option<&str>) {
        self.state.lock().unwrap().banner_url = url.map(str::to_string);
    }

    pub fn fail_banner_uploads(&self) {
        self.state.lock().unwrap().fail_banner_uploads = true;
    }

    /// Makes the next tweet panic inside the feature task.
    pub fn panic_on_tweet(&self) {
        self.state.lock().unwrap().panic_on_tweet = true;
    }

    pub fn expire_credentials(&self) {
        self.state.lock().unwrap().expired = true;
    }

    pub fn calls(&self) -> Vec<TwitterCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn current_name(&self) -> String {
        self.state.lock().unwrap().name.clone()
    }

    fn authorized(&self) -> Result<std::sync::MutexGuard<'_, TwitterState>, TwitterError> {
        let state = self.state.lock().unwrap();
        if state.expired {
            return Err(TwitterError::Unauthorized {
                body: r#"{"errors":[{"code":89,"message":"Invalid or expired token."}]}"#.into(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl TwitterApi for FakeTwitter {
    async fn verify_credentials(&self, _token: &AccessToken) -> Result<TwitterProfile, TwitterError> {
        let state = self.authorized()?;
        Ok(TwitterProfile {
            id_str: "99".into(),
            name: state.name.clone(),
            screen_name: "alice".into(),
            profile_image_url_https: Some(PROFILE_IMAGE_URL.into()),
        })
    }

    async fn fetch_banner_url(
        &self,
        _token: &AccessToken,
        _twitter_user_id: &str,
    ) -> Result<Option<String>, TwitterError> {
        Ok(self.authorized()?.banner_url.clone())
    }

    async fn download_image(&self, url: &str) -> Result<String, TwitterError> {
        Ok(format!("image:{url}"))
    }

    async fn update_banner(&self, _token: &AccessToken, base64: &str) -> Result<(), TwitterError> {
        let mut state = self.authorized()?;
        if state.fail_banner_uploads {
            return Err(TwitterError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "over capacity".into(),
            });
        }
        state.calls.push(TwitterCall::UpdateBanner(base64.into()));
        Ok(())
    }

    async fn remove_banner(&self, _token: &AccessToken) -> Result<(), TwitterError> {
        self.authorized()?.calls.push(TwitterCall::RemoveBanner);
        Ok(())
    }

    async fn update_profile_image(
        &self,
        _token: &AccessToken,
        base64: &str,
    ) -> Result<(), TwitterError> {
        self.authorized()?
            .calls
            .push(TwitterCall::UpdateProfileImage(base64.into()));
        Ok(())
    }

    async fn update_name(&self, _token: &AccessToken, name: &str) -> Result<(), TwitterError> {
        let mut state = self.authorized()?;
        state.name = name.to_string();
        state.calls.push(TwitterCall::UpdateName(name.into()));
        Ok(())
    }

    async fn post_tweet(&self, _token: &AccessToken, text: &str) -> Result<String, TwitterError> {
        let mut state = self.authorized()?;
        if std::mem::take(&mut state.panic_on_tweet) {
            // Release the lock first so the panic does not poison it.
            drop(state);
            panic!("tweet client blew up");
        }
        state.tweets += 1;
        state.calls.push(TwitterCall::PostTweet(text.into()));
        Ok(format!("tweet-{}", state.tweets))
    }
}

#[derive(Debug, Default)]
struct RendererState {
    banner_renders: usize,
    profile_renders: usize,
    fail_next: bool,
    hang_next: bool,
    last_banner: Option<TemplateSpec>,
    last_profile: Option<TemplateSpec>,
}

#[derive(Debug, Default)]
pub struct FakeRenderer {
    state: Mutex<RendererState>,
}

impl FakeRenderer {
    pub fn profile_renders(&self) -> usize {
        self.state.lock().unwrap().profile_renders
    }

    pub fn fail_next(&self) {
        self.state.lock().unwrap().fail_next = true;
    }

    /// Makes the next banner render never complete.
    pub fn hang_next(&self) {
        self.state.lock().unwrap().hang_next = true;
    }

    pub fn last_banner_template(&self) -> Option<TemplateSpec> {
        self.state.lock().unwrap().last_banner.clone()
    }

    pub fn last_profile_template(&self) -> Option<TemplateSpec> {
        self.state.lock().unwrap().last_profile.clone()
    }

    fn take_failure(state: &mut RendererState) -> Result<(), RenderError> {
        if std::mem::take(&mut state.fail_next) {
            return Err(RenderError::InvalidPayload("renderer unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render_banner(&self, template: &TemplateSpec) -> Result<String, RenderError> {
        let hang = std::mem::take(&mut self.state.lock().unwrap().hang_next);
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        state.banner_renders += 1;
        state.last_banner = Some(template.clone());
        Ok(format!("banner-render-{}", state.banner_renders))
    }

    async fn render_profile_image(&self, template: &TemplateSpec) -> Result<String, RenderError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        state.profile_renders += 1;
        state.last_profile = Some(template.clone());
        Ok(format!("profile-render-{}", state.profile_renders))
    }
}

#[derive(Debug, Default)]
struct TwitchState {
    current_stream: Option<String>,
    subscriptions: Vec<EventSubSubscription>,
    next_subscription: usize,
    fail_subscriptions: bool,
}

#[derive(Debug, Default)]
pub struct FakeTwitch {
    state: Mutex<TwitchState>,
}

impl FakeTwitch {
    pub fn set_current_stream(&self, stream_id: Option<&str>) {
        self.state.lock().unwrap().current_stream = stream_id.map(str::to_string);
    }

    pub fn fail_subscriptions(&self) {
        self.state.lock().unwrap().fail_subscriptions = true;
    }

    pub fn subscription_types(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .map(|sub| sub.subscription_type.clone())
            .collect()
    }
}

#[async_trait]
impl TwitchApi for FakeTwitch {
    async fn current_stream_id(&self, _broadcaster_id: &str) -> Result<Option<String>, GatewayError> {
        Ok(self.state.lock().unwrap().current_stream.clone())
    }

    async fn user(&self, twitch_user_id: &str) -> Result<Option<HelixUser>, GatewayError> {
        Ok(Some(HelixUser {
            id: twitch_user_id.to_string(),
            login: "alice".into(),
            display_name: "Alice".into(),
            profile_image_url: "https://static-cdn.jtvnw.net/jtv_user_pictures/alice.png".into(),
        }))
    }

    async fn subscriptions(
        &self,
        broadcaster_id: &str,
    ) -> Result<Vec<EventSubSubscription>, GatewayError> {
        let state = self.state.lock().unwrap();
        if state.fail_subscriptions {
            return Err(GatewayError::Helix(HelixError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "helix unavailable".into(),
            }));
        }
        Ok(state
            .subscriptions
            .iter()
            .filter(|sub| sub.broadcaster_user_id() == Some(broadcaster_id))
            .cloned()
            .collect())
    }

    async fn subscribe(
        &self,
        subscription_type: &str,
        broadcaster_id: &str,
        callback: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.next_subscription += 1;
        let mut condition = Map::new();
        condition.insert(
            "broadcaster_user_id".into(),
            Value::String(broadcaster_id.to_string()),
        );
        let subscription = EventSubSubscription {
            id: format!("sub-{}", state.next_subscription),
            subscription_type: subscription_type.to_string(),
            status: "webhook_callback_verification_pending".into(),
            condition,
            transport: SubscriptionTransport {
                method: "webhook".into(),
                callback: Some(callback.to_string()),
            },
        };
        state.subscriptions.push(subscription);
        Ok(())
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<(), GatewayError> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .retain(|sub| sub.id != subscription_id);
        Ok(())
    }
}

/// A fully wired [`AppState`] over a temporary database and in-memory fakes.
///
/// The seeded user has a linked Twitch account (`42`/`alice`) and a verified
/// Twitter account (`99`/`alice`).
pub struct TestApp {
    pub state: AppState,
    pub clock: TestClock,
    pub twitter: Arc<FakeTwitter>,
    pub renderer: Arc<FakeRenderer>,
    pub twitch: Arc<FakeTwitch>,
    pub objects: Arc<MemoryObjectStore>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_feature_timeout(StdDuration::from_secs(5)).await
    }

    pub async fn with_feature_timeout(feature_timeout: StdDuration) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("app.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");

        let clock = TestClock::new();
        let users = db.users();
        users.ensure_user(USER_ID, clock.now()).await.expect("user");
        users
            .upsert_twitch_account(
                USER_ID,
                &TwitchAccount {
                    twitch_user_id: "42".into(),
                    login: "alice".into(),
                },
            )
            .await
            .expect("twitch account");
        users
            .upsert_twitter_tokens(USER_ID, "token", "token-secret", clock.now())
            .await
            .expect("twitter tokens");
        users
            .record_twitter_identity(USER_ID, "99", "alice")
            .await
            .expect("twitter identity");

        let twitter = Arc::new(FakeTwitter::new());
        let renderer = Arc::new(FakeRenderer::default());
        let twitch = Arc::new(FakeTwitch::default());
        let objects = Arc::new(MemoryObjectStore::new());
        let services = Services {
            twitch: twitch.clone(),
            twitter: twitter.clone(),
            renderer: renderer.clone(),
            objects: objects.clone(),
        };

        let metrics = telemetry::init_metrics().expect("metrics");
        let state = AppState::new(
            metrics,
            db,
            Arc::from(TEST_SECRET.as_bytes()),
            clock.clock(),
            services,
            Url::parse("https://banner.example.com/").expect("base url"),
            feature_timeout,
        );

        Self {
            state,
            clock,
            twitter,
            renderer,
            twitch,
            objects,
            _dir: dir,
        }
    }

    pub async fn enable(&self, feature: FeatureName) {
        self.save_enabled(feature, None).await;
    }

    pub async fn enable_with_content(&self, feature: FeatureName, content: &str) {
        self.save_enabled(feature, Some(content.to_string())).await;
    }

    async fn save_enabled(&self, feature: FeatureName, content: Option<String>) {
        let settings = FeatureSettings {
            user_id: USER_ID.to_string(),
            feature,
            enabled: true,
            template: TemplateSpec {
                foreground_id: "ImLive".into(),
                background_id: "Plain".into(),
                foreground_props: Map::new(),
                background_props: Map::new(),
            },
            content,
            updated_at: self.clock.now(),
        };
        self.state
            .storage()
            .feature_settings()
            .save(&settings)
            .await
            .expect("save settings");
    }

    /// Replaces the foreground props and bumps `updated_at` to the clock.
    pub async fn update_foreground(&self, feature: FeatureName, props: Value) {
        let repo = self.state.storage().feature_settings();
        let mut settings = repo
            .fetch(USER_ID, feature)
            .await
            .expect("fetch settings")
            .expect("settings exist");
        settings.template.foreground_props = match props {
            Value::Object(map) => map,
            other => panic!("foreground props must be an object, got {other}"),
        };
        settings.updated_at = self.clock.now();
        repo.save(&settings).await.expect("save settings");
    }

    pub fn feature(&self, name: FeatureName) -> Arc<dyn StreamFeature> {
        self.state
            .orchestrator()
            .feature(name)
            .expect("feature is registered")
    }

    pub fn render_cache(&self) -> RenderCache {
        RenderCache::new(
            self.state.storage().clone(),
            self.objects.clone(),
            self.renderer.clone(),
            self.clock.clock(),
        )
    }
}
