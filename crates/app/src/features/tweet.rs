use async_trait::async_trait;
use tracing::{debug, info};

use livebanner_core::{policy, FeatureName};

use super::{FeatureDeps, FeatureError, FeatureOutcome, StreamFeature, DISABLED};

const FEATURE: FeatureName = FeatureName::Tweet;

/// Announces the stream with a tweet. Nothing is undone on streamdown.
pub struct TweetFeature {
    deps: FeatureDeps,
}

impl TweetFeature {
    pub fn new(deps: FeatureDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StreamFeature for TweetFeature {
    fn name(&self) -> FeatureName {
        FEATURE
    }

    async fn is_enabled(&self, user_id: &str) -> Result<bool, FeatureError> {
        self.deps.is_enabled(user_id, FEATURE).await
    }

    async fn apply_live(&self, user_id: &str) -> Result<FeatureOutcome, FeatureError> {
        let deps = &self.deps;
        let Some(ctx) = deps.prepare_live(user_id, FEATURE).await? else {
            return Ok(DISABLED);
        };

        let link = match deps.db.live_streams().fetch(user_id).await? {
            Some(live) => live.stream_link,
            None => policy::stream_link(&deps.twitch_account(user_id).await?.login),
        };
        let text = policy::compose_tweet(ctx.settings.content.as_deref(), &link);
        let tweet_id = deps.twitter.post_tweet(&ctx.token, &text).await?;

        let tweet_url = format!(
            "https://twitter.com/{}/status/{}",
            ctx.profile.screen_name, tweet_id
        );
        if deps
            .db
            .live_streams()
            .set_twitter_link(user_id, &tweet_url)
            .await?
        {
            info!(stage = "feature", user_id, feature = %FEATURE, %tweet_url, "live tweet posted");
        } else {
            debug!(stage = "feature", user_id, feature = %FEATURE, "tweet posted without live record");
        }
        Ok(FeatureOutcome::Applied)
    }

    async fn restore(&self, _user_id: &str) -> Result<FeatureOutcome, FeatureError> {
        Ok(FeatureOutcome::Skipped {
            reason: "tweets are not reverted",
        })
    }
}
