use async_trait::async_trait;
use tracing::debug;

use livebanner_core::{policy, FeatureName};

use super::{FeatureDeps, FeatureError, FeatureOutcome, StreamFeature, DISABLED, NO_ORIGINAL};

const FEATURE: FeatureName = FeatureName::Banner;

/// Swaps the Twitter header for a rendered "live" banner.
///
/// The render embeds the live thumbnail, so it is produced fresh on every
/// streamup instead of going through the render cache.
pub struct BannerFeature {
    deps: FeatureDeps,
}

impl BannerFeature {
    pub fn new(deps: FeatureDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StreamFeature for BannerFeature {
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
        let twitch = deps.twitch_account(user_id).await?;

        if deps.original(user_id, FEATURE).await?.is_none() {
            let current = deps
                .twitter
                .fetch_banner_url(&ctx.token, &ctx.profile.id_str)
                .await?;
            let image = match current {
                Some(url) => Some(deps.twitter.download_image(&url).await?),
                None => None,
            };
            deps.capture_image(user_id, FEATURE, image.as_deref()).await?;
        }

        let helix_user = deps.twitch.user(&twitch.twitch_user_id).await?;
        let mut template = ctx.settings.template;
        template.foreground_default("thumbnailUrl", policy::stream_thumbnail_url(&twitch.login));
        let username = helix_user
            .as_ref()
            .map(|user| user.display_name.clone())
            .unwrap_or_else(|| twitch.login.clone());
        template.foreground_default("username", username);
        if let Some(user) = helix_user.filter(|user| !user.profile_image_url.is_empty()) {
            template.foreground_default("profilePicUrl", user.profile_image_url);
        }

        let image = deps.renderer.render_banner(&template).await?;
        deps.twitter.update_banner(&ctx.token, &image).await?;
        debug!(stage = "feature", user_id, feature = %FEATURE, "live banner uploaded");
        Ok(FeatureOutcome::Applied)
    }

    async fn restore(&self, user_id: &str) -> Result<FeatureOutcome, FeatureError> {
        let deps = &self.deps;
        let Some(original) = deps.original(user_id, FEATURE).await? else {
            return Ok(NO_ORIGINAL);
        };
        let token = deps.twitter_token(user_id).await?;

        match original.value {
            Some(key) => {
                let image = deps.load_image(FEATURE, &key).await?;
                deps.twitter.update_banner(&token, &image).await?;
            }
            None => deps.twitter.remove_banner(&token).await?,
        }
        deps.finish_restore(user_id, FEATURE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::original_bucket;
    use crate::test_support::{TestApp, TwitterCall, USER_ID};

    #[tokio::test]
    async fn streamup_backs_up_and_uploads_render() {
        let app = TestApp::new().await;
        app.twitter.set_banner(Some("https://pbs.twimg.com/banner/1500x500"));
        app.enable(FeatureName::Banner).await;

        let outcome = app.feature(FEATURE).apply_live(USER_ID).await.expect("apply");
        assert_eq!(outcome, FeatureOutcome::Applied);

        assert_eq!(
            app.objects.get(&original_bucket(FEATURE), USER_ID).as_deref(),
            Some("image:https://pbs.twimg.com/banner/1500x500")
        );
        let template = app.renderer.last_banner_template().expect("rendered");
        assert_eq!(
            template.foreground_props.get("thumbnailUrl").and_then(|v| v.as_str()),
            Some("https://static-cdn.jtvnw.net/previews-ttv/live_user_alice-1920x1080.jpg")
        );
        assert_eq!(
            template.foreground_props.get("username").and_then(|v| v.as_str()),
            Some("Alice")
        );
        assert!(app
            .twitter
            .calls()
            .contains(&TwitterCall::UpdateBanner("banner-render-1".into())));
    }

    #[tokio::test]
    async fn restore_without_previous_banner_removes_it() {
        let app = TestApp::new().await;
        app.twitter.set_banner(None);
        app.enable(FeatureName::Banner).await;

        let feature = app.feature(FEATURE);
        feature.apply_live(USER_ID).await.expect("apply");
        let outcome = feature.restore(USER_ID).await.expect("restore");

        assert_eq!(outcome, FeatureOutcome::Restored);
        assert_eq!(app.twitter.calls().last(), Some(&TwitterCall::RemoveBanner));
        assert_eq!(
            feature.restore(USER_ID).await.expect("second restore"),
            NO_ORIGINAL
        );
    }

    #[tokio::test]
    async fn restore_uploads_backed_up_banner() {
        let app = TestApp::new().await;
        app.twitter.set_banner(Some("https://pbs.twimg.com/banner/old"));
        app.enable(FeatureName::Banner).await;

        let feature = app.feature(FEATURE);
        feature.apply_live(USER_ID).await.expect("apply");
        feature.restore(USER_ID).await.expect("restore");

        assert_eq!(
            app.twitter.calls().last(),
            Some(&TwitterCall::UpdateBanner(
                "image:https://pbs.twimg.com/banner/old".into()
            ))
        );
    }
}
