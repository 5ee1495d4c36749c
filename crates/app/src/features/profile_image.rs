use async_trait::async_trait;

use livebanner_core::FeatureName;

use super::{FeatureDeps, FeatureError, FeatureOutcome, StreamFeature, DISABLED, NO_ORIGINAL};

const FEATURE: FeatureName = FeatureName::ProfileImage;

/// Replaces the avatar with a rendered frame around the original picture.
pub struct ProfileImageFeature {
    deps: FeatureDeps,
}

impl ProfileImageFeature {
    pub fn new(deps: FeatureDeps) -> Self {
        Self { deps }
    }
}

// Twitter hands out the 48px variant; the renderer wants the 400px one.
fn full_size(url: &str) -> String {
    url.replace("_normal", "_400x400")
}

#[async_trait]
impl StreamFeature for ProfileImageFeature {
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

        let image_url = match deps.original(user_id, FEATURE).await? {
            None => {
                let url = ctx.profile.profile_image_url_https.as_deref().map(full_size);
                let image = match url.as_deref() {
                    Some(url) => Some(deps.twitter.download_image(url).await?),
                    None => None,
                };
                deps.capture_image(user_id, FEATURE, image.as_deref()).await?;
                url
            }
            // The upstream avatar may already be the live one; render from the backup.
            Some(original) => match original.value {
                Some(key) => {
                    let image = deps.load_image(FEATURE, &key).await?;
                    Some(format!("data:image/png;base64,{image}"))
                }
                None => None,
            },
        };

        let mut template = ctx.settings.template;
        if let Some(url) = image_url {
            template.foreground_default("imageUrl", url);
        }

        let image = deps
            .render_cache
            .get_or_render(user_id, FEATURE, ctx.settings.updated_at, &template)
            .await?;
        deps.twitter.update_profile_image(&ctx.token, &image).await?;
        Ok(FeatureOutcome::Applied)
    }

    async fn restore(&self, user_id: &str) -> Result<FeatureOutcome, FeatureError> {
        let deps = &self.deps;
        let Some(original) = deps.original(user_id, FEATURE).await? else {
            return Ok(NO_ORIGINAL);
        };
        let Some(key) = original.value else {
            deps.finish_restore(user_id, FEATURE).await?;
            return Ok(NO_ORIGINAL);
        };

        let token = deps.twitter_token(user_id).await?;
        let image = deps.load_image(FEATURE, &key).await?;
        deps.twitter.update_profile_image(&token, &image).await?;
        deps.finish_restore(user_id, FEATURE).await
    }
}
