use async_trait::async_trait;
use tracing::debug;

use livebanner_core::{policy, FeatureName};

use super::{FeatureDeps, FeatureError, FeatureOutcome, StreamFeature, DISABLED, NO_ORIGINAL};

const FEATURE: FeatureName = FeatureName::TwitterName;

pub struct TwitterNameFeature {
    deps: FeatureDeps,
}

impl TwitterNameFeature {
    pub fn new(deps: FeatureDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StreamFeature for TwitterNameFeature {
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
        let account = deps
            .db
            .users()
            .fetch(user_id)
            .await?
            .ok_or(FeatureError::NotFound("user does not exist"))?;

        // A leftover backup means the current name may already be a live name.
        let original = match deps.original(user_id, FEATURE).await? {
            Some(backup) => backup.value.unwrap_or_else(|| ctx.profile.name.clone()),
            None => {
                deps.db
                    .original_values()
                    .insert_if_absent(user_id, FEATURE, Some(&ctx.profile.name), deps.now())
                    .await?;
                ctx.profile.name.clone()
            }
        };

        let desired = ctx.settings.content.unwrap_or_default();
        let name = policy::streaming_name(&desired, &original, account.plan, account.partner);
        deps.twitter.update_name(&ctx.token, &name).await?;
        debug!(stage = "feature", user_id, feature = %FEATURE, %name, "live name applied");
        Ok(FeatureOutcome::Applied)
    }

    async fn restore(&self, user_id: &str) -> Result<FeatureOutcome, FeatureError> {
        let deps = &self.deps;
        let Some(original) = deps.original(user_id, FEATURE).await? else {
            return Ok(NO_ORIGINAL);
        };
        let Some(name) = original.value else {
            deps.finish_restore(user_id, FEATURE).await?;
            return Ok(NO_ORIGINAL);
        };

        let token = deps.twitter_token(user_id).await?;
        deps.twitter.update_name(&token, &name).await?;
        deps.finish_restore(user_id, FEATURE).await
    }
}
