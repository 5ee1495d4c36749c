use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::debug;

use livebanner_core::{policy, FeatureName, TemplateSpec};
use livebanner_render::{RenderError, Renderer};
use livebanner_storage::{Database, ObjectStore, ObjectStoreError, RepositoryError};

use crate::router::Clock;

pub fn rendered_bucket(feature: FeatureName) -> String {
    format!("rendered-{}", feature.as_str())
}

/// Reuses the last rendered image while the feature settings are unchanged.
#[derive(Clone)]
pub struct RenderCache {
    db: Database,
    objects: Arc<dyn ObjectStore>,
    renderer: Arc<dyn Renderer>,
    clock: Clock,
}

#[derive(Debug, Error)]
pub enum RenderCacheError {
    #[error(transparent)]
    Storage(#[from] RepositoryError),
    #[error(transparent)]
    Objects(#[from] ObjectStoreError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl RenderCache {
    pub fn new(
        db: Database,
        objects: Arc<dyn ObjectStore>,
        renderer: Arc<dyn Renderer>,
        clock: Clock,
    ) -> Self {
        Self {
            db,
            objects,
            renderer,
            clock,
        }
    }

    pub async fn get_or_render(
        &self,
        user_id: &str,
        feature: FeatureName,
        settings_updated_at: DateTime<Utc>,
        template: &TemplateSpec,
    ) -> Result<String, RenderCacheError> {
        let bucket = rendered_bucket(feature);
        let last_rendered = self
            .db
            .rendered_images()
            .last_rendered(user_id, feature)
            .await?;

        if policy::render_is_current(last_rendered, settings_updated_at) {
            if let Some(image) = self.objects.download(&bucket, user_id).await? {
                counter!("render_cache_total", "feature" => feature.as_str(), "result" => "hit")
                    .increment(1);
                debug!(stage = "render_cache", user_id, feature = %feature, "cache hit");
                return Ok(image);
            }
        }

        counter!("render_cache_total", "feature" => feature.as_str(), "result" => "miss")
            .increment(1);
        let image = match feature {
            FeatureName::Banner => self.renderer.render_banner(template).await?,
            _ => self.renderer.render_profile_image(template).await?,
        };

        self.objects.upload(&bucket, user_id, &image).await?;
        self.db
            .rendered_images()
            .mark_rendered(user_id, feature, (self.clock)())
            .await?;
        debug!(stage = "render_cache", user_id, feature = %feature, "rendered and stored");
        Ok(image)
    }
}
