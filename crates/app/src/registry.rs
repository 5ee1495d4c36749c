use std::collections::BTreeSet;

use livebanner_core::FeatureName;
use livebanner_storage::{Database, RepositoryError};

/// Read-through view of which features a user has switched on.
#[derive(Clone)]
pub struct FeatureRegistry {
    db: Database,
}

impl FeatureRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list_enabled(&self, user_id: &str) -> Result<BTreeSet<FeatureName>, RepositoryError> {
        let enabled = self.db.feature_settings().list_enabled(user_id).await?;
        Ok(enabled.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestApp, USER_ID};

    #[tokio::test]
    async fn lists_only_enabled_features() {
        let app = TestApp::new().await;
        app.enable(FeatureName::Tweet).await;
        app.enable(FeatureName::Banner).await;
        app.state
            .storage()
            .feature_settings()
            .set_enabled(USER_ID, FeatureName::TwitterName, false, app.clock.now())
            .await
            .expect("disable");

        let enabled = app
            .state
            .registry()
            .list_enabled(USER_ID)
            .await
            .expect("list");
        assert_eq!(
            enabled.into_iter().collect::<Vec<_>>(),
            vec![FeatureName::Banner, FeatureName::Tweet]
        );
    }

    #[tokio::test]
    async fn unknown_user_has_nothing_enabled() {
        let app = TestApp::new().await;
        let enabled = app
            .state
            .registry()
            .list_enabled("nobody")
            .await
            .expect("list");
        assert!(enabled.is_empty());
    }
}
