use std::{sync::Arc, time::Duration};

use metrics::counter;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use livebanner_core::{FeatureName, Transition};
use livebanner_storage::Database;

use crate::features::{FeatureError, FeatureOutcome, StreamFeature};
use crate::router::Clock;

#[derive(Debug)]
pub struct FeatureReport {
    pub feature: FeatureName,
    pub result: Result<FeatureOutcome, FeatureError>,
}

#[derive(Debug)]
pub struct StreamReport {
    pub transition: Transition,
    pub features: Vec<FeatureReport>,
    /// Tasks that panicked; their feature name is not recoverable from the join error.
    pub panicked: usize,
}

impl StreamReport {
    pub fn failures(&self) -> usize {
        self.panicked
            + self
                .features
                .iter()
                .filter(|report| report.result.is_err())
                .count()
    }

    pub fn outcome_of(&self, feature: FeatureName) -> Option<&Result<FeatureOutcome, FeatureError>> {
        self.features
            .iter()
            .find(|report| report.feature == feature)
            .map(|report| &report.result)
    }
}

/// Fans a stream transition out to every enabled feature.
///
/// Each feature runs as its own task under a timeout, so one failing or hung
/// feature never affects its siblings.
#[derive(Clone)]
pub struct Orchestrator {
    features: Arc<[Arc<dyn StreamFeature>]>,
    db: Database,
    clock: Clock,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        features: Vec<Arc<dyn StreamFeature>>,
        db: Database,
        clock: Clock,
        timeout: Duration,
    ) -> Self {
        Self {
            features: features.into(),
            db,
            clock,
            timeout,
        }
    }

    pub async fn execute_stream_up(&self, user_id: &str) -> StreamReport {
        self.execute(user_id, Transition::StreamUp).await
    }

    pub async fn execute_stream_down(&self, user_id: &str) -> StreamReport {
        self.execute(user_id, Transition::StreamDown).await
    }

    async fn execute(&self, user_id: &str, transition: Transition) -> StreamReport {
        let mut report = StreamReport {
            transition,
            features: Vec::new(),
            panicked: 0,
        };
        let mut tasks = JoinSet::new();

        for feature in self.features.iter() {
            match feature.is_enabled(user_id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    error!(stage = "orchestrator", user_id, feature = %feature.name(), error = %err, "failed to read feature flag");
                    report.features.push(FeatureReport {
                        feature: feature.name(),
                        result: Err(err),
                    });
                    continue;
                }
            }

            let this = self.clone();
            let feature = feature.clone();
            let user_id = user_id.to_string();
            tasks.spawn(async move {
                let result = this.run(feature.as_ref(), &user_id, transition).await;
                FeatureReport {
                    feature: feature.name(),
                    result,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(feature_report) => report.features.push(feature_report),
                Err(err) => {
                    error!(stage = "orchestrator", user_id, transition = transition.as_str(), error = %err, "feature task panicked");
                    counter!(
                        "feature_runs_total",
                        "feature" => "unknown",
                        "transition" => transition.as_str(),
                        "result" => "panicked"
                    )
                    .increment(1);
                    report.panicked += 1;
                }
            }
        }
        report.features.sort_by_key(|entry| entry.feature);

        info!(
            stage = "orchestrator",
            user_id,
            transition = transition.as_str(),
            features = report.features.len(),
            failures = report.failures(),
            "transition finished"
        );
        report
    }

    /// Runs one feature regardless of the other features' flags.
    pub async fn run_single(
        &self,
        feature: FeatureName,
        user_id: &str,
        transition: Transition,
    ) -> Result<FeatureOutcome, FeatureError> {
        let handler = self
            .feature(feature)
            .ok_or(FeatureError::NotFound("feature is not registered"))?;
        self.run(handler.as_ref(), user_id, transition).await
    }

    pub fn feature(&self, name: FeatureName) -> Option<Arc<dyn StreamFeature>> {
        self.features
            .iter()
            .find(|candidate| candidate.name() == name)
            .cloned()
    }

    async fn run(
        &self,
        feature: &dyn StreamFeature,
        user_id: &str,
        transition: Transition,
    ) -> Result<FeatureOutcome, FeatureError> {
        let name = feature.name();
        let call = async {
            match transition {
                Transition::StreamUp => feature.apply_live(user_id).await,
                Transition::StreamDown => feature.restore(user_id).await,
            }
        };
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(FeatureError::Timeout(self.timeout)),
        };

        match &result {
            Ok(outcome) => {
                info!(stage = "feature", user_id, feature = %name, transition = transition.as_str(), outcome = outcome.label(), "feature finished");
                counter!(
                    "feature_runs_total",
                    "feature" => name.as_str(),
                    "transition" => transition.as_str(),
                    "result" => outcome.label()
                )
                .increment(1);
            }
            Err(err) => {
                warn!(stage = "feature", user_id, feature = %name, transition = transition.as_str(), error = %err, "feature failed");
                counter!(
                    "feature_runs_total",
                    "feature" => name.as_str(),
                    "transition" => transition.as_str(),
                    "result" => err.kind()
                )
                .increment(1);
                if matches!(err, FeatureError::Unauthenticated) {
                    self.disable(user_id, name).await;
                }
            }
        }
        result
    }

    async fn disable(&self, user_id: &str, feature: FeatureName) {
        let now = (self.clock)();
        match self
            .db
            .feature_settings()
            .set_enabled(user_id, feature, false, now)
            .await
        {
            Ok(()) => warn!(stage = "feature", user_id, feature = %feature, "disabled after twitter rejected credentials"),
            Err(err) => error!(stage = "feature", user_id, feature = %feature, error = %err, "failed to disable feature"),
        }
    }
}
