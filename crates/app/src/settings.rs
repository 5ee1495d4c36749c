use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use livebanner_core::{FeatureName, FeatureSettings, Props, TemplateSpec};
use livebanner_storage::RepositoryError;

use crate::gateway::GatewayError;
use crate::problem::ProblemResponse;
use crate::router::{json_response, AppState};
use crate::streams::parse_feature;

const SUBSCRIPTION_TYPES: [&str; 2] = ["stream.online", "stream.offline"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    foreground_id: Option<String>,
    #[serde(default)]
    background_id: Option<String>,
    #[serde(default)]
    foreground_props: Option<Value>,
    #[serde(default)]
    background_props: Option<Value>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnabledUpdate {
    enabled: bool,
}

/// `PUT /api/features/{feature}/settings/{userId}`
pub async fn update_settings(
    State(state): State<AppState>,
    Path((feature, user_id)): Path<(String, String)>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Response, ProblemResponse> {
    let feature = parse_feature(&feature)?;
    let foreground_props = props_object("foregroundProps", update.foreground_props)?;
    let background_props = props_object("backgroundProps", update.background_props)?;

    let now = state.now();
    let users = state.storage().users();
    users.ensure_user(&user_id, now).await.map_err(storage_problem)?;

    let repo = state.storage().feature_settings();
    let mut settings = repo
        .fetch(&user_id, feature)
        .await
        .map_err(storage_problem)?
        .unwrap_or_else(|| FeatureSettings {
            user_id: user_id.clone(),
            feature,
            enabled: false,
            template: TemplateSpec::default(),
            content: None,
            updated_at: now,
        });

    if let Some(id) = update.foreground_id {
        settings.template.foreground_id = id;
    }
    if let Some(id) = update.background_id {
        settings.template.background_id = id;
    }
    if let Some(props) = foreground_props {
        settings.template.foreground_props = props;
    }
    if let Some(props) = background_props {
        settings.template.background_props = props;
    }
    if update.content.is_some() {
        settings.content = update.content;
    }
    settings.updated_at = now;

    repo.save(&settings).await.map_err(storage_problem)?;
    info!(stage = "settings", user_id = %user_id, feature = %feature, "settings updated");

    Ok(json_response(StatusCode::OK, settings_view(&settings)))
}

/// `PUT /api/features/{feature}/enabled/{userId}`
pub async fn set_enabled(
    State(state): State<AppState>,
    Path((feature, user_id)): Path<(String, String)>,
    Json(update): Json<EnabledUpdate>,
) -> Result<Response, ProblemResponse> {
    let feature = parse_feature(&feature)?;
    let now = state.now();

    state
        .storage()
        .users()
        .ensure_user(&user_id, now)
        .await
        .map_err(storage_problem)?;
    state
        .storage()
        .feature_settings()
        .set_enabled(&user_id, feature, update.enabled, now)
        .await
        .map_err(storage_problem)?;
    info!(stage = "settings", user_id = %user_id, feature = %feature, enabled = update.enabled, "feature flag changed");

    let eventsub = reconcile_subscriptions(&state, &user_id)
        .await
        .map_err(|err| {
            error!(stage = "settings", user_id = %user_id, error = %err, "eventsub reconciliation failed");
            match err {
                ReconcileError::Storage(err) => storage_problem(err),
                other => ProblemResponse::new(
                    StatusCode::BAD_GATEWAY,
                    "reconciliation_failed",
                    other.to_string(),
                ),
            }
        })?;

    Ok(json_response(
        StatusCode::OK,
        json!({
            "feature": feature,
            "enabled": update.enabled,
            "eventsub": eventsub.as_str(),
        }),
    ))
}

/// `GET /api/users/{userId}/features`
pub async fn list_enabled(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ProblemResponse> {
    let enabled = state
        .registry()
        .list_enabled(&user_id)
        .await
        .map_err(storage_problem)?;
    let enabled: Vec<FeatureName> = enabled.into_iter().collect();
    Ok(json_response(
        StatusCode::OK,
        json!({ "userId": user_id, "enabled": enabled }),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Synced,
    /// No Twitch account is linked yet.
    Skipped,
}

impl Reconciliation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Storage(#[from] RepositoryError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("failed to build callback url: {0}")]
    Callback(#[from] url::ParseError),
}

/// Keeps `stream.online`/`stream.offline` subscriptions present exactly while
/// at least one feature is enabled.
pub async fn reconcile_subscriptions(
    state: &AppState,
    user_id: &str,
) -> Result<Reconciliation, ReconcileError> {
    let Some(account) = state
        .storage()
        .users()
        .fetch_twitch_account(user_id)
        .await?
    else {
        info!(stage = "settings", user_id, "no twitch account linked, skipping eventsub sync");
        return Ok(Reconciliation::Skipped);
    };

    let wanted = !state.registry().list_enabled(user_id).await?.is_empty();
    let callback = state
        .public_base_url()
        .join(&format!("api/twitch/webhook/{user_id}"))?;
    let callback = callback.as_str();

    let existing = state
        .twitch()
        .subscriptions(&account.twitch_user_id)
        .await?;
    let ours: Vec<_> = existing
        .into_iter()
        .filter(|sub| sub.transport.callback.as_deref() == Some(callback))
        .filter(|sub| SUBSCRIPTION_TYPES.contains(&sub.subscription_type.as_str()))
        .collect();

    if wanted {
        for subscription_type in SUBSCRIPTION_TYPES {
            if ours
                .iter()
                .any(|sub| sub.subscription_type == subscription_type)
            {
                continue;
            }
            state
                .twitch()
                .subscribe(subscription_type, &account.twitch_user_id, callback)
                .await?;
            info!(stage = "settings", user_id, subscription_type, "created eventsub subscription");
        }
    } else {
        for sub in ours {
            state.twitch().unsubscribe(&sub.id).await?;
            info!(stage = "settings", user_id, subscription_type = %sub.subscription_type, "deleted eventsub subscription");
        }
    }
    Ok(Reconciliation::Synced)
}

fn props_object(field: &'static str, value: Option<Value>) -> Result<Option<Props>, ProblemResponse> {
    match value {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_props",
            format!("{field} must be a JSON object"),
        )),
    }
}

fn settings_view(settings: &FeatureSettings) -> Value {
    json!({
        "feature": settings.feature,
        "enabled": settings.enabled,
        "foregroundId": settings.template.foreground_id,
        "backgroundId": settings.template.background_id,
        "foregroundProps": settings.template.foreground_props,
        "backgroundProps": settings.template.background_props,
        "content": settings.content,
        "updatedAt": settings.updated_at.to_rfc3339(),
    })
}

pub(crate) fn storage_problem(err: RepositoryError) -> ProblemResponse {
    error!(stage = "settings", error = %err, "storage failure");
    ProblemResponse::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "storage_error",
        "failed to access storage",
    )
}
