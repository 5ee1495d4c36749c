use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use serde_json::json;

use livebanner_core::{FeatureName, Transition};

use crate::problem::ProblemResponse;
use crate::router::{json_response, AppState};

pub async fn stream_up(
    State(state): State<AppState>,
    Path((feature, user_id)): Path<(String, String)>,
) -> Result<Response, ProblemResponse> {
    run(&state, &feature, &user_id, Transition::StreamUp).await
}

pub async fn stream_down(
    State(state): State<AppState>,
    Path((feature, user_id)): Path<(String, String)>,
) -> Result<Response, ProblemResponse> {
    run(&state, &feature, &user_id, Transition::StreamDown).await
}

async fn run(
    state: &AppState,
    feature: &str,
    user_id: &str,
    transition: Transition,
) -> Result<Response, ProblemResponse> {
    let feature = parse_feature(feature)?;
    let outcome = state
        .orchestrator()
        .run_single(feature, user_id, transition)
        .await
        .map_err(ProblemResponse::from)?;

    let mut body = json!({ "feature": feature });
    if let (Some(map), Ok(serde_json::Value::Object(extra))) =
        (body.as_object_mut(), serde_json::to_value(&outcome))
    {
        map.extend(extra);
    }
    Ok(json_response(StatusCode::OK, body))
}

pub(crate) fn parse_feature(raw: &str) -> Result<FeatureName, ProblemResponse> {
    raw.parse::<FeatureName>()
        .map_err(|err| ProblemResponse::new(StatusCode::NOT_FOUND, "unknown_feature", err.to_string()))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::router::app_router;
    use crate::test_support::{TestApp, USER_ID};

    async fn post(app: &TestApp, uri: &str) -> (StatusCode, Value) {
        let response = app_router(app.state.clone())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn streamup_reports_outcome() {
        let app = TestApp::new().await;
        app.enable_with_content(FeatureName::TwitterName, "Alice is live!")
            .await;

        let (status, body) = post(&app, &format!("/api/features/twitterName/streamup/{USER_ID}")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["feature"], "twitterName");
        assert_eq!(body["outcome"], "applied");
    }

    #[tokio::test]
    async fn unknown_feature_is_not_found() {
        let app = TestApp::new().await;
        let (status, body) = post(&app, &format!("/api/features/avatarFrame/streamup/{USER_ID}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "unknown_feature");
    }

    #[tokio::test]
    async fn unconfigured_feature_is_a_bad_request() {
        let app = TestApp::new().await;
        let (status, body) = post(&app, &format!("/api/features/banner/streamup/{USER_ID}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "missing_prerequisite");
    }

    #[tokio::test]
    async fn expired_twitter_token_is_unauthorized_and_disables() {
        let app = TestApp::new().await;
        app.enable(FeatureName::ProfileImage).await;
        app.twitter.expire_credentials();

        let (status, _) = post(&app, &format!("/api/features/profileImage/streamup/{USER_ID}")).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let settings = app
            .state
            .storage()
            .feature_settings()
            .fetch(USER_ID, FeatureName::ProfileImage)
            .await
            .expect("fetch")
            .expect("row");
        assert!(!settings.enabled);
    }

    #[tokio::test]
    async fn upstream_failure_is_bad_gateway() {
        let app = TestApp::new().await;
        app.enable(FeatureName::Banner).await;
        app.twitter.fail_banner_uploads();

        let (status, body) = post(&app, &format!("/api/features/banner/streamup/{USER_ID}")).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["type"], "upstream_error");
    }

    #[tokio::test]
    async fn streamdown_without_backup_is_skipped() {
        let app = TestApp::new().await;
        app.enable(FeatureName::TwitterName).await;

        let (status, body) = post(&app, &format!("/api/features/twitterName/streamdown/{USER_ID}")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "skipped");
        assert_eq!(body["reason"], "no original to restore");
    }
}
