use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use livebanner_storage::TwitchAccount;
use livebanner_twitter::AccessToken;

use crate::problem::ProblemResponse;
use crate::router::{json_response, AppState};
use crate::settings::storage_problem;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwitterLink {
    oauth_token: String,
    oauth_token_secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwitchLink {
    twitch_user_id: String,
    login: String,
}

/// `PUT /api/accounts/{userId}/twitter`
///
/// The token pair is verified against Twitter before anything is stored.
pub async fn link_twitter(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(link): Json<TwitterLink>,
) -> Result<Response, ProblemResponse> {
    if link.oauth_token.is_empty() || link.oauth_token_secret.is_empty() {
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "oauthToken and oauthTokenSecret are required",
        ));
    }

    let token = AccessToken::new(&link.oauth_token, &link.oauth_token_secret);
    let profile = state
        .twitter()
        .verify_credentials(&token)
        .await
        .map_err(|err| {
            warn!(stage = "accounts", user_id = %user_id, error = %err, "twitter credentials rejected");
            if err.is_unauthorized() {
                ProblemResponse::new(
                    StatusCode::UNAUTHORIZED,
                    "unauthenticated",
                    "twitter rejected the supplied token",
                )
            } else {
                ProblemResponse::new(StatusCode::BAD_GATEWAY, "upstream_error", err.to_string())
            }
        })?;

    let now = state.now();
    let users = state.storage().users();
    users.ensure_user(&user_id, now).await.map_err(storage_problem)?;
    users
        .upsert_twitter_tokens(&user_id, &link.oauth_token, &link.oauth_token_secret, now)
        .await
        .map_err(storage_problem)?;
    users
        .record_twitter_identity(&user_id, &profile.id_str, &profile.screen_name)
        .await
        .map_err(storage_problem)?;

    info!(stage = "accounts", user_id = %user_id, screen_name = %profile.screen_name, "twitter account linked");
    Ok(json_response(
        StatusCode::OK,
        json!({
            "userId": user_id,
            "twitterUserId": profile.id_str,
            "screenName": profile.screen_name,
        }),
    ))
}

/// `PUT /api/accounts/{userId}/twitch`
pub async fn link_twitch(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(link): Json<TwitchLink>,
) -> Result<Response, ProblemResponse> {
    if link.twitch_user_id.is_empty() || link.login.is_empty() {
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "twitchUserId and login are required",
        ));
    }

    let users = state.storage().users();
    users
        .ensure_user(&user_id, state.now())
        .await
        .map_err(storage_problem)?;
    let account = TwitchAccount {
        twitch_user_id: link.twitch_user_id,
        login: link.login.to_lowercase(),
    };
    users
        .upsert_twitch_account(&user_id, &account)
        .await
        .map_err(storage_problem)?;

    info!(stage = "accounts", user_id = %user_id, login = %account.login, "twitch account linked");
    Ok(json_response(
        StatusCode::OK,
        json!({
            "userId": user_id,
            "twitchUserId": account.twitch_user_id,
            "login": account.login,
        }),
    ))
}
