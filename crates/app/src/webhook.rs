use std::{collections::HashMap, time::Instant};

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use metrics::{counter, histogram};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};

use livebanner_core::policy;
use livebanner_storage::RepositoryError;

use crate::live::OnlineOutcome;
use crate::problem::ProblemResponse;
use crate::router::AppState;

const HEADER_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
const HEADER_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
const HEADER_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";
const HEADER_MESSAGE_TYPE: &str = "Twitch-Eventsub-Message-Type";

/// Entry point for `POST /api/twitch/webhook/{userId}[/...]`.
pub async fn handle(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    let start = Instant::now();
    let label = headers
        .get(HEADER_MESSAGE_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| MessageType::try_from(raw).ok())
        .map(MessageType::metric_label)
        .unwrap_or("unknown");

    let result = process(&state, &params, &headers, &body).await;
    histogram!("webhook_ack_latency_seconds", "type" => label)
        .record(start.elapsed().as_secs_f64());
    result
}

async fn process(
    state: &AppState,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, ProblemResponse> {
    let user_id = params.get("user_id").map(String::as_str).ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "missing_user",
            "webhook path must include a user id",
        )
    })?;

    let message_type = MessageType::try_from(get_required_header(headers, HEADER_MESSAGE_TYPE)?)
        .map_err(|detail| {
            ProblemResponse::new(StatusCode::BAD_REQUEST, "invalid_message_type", detail)
        })?;
    let message_label = message_type.metric_label();
    let message_id = get_required_header(headers, HEADER_MESSAGE_ID)?;
    let timestamp = get_required_header(headers, HEADER_TIMESTAMP)?;
    let signature = get_required_header(headers, HEADER_SIGNATURE)?;

    let secret = state.webhook_secret();
    if !verify_signature(&secret, message_id, timestamp, body, signature) {
        counter!("eventsub_invalid_signature_total", "type" => message_label).increment(1);
        warn!(stage = "ingress", user_id, %message_id, "rejected webhook with invalid signature");
        return Err(ProblemResponse::new(
            StatusCode::FORBIDDEN,
            "invalid_signature",
            "signature mismatch",
        ));
    }

    counter!("eventsub_ingress_total", "type" => message_label).increment(1);

    let body_string = std::str::from_utf8(body).map_err(|_| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_payload",
            "request body must be valid UTF-8",
        )
    })?;
    let payload: Value = serde_json::from_str(body_string).map_err(|err| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            format!("failed to parse payload: {err}"),
        )
    })?;

    match message_type {
        MessageType::Verification => {
            let challenge = payload
                .get("challenge")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ProblemResponse::new(
                        StatusCode::BAD_REQUEST,
                        "missing_challenge",
                        "verification payload must include challenge",
                    )
                })?;
            info!(stage = "ingress", user_id, %message_id, "answering subscription challenge");
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from(challenge.to_string()))
                .map_err(|err| internal_error("response_error", err))?)
        }
        MessageType::Revocation => {
            let subscription = payload.get("subscription");
            let subscription_type = subscription
                .and_then(|sub| sub.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let status = subscription
                .and_then(|sub| sub.get("status"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            warn!(stage = "ingress", user_id, %message_id, subscription_type, status, "subscription revoked by twitch");
            Ok(empty_ok())
        }
        MessageType::Notification => {
            handle_notification(state, user_id, message_id, &payload).await
        }
    }
}

async fn handle_notification(
    state: &AppState,
    user_id: &str,
    message_id: &str,
    payload: &Value,
) -> Result<Response, ProblemResponse> {
    let outcome = state
        .storage()
        .eventsub_messages()
        .record(message_id, "notification", state.now())
        .await
        .map_err(storage_error)?;
    if outcome.is_redelivery() {
        counter!("eventsub_dropped_total", "reason" => "duplicate").increment(1);
        info!(stage = "ingress", user_id, %message_id, "duplicate webhook message skipped");
        return Ok(empty_ok());
    }

    let result = dispatch_notification(state, user_id, message_id, payload).await;
    if result.is_err() {
        // Failed deliveries must stay eligible for the provider's retry.
        if let Err(err) = state.storage().eventsub_messages().forget(message_id).await {
            warn!(stage = "ingress", user_id, %message_id, error = %err, "failed to release message id");
        }
    }
    result
}

async fn dispatch_notification(
    state: &AppState,
    user_id: &str,
    message_id: &str,
    payload: &Value,
) -> Result<Response, ProblemResponse> {
    let event_type = payload
        .get("subscription")
        .and_then(|sub| sub.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "missing_event_type",
                "subscription.type is required",
            )
        })?;
    let event = payload.get("event").cloned().unwrap_or(Value::Null);

    match event_type {
        "stream.online" => handle_online(state, user_id, message_id, &event).await,
        "stream.offline" => handle_offline(state, user_id, message_id).await,
        other => {
            info!(stage = "ingress", user_id, %message_id, event_type = other, "ignoring unsupported event type");
            Ok(empty_ok())
        }
    }
}

async fn handle_online(
    state: &AppState,
    user_id: &str,
    message_id: &str,
    event: &Value,
) -> Result<Response, ProblemResponse> {
    let started_at = event
        .get("started_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "invalid_started_at",
                "event.started_at must be an RFC3339 timestamp",
            )
        })?;

    let now = state.now();
    if policy::is_stale_online(started_at, now) {
        counter!("eventsub_dropped_total", "reason" => "stale_online").increment(1);
        info!(stage = "ingress", user_id, %message_id, started_at = %started_at.to_rfc3339(), "dropping stream.online older than the freshness window");
        return Ok(empty_ok());
    }

    let enabled = state
        .registry()
        .list_enabled(user_id)
        .await
        .map_err(storage_error)?;

    if !enabled.is_empty() {
        let event_stream_id = required_event_field(event, "id")?;
        let broadcaster_id = required_event_field(event, "broadcaster_user_id")?;
        let login = required_event_field(event, "broadcaster_user_login")?;

        let current_stream_id = match state.twitch().current_stream_id(broadcaster_id).await {
            Ok(Some(id)) => id,
            Ok(None) => event_stream_id.to_string(),
            Err(err) => {
                warn!(stage = "live_state", user_id, broadcaster_id, error = %err, "stream lookup failed, using event stream id");
                event_stream_id.to_string()
            }
        };

        let outcome = state
            .live()
            .go_live(user_id, &current_stream_id, &policy::stream_link(login), now)
            .await
            .map_err(storage_error)?;
        if outcome == OnlineOutcome::AlreadyLive {
            counter!("eventsub_dropped_total", "reason" => "already_live").increment(1);
            info!(stage = "live_state", user_id, %message_id, stream_id = %current_stream_id, "stream already live, skipping streamup");
            return Ok(empty_ok());
        }
    }

    state.orchestrator().execute_stream_up(user_id).await;
    Ok(empty_ok())
}

async fn handle_offline(
    state: &AppState,
    user_id: &str,
    message_id: &str,
) -> Result<Response, ProblemResponse> {
    let existed = state
        .live()
        .go_offline(user_id)
        .await
        .map_err(storage_error)?;
    if !existed {
        info!(stage = "live_state", user_id, %message_id, "stream.offline without live record");
    }

    state.orchestrator().execute_stream_down(user_id).await;
    Ok(empty_ok())
}

fn required_event_field<'a>(event: &'a Value, field: &'static str) -> Result<&'a str, ProblemResponse> {
    event.get(field).and_then(Value::as_str).ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "missing_event_field",
            format!("event.{field} is required"),
        )
    })
}

fn empty_ok() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    response
}

fn storage_error(err: RepositoryError) -> ProblemResponse {
    error!(stage = "ingress", error = %err, "storage failure while handling webhook");
    ProblemResponse::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "storage_error",
        "failed to persist webhook state",
    )
}

fn internal_error(problem_type: &'static str, err: impl std::fmt::Display) -> ProblemResponse {
    error!(stage = "ingress", error = %err, "failed to build response");
    ProblemResponse::new(StatusCode::INTERNAL_SERVER_ERROR, problem_type, err.to_string())
}

fn get_required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ProblemResponse> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "missing_header",
                format!("missing header {name}"),
            )
        })
}

/// Checks `sha256=<hex HMAC-SHA256(secret, id + timestamp + body)>` in constant time.
pub fn verify_signature(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    provided: &str,
) -> bool {
    let Some(provided_bytes) = provided
        .strip_prefix("sha256=")
        .and_then(|hex_part| hex::decode(hex_part).ok())
    else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_bytes: &[u8] = expected.as_ref();

    expected_bytes.ct_eq(provided_bytes.as_slice()).into()
}

#[derive(Debug, Clone, Copy)]
enum MessageType {
    Verification,
    Notification,
    Revocation,
}

impl TryFrom<&str> for MessageType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "webhook_callback_verification" => Ok(Self::Verification),
            "notification" => Ok(Self::Notification),
            "revocation" => Ok(Self::Revocation),
            other => Err(format!("unsupported message type: {other}")),
        }
    }
}

impl MessageType {
    fn metric_label(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Notification => "notification",
            Self::Revocation => "revocation",
        }
    }
}
