use chrono::{DateTime, Duration, Utc};

use crate::types::Plan;

/// Prefix of the generic name applied when the custom name is paywalled.
pub const LIVE_NAME_PREFIX: &str = "🔴 Live now | ";

/// Tweet text used when the user never configured one.
pub const DEFAULT_TWEET_TEXT: &str = "I'm live on Twitch! Come hang out!";

/// Notifications whose `started_at` is older than this are treated as redeliveries.
pub fn online_freshness_window() -> Duration {
    Duration::minutes(10)
}

/// Returns `true` when a `stream.online` event started too long ago to be acted upon.
pub fn is_stale_online(started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(started_at) > online_freshness_window()
}

/// Resolves the display name applied on streamup.
///
/// Free users (non partners) only keep their custom text when it still
/// contains their current name; otherwise the generic live name is used.
pub fn streaming_name(desired: &str, current_name: &str, plan: Plan, partner: bool) -> String {
    if !desired.contains(current_name) && plan.is_free() && !partner {
        return format!("{LIVE_NAME_PREFIX}{current_name}");
    }
    desired.to_string()
}

/// A cached render may be reused only if it is at least as new as the settings.
pub fn render_is_current(last_rendered: Option<DateTime<Utc>>, settings_updated_at: DateTime<Utc>) -> bool {
    last_rendered
        .map(|rendered| rendered >= settings_updated_at)
        .unwrap_or(false)
}

/// Builds the tweet posted on streamup, appending the stream link when missing.
pub fn compose_tweet(content: Option<&str>, stream_link: &str) -> String {
    let text = content
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(DEFAULT_TWEET_TEXT);
    if text.contains(stream_link) {
        text.to_string()
    } else {
        format!("{text} {stream_link}")
    }
}

pub fn stream_link(login: &str) -> String {
    format!("https://www.twitch.tv/{login}")
}

pub fn stream_thumbnail_url(login: &str) -> String {
    format!("https://static-cdn.jtvnw.net/previews-ttv/live_user_{login}-1920x1080.jpg")
}
