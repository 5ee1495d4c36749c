use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Opaque render parameters as stored by the settings UI.
pub type Props = Map<String, Value>;

/// One independently enablable automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureName {
    Banner,
    ProfileImage,
    TwitterName,
    Tweet,
}

impl FeatureName {
    pub const ALL: [FeatureName; 4] = [
        Self::Banner,
        Self::ProfileImage,
        Self::TwitterName,
        Self::Tweet,
    ];

    /// Returns the identifier used in routes, database rows and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Banner => "banner",
            Self::ProfileImage => "profileImage",
            Self::TwitterName => "twitterName",
            Self::Tweet => "tweet",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureName {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "banner" => Ok(Self::Banner),
            "profileImage" => Ok(Self::ProfileImage),
            "twitterName" => Ok(Self::TwitterName),
            "tweet" => Ok(Self::Tweet),
            other => Err(ParseError::UnknownFeature(other.to_string())),
        }
    }
}

/// Subscription tier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Personal,
    Professional,
}

impl Plan {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Personal => "personal",
            Self::Professional => "professional",
        }
    }

    pub fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

impl FromStr for Plan {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "free" => Ok(Self::Free),
            "personal" => Ok(Self::Personal),
            "professional" => Ok(Self::Professional),
            other => Err(ParseError::UnknownPlan(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    #[error("unknown plan: {0}")]
    UnknownPlan(String),
}

/// Direction of a stream state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StreamUp,
    StreamDown,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StreamUp => "streamup",
            Self::StreamDown => "streamdown",
        }
    }
}

/// Template selection sent to the rendering service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    pub foreground_id: String,
    pub background_id: String,
    #[serde(default)]
    pub foreground_props: Props,
    #[serde(default)]
    pub background_props: Props,
}

impl TemplateSpec {
    /// Sets a foreground prop unless the user already configured it.
    pub fn foreground_default(&mut self, key: &str, value: impl Into<Value>) {
        self.foreground_props
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }
}

/// Per-user settings of one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSettings {
    pub user_id: String,
    pub feature: FeatureName,
    pub enabled: bool,
    pub template: TemplateSpec,
    /// Streaming name for the name feature, tweet text for the tweet feature.
    pub content: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A user that is currently known to be live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStream {
    pub user_id: String,
    pub twitch_stream_id: String,
    pub stream_link: String,
    pub twitter_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Application user with the data the orchestration core reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: String,
    pub plan: Plan,
    pub partner: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feature_names_round_trip_through_strings() {
        for feature in FeatureName::ALL {
            assert_eq!(feature.as_str().parse::<FeatureName>(), Ok(feature));
        }
        assert!(matches!(
            "avatar".parse::<FeatureName>(),
            Err(ParseError::UnknownFeature(value)) if value == "avatar"
        ));
    }

    #[test]
    fn template_spec_serializes_camel_case() {
        let spec = TemplateSpec {
            foreground_id: "fg".into(),
            background_id: "bg".into(),
            foreground_props: json!({"color": "red"}).as_object().cloned().unwrap(),
            background_props: Props::new(),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["foregroundId"], "fg");
        assert_eq!(value["backgroundId"], "bg");
        assert_eq!(value["foregroundProps"]["color"], "red");
        assert!(value["backgroundProps"].as_object().unwrap().is_empty());
    }

    #[test]
    fn foreground_default_keeps_user_value() {
        let mut spec = TemplateSpec::default();
        spec.foreground_props
            .insert("username".into(), Value::String("custom".into()));

        spec.foreground_default("username", "from-twitch");
        spec.foreground_default("thumbnailUrl", "https://example.com/t.jpg");

        assert_eq!(spec.foreground_props["username"], "custom");
        assert_eq!(
            spec.foreground_props["thumbnailUrl"],
            "https://example.com/t.jpg"
        );
    }
}
