use std::{env, fmt, net::SocketAddr, path::PathBuf, time::Duration};

use url::Url;

use super::server_bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://livebanner.db?mode=rwc";
pub const DEFAULT_TWITCH_API_BASE_URL: &str = "https://api.twitch.tv/helix/";
pub const DEFAULT_TWITCH_OAUTH_BASE_URL: &str = "https://id.twitch.tv/oauth2/";
pub const DEFAULT_TWITTER_API_BASE_URL: &str = "https://api.twitter.com/";
pub const DEFAULT_OBJECT_STORE_ROOT: &str = "./objects";
const DEFAULT_EXTERNAL_TIMEOUT_SECS: u64 = 5;
const DEFAULT_FEATURE_TIMEOUT_SECS: u64 = 20;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Credentials for the Twitch application used for Helix and EventSub calls.
#[derive(Debug, Clone)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base_url: Url,
    pub oauth_base_url: Url,
}

/// Consumer credentials of the Twitter application; user tokens live in the database.
#[derive(Debug, Clone)]
pub struct TwitterConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub api_base_url: Url,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub eventsub_secret: String,
    pub twitch: TwitchConfig,
    pub twitter: TwitterConfig,
    pub renderer_base_url: Url,
    pub object_store_root: PathBuf,
    /// Externally reachable origin used to build EventSub callback URLs.
    pub public_base_url: Url,
    /// Upper bound for a single outbound HTTP call.
    pub external_timeout: Duration,
    /// Upper bound for one feature's streamup or streamdown run.
    pub feature_timeout: Duration,
    /// Bearer token required on the internal API routes; unset leaves them open.
    pub internal_api_token: Option<String>,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let twitch = TwitchConfig {
            client_id: required("TWITCH_CLIENT_ID")?,
            client_secret: required("TWITCH_CLIENT_SECRET")?,
            api_base_url: url_or("TWITCH_API_BASE_URL", DEFAULT_TWITCH_API_BASE_URL)?,
            oauth_base_url: url_or("TWITCH_OAUTH_BASE_URL", DEFAULT_TWITCH_OAUTH_BASE_URL)?,
        };
        let twitter = TwitterConfig {
            consumer_key: required("TWITTER_CONSUMER_KEY")?,
            consumer_secret: required("TWITTER_CONSUMER_SECRET")?,
            api_base_url: url_or("TWITTER_API_BASE_URL", DEFAULT_TWITTER_API_BASE_URL)?,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            eventsub_secret: required("EVENTSUB_SECRET")?,
            twitch,
            twitter,
            renderer_base_url: parse_url("RENDERER_BASE_URL", &required("RENDERER_BASE_URL")?)?,
            object_store_root: env::var("OBJECT_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_OBJECT_STORE_ROOT)),
            public_base_url: parse_url("PUBLIC_BASE_URL", &required("PUBLIC_BASE_URL")?)?,
            external_timeout: seconds_or("EXTERNAL_TIMEOUT_SECS", DEFAULT_EXTERNAL_TIMEOUT_SECS)?,
            feature_timeout: seconds_or("FEATURE_TIMEOUT_SECS", DEFAULT_FEATURE_TIMEOUT_SECS)?,
            internal_api_token: optional("INTERNAL_API_TOKEN"),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn url_or(name: &'static str, default: &str) -> Result<Url, ConfigError> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_url(name, &value)
}

// Base URLs are joined with relative paths, so they must end with a slash.
fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    let normalized = if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    };
    Url::parse(&normalized).map_err(|err| ConfigError::InvalidUrl(name, err))
}

fn seconds_or(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or(ConfigError::InvalidNumber(name, value)),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    Missing(&'static str),
    InvalidUrl(&'static str, url::ParseError),
    InvalidNumber(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::Missing(name) => write!(f, "{name} must be set"),
            Self::InvalidUrl(name, err) => write!(f, "{name} is not a valid URL: {err}"),
            Self::InvalidNumber(name, value) => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_BIND_ADDR, ENV_GUARD};

    const REQUIRED: &[(&str, &str)] = &[
        ("EVENTSUB_SECRET", "eventsub-secret"),
        ("TWITCH_CLIENT_ID", "twitch-client"),
        ("TWITCH_CLIENT_SECRET", "twitch-secret"),
        ("TWITTER_CONSUMER_KEY", "consumer-key"),
        ("TWITTER_CONSUMER_SECRET", "consumer-secret"),
        ("RENDERER_BASE_URL", "http://renderer.local"),
        ("PUBLIC_BASE_URL", "https://livebanner.example"),
    ];

    const OPTIONAL: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "DATABASE_URL",
        "OBJECT_STORE_ROOT",
        "EXTERNAL_TIMEOUT_SECS",
        "FEATURE_TIMEOUT_SECS",
        "INTERNAL_API_TOKEN",
        "TWITCH_API_BASE_URL",
        "TWITCH_OAUTH_BASE_URL",
        "TWITTER_API_BASE_URL",
    ];

    fn set_required() {
        for (name, value) in REQUIRED {
            env::set_var(name, value);
        }
        for name in OPTIONAL {
            env::remove_var(name);
        }
    }

    fn clear_all() {
        for (name, _) in REQUIRED {
            env::remove_var(name);
        }
        for name in OPTIONAL {
            env::remove_var(name);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.external_timeout, Duration::from_secs(5));
        assert_eq!(config.feature_timeout, Duration::from_secs(20));
        assert_eq!(config.renderer_base_url.as_str(), "http://renderer.local/");
        assert!(config.internal_api_token.is_none());
        assert_eq!(
            config.twitch.api_base_url.as_str(),
            DEFAULT_TWITCH_API_BASE_URL
        );

        clear_all();
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        clear_all();
    }

    #[test]
    fn reports_missing_secret() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::remove_var("EVENTSUB_SECRET");

        let err = AppConfig::from_env().expect_err("missing secret should error");
        assert!(matches!(err, ConfigError::Missing("EVENTSUB_SECRET")));

        clear_all();
    }

    #[test]
    fn rejects_zero_timeout() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::set_var("EXTERNAL_TIMEOUT_SECS", "0");

        let err = AppConfig::from_env().expect_err("zero timeout should error");
        assert!(matches!(err, ConfigError::InvalidNumber("EXTERNAL_TIMEOUT_SECS", _)));

        clear_all();
    }

    #[test]
    fn parses_production_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::set_var("APP_ENV", "production");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        env::set_var("FEATURE_TIMEOUT_SECS", "45");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.feature_timeout, Duration::from_secs(45));

        clear_all();
    }

    #[test]
    fn blank_internal_token_is_treated_as_unset() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        set_required();
        env::set_var("INTERNAL_API_TOKEN", "  ");
        let blank = AppConfig::from_env().expect("config should load");
        assert!(blank.internal_api_token.is_none());

        env::set_var("INTERNAL_API_TOKEN", "s3cret");
        let set = AppConfig::from_env().expect("config should load");
        assert_eq!(set.internal_api_token.as_deref(), Some("s3cret"));

        clear_all();
    }
}
