use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Client for the Twitch Helix endpoints used by the stream orchestration.
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    base_url: Url,
    client_id: String,
}

impl HelixClient {
    /// Creates a new Helix client with the provided configuration.
    pub fn new(client_id: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
        }
    }

    /// Returns the broadcaster's current stream, or `None` when offline.
    pub async fn get_stream_by_user_id(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<Option<HelixStream>, HelixError> {
        let mut url = self.base_url.join("streams")?;
        url.query_pairs_mut().append_pair("user_id", user_id);

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        let page: DataPage<HelixStream> = parse_json(response).await?;
        Ok(page.data.into_iter().next())
    }

    pub async fn get_user_by_id(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<Option<HelixUser>, HelixError> {
        let mut url = self.base_url.join("users")?;
        url.query_pairs_mut().append_pair("id", user_id);

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        let page: DataPage<HelixUser> = parse_json(response).await?;
        Ok(page.data.into_iter().next())
    }

    /// Lists EventSub subscriptions that reference the given broadcaster.
    pub async fn list_subscriptions_for_user(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<Vec<EventSubSubscription>, HelixError> {
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut url = self.base_url.join("eventsub/subscriptions")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("user_id", user_id);
                if let Some(after) = cursor.as_deref() {
                    query.append_pair("after", after);
                }
            }

            let response = self
                .authorized_request(Method::GET, url, access_token)
                .send()
                .await?;
            let page: DataPage<EventSubSubscription> = parse_json(response).await?;
            subscriptions.extend(page.data);

            cursor = page.pagination.and_then(|p| p.cursor);
            if cursor.is_none() {
                break;
            }
        }
        Ok(subscriptions)
    }

    pub async fn create_subscription(
        &self,
        access_token: &str,
        request: &CreateSubscriptionRequest<'_>,
    ) -> Result<EventSubSubscription, HelixError> {
        let url = self.base_url.join("eventsub/subscriptions")?;
        let body = CreateSubscriptionBody {
            subscription_type: request.subscription_type,
            version: "1",
            condition: Condition {
                broadcaster_user_id: request.broadcaster_user_id,
            },
            transport: Transport {
                method: "webhook",
                callback: request.callback,
                secret: request.secret,
            },
        };

        let response = self
            .authorized_request(Method::POST, url, access_token)
            .json(&body)
            .send()
            .await?;

        let page: DataPage<EventSubSubscription> = parse_json(response).await?;
        page.data
            .into_iter()
            .next()
            .ok_or(HelixError::EmptyResponse("eventsub/subscriptions"))
    }

    pub async fn delete_subscription(
        &self,
        access_token: &str,
        subscription_id: &str,
    ) -> Result<(), HelixError> {
        let mut url = self.base_url.join("eventsub/subscriptions")?;
        url.query_pairs_mut().append_pair("id", subscription_id);

        let response = self
            .authorized_request(Method::DELETE, url, access_token)
            .send()
            .await?;

        ensure_success(response).await
    }

    fn authorized_request(
        &self,
        method: Method,
        url: Url,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {access_token}"))
    }
}

/// A live stream as reported by `GET /streams`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HelixStream {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub thumbnail_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_image_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EventSubSubscription {
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub status: String,
    #[serde(default)]
    pub condition: serde_json::Map<String, serde_json::Value>,
    pub transport: SubscriptionTransport,
}

impl EventSubSubscription {
    pub fn broadcaster_user_id(&self) -> Option<&str> {
        self.condition
            .get("broadcaster_user_id")
            .and_then(serde_json::Value::as_str)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubscriptionTransport {
    pub method: String,
    #[serde(default)]
    pub callback: Option<String>,
}

/// Parameters for creating a webhook subscription.
pub struct CreateSubscriptionRequest<'a> {
    pub subscription_type: &'a str,
    pub broadcaster_user_id: &'a str,
    pub callback: &'a str,
    pub secret: &'a str,
}

#[derive(Serialize)]
struct CreateSubscriptionBody<'a> {
    #[serde(rename = "type")]
    subscription_type: &'a str,
    version: &'a str,
    condition: Condition<'a>,
    transport: Transport<'a>,
}

#[derive(Serialize)]
struct Condition<'a> {
    broadcaster_user_id: &'a str,
}

#[derive(Serialize)]
struct Transport<'a> {
    method: &'a str,
    callback: &'a str,
    secret: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct DataPage<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

/// Errors produced by the Helix client.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("empty response from {0}")]
    EmptyResponse(&'static str),
}

async fn ensure_success(response: Response) -> Result<(), HelixError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }
    Ok(())
}

async fn parse_json<T>(response: Response) -> Result<T, HelixError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }

    Ok(response.json().await?)
}
