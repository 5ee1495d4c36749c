use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::oauth1::{self, Credentials, Nonce};

/// A user's OAuth 1.0a access token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub secret: String,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            secret: secret.into(),
        }
    }
}

/// The authenticated account as returned by `verify_credentials`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TwitterProfile {
    pub id_str: String,
    pub name: String,
    pub screen_name: String,
    #[serde(default)]
    pub profile_image_url_https: Option<String>,
}

/// Operations the stream features perform against Twitter on a user's behalf.
#[async_trait]
pub trait TwitterApi: Send + Sync {
    async fn verify_credentials(&self, token: &AccessToken) -> Result<TwitterProfile, TwitterError>;
    /// URL of the 1500x500 banner, or `None` when the user has no banner.
    async fn fetch_banner_url(
        &self,
        token: &AccessToken,
        twitter_user_id: &str,
    ) -> Result<Option<String>, TwitterError>;
    /// Downloads a public image and returns it base64-encoded.
    async fn download_image(&self, url: &str) -> Result<String, TwitterError>;
    async fn update_banner(&self, token: &AccessToken, base64: &str) -> Result<(), TwitterError>;
    async fn remove_banner(&self, token: &AccessToken) -> Result<(), TwitterError>;
    async fn update_profile_image(
        &self,
        token: &AccessToken,
        base64: &str,
    ) -> Result<(), TwitterError>;
    async fn update_name(&self, token: &AccessToken, name: &str) -> Result<(), TwitterError>;
    /// Posts a tweet and returns its id.
    async fn post_tweet(&self, token: &AccessToken, text: &str) -> Result<String, TwitterError>;
}

/// HTTP client for the Twitter v1.1 and v2 endpoints, signed per user.
#[derive(Clone)]
pub struct TwitterClient {
    http: Client,
    base_url: Url,
    consumer_key: String,
    consumer_secret: String,
}

impl TwitterClient {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        base_url: Url,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
        }
    }

    fn signed_request(
        &self,
        method: Method,
        url: Url,
        form: &[(&str, &str)],
        token: &AccessToken,
    ) -> Result<RequestBuilder, TwitterError> {
        let credentials = Credentials {
            consumer_key: &self.consumer_key,
            consumer_secret: &self.consumer_secret,
            token: &token.token,
            token_secret: &token.secret,
        };
        let header = oauth1::authorization_header(
            method.as_str(),
            &url,
            form,
            &credentials,
            &Nonce::generate(),
        )
        .map_err(|_| TwitterError::Signing)?;

        let mut request = self
            .http
            .request(method, url)
            .header("Authorization", header);
        if !form.is_empty() {
            request = request.form(form);
        }
        Ok(request)
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        token: &AccessToken,
    ) -> Result<(), TwitterError> {
        let url = self.base_url.join(path)?;
        let response = self
            .signed_request(Method::POST, url, form, token)?
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl TwitterApi for TwitterClient {
    async fn verify_credentials(&self, token: &AccessToken) -> Result<TwitterProfile, TwitterError> {
        let url = self.base_url.join("1.1/account/verify_credentials.json")?;
        let response = self
            .signed_request(Method::GET, url, &[], token)?
            .send()
            .await?;
        parse_json(response).await
    }

    async fn fetch_banner_url(
        &self,
        token: &AccessToken,
        twitter_user_id: &str,
    ) -> Result<Option<String>, TwitterError> {
        let mut url = self.base_url.join("1.1/users/profile_banner.json")?;
        url.query_pairs_mut().append_pair("user_id", twitter_user_id);
        let response = self
            .signed_request(Method::GET, url, &[], token)?
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let banner: ProfileBanner = parse_json(response).await?;
        Ok(banner.sizes.large.map(|size| size.url))
    }

    async fn download_image(&self, url: &str) -> Result<String, TwitterError> {
        let url = Url::parse(url)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }
        let bytes = response.bytes().await?;
        Ok(STANDARD.encode(bytes))
    }

    async fn update_banner(&self, token: &AccessToken, base64: &str) -> Result<(), TwitterError> {
        self.post_form(
            "1.1/account/update_profile_banner.json",
            &[("banner", base64)],
            token,
        )
        .await
    }

    async fn remove_banner(&self, token: &AccessToken) -> Result<(), TwitterError> {
        self.post_form("1.1/account/remove_profile_banner.json", &[], token)
            .await
    }

    async fn update_profile_image(
        &self,
        token: &AccessToken,
        base64: &str,
    ) -> Result<(), TwitterError> {
        self.post_form(
            "1.1/account/update_profile_image.json",
            &[("image", base64)],
            token,
        )
        .await
    }

    async fn update_name(&self, token: &AccessToken, name: &str) -> Result<(), TwitterError> {
        self.post_form("1.1/account/update_profile.json", &[("name", name)], token)
            .await
    }

    async fn post_tweet(&self, token: &AccessToken, text: &str) -> Result<String, TwitterError> {
        let url = self.base_url.join("2/tweets")?;
        let response = self
            .signed_request(Method::POST, url, &[], token)?
            .json(&NewTweet { text })
            .send()
            .await?;
        let created: TweetEnvelope = parse_json(response).await?;
        Ok(created.data.id)
    }
}

#[derive(Debug, Deserialize)]
struct ProfileBanner {
    sizes: BannerSizes,
}

#[derive(Debug, Deserialize)]
struct BannerSizes {
    #[serde(rename = "1500x500")]
    large: Option<BannerSize>,
}

#[derive(Debug, Deserialize)]
struct BannerSize {
    url: String,
}

#[derive(Serialize)]
struct NewTweet<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TweetEnvelope {
    data: CreatedTweet,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    id: String,
}

/// Errors produced by the Twitter client.
#[derive(Debug, Error)]
pub enum TwitterError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to sign request")]
    Signing,
    #[error("twitter rejected the credentials: {body}")]
    Unauthorized { body: String },
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl TwitterError {
    /// True when the user's token pair is no longer valid.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

async fn status_error(status: StatusCode, response: Response) -> TwitterError {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<unavailable>"));
    if status == StatusCode::UNAUTHORIZED {
        TwitterError::Unauthorized { body }
    } else {
        TwitterError::Status { status, body }
    }
}

async fn ensure_success(response: Response) -> Result<(), TwitterError> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status, response).await);
    }
    Ok(())
}

async fn parse_json<T>(response: Response) -> Result<T, TwitterError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status, response).await);
    }

    Ok(response.json().await?)
}
