//! Client for the image rendering service.

use async_trait::async_trait;
use livebanner_core::TemplateSpec;
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use url::Url;

/// Produces base64 images from template specs.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render_banner(&self, template: &TemplateSpec) -> Result<String, RenderError>;
    async fn render_profile_image(&self, template: &TemplateSpec) -> Result<String, RenderError>;
}

#[derive(Clone)]
pub struct RenderClient {
    http: Client,
    base_url: Url,
}

impl RenderClient {
    pub fn new(base_url: Url, http: Client) -> Self {
        Self { http, base_url }
    }

    async fn render(&self, path: &str, template: &TemplateSpec) -> Result<String, RenderError> {
        let url = self.base_url.join(path)?;
        let response = self.http.post(url).json(template).send().await?;
        read_image(response).await
    }
}

#[async_trait]
impl Renderer for RenderClient {
    async fn render_banner(&self, template: &TemplateSpec) -> Result<String, RenderError> {
        self.render("getTemplate", template).await
    }

    async fn render_profile_image(&self, template: &TemplateSpec) -> Result<String, RenderError> {
        self.render("getProfilePic", template).await
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("renderer returned an invalid image payload: {0}")]
    InvalidPayload(String),
}

// The service answers either with the raw base64 text or with it as a JSON string.
async fn read_image(response: Response) -> Result<String, RenderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(RenderError::Status { status, body });
    }

    let trimmed = body.trim();
    let image = if trimmed.starts_with('"') {
        serde_json::from_str::<String>(trimmed)
            .map_err(|err| RenderError::InvalidPayload(err.to_string()))?
    } else {
        trimmed.to_string()
    };

    if image.is_empty() {
        return Err(RenderError::InvalidPayload("empty image".into()));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> RenderClient {
        RenderClient::new(
            Url::parse(&server.url("/")).expect("url"),
            Client::builder().build().expect("client"),
        )
    }

    fn template() -> TemplateSpec {
        let mut spec = TemplateSpec {
            foreground_id: "ImLive".into(),
            background_id: "GradientBackground".into(),
            ..TemplateSpec::default()
        };
        spec.foreground_props
            .insert("username".into(), json!("alice"));
        spec
    }

    #[tokio::test]
    async fn banner_posts_template_and_reads_raw_text() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/getTemplate").json_body(json!({
                    "foregroundId": "ImLive",
                    "backgroundId": "GradientBackground",
                    "foregroundProps": { "username": "alice" },
                    "backgroundProps": {}
                }));
                then.status(200).body("aW1hZ2U=\n");
            })
            .await;

        let image = client.render_banner(&template()).await.expect("render");
        mock.assert_async().await;
        assert_eq!(image, "aW1hZ2U=");
    }

    #[tokio::test]
    async fn profile_picture_accepts_json_string() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/getProfilePic");
                then.status(200).json_body(json!("cGZw"));
            })
            .await;

        let image = client
            .render_profile_image(&template())
            .await
            .expect("render");
        assert_eq!(image, "cGZw");
    }

    #[tokio::test]
    async fn failures_surface_status() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/getTemplate");
                then.status(500).body("boom");
            })
            .await;

        let err = client
            .render_banner(&template())
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            RenderError::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/getProfilePic");
                then.status(200).body("");
            })
            .await;

        let err = client
            .render_profile_image(&template())
            .await
            .expect_err("should fail");
        assert!(matches!(err, RenderError::InvalidPayload(_)));
    }
}
