use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use url::Url;

use livebanner_render::Renderer;
use livebanner_storage::{Database, ObjectStore};
use livebanner_twitter::TwitterApi;

use crate::features::{self, FeatureDeps};
use crate::gateway::TwitchApi;
use crate::live::LiveStateTracker;
use crate::orchestrator::Orchestrator;
use crate::problem::ProblemResponse;
use crate::registry::FeatureRegistry;
use crate::render_cache::RenderCache;
use crate::{accounts, settings, streams, telemetry, webhook};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// External collaborators, injected so tests can swap in fakes.
#[derive(Clone)]
pub struct Services {
    pub twitch: Arc<dyn TwitchApi>,
    pub twitter: Arc<dyn TwitterApi>,
    pub renderer: Arc<dyn Renderer>,
    pub objects: Arc<dyn ObjectStore>,
}

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    webhook_secret: Arc<[u8]>,
    clock: Clock,
    twitch: Arc<dyn TwitchApi>,
    twitter: Arc<dyn TwitterApi>,
    registry: FeatureRegistry,
    live: LiveStateTracker,
    orchestrator: Orchestrator,
    public_base_url: Url,
    internal_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        webhook_secret: Arc<[u8]>,
        clock: Clock,
        services: Services,
        public_base_url: Url,
        feature_timeout: Duration,
    ) -> Self {
        let render_cache = RenderCache::new(
            storage.clone(),
            services.objects.clone(),
            services.renderer.clone(),
            clock.clone(),
        );
        let deps = FeatureDeps {
            db: storage.clone(),
            twitter: services.twitter.clone(),
            twitch: services.twitch.clone(),
            renderer: services.renderer,
            objects: services.objects,
            render_cache,
            clock: clock.clone(),
        };
        let orchestrator = Orchestrator::new(
            features::all(deps),
            storage.clone(),
            clock.clone(),
            feature_timeout,
        );

        Self {
            metrics,
            registry: FeatureRegistry::new(storage.clone()),
            live: LiveStateTracker::new(storage.clone()),
            storage,
            webhook_secret,
            clock,
            twitch: services.twitch,
            twitter: services.twitter,
            orchestrator,
            public_base_url,
            internal_token: None,
        }
    }

    /// Requires `Authorization: Bearer <token>` on the internal API routes.
    pub fn with_internal_token(mut self, token: Option<String>) -> Self {
        self.internal_token = token.map(Arc::from);
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn webhook_secret(&self) -> Arc<[u8]> {
        self.webhook_secret.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn twitch(&self) -> &Arc<dyn TwitchApi> {
        &self.twitch
    }

    pub fn twitter(&self) -> &Arc<dyn TwitterApi> {
        &self.twitter
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn live(&self) -> &LiveStateTracker {
        &self.live
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn public_base_url(&self) -> &Url {
        &self.public_base_url
    }
}

/// Builds the HTTP surface.
///
/// Only the webhook authenticates its caller (HMAC). The `/api/features`,
/// `/api/users` and `/api/accounts` routes are internal: deploy them behind
/// the private network or gateway, and set `INTERNAL_API_TOKEN` so they also
/// demand a bearer token.
pub fn app_router(state: AppState) -> Router {
    let webhook_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST]);

    let webhook_routes = Router::new()
        .route("/api/twitch/webhook/:user_id", post(webhook::handle))
        .route("/api/twitch/webhook/:user_id/*rest", post(webhook::handle))
        .layer(webhook_cors);

    let internal_routes = Router::new()
        .route(
            "/api/features/:feature/streamup/:user_id",
            post(streams::stream_up),
        )
        .route(
            "/api/features/:feature/streamdown/:user_id",
            post(streams::stream_down),
        )
        .route(
            "/api/features/:feature/settings/:user_id",
            put(settings::update_settings),
        )
        .route(
            "/api/features/:feature/enabled/:user_id",
            put(settings::set_enabled),
        )
        .route("/api/users/:user_id/features", get(settings::list_enabled))
        .route("/api/accounts/:user_id/twitter", put(accounts::link_twitter))
        .route("/api/accounts/:user_id/twitch", put(accounts::link_twitch))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_token,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .merge(internal_routes)
        .merge(webhook_routes)
        .with_state(state)
}

async fn require_internal_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.internal_token.as_deref() else {
        return next.run(request).await;
    };
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();
    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        next.run(request).await
    } else {
        ProblemResponse::new(
            StatusCode::UNAUTHORIZED,
            "invalid_internal_token",
            "internal routes require a valid bearer token",
        )
        .into_response()
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
}

pub(crate) fn json_response(status: StatusCode, value: serde_json::Value) -> Response {
    (status, axum::Json(value)).into_response()
}
