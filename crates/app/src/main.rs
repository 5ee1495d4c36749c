mod accounts;
mod features;
mod gateway;
mod live;
mod maintenance;
mod orchestrator;
mod problem;
mod registry;
mod render_cache;
mod router;
mod settings;
mod streams;
mod telemetry;
mod webhook;

#[cfg(test)]
mod test_support;

use std::{net::SocketAddr, sync::Arc};

use chrono::Utc;
use tokio::signal;
use tracing::{error, info};

use livebanner_render::RenderClient;
use livebanner_storage::{Database, FsObjectStore};
use livebanner_twitch::{HelixClient, TwitchOAuthClient};
use livebanner_twitter::TwitterClient;
use livebanner_util::{load_env_file, AppConfig};

use crate::gateway::TwitchGateway;
use crate::router::{AppState, Clock, Services};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let storage = Database::connect(&config.database_url).await?;
    storage.run_migrations().await?;
    info!(stage = "app", database_url = %config.database_url, "database ready");
    maintenance::MaintenanceWorker::new(storage.clone()).spawn();

    let http = reqwest::Client::builder()
        .timeout(config.external_timeout)
        .build()?;
    let clock: Clock = Arc::new(Utc::now);

    let twitch = TwitchGateway::new(
        HelixClient::new(
            config.twitch.client_id.clone(),
            config.twitch.api_base_url.clone(),
            http.clone(),
        ),
        TwitchOAuthClient::new(
            config.twitch.client_id.clone(),
            config.twitch.client_secret.clone(),
            config.twitch.oauth_base_url.clone(),
            http.clone(),
        ),
        Arc::from(config.eventsub_secret.as_str()),
        clock.clone(),
    );
    let services = Services {
        twitch: Arc::new(twitch),
        twitter: Arc::new(TwitterClient::new(
            config.twitter.consumer_key.clone(),
            config.twitter.consumer_secret.clone(),
            config.twitter.api_base_url.clone(),
            http.clone(),
        )),
        renderer: Arc::new(RenderClient::new(config.renderer_base_url.clone(), http)),
        objects: Arc::new(FsObjectStore::new(config.object_store_root.clone())),
    };

    let state = AppState::new(
        metrics,
        storage,
        Arc::from(config.eventsub_secret.as_bytes()),
        clock,
        services,
        config.public_base_url.clone(),
        config.feature_timeout,
    )
    .with_internal_token(config.internal_api_token.clone());

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(stage = "app", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(stage = "app", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!(stage = "app", "received ctrl-c, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(stage = "app", "received SIGTERM, shutting down");
            }
            Err(err) => {
                error!(stage = "app", error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
