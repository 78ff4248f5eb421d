use std::path::Path;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tokio::signal;
use tokio::time;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_gateway::config::Config;
use relay_gateway::store::{ChannelBus, CounterStore, RedisBus, RedisStore};
use relay_gateway::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let grace = config.shutdown_grace;

    let store: Arc<dyn CounterStore> =
        match RedisStore::connect(&config.redis_url, config.store_timeout).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                tracing::error!(%err, "failed to connect to counter store");
                std::process::exit(1);
            }
        };
    let bus: Arc<dyn ChannelBus> =
        match RedisBus::connect(&config.redis_url, config.store_timeout).await {
            Ok(bus) => Arc::new(bus),
            Err(err) => {
                tracing::error!(%err, "failed to connect to channel bus");
                std::process::exit(1);
            }
        };

    let state = match AppState::bootstrap(config, store, bus).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(%err, "gateway failed to start");
            std::process::exit(1);
        }
    };

    let origin: HeaderValue = match state.config.cors_origin.parse() {
        Ok(origin) => origin,
        Err(err) => {
            tracing::error!(%err, origin = %state.config.cors_origin, "invalid CORS_ORIGIN");
            std::process::exit(1);
        }
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(relay_gateway::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");
    tracing::info!(%addr, node_id = %state.node_id, "relay-gateway listening");

    // Stop accepting as soon as draining begins.
    let drain = state.shutdown.drain_token();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(drain.cancelled_owned())
            .await
    });

    tokio::select! {
        result = &mut server => {
            tracing::error!(?result, "server exited unexpectedly");
            std::process::exit(1);
        }
        _ = shutdown_signal() => {}
    }

    // Further signals must not restart the drain.
    tokio::spawn(async {
        loop {
            shutdown_signal().await;
            tracing::warn!("shutdown already in progress, ignoring signal");
        }
    });

    let outcome = state.shutdown.run().await;
    tracing::info!(?outcome, node_id = %state.node_id, "gateway closed");

    if time::timeout(grace, server).await.is_err() {
        tracing::warn!("server did not finish within grace delay, exiting anyway");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to listen for SIGTERM");
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
