//! netbootd server
//!
//! Writes per-host network-boot configuration into a provisioning directory
//! and exposes it over a small JSON API:
//!
//! - [`store`]: the directory itself (boot menus, answer files, packages)
//! - [`script`]: OS-specific provisioning scripts
//! - [`cache`]: addresses reported by booted hosts
//! - [`registry`]: the add/delete/boot lifecycle on top of those
//! - [`api`]: HTTP routes

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod registry;
pub mod script;
pub mod store;

#[cfg(test)]
pub mod test_helpers;

use anyhow::{bail, Context};
use axum::{
    extract::MatchedPath,
    http::{StatusCode, Uri},
    response::IntoResponse,
    Json, Router,
};
use listenfd::ListenFd;
use netbootd_common::models::MessageResponse;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level, Span};

pub use config::ServerConfig;
pub use registry::HostRegistry;

use script::CommandScriptRunner;
use store::HostFileStore;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<HostRegistry>,
}

impl AppState {
    pub fn from_config(config: &ServerConfig) -> Self {
        let store = HostFileStore::new(&config.netboot_dir, config.netboot_name.as_str());
        let scripts = CommandScriptRunner::new(config.scripts.clone());
        Self {
            registry: Arc::new(HostRegistry::new(store, Arc::new(scripts))),
        }
    }
}

/// The complete application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::api_router())
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<axum::body::Body>| {
                    let matched_path = request
                        .extensions()
                        .get::<MatchedPath>()
                        .map(MatchedPath::as_str)
                        .unwrap_or(request.uri().path());

                    tracing::debug_span!(
                        "http-request",
                        method = %request.method(),
                        uri = %request.uri(),
                        matched_path = matched_path,
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(tower_http::LatencyUnit::Micros),
                )
                .on_failure(
                    |error: tower_http::classify::ServerErrorsFailureClass,
                     latency: std::time::Duration,
                     span: &Span| {
                        tracing::error!(parent: span, latency = ?latency, error = ?error, "Request failed");
                    },
                ),
        )
        .with_state(state)
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    warn!(status = 404, uri = %uri, "No route");
    (StatusCode::NOT_FOUND, Json(MessageResponse::new("not found")))
}

/// Take the listener passed by systemd socket activation, or bind one
pub async fn bind_listener(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let mut listenfd = ListenFd::from_env();
    match listenfd
        .take_tcp_listener(0)
        .context("Failed to take TCP listener from env")?
    {
        Some(listener) => {
            info!("Acquired socket via socket activation");
            listener
                .set_nonblocking(true)
                .context("Failed to make activated socket non-blocking")?;
            TcpListener::from_std(listener).context("Failed to convert TCP listener")
        }
        None => TcpListener::bind((config.listen_addr.as_str(), config.port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", config.listen_addr, config.port)),
    }
}

/// Run the server in the foreground until SIGINT or SIGTERM
///
/// In-flight requests get `shutdown_timeout` to finish; whatever is still
/// running after that is dropped.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    if !config.netboot_dir.is_dir() {
        bail!(
            "Provisioning directory {} does not exist",
            config.netboot_dir.display()
        );
    }

    let state = AppState::from_config(&config);
    let listener = bind_listener(&config).await?;
    info!(
        addr = %listener.local_addr().context("Failed to get local address")?,
        dir = %config.netboot_dir.display(),
        name = %config.netboot_name,
        "netbootd listening"
    );

    let (drain_tx, mut drain_rx) = watch::channel(false);
    let server = axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let _ = drain_rx.wait_for(|draining| *draining).await;
        })
        .into_future();
    let mut server = tokio::spawn(server);

    tokio::select! {
        result = &mut server => {
            return result.context("Server task failed")?.context("Server error");
        }
        _ = shutdown_signal() => {}
    }

    let _ = drain_tx.send(true);
    match tokio::time::timeout(config.shutdown_timeout, &mut server).await {
        Ok(result) => result.context("Server task failed")?.context("Server error")?,
        Err(_) => {
            warn!(timeout = ?config.shutdown_timeout, "Shutdown timed out, dropping connections");
            server.abort();
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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
