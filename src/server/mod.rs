//! HTTP server assembly: shared context, router, startup and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, Method};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use vodvault_db::pool::{init_pool, DbPool};
use vodvault_storage::{AsyncStorage, LocalFsStorage};

use crate::api;
use crate::config::Config;
use crate::transcode::manager::TranscodeJobRegistry;

pub mod auth;

/// Endpoint path serving stream elements; rewritten playlist URLs point
/// back at it.
pub const STREAM_SEEK_PATH: &str = "/file/stream/seek";

/// Shared application context.
#[derive(Clone)]
pub struct AppContext {
    pub db: DbPool,
    pub storage: Arc<dyn AsyncStorage>,
    pub config: Arc<Config>,
    pub jobs: Arc<TranscodeJobRegistry>,
}

/// Create the Axum router with all routes.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_check))
        .route("/upload/multipart/initiate", post(api::upload::initiate))
        .route("/upload/multipart/part", post(api::upload::upload_part))
        .route("/upload/multipart/complete", patch(api::upload::complete))
        .route("/upload/multipart", delete(api::upload::abort))
        .route(
            "/file/acl/usr",
            get(api::acl::read_usr_acl).patch(api::acl::edit_usr_acl),
        )
        .route("/file/acl/flvl", patch(api::acl::edit_file_acl))
        .route("/file/stream/init", post(api::stream::init_stream))
        .route(STREAM_SEEK_PATH, get(api::stream::seek))
        .route("/file/nonstream", get(api::stream::nonstream_fetch))
        .route(
            "/file/transcode",
            post(api::transcode::start_transcode).delete(api::transcode::discard_transcode),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    axum::http::StatusCode::OK
}

/// Build the context and start the HTTP server.
pub async fn start(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let db = init_pool(&config.database.path).context("Database setup failed")?;
    let storage = LocalFsStorage::new(config.storage.base_path.clone())
        .context("Storage setup failed")?;

    let ctx = AppContext {
        db,
        storage: Arc::new(storage),
        config: Arc::new(config),
        jobs: Arc::new(TranscodeJobRegistry::new()),
    };
    let app = build_router(ctx);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}
