pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod google;
pub mod guard;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod server;
pub mod shutdown;
pub mod tools;
pub mod validation;

pub use config::{CliArgs, ServerConfig, TransportKind};
pub use context::{ApiEndpoints, ServiceContext, ServiceLifespan, StartupError};
pub use error::{ERROR_METRICS, ErrorCode, ErrorMetrics, McpError, to_rmcp_error};
pub use guard::AccessGuard;
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use server::GoogleSheetsServer;
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};

use anyhow::{Context, Result};
use axum::{Router, middleware, routing::get};
use health::HealthChecker;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use std::{future::IntoFuture, sync::Arc, time::Duration};
use tokio::net::TcpListener;

pub const HTTP_SERVICE_PATH: &str = "/mcp";
/// Second streamable mount for clients that connect on the event-stream path.
pub const SSE_SERVICE_PATH: &str = "/sse";
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);

    tracing::info!(
        transport = %config.transport,
        folder = config.drive_folder_id.as_deref().unwrap_or("root"),
        "starting Google Sheets MCP server",
    );

    let lifespan = ServiceLifespan::acquire(&config).await?;
    let context = lifespan.context();

    let result = match config.transport {
        TransportKind::Stdio => {
            GoogleSheetsServer::new(context, config.clone())
                .run_stdio()
                .await
        }
        TransportKind::Http => run_stream_http_transport(config, context).await,
    };

    drop(lifespan);
    result
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> (axum::http::StatusCode, String) {
    (axum::http::StatusCode::OK, metrics::METRICS.encode())
}

fn mcp_service(
    config: Arc<ServerConfig>,
    context: Arc<ServiceContext>,
    http_config: StreamableHttpServerConfig,
) -> StreamableHttpService<GoogleSheetsServer, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(GoogleSheetsServer::new(context.clone(), config.clone())),
        LocalSessionManager::default().into(),
        http_config,
    )
}

/// Full HTTP surface: guarded MCP mounts plus open health and metrics routes.
pub fn build_router(
    config: Arc<ServerConfig>,
    context: Arc<ServiceContext>,
    guard: AccessGuard,
    coordinator: Arc<ShutdownCoordinator>,
) -> Router {
    let stream = mcp_service(
        config.clone(),
        context.clone(),
        StreamableHttpServerConfig::default(),
    );
    let event_stream = mcp_service(
        config,
        context.clone(),
        StreamableHttpServerConfig {
            sse_keep_alive: Some(SSE_KEEP_ALIVE),
            ..Default::default()
        },
    );

    let mcp_routes = Router::new()
        .nest_service(HTTP_SERVICE_PATH, stream)
        .nest_service(SSE_SERVICE_PATH, event_stream)
        .layer(middleware::from_fn_with_state(
            coordinator.clone(),
            shutdown::track_in_flight,
        ))
        .layer(middleware::from_fn_with_state(guard, guard::require_api_key));

    let health_checker = Arc::new(HealthChecker::new(context).with_shutdown(coordinator));
    let health_routes = Router::new()
        .route("/health", get(health::liveness_handler))
        .route("/ready", get(health::readiness_handler))
        .route("/health/components", get(health::components_handler))
        .with_state(health_checker);

    Router::new()
        .merge(mcp_routes)
        .merge(health_routes)
        .route("/metrics", get(metrics_handler))
}

async fn run_stream_http_transport(
    config: Arc<ServerConfig>,
    context: Arc<ServiceContext>,
) -> Result<()> {
    let guard = AccessGuard::from_config(&config);
    let coordinator = Arc::new(ShutdownCoordinator::new(
        ShutdownConfig::default().with_in_flight_timeout(config.shutdown_timeout),
    ));

    let bind_addr = config.http_bind_address();
    let router = build_router(config, context, guard, coordinator.clone());
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    let actual_addr = listener.local_addr()?;
    tracing::info!(
        transport = "http",
        bind = %actual_addr,
        paths = ?[HTTP_SERVICE_PATH, SSE_SERVICE_PATH],
        "listening"
    );

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        signal_coordinator.wait_for_signal().await;
        signal_coordinator.begin_shutdown();
    });

    let token = coordinator.token();
    let server_future = axum::serve(listener, router)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .into_future();
    tokio::pin!(server_future);

    // Long-lived event streams keep graceful shutdown from finishing on its
    // own; stop once tool calls have drained.
    tokio::select! {
        result = &mut server_future => {
            result.context("HTTP server error")?;
            tracing::info!("server stopped");
        }
        phase = async {
            token.cancelled().await;
            coordinator.wait_for_drain().await
        } => {
            tracing::info!(%phase, "shutdown drain finished, closing remaining connections");
        }
    }

    Ok(())
}
