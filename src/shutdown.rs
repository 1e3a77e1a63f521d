//! Graceful shutdown coordination
//!
//! On SIGINT or SIGTERM the coordinator cancels its token, which stops the
//! HTTP listener from accepting connections and flips `/ready` to 503. Tool
//! calls already inside the MCP routes are counted by [`track_in_flight`] and
//! given `in_flight_timeout` to finish before the process exits.
//!
//! ```rust,no_run
//! use google_sheets_mcp::shutdown::{ShutdownConfig, ShutdownCoordinator};
//!
//! # async fn example() {
//! let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
//! let token = coordinator.token();
//!
//! tokio::spawn(async move { token.cancelled().await });
//!
//! coordinator.wait_for_signal().await;
//! coordinator.begin_shutdown();
//! coordinator.wait_for_drain().await;
//! # }
//! ```

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long in-flight requests get to finish once shutdown starts
    pub in_flight_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            in_flight_timeout: Duration::from_secs(30),
        }
    }
}

impl ShutdownConfig {
    pub fn with_in_flight_timeout(mut self, timeout: Duration) -> Self {
        self.in_flight_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// Listener closed, waiting for in-flight requests
    Draining,
    Complete,
    /// Drain deadline passed with requests still running
    Forced,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::Draining => write!(f, "draining"),
            ShutdownPhase::Complete => write!(f, "complete"),
            ShutdownPhase::Forced => write!(f, "forced"),
        }
    }
}

pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: RwLock<ShutdownPhase>,
    shutdown_token: CancellationToken,
    active_requests: AtomicU64,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: RwLock::new(ShutdownPhase::Running),
            shutdown_token: CancellationToken::new(),
            active_requests: AtomicU64::new(0),
        }
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.read()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn request_started(&self) {
        self.active_requests.fetch_add(1, Ordering::AcqRel);
    }

    pub fn request_finished(&self) {
        self.active_requests.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn active_request_count(&self) -> u64 {
        self.active_requests.load(Ordering::Acquire)
    }

    /// Resolves on SIGINT or SIGTERM.
    ///
    /// A handler that cannot be installed is logged and never fires; the
    /// other one still does.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
            },
        }
    }

    /// Stop accepting work. Idempotent.
    pub fn begin_shutdown(&self) {
        {
            let mut phase = self.phase.write();
            if *phase != ShutdownPhase::Running {
                return;
            }
            *phase = ShutdownPhase::Draining;
        }
        info!(
            active_requests = self.active_request_count(),
            "shutdown started, no longer accepting requests"
        );
        self.shutdown_token.cancel();
    }

    /// Wait until no requests are in flight or the drain timeout passes.
    pub async fn wait_for_drain(&self) -> ShutdownPhase {
        let deadline = tokio::time::Instant::now() + self.config.in_flight_timeout;

        loop {
            let active = self.active_request_count();
            if active == 0 {
                info!("all in-flight requests completed");
                *self.phase.write() = ShutdownPhase::Complete;
                return ShutdownPhase::Complete;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining_requests = active,
                    timeout_secs = self.config.in_flight_timeout.as_secs(),
                    "in-flight timeout reached, abandoning remaining requests"
                );
                *self.phase.write() = ShutdownPhase::Forced;
                return ShutdownPhase::Forced;
            }

            debug!(active_requests = active, "waiting for requests to complete");
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

/// Decrements the in-flight count even if the request future is dropped.
struct InFlight(Arc<ShutdownCoordinator>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.request_finished();
    }
}

/// Middleware counting requests currently inside the wrapped routes.
pub async fn track_in_flight(
    State(coordinator): State<Arc<ShutdownCoordinator>>,
    request: Request,
    next: Next,
) -> Response {
    coordinator.request_started();
    let _in_flight = InFlight(coordinator);
    next.run(request).await
}
