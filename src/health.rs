use crate::context::ServiceContext;
use crate::shutdown::ShutdownCoordinator;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but something needs attention
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn with_status(
        component: impl Into<String>,
        status: HealthStatus,
        error: Option<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            error,
            timestamp: now(),
            details,
        }
    }

    pub fn healthy(component: impl Into<String>, details: serde_json::Value) -> Self {
        Self::with_status(component, HealthStatus::Healthy, None, Some(details))
    }

    pub fn degraded(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Degraded, Some(error.into()), None)
    }

    pub fn unhealthy(
        component: impl Into<String>,
        error: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::with_status(
            component,
            HealthStatus::Unhealthy,
            Some(error.into()),
            Some(details),
        )
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    /// Components that are not ready
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: HashMap<String, ComponentHealth>,
}

impl IntoResponse for ComponentHealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

/// Backs the `/health`, `/ready` and `/health/components` routes.
#[derive(Clone)]
pub struct HealthChecker {
    context: Arc<ServiceContext>,
    shutdown: Option<Arc<ShutdownCoordinator>>,
}

impl HealthChecker {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self {
            context,
            shutdown: None,
        }
    }

    /// Report not-ready once shutdown has started.
    pub fn with_shutdown(mut self, coordinator: Arc<ShutdownCoordinator>) -> Self {
        self.shutdown = Some(coordinator);
        self
    }

    /// The process is up and answering.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn readiness(&self) -> ReadinessResponse {
        let components = self.check_all_components();
        let mut overall = HealthStatus::Healthy;
        let mut not_ready = Vec::new();

        for (name, health) in &components {
            overall = overall.combine(health.status);
            if health.status == HealthStatus::Unhealthy {
                not_ready.push(name.clone());
            }
        }
        not_ready.sort();

        ReadinessResponse {
            ready: overall != HealthStatus::Unhealthy,
            status: overall,
            timestamp: now(),
            not_ready,
        }
    }

    pub fn components(&self) -> ComponentHealthResponse {
        let components = self.check_all_components();
        let status = components
            .values()
            .fold(HealthStatus::Healthy, |overall, health| {
                overall.combine(health.status)
            });

        ComponentHealthResponse {
            status,
            timestamp: now(),
            components,
        }
    }

    fn check_all_components(&self) -> HashMap<String, ComponentHealth> {
        let mut components = HashMap::new();
        components.insert("credentials".to_string(), self.check_credentials());
        components.insert("working_folder".to_string(), self.check_working_folder());
        if let Some(coordinator) = &self.shutdown {
            components.insert("server".to_string(), check_server(coordinator));
        }
        components
    }

    fn check_credentials(&self) -> ComponentHealth {
        let Some(credential) = self.context.credential() else {
            return ComponentHealth::degraded("credentials", "no credential attached to context");
        };

        let details = serde_json::json!({
            "origin": credential.origin().to_string(),
            "valid": credential.is_valid(),
            "expired": credential.is_expired(),
            "refreshable": credential.is_refreshable(),
            "expires_at": credential
                .current_token()
                .and_then(|token| token.expires_at())
                .map(|at| at.to_rfc3339()),
        });

        if credential.is_valid() || credential.is_refreshable() {
            ComponentHealth::healthy("credentials", details)
        } else {
            ComponentHealth::unhealthy(
                "credentials",
                "access token expired and cannot be refreshed",
                details,
            )
        }
    }

    fn check_working_folder(&self) -> ComponentHealth {
        ComponentHealth::healthy(
            "working_folder",
            serde_json::json!({
                "folder_id": self.context.folder_id().unwrap_or("root"),
                "scoped": self.context.folder_id().is_some(),
            }),
        )
    }
}

fn check_server(coordinator: &ShutdownCoordinator) -> ComponentHealth {
    let details = serde_json::json!({
        "phase": coordinator.phase().to_string(),
        "active_requests": coordinator.active_request_count(),
    });
    if coordinator.is_shutdown_initiated() {
        ComponentHealth::unhealthy("server", "shutting down", details)
    } else {
        ComponentHealth::healthy("server", details)
    }
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness()
}

pub async fn components_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.components()
}
