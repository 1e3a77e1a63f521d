/// Prometheus metrics for the MCP server
///
/// Tool request counters and latencies, credential health and access-guard
/// rejections, exposed in text format at `/metrics`.
use crate::auth::CredentialOrigin;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Instant;

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Labels for MCP request metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Tool name (e.g., "get_sheet_data", "add_rows")
    pub tool: String,
    /// Request status ("success", "error")
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub tool: String,
    /// Error classification (see `ErrorCode::category`)
    pub error_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ToolLabels {
    pub tool: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CredentialLabels {
    pub source: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RefreshLabels {
    pub source: String,
    /// "success" or "failure"
    pub outcome: String,
}

/// Central metrics collector with Prometheus registry
pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Total MCP requests by tool and status
    pub mcp_requests_total: Family<RequestLabels, Counter>,

    /// Request duration in seconds by tool
    pub mcp_request_duration_seconds: Family<ToolLabels, Histogram>,

    /// Currently active requests by tool
    pub mcp_active_requests: Family<ToolLabels, Gauge>,

    /// Total errors by tool and error type
    pub mcp_errors_total: Family<ErrorLabels, Counter>,

    /// 1 for the credential source that won resolution
    pub mcp_credential_source_info: Family<CredentialLabels, Gauge>,

    pub mcp_credential_refreshes_total: Family<RefreshLabels, Counter>,

    /// HTTP requests rejected by the access guard
    pub mcp_unauthorized_requests_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let mcp_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "mcp_requests",
            "Total number of MCP tool requests",
            mcp_requests_total.clone(),
        );

        let mcp_request_duration_seconds =
            Family::<ToolLabels, Histogram>::new_with_constructor(|| {
                // Buckets: 10ms, 25ms, 62ms, 156ms, 390ms, 1s, 2.4s, 6s, 15s, 38s
                Histogram::new(exponential_buckets(0.01, 2.5, 10))
            });
        registry.register(
            "mcp_request_duration_seconds",
            "Tool request latency histogram in seconds",
            mcp_request_duration_seconds.clone(),
        );

        let mcp_active_requests = Family::<ToolLabels, Gauge>::default();
        registry.register(
            "mcp_active_requests",
            "Number of tool requests currently being processed",
            mcp_active_requests.clone(),
        );

        let mcp_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "mcp_errors",
            "Total number of errors by tool and error type",
            mcp_errors_total.clone(),
        );

        let mcp_credential_source_info = Family::<CredentialLabels, Gauge>::default();
        registry.register(
            "mcp_credential_source_info",
            "Credential source in use (value is always 1)",
            mcp_credential_source_info.clone(),
        );

        let mcp_credential_refreshes_total = Family::<RefreshLabels, Counter>::default();
        registry.register(
            "mcp_credential_refreshes",
            "Access token refresh attempts by source and outcome",
            mcp_credential_refreshes_total.clone(),
        );

        let mcp_unauthorized_requests_total = Counter::default();
        registry.register(
            "mcp_unauthorized_requests",
            "HTTP requests rejected for a missing or wrong API key",
            mcp_unauthorized_requests_total.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            mcp_requests_total,
            mcp_request_duration_seconds,
            mcp_active_requests,
            mcp_errors_total,
            mcp_credential_source_info,
            mcp_credential_refreshes_total,
            mcp_unauthorized_requests_total,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(error) = encode(&mut buffer, &registry) {
            tracing::warn!(error = %error, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_request_success(&self, tool: &str, duration: std::time::Duration) {
        self.mcp_requests_total
            .get_or_create(&RequestLabels {
                tool: tool.to_string(),
                status: "success".to_string(),
            })
            .inc();

        self.mcp_request_duration_seconds
            .get_or_create(&ToolLabels {
                tool: tool.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_request_error(
        &self,
        tool: &str,
        duration: std::time::Duration,
        error_type: &str,
    ) {
        self.mcp_requests_total
            .get_or_create(&RequestLabels {
                tool: tool.to_string(),
                status: "error".to_string(),
            })
            .inc();

        self.mcp_request_duration_seconds
            .get_or_create(&ToolLabels {
                tool: tool.to_string(),
            })
            .observe(duration.as_secs_f64());

        self.mcp_errors_total
            .get_or_create(&ErrorLabels {
                tool: tool.to_string(),
                error_type: error_type.to_string(),
            })
            .inc();
    }

    pub fn set_credential_origin(&self, origin: CredentialOrigin) {
        self.mcp_credential_source_info.clear();
        self.mcp_credential_source_info
            .get_or_create(&CredentialLabels {
                source: origin.to_string(),
            })
            .set(1);
    }

    pub fn record_credential_refresh(&self, origin: CredentialOrigin, success: bool) {
        self.mcp_credential_refreshes_total
            .get_or_create(&RefreshLabels {
                source: origin.to_string(),
                outcome: if success { "success" } else { "failure" }.to_string(),
            })
            .inc();
    }

    pub fn record_unauthorized(&self) {
        self.mcp_unauthorized_requests_total.inc();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for request timing and metric recording
///
/// A guard dropped without calling [`success`](Self::success) or
/// [`error`](Self::error) is recorded as an error of type `unknown`.
pub struct RequestMetrics {
    tool: String,
    start: Instant,
    completed: bool,
}

impl RequestMetrics {
    /// Increments the active requests gauge and starts timing.
    pub fn new(tool: &str) -> Self {
        METRICS
            .mcp_active_requests
            .get_or_create(&ToolLabels {
                tool: tool.to_string(),
            })
            .inc();

        Self {
            tool: tool.to_string(),
            start: Instant::now(),
            completed: false,
        }
    }

    pub fn success(mut self) {
        METRICS.record_request_success(&self.tool, self.start.elapsed());
        self.finish();
    }

    pub fn error(mut self, error_type: &str) {
        METRICS.record_request_error(&self.tool, self.start.elapsed(), error_type);
        self.finish();
    }

    fn finish(&mut self) {
        self.completed = true;
        METRICS
            .mcp_active_requests
            .get_or_create(&ToolLabels {
                tool: self.tool.clone(),
            })
            .dec();
    }
}

impl Drop for RequestMetrics {
    fn drop(&mut self) {
        if !self.completed {
            METRICS.record_request_error(&self.tool, self.start.elapsed(), "unknown");
            self.finish();
        }
    }
}
