//! Structured logging setup.
//!
//! - JSON formatting for production, pretty output for development
//! - stderr by default so the stdio transport keeps stdout for protocol frames
//! - optional rolling file output
//! - optional OpenTelemetry OTLP export

use anyhow::{Context, Result};
use opentelemetry::{
    KeyValue,
    trace::{TraceError, TracerProvider as _},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub const SERVICE_NAME: &str = "google-sheets-mcp";

/// Configuration for logging setup.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Directory for log files (when output is "file")
    pub log_dir: PathBuf,
    pub log_file_prefix: String,
    pub service_name: String,
    pub service_version: String,
    /// Environment (e.g., "development", "production")
    pub environment: String,
    /// Raise the default filter to `debug` (the `DEBUG` server option)
    pub debug: bool,
    pub enable_otel: bool,
    pub otlp_endpoint: Option<String>,
    pub enable_rotation: bool,
    /// OpenTelemetry trace sampling rate (0.0 to 1.0)
    pub otel_sampling_rate: f64,
    pub otlp_timeout_secs: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rotated file under `log_dir`
    File,
}

fn is_production(environment: &str) -> bool {
    environment == "production" || environment == "prod"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("ENV"))
            .unwrap_or_else(|_| "development".to_string());
        let production = is_production(&environment);

        Self {
            format: if production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            log_file_prefix: SERVICE_NAME.to_string(),
            service_name: SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment,
            debug: false,
            enable_otel: false,
            otlp_endpoint: None,
            enable_rotation: true,
            otel_sampling_rate: if production { 0.1 } else { 1.0 },
            otlp_timeout_secs: 10,
        }
    }
}

impl LoggingConfig {
    /// Build from `LOG_*` and `OTEL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(format) = env::var("LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => config.format,
            };
        }

        if let Ok(output) = env::var("LOG_OUTPUT") {
            config.output = match output.to_lowercase().as_str() {
                "stdout" => LogOutput::Stdout,
                "stderr" => LogOutput::Stderr,
                "file" => LogOutput::File,
                _ => config.output,
            };
        }

        if let Ok(log_dir) = env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(log_dir);
        }

        if let Ok(otel_endpoint) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.enable_otel = true;
            config.otlp_endpoint = Some(otel_endpoint);
        } else if env::var("ENABLE_OTEL").is_ok() {
            config.enable_otel = true;
        }

        if let Ok(Ok(rate)) = env::var("OTEL_SAMPLING_RATE").map(|raw| raw.parse::<f64>()) {
            config.otel_sampling_rate = rate.clamp(0.0, 1.0);
        }

        if let Ok(Ok(timeout)) = env::var("OTEL_EXPORTER_OTLP_TIMEOUT").map(|raw| raw.parse::<u64>())
        {
            config.otlp_timeout_secs = timeout;
        }

        config
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Stdio transport owns stdout; redirect logs that would land there.
    pub fn for_stdio(mut self) -> Self {
        if self.output == LogOutput::Stdout {
            self.output = LogOutput::Stderr;
        }
        self
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn default_directive(&self) -> String {
        let level = if self.debug { "debug" } else { "info" };
        format!("{level},hyper=info,reqwest=info,tower=info")
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                self.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                self.service_version.clone(),
            ),
            KeyValue::new("environment", self.environment.clone()),
            KeyValue::new("service.namespace", "mcp"),
        ])
    }

    fn sampler(&self) -> Sampler {
        if self.otel_sampling_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.otel_sampling_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.otel_sampling_rate,
            )))
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard must live until exit so buffered lines are flushed.
pub fn init_logging(config: LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let (writer, guard) = match config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
        LogOutput::File => {
            std::fs::create_dir_all(&config.log_dir).with_context(|| {
                format!("failed to create log directory {}", config.log_dir.display())
            })?;

            let file_appender = if config.enable_rotation {
                tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix)
            } else {
                tracing_appender::rolling::never(&config.log_dir, &config.log_file_prefix)
            };
            tracing_appender::non_blocking(file_appender)
        }
    };

    let otel_layer = match (config.enable_otel, config.otlp_endpoint.as_deref()) {
        (true, Some(_)) => match init_tracer_provider(&config) {
            Ok(provider) => {
                let tracer = provider.tracer(SERVICE_NAME);
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            Err(e) => {
                eprintln!(
                    "Warning: failed to initialize OpenTelemetry exporter: {e}. Continuing without distributed tracing."
                );
                None
            }
        },
        (true, None) => {
            eprintln!(
                "Warning: OpenTelemetry enabled but no OTLP endpoint configured. \
                 Set OTEL_EXPORTER_OTLP_ENDPOINT to enable distributed tracing."
            );
            None
        }
        _ => None,
    };
    let otel_enabled = otel_layer.is_some();

    let registry = tracing_subscriber::registry().with(otel_layer);

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_level(true)
                .with_line_number(true)
                .with_file(true)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_filter(env_filter);
            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_target(true)
                .with_level(true)
                .with_line_number(true)
                .with_file(true)
                .with_ansi(config.output != LogOutput::File)
                .with_filter(env_filter);
            registry.with(fmt_layer).try_init()?;
        }
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        output = ?config.output,
        debug = config.debug,
        otel = otel_enabled,
        "logging initialized"
    );

    Ok(Some(guard))
}

fn init_tracer_provider(config: &LoggingConfig) -> Result<TracerProvider, TraceError> {
    let endpoint = config
        .otlp_endpoint
        .as_ref()
        .ok_or_else(|| TraceError::Other("No OTLP endpoint configured".into()))?;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otlp_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(config.sampler())
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(config.resource()),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .and_then(|tracer| {
            tracer
                .provider()
                .ok_or_else(|| TraceError::Other("tracer provider unavailable".into()))
        })
}

/// Flush and stop the OpenTelemetry exporter, if one was installed.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Log a security event.
#[macro_export]
macro_rules! log_security_event {
    ($event_type:expr, $($arg:tt)*) => {
        tracing::warn!(
            security.event_type = %$event_type,
            $($arg)*
        );
    };
}

/// Log the outcome of an MCP tool invocation.
#[macro_export]
macro_rules! log_mcp_tool {
    ($tool:expr, $result:expr, $duration:expr, $($arg:tt)*) => {
        tracing::info!(
            mcp.tool = %$tool,
            mcp.result = %$result,
            duration_ms = $duration.as_millis() as u64,
            $($arg)*
        );
    };
}

/// Create a span for MCP tool execution.
pub fn mcp_tool_span(tool_name: &str) -> tracing::Span {
    tracing::info_span!(
        "mcp_tool",
        mcp.tool = tool_name,
        service = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_targets_stderr() {
        let config = LoggingConfig::default();
        assert_eq!(config.service_name, "google-sheets-mcp");
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(!config.debug);
    }

    #[test]
    fn debug_flag_raises_default_level() {
        let config = LoggingConfig::default();
        assert!(config.default_directive().starts_with("info,"));
        assert!(config.with_debug(true).default_directive().starts_with("debug,"));
    }

    #[test]
    fn stdio_never_logs_to_stdout() {
        let config = LoggingConfig {
            output: LogOutput::Stdout,
            ..LoggingConfig::default()
        };
        assert_eq!(config.for_stdio().output, LogOutput::Stderr);
    }

    #[test]
    #[serial]
    fn from_env_reads_format_and_output() {
        unsafe {
            env::set_var("LOG_FORMAT", "json");
            env::set_var("LOG_OUTPUT", "file");
            env::set_var("LOG_DIR", "/tmp/sheets-mcp-logs");
        }

        let config = LoggingConfig::from_env();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::File);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/sheets-mcp-logs"));

        unsafe {
            env::remove_var("LOG_FORMAT");
            env::remove_var("LOG_OUTPUT");
            env::remove_var("LOG_DIR");
        }
    }
}
