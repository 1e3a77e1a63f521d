use clap::Parser;
use google_sheets_mcp::{
    CliArgs, LoggingConfig, ServerConfig, TransportKind, init_logging, run_server,
    shutdown_telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();
    let config = ServerConfig::from_args(cli)?;

    let mut logging_config = LoggingConfig::from_env().with_debug(config.debug);
    if config.transport == TransportKind::Stdio {
        logging_config = logging_config.for_stdio();
    }
    let _guard = init_logging(logging_config)?;

    // Fail fast before touching credentials
    config.validate()?;

    let result = run_server(config).await;
    if let Err(error) = &result {
        tracing::error!(error = %format!("{error:#}"), "server exited with error");
    }

    shutdown_telemetry();

    result
}
