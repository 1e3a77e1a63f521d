use crate::tools::TOOL_NAMES;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SERVICE_ACCOUNT_PATH: &str = "service-account-key.json";
const DEFAULT_CREDENTIALS_PATH: &str = "credentials.json";
const DEFAULT_TOKEN_PATH: &str = "token.json";
const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_OAUTH_TIMEOUT_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[value(alias = "stream-http", alias = "stream_http")]
    #[serde(alias = "stream-http", alias = "stream_http")]
    Http,
    Stdio,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Stdio => write!(f, "stdio"),
        }
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    /// Base64-encoded service-account key JSON
    pub credentials_config: Option<String>,
    pub service_account_path: PathBuf,
    /// OAuth client secrets for the interactive consent flow
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub drive_folder_id: Option<String>,
    pub host: IpAddr,
    pub port: u16,
    pub debug: bool,
    pub api_key: Option<String>,
    pub transport: TransportKind,
    pub enabled_tools: Option<HashSet<String>>,
    pub oauth_flow_timeout: Duration,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("ServerConfig")
            .field("credentials_config", &redact(&self.credentials_config))
            .field("service_account_path", &self.service_account_path)
            .field("credentials_path", &self.credentials_path)
            .field("token_path", &self.token_path)
            .field("drive_folder_id", &self.drive_folder_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("debug", &self.debug)
            .field("api_key", &redact(&self.api_key))
            .field("transport", &self.transport)
            .field("enabled_tools", &self.enabled_tools)
            .field("oauth_flow_timeout", &self.oauth_flow_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            credentials_config: None,
            service_account_path: PathBuf::from(DEFAULT_SERVICE_ACCOUNT_PATH),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            drive_folder_id: None,
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
            debug: false,
            api_key: None,
            transport: TransportKind::Http,
            enabled_tools: None,
            oauth_flow_timeout: Duration::from_secs(DEFAULT_OAUTH_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Secrets are compared byte for byte, so only an all-blank value counts as unset.
fn non_blank_secret(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            credentials_config: cli_credentials_config,
            service_account_path: cli_service_account_path,
            credentials_path: cli_credentials_path,
            token_path: cli_token_path,
            drive_folder_id: cli_drive_folder_id,
            host: cli_host,
            port: cli_port,
            debug: cli_debug,
            api_key: cli_api_key,
            transport: cli_transport,
            enabled_tools: cli_enabled_tools,
            oauth_timeout_secs: cli_oauth_timeout_secs,
            request_timeout_secs: cli_request_timeout_secs,
            shutdown_timeout_secs: cli_shutdown_timeout_secs,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            credentials_config: file_credentials_config,
            service_account_path: file_service_account_path,
            credentials_path: file_credentials_path,
            token_path: file_token_path,
            drive_folder_id: file_drive_folder_id,
            host: file_host,
            port: file_port,
            debug: file_debug,
            api_key: file_api_key,
            transport: file_transport,
            enabled_tools: file_enabled_tools,
            oauth_timeout_secs: file_oauth_timeout_secs,
            request_timeout_secs: file_request_timeout_secs,
            shutdown_timeout_secs: file_shutdown_timeout_secs,
        } = file_config;

        let enabled_tools = cli_enabled_tools
            .or(file_enabled_tools)
            .map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| tool.trim().to_ascii_lowercase())
                    .filter(|tool| !tool.is_empty())
                    .collect::<HashSet<_>>()
            })
            .filter(|set| !set.is_empty());

        let config = Self {
            credentials_config: non_empty(cli_credentials_config)
                .or_else(|| non_empty(file_credentials_config)),
            service_account_path: cli_service_account_path
                .or(file_service_account_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVICE_ACCOUNT_PATH)),
            credentials_path: cli_credentials_path
                .or(file_credentials_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH)),
            token_path: cli_token_path
                .or(file_token_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH)),
            drive_folder_id: non_empty(cli_drive_folder_id)
                .or_else(|| non_empty(file_drive_folder_id)),
            host: cli_host.or(file_host).unwrap_or(DEFAULT_HOST),
            port: cli_port.or(file_port).unwrap_or(DEFAULT_PORT),
            debug: cli_debug.or(file_debug).unwrap_or(false),
            api_key: non_blank_secret(cli_api_key).or_else(|| non_blank_secret(file_api_key)),
            transport: cli_transport
                .or(file_transport)
                .unwrap_or(TransportKind::Http),
            enabled_tools,
            oauth_flow_timeout: Duration::from_secs(
                cli_oauth_timeout_secs
                    .or(file_oauth_timeout_secs)
                    .unwrap_or(DEFAULT_OAUTH_TIMEOUT_SECS),
            ),
            request_timeout: Duration::from_secs(
                cli_request_timeout_secs
                    .or(file_request_timeout_secs)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            shutdown_timeout: Duration::from_secs(
                cli_shutdown_timeout_secs
                    .or(file_shutdown_timeout_secs)
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            ),
        };
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.oauth_flow_timeout.is_zero(),
            "oauth flow timeout must be greater than zero"
        );
        anyhow::ensure!(
            !self.request_timeout.is_zero(),
            "request timeout must be greater than zero"
        );
        anyhow::ensure!(
            !self.shutdown_timeout.is_zero(),
            "shutdown timeout must be greater than zero"
        );
        if let Some(tools) = &self.enabled_tools {
            let mut unknown: Vec<_> = tools
                .iter()
                .filter(|tool| !TOOL_NAMES.contains(&tool.as_str()))
                .cloned()
                .collect();
            unknown.sort();
            anyhow::ensure!(
                unknown.is_empty(),
                "unknown tools in enabled tool list: {}",
                unknown.join(", ")
            );
        }
        Ok(())
    }

    pub fn http_bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn is_tool_enabled(&self, tool: &str) -> bool {
        match &self.enabled_tools {
            Some(set) => set.contains(&tool.to_ascii_lowercase()),
            None => true,
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "google-sheets-mcp",
    about = "MCP server for Google Sheets and Drive",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "CREDENTIALS_CONFIG",
        value_name = "BASE64",
        hide_env_values = true,
        help = "Base64-encoded service account key JSON"
    )]
    pub credentials_config: Option<String>,

    #[arg(
        long,
        env = "SERVICE_ACCOUNT_PATH",
        value_name = "FILE",
        help = "Service account key file"
    )]
    pub service_account_path: Option<PathBuf>,

    #[arg(
        long,
        env = "CREDENTIALS_PATH",
        value_name = "FILE",
        help = "OAuth client secrets file used for the interactive consent flow"
    )]
    pub credentials_path: Option<PathBuf>,

    #[arg(
        long,
        env = "TOKEN_PATH",
        value_name = "FILE",
        help = "Where the user authorization token is cached"
    )]
    pub token_path: Option<PathBuf>,

    #[arg(
        long,
        env = "DRIVE_FOLDER_ID",
        value_name = "ID",
        help = "Drive folder that new spreadsheets are created in and listed from"
    )]
    pub drive_folder_id: Option<String>,

    #[arg(long, env = "HOST", value_name = "ADDR", help = "HTTP listen address")]
    pub host: Option<IpAddr>,

    #[arg(
        long,
        env = "PORT",
        value_name = "PORT",
        help = "HTTP listen port",
        value_parser = clap::value_parser!(u16)
    )]
    pub port: Option<u16>,

    #[arg(
        long,
        env = "DEBUG",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new(),
        help = "Enable debug logging"
    )]
    pub debug: Option<bool>,

    #[arg(
        long,
        env = "MCP_API_KEY",
        value_name = "KEY",
        hide_env_values = true,
        help = "Shared secret HTTP callers must present (generated when unset)"
    )]
    pub api_key: Option<String>,

    #[arg(
        long,
        env = "GOOGLE_SHEETS_MCP_TRANSPORT",
        value_enum,
        value_name = "TRANSPORT",
        help = "Transport to expose (http or stdio)"
    )]
    pub transport: Option<TransportKind>,

    #[arg(
        long,
        env = "GOOGLE_SHEETS_MCP_ENABLED_TOOLS",
        value_name = "TOOL",
        value_delimiter = ',',
        help = "Restrict execution to the provided tool names"
    )]
    pub enabled_tools: Option<Vec<String>>,

    #[arg(
        long,
        env = "GOOGLE_SHEETS_MCP_OAUTH_TIMEOUT_SECS",
        value_name = "SECS",
        help = "How long to wait for the interactive consent redirect"
    )]
    pub oauth_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "GOOGLE_SHEETS_MCP_REQUEST_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Timeout for each Google API request"
    )]
    pub request_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "GOOGLE_SHEETS_MCP_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        help = "How long to wait for in-flight requests on shutdown"
    )]
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    credentials_config: Option<String>,
    service_account_path: Option<PathBuf>,
    credentials_path: Option<PathBuf>,
    token_path: Option<PathBuf>,
    drive_folder_id: Option<String>,
    host: Option<IpAddr>,
    port: Option<u16>,
    debug: Option<bool>,
    api_key: Option<String>,
    transport: Option<TransportKind>,
    enabled_tools: Option<Vec<String>>,
    oauth_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::from_args(CliArgs::default()).unwrap();
        assert_eq!(config.http_bind_address().to_string(), "0.0.0.0:8000");
        assert_eq!(config.token_path, PathBuf::from("token.json"));
        assert_eq!(config.transport, TransportKind::Http);
        assert_eq!(config.oauth_flow_timeout, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_strings_are_treated_as_unset() {
        let args = CliArgs {
            drive_folder_id: Some("  ".into()),
            api_key: Some(String::new()),
            ..CliArgs::default()
        };
        let config = ServerConfig::from_args(args).unwrap();
        assert!(config.drive_folder_id.is_none());
        assert!(config.api_key.is_none());
    }

    #[test]
    fn api_key_is_kept_verbatim() {
        let args = CliArgs {
            api_key: Some(" abc\t".into()),
            ..CliArgs::default()
        };
        let config = ServerConfig::from_args(args).unwrap();
        assert_eq!(config.api_key.as_deref(), Some(" abc\t"));

        let blank = CliArgs {
            api_key: Some(" \t ".into()),
            ..CliArgs::default()
        };
        assert!(ServerConfig::from_args(blank).unwrap().api_key.is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = ServerConfig {
            api_key: Some("super-secret".into()),
            credentials_config: Some("eyJ0eXBlIjoi".into()),
            ..ServerConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("eyJ0eXBlIjoi"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn validate_rejects_unknown_tools_and_zero_timeouts() {
        let config = ServerConfig {
            enabled_tools: Some(["get_sheet_data", "drop_table"].map(String::from).into()),
            ..ServerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("drop_table"));

        let config = ServerConfig {
            request_timeout: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
