//! MCP error taxonomy for the Google Sheets server
//!
//! This module provides:
//! - MCP error codes (JSON-RPC standard + custom codes)
//! - Error context with operation details
//! - Mapping of tool and Google API failures to codes
//! - Error telemetry counters
//! - Builder pattern for constructing errors

use crate::google::RemoteError;
use crate::tools::ToolError;
use crate::validation::ValidationError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// MCP ERROR CODES
// =============================================================================

/// MCP error codes following JSON-RPC 2.0 specification plus custom codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    // Standard JSON-RPC errors
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,

    // Custom application errors (-32000 to -32099)
    /// Spreadsheet (or Drive file) does not exist or is not visible
    SpreadsheetNotFound = -32001,
    /// Google rejected the request for quota or rate-limit reasons
    QuotaExceeded = -32005,
    /// Credentials were rejected or could not be refreshed
    Unauthenticated = -32006,
    /// Google API unreachable or returned a server error
    RemoteUnavailable = -32007,
    /// Permission denied
    PermissionDenied = -32013,
    /// Tool disabled by configuration
    ToolDisabled = -32014,
}

impl ErrorCode {
    /// Get the integer code
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "client_error",
            ErrorCode::ToolDisabled => "not_found",
            ErrorCode::InternalError => "server_error",
            ErrorCode::SpreadsheetNotFound => "resource_not_found",
            ErrorCode::QuotaExceeded => "resource_limit",
            ErrorCode::Unauthenticated | ErrorCode::PermissionDenied => "auth_error",
            ErrorCode::RemoteUnavailable => "remote_error",
        }
    }

    /// Code for a failed Google API call.
    pub fn for_remote(error: &RemoteError) -> Self {
        if error.is_quota() {
            return ErrorCode::QuotaExceeded;
        }
        match error {
            RemoteError::Status { status, .. } => match *status {
                400 => ErrorCode::InvalidParams,
                401 => ErrorCode::Unauthenticated,
                403 => ErrorCode::PermissionDenied,
                404 => ErrorCode::SpreadsheetNotFound,
                500..=599 => ErrorCode::RemoteUnavailable,
                _ => ErrorCode::InternalError,
            },
            RemoteError::Transport(_) => ErrorCode::RemoteUnavailable,
            RemoteError::Auth(_) => ErrorCode::Unauthenticated,
            RemoteError::Decode(_) => ErrorCode::InternalError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

// =============================================================================
// ERROR CONTEXT
// =============================================================================

/// Context information attached to errors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Tool that was invoked
    pub tool: Option<String>,
    /// Remote operation that was being performed
    pub operation: Option<String>,
    /// Spreadsheet ID if relevant
    pub spreadsheet_id: Option<String>,
    /// Cell range if relevant
    pub range: Option<String>,
    /// HTTP status returned by Google, if any
    pub http_status: Option<u16>,
    /// Additional parameters
    pub params: HashMap<String, serde_json::Value>,
    /// Suggestions for fixing the error
    pub suggestions: Vec<String>,
}

// =============================================================================
// MCP ERROR TYPE
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct McpError {
    pub code: ErrorCode,
    pub message: String,
    /// Unique error ID for correlating client reports with logs
    pub error_id: String,
    pub context: ErrorContext,
    pub retryable: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl McpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            error_id: Self::generate_error_id(),
            context: ErrorContext::default(),
            retryable: false,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Start building an error with the builder pattern
    pub fn builder(code: ErrorCode) -> ErrorBuilder {
        ErrorBuilder::new(code)
    }

    pub fn internal() -> ErrorBuilder {
        ErrorBuilder::new(ErrorCode::InternalError)
    }

    /// Add this error to telemetry
    pub fn track(&self) {
        ERROR_METRICS.record_error(&self.code, self.context.tool.as_deref());
    }

    fn generate_error_id() -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().timestamp_millis();
        format!("err_{:x}_{:x}", timestamp, count)
    }

    /// Classify a failed tool invocation and attach suggestions.
    pub fn from_tool_error(tool: &str, error: &ToolError) -> Self {
        let builder = match error {
            ToolError::InvalidArgument(invalid) => validation_error(invalid),
            ToolError::Remote {
                operation,
                spreadsheet_id,
                range,
                source,
            } => remote_error(operation, spreadsheet_id.as_deref(), range.as_deref(), source),
            ToolError::UnexpectedResponse { operation, .. } => McpError::internal()
                .message(error.to_string())
                .operation(*operation),
            ToolError::Disabled(_) => McpError::builder(ErrorCode::ToolDisabled)
                .message(error.to_string())
                .suggestion("Check the server's --enabled-tools setting"),
        };
        builder.tool(tool).build_and_track()
    }
}

fn validation_error(error: &ValidationError) -> ErrorBuilder {
    McpError::builder(ErrorCode::InvalidParams)
        .message(error.to_string())
        .param("parameter", error.parameter())
}

fn remote_error(
    operation: &str,
    spreadsheet_id: Option<&str>,
    range: Option<&str>,
    source: &RemoteError,
) -> ErrorBuilder {
    let code = ErrorCode::for_remote(source);
    let mut builder = McpError::builder(code)
        .message(format!("{operation} failed: {source}"))
        .operation(operation);
    if let Some(spreadsheet_id) = spreadsheet_id {
        builder = builder.spreadsheet_id(spreadsheet_id);
    }
    if let Some(range) = range {
        builder = builder.range(range);
    }
    if let Some(status) = source.status() {
        builder = builder.http_status(status);
    }

    match code {
        ErrorCode::SpreadsheetNotFound => builder
            .suggestion("Check the spreadsheet ID (the long token in the document URL)")
            .suggestion("Use list_spreadsheets to see documents the server can access")
            .suggestion("Use list_sheets to check the tab name"),
        ErrorCode::PermissionDenied => builder
            .suggestion("Share the spreadsheet with the server's service account or user"),
        ErrorCode::Unauthenticated => builder
            .suggestion("The server's Google credentials were rejected; restart it with valid credentials"),
        ErrorCode::QuotaExceeded | ErrorCode::RemoteUnavailable => builder.retryable(true),
        ErrorCode::InvalidParams => builder
            .suggestion("Use A1 notation (e.g., A1:C10) and an existing sheet name"),
        _ => builder,
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.suggestions.is_empty() {
            writeln!(f, "\nSuggestions:")?;
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, suggestion)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for McpError {}

// =============================================================================
// ERROR BUILDER
// =============================================================================

pub struct ErrorBuilder {
    error: McpError,
}

impl ErrorBuilder {
    fn new(code: ErrorCode) -> Self {
        Self {
            error: McpError::new(code, ""),
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.error.message = message.into();
        self
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.error.context.tool = Some(tool.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.error.context.operation = Some(operation.into());
        self
    }

    pub fn spreadsheet_id(mut self, spreadsheet_id: impl Into<String>) -> Self {
        self.error.context.spreadsheet_id = Some(spreadsheet_id.into());
        self
    }

    pub fn range(mut self, range: impl Into<String>) -> Self {
        self.error.context.range = Some(range.into());
        self
    }

    pub fn http_status(mut self, status: u16) -> Self {
        self.error.context.http_status = Some(status);
        self
    }

    /// Add a parameter to the context
    pub fn param(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.error.context.params.insert(key.into(), json_value);
        }
        self
    }

    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.error.context.suggestions.push(suggestion.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.error.retryable = retryable;
        self
    }

    pub fn build_and_track(self) -> McpError {
        let error = self.error;
        error.track();
        error
    }
}

// =============================================================================
// ERROR TELEMETRY
// =============================================================================

#[derive(Debug, Default)]
pub struct ErrorMetrics {
    /// Total error count by error code
    error_counts: RwLock<HashMap<ErrorCode, AtomicU64>>,
    /// Error count by tool
    tool_errors: RwLock<HashMap<String, AtomicU64>>,
    /// Error count by category
    category_counts: RwLock<HashMap<String, AtomicU64>>,
}

fn bump<K, Q>(map: &RwLock<HashMap<K, AtomicU64>>, key: &Q, owned: impl FnOnce() -> K)
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<Q>,
    Q: std::hash::Hash + Eq + ?Sized,
{
    {
        let read = map.read();
        if let Some(counter) = read.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }
    map.write()
        .entry(owned())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn read_count<K, Q>(map: &RwLock<HashMap<K, AtomicU64>>, key: &Q) -> u64
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<Q>,
    Q: std::hash::Hash + Eq + ?Sized,
{
    map.read()
        .get(key)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0)
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, code: &ErrorCode, tool: Option<&str>) {
        bump(&self.error_counts, code, || *code);
        if let Some(tool_name) = tool {
            bump(&self.tool_errors, tool_name, || tool_name.to_string());
        }
        let category = code.category();
        bump(&self.category_counts, category, || category.to_string());

        tracing::debug!(
            error_code = %code,
            tool = tool,
            category = category,
            "error recorded"
        );
    }

    pub fn get_error_count(&self, code: &ErrorCode) -> u64 {
        read_count(&self.error_counts, code)
    }

    pub fn get_tool_error_count(&self, tool: &str) -> u64 {
        read_count(&self.tool_errors, tool)
    }

    pub fn get_category_count(&self, category: &str) -> u64 {
        read_count(&self.category_counts, category)
    }
}

/// Global error metrics instance
pub static ERROR_METRICS: once_cell::sync::Lazy<ErrorMetrics> =
    once_cell::sync::Lazy::new(ErrorMetrics::new);

// =============================================================================
// CONVERSIONS
// =============================================================================

/// Convert McpError to rmcp::ErrorData
pub fn to_rmcp_error(error: McpError) -> rmcp::ErrorData {
    let data = serde_json::to_value(&error).ok();

    match error.code {
        ErrorCode::ToolDisabled => rmcp::ErrorData::invalid_request(error.message, data),
        ErrorCode::InvalidParams => rmcp::ErrorData::invalid_params(error.message, data),
        ErrorCode::SpreadsheetNotFound
        | ErrorCode::QuotaExceeded
        | ErrorCode::Unauthenticated
        | ErrorCode::RemoteUnavailable
        | ErrorCode::PermissionDenied => rmcp::ErrorData::new(
            rmcp::model::ErrorCode(error.code.code()),
            error.message,
            data,
        ),
        ErrorCode::InternalError => rmcp::ErrorData::internal_error(error.message, data),
    }
}
