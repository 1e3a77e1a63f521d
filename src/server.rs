use crate::config::ServerConfig;
use crate::context::ServiceContext;
use crate::error::{McpError as ToolFailure, to_rmcp_error};
use crate::logging::mcp_tool_span;
use crate::metrics::RequestMetrics;
use crate::tools::{self, ToolError};
use anyhow::Result;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

const INSTRUCTIONS: &str = "\
Google Sheets MCP: read and edit Google Sheets through the Sheets and Drive APIs.

WORKFLOW:
1) list_spreadsheets to find a document and its spreadsheet_id
2) list_sheets to see its tabs
3) get_sheet_data to read a tab or an A1 range within it
4) update_cells to overwrite a range, add_rows to append after the last row with data
5) create_spreadsheet / create_sheet to make new documents and tabs

RANGES: A1 notation without the sheet prefix (e.g., A1:C10); the sheet is a separate parameter.

VALUES: Writes are parsed as if typed by a user, so formulas (=SUM(A1:A3)) and dates are interpreted.

When the server is scoped to a Drive folder, listing and creation happen inside that folder only.";

/// Serialize a tool payload as JSON text plus structured content.
///
/// Sequences are wrapped as `{"result": [...]}` since structured content
/// must be an object.
pub fn structured_result<T: Serialize>(payload: &T) -> Result<CallToolResult, McpError> {
    let value = serde_json::to_value(payload).map_err(|e| {
        McpError::internal_error(format!("failed to serialize response: {e}"), None)
    })?;
    let structured = match value {
        Value::Array(items) => serde_json::json!({ "result": items }),
        other => other,
    };
    let text = serde_json::to_string(&structured).map_err(|e| {
        McpError::internal_error(format!("failed to serialize response: {e}"), None)
    })?;

    Ok(CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    })
}

#[derive(Clone)]
pub struct GoogleSheetsServer {
    context: Arc<ServiceContext>,
    config: Arc<ServerConfig>,
    tool_router: ToolRouter<GoogleSheetsServer>,
}

impl GoogleSheetsServer {
    pub fn new(context: Arc<ServiceContext>, config: Arc<ServerConfig>) -> Self {
        Self {
            context,
            config,
            tool_router: Self::tool_router(),
        }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    pub async fn run_stdio(self) -> Result<()> {
        let service = self
            .serve(stdio())
            .await
            .inspect_err(|error| tracing::error!("serving error: {:?}", error))?;
        service.waiting().await?;
        Ok(())
    }

    fn ensure_tool_enabled(&self, tool: &str) -> Result<(), ToolError> {
        if self.config.is_tool_enabled(tool) {
            Ok(())
        } else {
            Err(ToolError::Disabled(tool.to_ascii_lowercase()))
        }
    }

    /// Run one tool call with the enabled check, span, metrics and error mapping.
    async fn invoke<T, F>(&self, tool: &'static str, call: F) -> Result<CallToolResult, McpError>
    where
        T: Serialize,
        F: Future<Output = Result<T, ToolError>>,
    {
        async move {
            tracing::debug!(tool, "tool invocation requested");
            let metrics = RequestMetrics::new(tool);
            let started = Instant::now();

            let outcome = match self.ensure_tool_enabled(tool) {
                Ok(()) => call.await,
                Err(disabled) => Err(disabled),
            };

            match outcome {
                Ok(payload) => {
                    let result = structured_result(&payload);
                    match &result {
                        Ok(_) => metrics.success(),
                        Err(_) => metrics.error("server_error"),
                    }
                    crate::log_mcp_tool!(tool, "success", started.elapsed(), "tool completed");
                    result
                }
                Err(error) => {
                    let failure = ToolFailure::from_tool_error(tool, &error);
                    metrics.error(failure.code.category());
                    crate::log_mcp_tool!(
                        tool,
                        "error",
                        started.elapsed(),
                        error_id = %failure.error_id,
                        code = failure.code.code(),
                        "tool failed: {error}"
                    );
                    Err(to_rmcp_error(failure))
                }
            }
        }
        .instrument(mcp_tool_span(tool))
        .await
    }
}

#[tool_router]
impl GoogleSheetsServer {
    #[tool(
        name = "get_sheet_data",
        description = "Read data from a sheet (tab) of a Google Spreadsheet. \
Returns values for the whole sheet or an A1 range; set include_grid_data for cell formatting too."
    )]
    pub async fn get_sheet_data(
        &self,
        Parameters(params): Parameters<tools::GetSheetDataParams>,
    ) -> Result<CallToolResult, McpError> {
        self.invoke("get_sheet_data", tools::get_sheet_data(&self.context, params))
            .await
    }

    #[tool(
        name = "update_cells",
        description = "Overwrite a range of cells in a sheet with a 2D array of values"
    )]
    pub async fn update_cells(
        &self,
        Parameters(params): Parameters<tools::UpdateCellsParams>,
    ) -> Result<CallToolResult, McpError> {
        self.invoke("update_cells", tools::update_cells(&self.context, params))
            .await
    }

    #[tool(
        name = "create_spreadsheet",
        description = "Create a new Google Spreadsheet, inside the configured Drive folder when one is set"
    )]
    pub async fn create_spreadsheet(
        &self,
        Parameters(params): Parameters<tools::CreateSpreadsheetParams>,
    ) -> Result<CallToolResult, McpError> {
        self.invoke(
            "create_spreadsheet",
            tools::create_spreadsheet(&self.context, params),
        )
        .await
    }

    #[tool(
        name = "list_spreadsheets",
        description = "List spreadsheets visible to the server, most recently modified first"
    )]
    pub async fn list_spreadsheets(&self) -> Result<CallToolResult, McpError> {
        self.invoke("list_spreadsheets", tools::list_spreadsheets(&self.context))
            .await
    }

    #[tool(
        name = "add_rows",
        description = "Append rows after the last row with data in a sheet"
    )]
    pub async fn add_rows(
        &self,
        Parameters(params): Parameters<tools::AddRowsParams>,
    ) -> Result<CallToolResult, McpError> {
        self.invoke("add_rows", tools::add_rows(&self.context, params))
            .await
    }

    #[tool(
        name = "list_sheets",
        description = "List the sheet (tab) names of a spreadsheet in display order"
    )]
    pub async fn list_sheets(
        &self,
        Parameters(params): Parameters<tools::ListSheetsParams>,
    ) -> Result<CallToolResult, McpError> {
        self.invoke("list_sheets", tools::list_sheets(&self.context, params))
            .await
    }

    #[tool(name = "create_sheet", description = "Add a new sheet (tab) to a spreadsheet")]
    pub async fn create_sheet(
        &self,
        Parameters(params): Parameters<tools::CreateSheetParams>,
    ) -> Result<CallToolResult, McpError> {
        self.invoke("create_sheet", tools::create_sheet(&self.context, params))
            .await
    }

    #[tool(
        name = "health_check",
        description = "Report server status and version without calling Google"
    )]
    pub async fn health_check(&self) -> Result<CallToolResult, McpError> {
        self.invoke("health_check", async { Ok::<_, ToolError>(tools::health_check()) })
            .await
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for GoogleSheetsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..ServerInfo::default()
        }
    }
}
