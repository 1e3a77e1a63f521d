use crate::context::ServiceContext;
use crate::google::{RemoteError, SPREADSHEET_MIME_TYPE};
use crate::model::*;
use crate::validation::{
    ValidationError, validate_non_empty_string, validate_range, validate_rows,
    validate_sheet_title, validate_spreadsheet_id,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const SERVICE_NAME: &str = "Google Sheets MCP Server";

/// Every tool the server registers, in listing order.
pub const TOOL_NAMES: &[&str] = &[
    "get_sheet_data",
    "update_cells",
    "create_spreadsheet",
    "list_spreadsheets",
    "add_rows",
    "list_sheets",
    "create_sheet",
    "health_check",
];

const LIST_ORDER: &str = "modifiedTime desc";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    InvalidArgument(#[from] ValidationError),
    #[error("{operation} failed: {source}")]
    Remote {
        operation: &'static str,
        spreadsheet_id: Option<String>,
        range: Option<String>,
        #[source]
        source: RemoteError,
    },
    #[error("unexpected response from {operation}: {detail}")]
    UnexpectedResponse {
        operation: &'static str,
        detail: String,
    },
    #[error("tool '{0}' is disabled by server configuration")]
    Disabled(String),
}

/// Log a failed API call with its operation context and wrap it.
fn remote_failure(
    operation: &'static str,
    spreadsheet_id: Option<&str>,
    range: Option<&str>,
    source: RemoteError,
) -> ToolError {
    tracing::error!(
        operation,
        spreadsheet_id = spreadsheet_id.unwrap_or_default(),
        range = range.unwrap_or_default(),
        status = source.status(),
        error = %source,
        "Google API call failed"
    );
    ToolError::Remote {
        operation,
        spreadsheet_id: spreadsheet_id.map(str::to_string),
        range: range.map(str::to_string),
        source,
    }
}

fn qualified_range(sheet: &str, range: Option<&str>) -> String {
    match range {
        Some(range) => format!("{sheet}!{range}"),
        None => sheet.to_string(),
    }
}

pub async fn get_sheet_data(
    context: &ServiceContext,
    params: GetSheetDataParams,
) -> Result<SheetDataResponse, ToolError> {
    let spreadsheet_id = validate_spreadsheet_id(&params.spreadsheet_id)?;
    let sheet = validate_non_empty_string("sheet", &params.sheet)?;
    let range = params
        .range
        .as_deref()
        .filter(|range| !range.trim().is_empty())
        .map(validate_range)
        .transpose()?;
    let full_range = qualified_range(sheet, range);

    if params.include_grid_data {
        let grid = context
            .sheets()
            .get_spreadsheet(spreadsheet_id, std::slice::from_ref(&full_range), true)
            .await
            .map_err(|e| {
                remote_failure("spreadsheets.get", Some(spreadsheet_id), Some(&full_range), e)
            })?;
        return Ok(SheetDataResponse::Grid(grid));
    }

    let values = context
        .sheets()
        .get_values(spreadsheet_id, &full_range)
        .await
        .map_err(|e| {
            remote_failure("spreadsheets.values.get", Some(spreadsheet_id), Some(&full_range), e)
        })?;

    Ok(SheetDataResponse::Values(ValueRangesResponse {
        spreadsheet_id: spreadsheet_id.to_string(),
        value_ranges: vec![RangeValues {
            range: full_range,
            values: values.values,
        }],
    }))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetSheetDataParams {
    /// The ID of the spreadsheet (found in its URL)
    pub spreadsheet_id: String,
    /// The name of the sheet (tab)
    pub sheet: String,
    /// Optional cell range in A1 notation, e.g. 'A1:C10'. Omit for the whole sheet.
    #[serde(default)]
    pub range: Option<String>,
    /// Return the full grid resource (values plus formatting) instead of values only
    #[serde(default)]
    pub include_grid_data: bool,
}

pub async fn update_cells(
    context: &ServiceContext,
    params: UpdateCellsParams,
) -> Result<Value, ToolError> {
    let spreadsheet_id = validate_spreadsheet_id(&params.spreadsheet_id)?;
    let sheet = validate_non_empty_string("sheet", &params.sheet)?;
    let range = validate_range(&params.range)?;
    let rows = validate_rows("data", &params.data)?;
    let full_range = qualified_range(sheet, Some(range));

    context
        .sheets()
        .update_values(spreadsheet_id, &full_range, rows)
        .await
        .map_err(|e| {
            remote_failure(
                "spreadsheets.values.update",
                Some(spreadsheet_id),
                Some(&full_range),
                e,
            )
        })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateCellsParams {
    /// The ID of the spreadsheet (found in its URL)
    pub spreadsheet_id: String,
    /// The name of the sheet (tab)
    pub sheet: String,
    /// Cell range in A1 notation, e.g. 'A1:C10'
    pub range: String,
    /// 2D array of values; each inner array is one row
    pub data: Vec<Vec<Value>>,
}

pub async fn add_rows(context: &ServiceContext, params: AddRowsParams) -> Result<Value, ToolError> {
    let spreadsheet_id = validate_spreadsheet_id(&params.spreadsheet_id)?;
    let sheet = validate_non_empty_string("sheet", &params.sheet)?;
    let rows = validate_rows("data", &params.data)?;

    let response = context
        .sheets()
        .append_values(spreadsheet_id, sheet, rows)
        .await
        .map_err(|e| {
            remote_failure("spreadsheets.values.append", Some(spreadsheet_id), Some(sheet), e)
        })?;
    tracing::info!(spreadsheet_id, sheet, rows = rows.len(), "rows added");
    Ok(response)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddRowsParams {
    /// The ID of the spreadsheet (found in its URL)
    pub spreadsheet_id: String,
    /// The name of the sheet (tab) to append to
    pub sheet: String,
    /// 2D array of rows to append after the last row with data
    pub data: Vec<Vec<Value>>,
}

pub async fn create_spreadsheet(
    context: &ServiceContext,
    params: CreateSpreadsheetParams,
) -> Result<CreatedSpreadsheet, ToolError> {
    let title = validate_non_empty_string("title", &params.title)?;
    let request = NewFile {
        name: title.to_string(),
        mime_type: SPREADSHEET_MIME_TYPE.to_string(),
        parents: context.folder_id().map(str::to_string).into_iter().collect(),
    };

    let file = context
        .drive()
        .create_file(&request)
        .await
        .map_err(|e| remote_failure("drive.files.create", None, None, e))?;
    if file.id.is_empty() {
        return Err(ToolError::UnexpectedResponse {
            operation: "drive.files.create",
            detail: "created file has no id".to_string(),
        });
    }

    tracing::info!(spreadsheet_id = %file.id, folder = ?context.folder_id(), "spreadsheet created");
    Ok(CreatedSpreadsheet {
        spreadsheet_id: file.id,
        title: if file.name.is_empty() {
            request.name
        } else {
            file.name
        },
        folder: file
            .parents
            .into_iter()
            .next()
            .unwrap_or_else(|| "root".to_string()),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateSpreadsheetParams {
    /// Title of the new spreadsheet
    pub title: String,
}

/// Drive search expression for spreadsheets, optionally inside one folder.
pub fn spreadsheet_query(folder_id: Option<&str>) -> String {
    let mut query = format!("mimeType='{SPREADSHEET_MIME_TYPE}'");
    if let Some(folder) = folder_id {
        let escaped = folder.replace('\\', "\\\\").replace('\'', "\\'");
        query.push_str(&format!(" and '{escaped}' in parents"));
    }
    query.push_str(" and trashed = false");
    query
}

pub async fn list_spreadsheets(context: &ServiceContext) -> Result<Vec<SpreadsheetEntry>, ToolError> {
    let query = spreadsheet_query(context.folder_id());
    let files = context
        .drive()
        .list_files(&query, LIST_ORDER)
        .await
        .map_err(|e| remote_failure("drive.files.list", None, None, e))?;

    Ok(files
        .into_iter()
        .map(|file| SpreadsheetEntry {
            id: file.id,
            title: file.name,
        })
        .collect())
}

pub async fn list_sheets(
    context: &ServiceContext,
    params: ListSheetsParams,
) -> Result<Vec<String>, ToolError> {
    let spreadsheet_id = validate_spreadsheet_id(&params.spreadsheet_id)?;
    let sheets = context
        .sheets()
        .get_sheet_properties(spreadsheet_id)
        .await
        .map_err(|e| remote_failure("spreadsheets.get", Some(spreadsheet_id), None, e))?;

    Ok(sheets.into_iter().map(|sheet| sheet.title).collect())
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListSheetsParams {
    /// The ID of the spreadsheet (found in its URL)
    pub spreadsheet_id: String,
}

pub async fn create_sheet(
    context: &ServiceContext,
    params: CreateSheetParams,
) -> Result<CreatedSheet, ToolError> {
    let spreadsheet_id = validate_spreadsheet_id(&params.spreadsheet_id)?;
    let title = validate_sheet_title(&params.title)?;

    let properties = context
        .sheets()
        .add_sheet(spreadsheet_id, title)
        .await
        .map_err(|e| remote_failure("spreadsheets.batchUpdate", Some(spreadsheet_id), None, e))?;

    Ok(CreatedSheet {
        sheet_id: properties.sheet_id,
        title: properties.title,
        index: properties.index,
        spreadsheet_id: spreadsheet_id.to_string(),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateSheetParams {
    /// The ID of the spreadsheet (found in its URL)
    pub spreadsheet_id: String,
    /// Title for the new sheet (tab)
    pub title: String,
}

pub fn health_check() -> HealthCheckResponse {
    HealthCheckResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}
