//! Authenticated handles for the Google Sheets v4 and Drive v3 REST APIs.
//!
//! Tools depend on the [`SheetsApi`] and [`DriveApi`] traits only, so the
//! reqwest-backed services here can be swapped for in-memory fakes.

mod drive;
mod http;
mod sheets;

pub use drive::{DRIVE_API_BASE, DriveService};
pub use sheets::{SHEETS_API_BASE, SheetsService};

use crate::auth::CredentialError;
use crate::model::{DriveFile, NewFile, SheetProperties, ValueRange};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// Failure talking to a Google API.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP {status}{}: {message}", code.as_deref().map(|c| format!(" {c}")).unwrap_or_default())]
    Status {
        status: u16,
        /// Google's canonical status (`NOT_FOUND`, `RESOURCE_EXHAUSTED`, ...)
        code: Option<String>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication failed: {0}")]
    Auth(#[from] CredentialError),
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Quota and rate-limit rejections, whichever status Google chose for them.
    pub fn is_quota(&self) -> bool {
        match self {
            RemoteError::Status { status: 429, .. } => true,
            RemoteError::Status { code, message, .. } => {
                code.as_deref() == Some("RESOURCE_EXHAUSTED") || {
                    let lowered = message.to_ascii_lowercase();
                    lowered.contains("quota") || lowered.contains("rate limit")
                }
            }
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid base URL '{url}': {reason}")]
    BaseUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn get_values(&self, spreadsheet_id: &str, range: &str)
    -> Result<ValueRange, RemoteError>;

    /// Full spreadsheet resource with grid data for `ranges`.
    async fn get_spreadsheet(
        &self,
        spreadsheet_id: &str,
        ranges: &[String],
        include_grid_data: bool,
    ) -> Result<Value, RemoteError>;

    async fn get_sheet_properties(
        &self,
        spreadsheet_id: &str,
    ) -> Result<Vec<SheetProperties>, RemoteError>;

    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<Value>],
    ) -> Result<Value, RemoteError>;

    async fn append_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<Value>],
    ) -> Result<Value, RemoteError>;

    async fn add_sheet(
        &self,
        spreadsheet_id: &str,
        title: &str,
    ) -> Result<SheetProperties, RemoteError>;
}

#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn create_file(&self, file: &NewFile) -> Result<DriveFile, RemoteError>;

    /// Every file matching `query`, across all result pages.
    async fn list_files(&self, query: &str, order_by: &str)
    -> Result<Vec<DriveFile>, RemoteError>;
}
