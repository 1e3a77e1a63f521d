#![allow(dead_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use google_sheets_mcp::auth::{
    AccessToken, CredentialError, CredentialOrigin, CredentialSource, ResolvedCredential,
};
use google_sheets_mcp::google::{DriveApi, RemoteError, SheetsApi};
use google_sheets_mcp::model::{DriveFile, NewFile, SheetProperties, ValueRange};
use google_sheets_mcp::{ServerConfig, ServiceContext};
use parking_lot::Mutex;
use serde_json::{Value, json};

pub const SPREADSHEET_ID: &str = "1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms";

/// One call made against a fake API, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetValues { spreadsheet_id: String, range: String },
    GetSpreadsheet { spreadsheet_id: String, ranges: Vec<String>, include_grid_data: bool },
    GetSheetProperties { spreadsheet_id: String },
    UpdateValues { spreadsheet_id: String, range: String, rows: usize },
    AppendValues { spreadsheet_id: String, range: String, rows: usize },
    AddSheet { spreadsheet_id: String, title: String },
    CreateFile(NewFile),
    ListFiles { query: String, order_by: String },
}

fn not_found() -> RemoteError {
    RemoteError::Status {
        status: 404,
        code: Some("NOT_FOUND".to_string()),
        message: "Requested entity was not found.".to_string(),
    }
}

/// In-memory Sheets API recording every call.
#[derive(Default)]
pub struct FakeSheets {
    calls: Mutex<Vec<Call>>,
    values: Mutex<Vec<Vec<Value>>>,
    tabs: Mutex<Vec<SheetProperties>>,
    missing: Mutex<bool>,
}

impl FakeSheets {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_values(self: Arc<Self>, values: Vec<Vec<Value>>) -> Arc<Self> {
        *self.values.lock() = values;
        self
    }

    pub fn with_tabs(self: Arc<Self>, titles: &[&str]) -> Arc<Self> {
        *self.tabs.lock() = titles
            .iter()
            .enumerate()
            .map(|(index, title)| SheetProperties {
                sheet_id: index as i64 * 1000,
                title: title.to_string(),
                index: Some(index as i64),
            })
            .collect();
        self
    }

    /// Every call fails with a 404, as for an unknown spreadsheet.
    pub fn missing(self: Arc<Self>) -> Arc<Self> {
        *self.missing.lock() = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, call: Call) -> Result<(), RemoteError> {
        self.calls.lock().push(call);
        if *self.missing.lock() {
            return Err(not_found());
        }
        Ok(())
    }
}

#[async_trait]
impl SheetsApi for FakeSheets {
    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<ValueRange, RemoteError> {
        self.record(Call::GetValues {
            spreadsheet_id: spreadsheet_id.to_string(),
            range: range.to_string(),
        })?;
        Ok(ValueRange {
            range: format!("'{range}'"),
            major_dimension: Some("ROWS".to_string()),
            values: self.values.lock().clone(),
        })
    }

    async fn get_spreadsheet(
        &self,
        spreadsheet_id: &str,
        ranges: &[String],
        include_grid_data: bool,
    ) -> Result<Value, RemoteError> {
        self.record(Call::GetSpreadsheet {
            spreadsheet_id: spreadsheet_id.to_string(),
            ranges: ranges.to_vec(),
            include_grid_data,
        })?;
        Ok(json!({
            "spreadsheetId": spreadsheet_id,
            "sheets": [{
                "properties": { "title": "Sheet1" },
                "data": [{ "rowData": [{ "values": [{ "formattedValue": "a" }] }] }]
            }]
        }))
    }

    async fn get_sheet_properties(
        &self,
        spreadsheet_id: &str,
    ) -> Result<Vec<SheetProperties>, RemoteError> {
        self.record(Call::GetSheetProperties {
            spreadsheet_id: spreadsheet_id.to_string(),
        })?;
        Ok(self.tabs.lock().clone())
    }

    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<Value>],
    ) -> Result<Value, RemoteError> {
        self.record(Call::UpdateValues {
            spreadsheet_id: spreadsheet_id.to_string(),
            range: range.to_string(),
            rows: values.len(),
        })?;
        Ok(json!({
            "spreadsheetId": spreadsheet_id,
            "updatedRange": range,
            "updatedRows": values.len(),
        }))
    }

    async fn append_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<Value>],
    ) -> Result<Value, RemoteError> {
        self.record(Call::AppendValues {
            spreadsheet_id: spreadsheet_id.to_string(),
            range: range.to_string(),
            rows: values.len(),
        })?;
        Ok(json!({
            "spreadsheetId": spreadsheet_id,
            "tableRange": format!("{range}!A1:C3"),
            "updates": { "updatedRows": values.len() },
        }))
    }

    async fn add_sheet(&self, spreadsheet_id: &str, title: &str) -> Result<SheetProperties, RemoteError> {
        self.record(Call::AddSheet {
            spreadsheet_id: spreadsheet_id.to_string(),
            title: title.to_string(),
        })?;
        let mut tabs = self.tabs.lock();
        let properties = SheetProperties {
            sheet_id: 424242,
            title: title.to_string(),
            index: Some(tabs.len() as i64),
        };
        tabs.push(properties.clone());
        Ok(properties)
    }
}

/// In-memory Drive API recording every call.
#[derive(Default)]
pub struct FakeDrive {
    calls: Mutex<Vec<Call>>,
    files: Mutex<Vec<DriveFile>>,
}

impl FakeDrive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_files(self: Arc<Self>, files: &[(&str, &str)]) -> Arc<Self> {
        *self.files.lock() = files
            .iter()
            .map(|(id, name)| DriveFile {
                id: id.to_string(),
                name: name.to_string(),
                parents: Vec::new(),
            })
            .collect();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DriveApi for FakeDrive {
    async fn create_file(&self, file: &NewFile) -> Result<DriveFile, RemoteError> {
        self.calls.lock().push(Call::CreateFile(file.clone()));
        Ok(DriveFile {
            id: "new-spreadsheet-id".to_string(),
            name: file.name.clone(),
            parents: file.parents.clone(),
        })
    }

    async fn list_files(&self, query: &str, order_by: &str) -> Result<Vec<DriveFile>, RemoteError> {
        self.calls.lock().push(Call::ListFiles {
            query: query.to_string(),
            order_by: order_by.to_string(),
        });
        Ok(self.files.lock().clone())
    }
}

pub fn context(
    sheets: &Arc<FakeSheets>,
    drive: &Arc<FakeDrive>,
    folder_id: Option<&str>,
) -> Arc<ServiceContext> {
    Arc::new(ServiceContext::new(
        sheets.clone(),
        drive.clone(),
        folder_id.map(str::to_string),
    ))
}

/// Configuration pointing every file-based credential source at a path
/// that does not exist.
pub fn isolated_config(dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        service_account_path: dir.join("missing-service-account.json"),
        credentials_path: dir.join("missing-credentials.json"),
        token_path: dir.join("missing-token.json"),
        ..ServerConfig::default()
    }
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    NotConfigured,
    Fail,
}

/// Credential source with a scripted outcome and a call counter.
pub struct FakeSource {
    origin: CredentialOrigin,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new(origin: CredentialOrigin, behavior: Behavior) -> (Box<dyn CredentialSource>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Self {
            origin,
            behavior,
            calls: calls.clone(),
        };
        (Box::new(source), calls)
    }
}

#[async_trait]
impl CredentialSource for FakeSource {
    fn origin(&self) -> CredentialOrigin {
        self.origin
    }

    async fn load(&self) -> Result<ResolvedCredential, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(ResolvedCredential::from_access_token(
                self.origin,
                AccessToken::new("fake-token", None),
            )),
            Behavior::NotConfigured => Err(CredentialError::NotConfigured),
            Behavior::Fail => Err(CredentialError::Parse("scripted failure".to_string())),
        }
    }
}

/// Log lines written while a [`LogCapture`] guard is installed on this thread.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's tracing output into a buffer until dropped.
pub struct LogCapture {
    buffer: LogBuffer,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogCapture {
    pub fn start() -> Self {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        Self {
            buffer,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    pub fn contents(&self) -> String {
        self.buffer.contents()
    }
}

/// Serve `router` on an ephemeral loopback port for the rest of the test.
pub async fn spawn_server(router: axum::Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Service-account fixture with its token endpoint replaced.
pub fn service_account_json(token_uri: Option<&str>) -> Vec<u8> {
    let raw = std::fs::read(fixture("service_account.json")).expect("service account fixture");
    let mut value: Value = serde_json::from_slice(&raw).expect("fixture JSON");
    if let Some(uri) = token_uri {
        value["token_uri"] = Value::String(uri.to_string());
    }
    serde_json::to_vec(&value).expect("serialize fixture")
}
