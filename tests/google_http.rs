use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header::AUTHORIZATION};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use google_sheets_mcp::ServiceContext;
use google_sheets_mcp::auth::{AccessToken, CredentialOrigin, ResolvedCredential};
use google_sheets_mcp::google::{DriveApi, DriveService, RemoteError, SheetsApi, SheetsService};
use google_sheets_mcp::model::NewFile;
use google_sheets_mcp::tools::{self, CreateSheetParams, ListSheetsParams};
use parking_lot::Mutex;
use serde_json::{Value, json};

mod support;
use support::spawn_server;

const TOKEN: &str = "test-token";

#[derive(Clone, Default)]
struct FakeGoogle {
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeGoogle {
    fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

fn google_error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

async fn record_and_authorize(
    State(google): State<FakeGoogle>,
    request: Request,
    next: Next,
) -> Response {
    google
        .requests
        .lock()
        .push(format!("{} {}", request.method(), request.uri()));
    let expected = format!("Bearer {TOKEN}");
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if bearer != Some(expected.as_str()) {
        return google_error(
            StatusCode::UNAUTHORIZED,
            json!({"error": {
                "code": 401,
                "message": "Request had invalid authentication credentials.",
                "status": "UNAUTHENTICATED"
            }}),
        );
    }
    next.run(request).await
}

async fn get_values(Path((_id, range)): Path<(String, String)>) -> Response {
    Json(json!({
        "range": range,
        "majorDimension": "ROWS",
        "values": [["Name", "Qty"], ["Apples", "3"]]
    }))
    .into_response()
}

async fn put_values(
    Path((id, range)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    if query.get("valueInputOption").map(String::as_str) != Some("USER_ENTERED") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json(json!({
        "spreadsheetId": id,
        "updatedRange": range,
        "updatedRows": body["values"].as_array().map_or(0, Vec::len),
    }))
    .into_response()
}

async fn append_values(
    Path((id, range)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let Some(sheet) = range.strip_suffix(":append") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    Json(json!({
        "spreadsheetId": id,
        "tableRange": format!("{sheet}!A1:B2"),
        "updates": { "updatedRows": body["values"].as_array().map_or(0, Vec::len) }
    }))
    .into_response()
}

async fn get_spreadsheet(
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match id.as_str() {
        "missing" => google_error(
            StatusCode::NOT_FOUND,
            json!({"error": {
                "code": 404,
                "message": "Requested entity was not found.",
                "status": "NOT_FOUND"
            }}),
        ),
        "busy" => google_error(
            StatusCode::FORBIDDEN,
            json!({"error": {
                "code": 403,
                "message": "Rate Limit Exceeded",
                "errors": [{ "reason": "rateLimitExceeded" }]
            }}),
        ),
        _ if query.get("fields").map(String::as_str) == Some("sheets.properties") => Json(json!({
            "sheets": [
                { "properties": { "sheetId": 0, "title": "Summary", "index": 0 } },
                { "properties": { "sheetId": 7, "title": "Data", "index": 1 } }
            ]
        }))
        .into_response(),
        _ => Json(json!({ "spreadsheetId": id, "echo": query })).into_response(),
    }
}

async fn batch_update(Path(target): Path<String>, Json(body): Json<Value>) -> Response {
    let Some(id) = target.strip_suffix(":batchUpdate") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let title = body["requests"][0]["addSheet"]["properties"]["title"].clone();
    let unplaced = title == "Unplaced";
    let mut properties = json!({
        "sheetId": 99,
        "title": title,
        "index": 2,
        "sheetType": "GRID"
    });
    // Some replies leave the position out entirely.
    if let (true, Some(fields)) = (unplaced, properties.as_object_mut()) {
        fields.remove("index");
    }
    Json(json!({
        "spreadsheetId": id,
        "replies": [{ "addSheet": { "properties": properties }}]
    }))
    .into_response()
}

async fn list_files(Query(query): Query<HashMap<String, String>>) -> Response {
    if query.get("orderBy").map(String::as_str) != Some("modifiedTime desc") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match query.get("pageToken").map(String::as_str) {
        None => Json(json!({
            "files": [
                { "id": "file-1", "name": "First" },
                { "id": "file-2", "name": "Second" }
            ],
            "nextPageToken": "page-2"
        }))
        .into_response(),
        Some("page-2") => Json(json!({ "files": [{ "id": "file-3", "name": "Third" }] }))
            .into_response(),
        Some(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn create_file(Json(body): Json<Value>) -> Response {
    Json(json!({
        "id": "created-id",
        "name": body["name"],
        "parents": body.get("parents").cloned().unwrap_or_else(|| json!(["root-folder"])),
    }))
    .into_response()
}

fn router(google: FakeGoogle) -> Router {
    Router::new()
        .route(
            "/v4/spreadsheets/{id}/values/{range}",
            get(get_values).put(put_values).post(append_values),
        )
        .route("/v4/spreadsheets/{id}", get(get_spreadsheet).post(batch_update))
        .route("/drive/v3/files", get(list_files).post(create_file))
        .layer(middleware::from_fn_with_state(google.clone(), record_and_authorize))
}

fn credential(token: &str) -> Arc<ResolvedCredential> {
    Arc::new(ResolvedCredential::from_access_token(
        CredentialOrigin::AmbientDefault,
        AccessToken::new(token, None),
    ))
}

struct Harness {
    google: FakeGoogle,
    sheets: SheetsService,
    drive: DriveService,
}

async fn harness_with_token(token: &str) -> Harness {
    let google = FakeGoogle::default();
    let addr = spawn_server(router(google.clone())).await;
    let timeout = Duration::from_secs(5);
    let sheets = SheetsService::with_base_url(
        credential(token),
        &format!("http://{addr}/v4/spreadsheets"),
        timeout,
    )
    .expect("sheets client");
    let drive = DriveService::with_base_url(
        credential(token),
        &format!("http://{addr}/drive/v3/files"),
        timeout,
    )
    .expect("drive client");
    Harness {
        google,
        sheets,
        drive,
    }
}

async fn harness() -> Harness {
    harness_with_token(TOKEN).await
}

#[tokio::test]
async fn get_values_addresses_range_as_one_segment() {
    let h = harness().await;

    let values = h.sheets.get_values("sheet-123", "My Sheet!A1:B2").await.unwrap();

    assert_eq!(values.range, "My Sheet!A1:B2");
    assert_eq!(values.values.len(), 2);
    assert_eq!(values.values[1][0], "Apples");
    let requests = h.google.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("GET /v4/spreadsheets/sheet-123/values/My%20Sheet!A1:B2"));
}

#[tokio::test]
async fn writes_use_user_entered_input() {
    let h = harness().await;
    let rows = vec![vec![json!("=SUM(A1:A2)"), json!(4)]];

    let updated = h.sheets.update_values("sheet-123", "Sheet1!C1:D1", &rows).await.unwrap();
    assert_eq!(updated["updatedRange"], "Sheet1!C1:D1");
    assert_eq!(updated["updatedRows"], 1);

    let appended = h.sheets.append_values("sheet-123", "Sheet1", &rows).await.unwrap();
    assert_eq!(appended["tableRange"], "Sheet1!A1:B2");

    let requests = h.google.requests();
    assert!(requests[0].starts_with("PUT /v4/spreadsheets/sheet-123/values/Sheet1!C1:D1?"));
    assert!(requests[1].starts_with("POST /v4/spreadsheets/sheet-123/values/Sheet1:append?"));
    assert!(requests.iter().all(|r| r.contains("valueInputOption=USER_ENTERED")));
}

#[tokio::test]
async fn sheet_properties_keep_display_order() {
    let h = harness().await;

    let tabs = h.sheets.get_sheet_properties("sheet-123").await.unwrap();

    let titles: Vec<_> = tabs.iter().map(|tab| tab.title.as_str()).collect();
    assert_eq!(titles, ["Summary", "Data"]);
    assert_eq!(tabs[1].sheet_id, 7);
    assert!(h.google.requests()[0].contains("fields=sheets.properties"));
}

#[tokio::test]
async fn grid_request_passes_ranges_and_flag() {
    let h = harness().await;

    let grid = h
        .sheets
        .get_spreadsheet("sheet-123", &["Sheet1!A1:B2".to_string()], true)
        .await
        .unwrap();

    assert_eq!(grid["echo"]["ranges"], "Sheet1!A1:B2");
    assert_eq!(grid["echo"]["includeGridData"], "true");
}

#[tokio::test]
async fn add_sheet_reads_batch_update_reply() {
    let h = harness().await;

    let properties = h.sheets.add_sheet("sheet-123", "Archive").await.unwrap();

    assert_eq!(properties.sheet_id, 99);
    assert_eq!(properties.title, "Archive");
    assert_eq!(properties.index, Some(2));
    assert_eq!(
        h.google.requests(),
        vec!["POST /v4/spreadsheets/sheet-123:batchUpdate".to_string()]
    );
}

#[tokio::test]
async fn drive_listing_follows_page_tokens() {
    let h = harness().await;

    let files = h
        .drive
        .list_files(&tools::spreadsheet_query(None), "modifiedTime desc")
        .await
        .unwrap();

    let ids: Vec<_> = files.iter().map(|file| file.id.as_str()).collect();
    assert_eq!(ids, ["file-1", "file-2", "file-3"]);
    let requests = h.google.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].contains("pageToken"));
    assert!(requests[1].contains("pageToken=page-2"));
    assert!(requests.iter().all(|r| r.contains("pageSize=1000")));
    assert!(requests.iter().all(|r| r.contains("supportsAllDrives=true")));
}

#[tokio::test]
async fn drive_create_sends_parents() {
    let h = harness().await;

    let file = h
        .drive
        .create_file(&NewFile {
            name: "Budget".into(),
            mime_type: "application/vnd.google-apps.spreadsheet".into(),
            parents: vec!["folder-9".into()],
        })
        .await
        .unwrap();

    assert_eq!(file.id, "created-id");
    assert_eq!(file.name, "Budget");
    assert_eq!(file.parents, vec!["folder-9".to_string()]);
    assert!(h.google.requests()[0].starts_with("POST /drive/v3/files?"));
}

#[tokio::test]
async fn google_error_envelopes_become_status_errors() {
    let h = harness().await;

    let missing = h.sheets.get_sheet_properties("missing").await.unwrap_err();
    assert_matches!(&missing, RemoteError::Status { status: 404, code: Some(code), message } => {
        assert_eq!(code, "NOT_FOUND");
        assert_eq!(message, "Requested entity was not found.");
    });

    let busy = h.sheets.get_sheet_properties("busy").await.unwrap_err();
    assert_eq!(busy.status(), Some(403));
    assert!(busy.is_quota());
}

#[tokio::test]
async fn rejected_bearer_token_is_reported() {
    let h = harness_with_token("stale-token").await;

    let error = h.drive.list_files("trashed = false", "modifiedTime desc").await.unwrap_err();

    assert_matches!(error, RemoteError::Status { status: 401, code: Some(code), .. } => {
        assert_eq!(code, "UNAUTHENTICATED");
    });
}

#[tokio::test]
async fn tools_run_end_to_end_over_http() {
    let h = harness().await;
    let context = ServiceContext::new(Arc::new(h.sheets), Arc::new(h.drive), None);

    let tabs = tools::list_sheets(
        &context,
        ListSheetsParams {
            spreadsheet_id: "sheet-123".into(),
        },
    )
    .await
    .unwrap();

    assert_eq!(tabs, vec!["Summary", "Data"]);
}

#[tokio::test]
async fn created_sheet_without_index_reports_null() {
    let h = harness().await;
    let context = ServiceContext::new(Arc::new(h.sheets), Arc::new(h.drive), None);

    let created = tools::create_sheet(
        &context,
        CreateSheetParams {
            spreadsheet_id: "sheet-123".into(),
            title: "Unplaced".into(),
        },
    )
    .await
    .unwrap();

    assert_eq!(created.index, None);
    assert_eq!(serde_json::to_value(&created).unwrap()["index"], Value::Null);
}
