use super::http::ApiClient;
use super::{ClientBuildError, RemoteError, SheetsApi};
use crate::auth::ResolvedCredential;
use crate::model::{SheetProperties, ValueRange};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const USER_ENTERED: (&str, &str) = ("valueInputOption", "USER_ENTERED");

pub struct SheetsService {
    api: ApiClient,
}

impl SheetsService {
    pub fn with_base_url(
        credential: Arc<ResolvedCredential>,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self {
            api: ApiClient::new("sheets", base_url, credential, timeout)?,
        })
    }
}

#[derive(Deserialize)]
struct SheetList {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    #[serde(default)]
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<Value>,
}

#[async_trait]
impl SheetsApi for SheetsService {
    async fn get_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<ValueRange, RemoteError> {
        let url = self.api.url(&[spreadsheet_id, "values", range]);
        self.api.send(self.api.request(Method::GET, url)).await
    }

    async fn get_spreadsheet(
        &self,
        spreadsheet_id: &str,
        ranges: &[String],
        include_grid_data: bool,
    ) -> Result<Value, RemoteError> {
        let mut query: Vec<(&str, &str)> = ranges.iter().map(|r| ("ranges", r.as_str())).collect();
        query.push((
            "includeGridData",
            if include_grid_data { "true" } else { "false" },
        ));
        let url = self.api.url(&[spreadsheet_id]);
        self.api
            .send(self.api.request(Method::GET, url).query(&query))
            .await
    }

    async fn get_sheet_properties(
        &self,
        spreadsheet_id: &str,
    ) -> Result<Vec<SheetProperties>, RemoteError> {
        let url = self.api.url(&[spreadsheet_id]);
        let list: SheetList = self
            .api
            .send(
                self.api
                    .request(Method::GET, url)
                    .query(&[("fields", "sheets.properties")]),
            )
            .await?;
        Ok(list.sheets.into_iter().map(|sheet| sheet.properties).collect())
    }

    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<Value>],
    ) -> Result<Value, RemoteError> {
        let url = self.api.url(&[spreadsheet_id, "values", range]);
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": values });
        self.api
            .send(
                self.api
                    .request(Method::PUT, url)
                    .query(&[USER_ENTERED])
                    .json(&body),
            )
            .await
    }

    async fn append_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<Value>],
    ) -> Result<Value, RemoteError> {
        let append = format!("{range}:append");
        let url = self.api.url(&[spreadsheet_id, "values", &append]);
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": values });
        self.api
            .send(
                self.api
                    .request(Method::POST, url)
                    .query(&[USER_ENTERED])
                    .json(&body),
            )
            .await
    }

    async fn add_sheet(
        &self,
        spreadsheet_id: &str,
        title: &str,
    ) -> Result<SheetProperties, RemoteError> {
        let batch = format!("{spreadsheet_id}:batchUpdate");
        let url = self.api.url(&[&batch]);
        let body = json!({ "requests": [{ "addSheet": { "properties": { "title": title } } }] });
        let response: BatchUpdateResponse = self
            .api
            .send(self.api.request(Method::POST, url).json(&body))
            .await?;

        let properties = response
            .replies
            .into_iter()
            .next()
            .and_then(|mut reply| reply.pointer_mut("/addSheet/properties").map(Value::take))
            .ok_or_else(|| RemoteError::Decode("batchUpdate reply has no addSheet properties".into()))?;
        serde_json::from_value(properties).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
