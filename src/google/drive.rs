use super::http::ApiClient;
use super::{ClientBuildError, DriveApi, RemoteError};
use crate::auth::ResolvedCredential;
use crate::model::{DriveFile, NewFile};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3/files";
const PAGE_SIZE: &str = "1000";

pub struct DriveService {
    api: ApiClient,
}

impl DriveService {
    pub fn with_base_url(
        credential: Arc<ResolvedCredential>,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self {
            api: ApiClient::new("drive", base_url, credential, timeout)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[async_trait]
impl DriveApi for DriveService {
    async fn create_file(&self, file: &NewFile) -> Result<DriveFile, RemoteError> {
        let url = self.api.url(&[]);
        self.api
            .send(
                self.api
                    .request(Method::POST, url)
                    .query(&[("supportsAllDrives", "true"), ("fields", "id,name,parents")])
                    .json(file),
            )
            .await
    }

    async fn list_files(
        &self,
        query: &str,
        order_by: &str,
    ) -> Result<Vec<DriveFile>, RemoteError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query),
                ("spaces", "drive"),
                ("includeItemsFromAllDrives", "true"),
                ("supportsAllDrives", "true"),
                ("fields", "nextPageToken,files(id,name)"),
                ("orderBy", order_by),
                ("pageSize", PAGE_SIZE),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let page: FileList = self
                .api
                .send(self.api.request(Method::GET, self.api.url(&[])).query(&params))
                .await?;
            files.extend(page.files);

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(files)
    }
}
