//! Service-account key file on disk.

use crate::auth::{
    CredentialError, CredentialOrigin, CredentialSource, Grant, ResolvedCredential,
    ServiceAccountKey,
};
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug)]
pub struct ServiceAccountFile {
    path: PathBuf,
    http: reqwest::Client,
}

impl ServiceAccountFile {
    pub fn new(path: PathBuf, http: reqwest::Client) -> Self {
        Self { path, http }
    }
}

#[async_trait]
impl CredentialSource for ServiceAccountFile {
    fn origin(&self) -> CredentialOrigin {
        CredentialOrigin::ServiceAccountFile
    }

    async fn load(&self) -> Result<ResolvedCredential, CredentialError> {
        if !self.path.is_file() {
            return Err(CredentialError::NotConfigured);
        }

        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| CredentialError::Io {
                path: self.path.clone(),
                source,
            })?;
        let key = ServiceAccountKey::from_json(&bytes)?;

        tracing::info!(
            path = %self.path.display(),
            client_email = %key.client_email,
            "using service account file"
        );
        Ok(ResolvedCredential::new(
            self.origin(),
            Grant::ServiceAccount(key),
            None,
            self.http.clone(),
        ))
    }
}
