//! Application Default Credentials of the surrounding environment.

use crate::auth::oauth;
use crate::auth::{
    CredentialError, CredentialOrigin, CredentialSource, Grant, ResolvedCredential, SCOPES,
    credential_from_json,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const WELL_KNOWN_FILE: &str = "application_default_credentials.json";

#[derive(Debug)]
pub struct AmbientDefault {
    env_file: Option<PathBuf>,
    well_known_file: Option<PathBuf>,
    metadata_base: Option<String>,
    http: reqwest::Client,
}

impl AmbientDefault {
    pub fn new(
        env_file: Option<PathBuf>,
        well_known_file: Option<PathBuf>,
        metadata_base: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            env_file,
            well_known_file,
            metadata_base,
            http,
        }
    }

    /// Locations from `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud config
    /// directory and `GCE_METADATA_HOST`.
    pub fn from_env(http: reqwest::Client) -> Self {
        let env_file = non_empty_env("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from);
        let well_known_file = non_empty_env("CLOUDSDK_CONFIG")
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|dir| dir.join("gcloud")))
            .map(|dir| dir.join(WELL_KNOWN_FILE));
        let metadata_host =
            non_empty_env("GCE_METADATA_HOST").unwrap_or_else(|| DEFAULT_METADATA_HOST.into());

        Self::new(
            env_file,
            well_known_file,
            Some(format!("http://{metadata_host}")),
            http,
        )
    }

    async fn from_file(&self, path: &Path) -> Result<ResolvedCredential, CredentialError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| CredentialError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let credential = credential_from_json(&bytes, self.origin(), self.http.clone())?;
        tracing::info!(path = %path.display(), "using application default credentials file");
        Ok(credential)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[async_trait]
impl CredentialSource for AmbientDefault {
    fn origin(&self) -> CredentialOrigin {
        CredentialOrigin::AmbientDefault
    }

    async fn load(&self) -> Result<ResolvedCredential, CredentialError> {
        // An explicitly named file must load; it does not fall through.
        if let Some(path) = &self.env_file {
            return self.from_file(path).await;
        }
        if let Some(path) = self.well_known_file.as_deref().filter(|p| p.is_file()) {
            return self.from_file(path).await;
        }

        let Some(base_url) = &self.metadata_base else {
            return Err(CredentialError::NotConfigured);
        };
        match oauth::fetch_metadata_token(&self.http, base_url, SCOPES).await {
            Ok(token) => {
                tracing::info!(metadata = %base_url, "using compute metadata credentials");
                Ok(ResolvedCredential::new(
                    self.origin(),
                    Grant::Metadata {
                        base_url: base_url.clone(),
                    },
                    Some(token),
                    self.http.clone(),
                ))
            }
            Err(error) => {
                tracing::debug!(error = %error, "metadata server unavailable");
                Err(CredentialError::NotConfigured)
            }
        }
    }
}
