//! User authorization cached from an earlier consent flow.

use crate::auth::{
    CredentialError, CredentialOrigin, CredentialSource, Grant, ResolvedCredential, StoredToken,
};
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug)]
pub struct CachedUserToken {
    path: PathBuf,
    http: reqwest::Client,
}

impl CachedUserToken {
    pub fn new(path: PathBuf, http: reqwest::Client) -> Self {
        Self { path, http }
    }
}

#[async_trait]
impl CredentialSource for CachedUserToken {
    fn origin(&self) -> CredentialOrigin {
        CredentialOrigin::CachedUserToken
    }

    async fn load(&self) -> Result<ResolvedCredential, CredentialError> {
        if !self.path.is_file() {
            return Err(CredentialError::NotConfigured);
        }

        let stored = StoredToken::load(&self.path)?;
        let credential = ResolvedCredential::new(
            self.origin(),
            Grant::AuthorizedUser(stored.user()),
            stored.access_token()?,
            self.http.clone(),
        );

        if credential.is_valid() {
            tracing::info!(path = %self.path.display(), "using cached user token");
            return Ok(credential);
        }
        if !credential.is_refreshable() {
            return Err(CredentialError::Expired);
        }

        tracing::info!(path = %self.path.display(), "cached user token expired, refreshing");
        credential
            .refresh()
            .await
            .map_err(|e| CredentialError::Refresh(e.to_string()))?;
        Ok(credential)
    }
}
