//! Service-account key passed inline as a base64 blob.

use crate::auth::{
    CredentialError, CredentialOrigin, CredentialSource, Grant, ResolvedCredential,
    ServiceAccountKey,
};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

#[derive(Debug)]
pub struct InlineServiceAccount {
    encoded: Option<String>,
    http: reqwest::Client,
}

impl InlineServiceAccount {
    pub fn new(encoded: Option<String>, http: reqwest::Client) -> Self {
        Self { encoded, http }
    }
}

#[async_trait]
impl CredentialSource for InlineServiceAccount {
    fn origin(&self) -> CredentialOrigin {
        CredentialOrigin::InlineServiceAccount
    }

    async fn load(&self) -> Result<ResolvedCredential, CredentialError> {
        // `base64` wraps its output at 76 columns; line breaks are not part of the payload.
        let encoded: String = self
            .encoded
            .as_deref()
            .unwrap_or_default()
            .split_ascii_whitespace()
            .collect();
        if encoded.is_empty() {
            return Err(CredentialError::NotConfigured);
        }

        let decoded = STANDARD
            .decode(&encoded)
            .map_err(|e| CredentialError::Decode(e.to_string()))?;
        let key = ServiceAccountKey::from_json(&decoded)?;

        tracing::info!(client_email = %key.client_email, "using inline service account");
        Ok(ResolvedCredential::new(
            self.origin(),
            Grant::ServiceAccount(key),
            None,
            self.http.clone(),
        ))
    }
}
