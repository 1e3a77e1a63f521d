//! Resolved Google credentials and the OAuth2 access tokens they mint.
//!
//! A [`ResolvedCredential`] is produced by exactly one credential source and
//! is shared by both API handles for the lifetime of the process. It caches a
//! single access token and refreshes it in place when it expires, provided
//! the underlying grant can mint a new one.

use super::oauth;
use super::{CredentialError, SCOPES};
use crate::metrics::METRICS;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::EncodingKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Tokens are treated as expired this long before their real expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Which credential source produced a [`ResolvedCredential`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialOrigin {
    InlineServiceAccount,
    ServiceAccountFile,
    CachedUserToken,
    InteractiveOAuth,
    AmbientDefault,
}

impl fmt::Display for CredentialOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialOrigin::InlineServiceAccount => write!(f, "inline_service_account"),
            CredentialOrigin::ServiceAccountFile => write!(f, "service_account_file"),
            CredentialOrigin::CachedUserToken => write!(f, "cached_user_token"),
            CredentialOrigin::InteractiveOAuth => write!(f, "interactive_oauth"),
            CredentialOrigin::AmbientDefault => write!(f, "ambient_default"),
        }
    }
}

/// A bearer token plus its expiry, if the issuer reported one.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// A token without an expiry never expires from our point of view.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expires_at| expires_at - Duration::seconds(EXPIRY_SKEW_SECS) <= now)
            .unwrap_or(false)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Parsed service-account key file (the JSON downloaded from the Cloud console).
#[derive(Clone)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key_id: Option<String>,
    pub project_id: Option<String>,
    pub token_uri: String,
    signing_key: EncodingKey,
}

#[derive(Deserialize)]
struct RawServiceAccountKey {
    #[serde(rename = "type")]
    kind: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
    private_key_id: Option<String>,
    project_id: Option<String>,
    token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_json(bytes: &[u8]) -> Result<Self, CredentialError> {
        let raw: RawServiceAccountKey = serde_json::from_slice(bytes)
            .map_err(|e| CredentialError::Parse(format!("service account JSON: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawServiceAccountKey) -> Result<Self, CredentialError> {
        match raw.kind.as_deref() {
            Some("service_account") => {}
            Some(other) => {
                return Err(CredentialError::Parse(format!(
                    "expected credential type 'service_account', found '{other}'"
                )));
            }
            None => {
                return Err(CredentialError::Parse(
                    "credential JSON has no 'type' field".to_string(),
                ));
            }
        }

        let client_email = raw
            .client_email
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| CredentialError::Parse("missing 'client_email'".to_string()))?;
        let private_key = raw
            .private_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CredentialError::Parse("missing 'private_key'".to_string()))?;
        let signing_key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;

        Ok(Self {
            client_email,
            private_key_id: raw.private_key_id,
            project_id: raw.project_id,
            token_uri: raw
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            signing_key,
        })
    }

    pub(crate) fn signing_key(&self) -> &EncodingKey {
        &self.signing_key
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// On-disk format of a cached user authorization.
///
/// Field names match the `authorized_user` JSON written by Google's client
/// libraries, so token files and gcloud ADC files are interchangeable.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl StoredToken {
    pub fn from_json(bytes: &[u8]) -> Result<Self, CredentialError> {
        serde_json::from_slice(bytes)
            .map_err(|e| CredentialError::Parse(format!("authorized user JSON: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let bytes = std::fs::read(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<(), CredentialError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CredentialError::Parse(format!("serialize token: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| CredentialError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, json).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn access_token(&self) -> Result<Option<AccessToken>, CredentialError> {
        let Some(secret) = self.token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let expires_at = match self.expiry.as_deref() {
            Some(raw) => Some(parse_expiry(raw)?),
            None => None,
        };
        Ok(Some(AccessToken::new(secret, expires_at)))
    }

    pub fn user(&self) -> AuthorizedUser {
        AuthorizedUser {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: self.refresh_token.clone().filter(|t| !t.is_empty()),
            token_uri: self.token_uri.clone(),
            scopes: if self.scopes.is_empty() {
                SCOPES.iter().map(|s| s.to_string()).collect()
            } else {
                self.scopes.clone()
            },
        }
    }

    pub fn from_parts(user: &AuthorizedUser, token: Option<&AccessToken>) -> Self {
        Self {
            token: token.map(|t| t.secret().to_string()),
            refresh_token: user.refresh_token.clone(),
            token_uri: user.token_uri.clone(),
            client_id: user.client_id.clone(),
            client_secret: user.client_secret.clone(),
            scopes: user.scopes.clone(),
            expiry: token
                .and_then(AccessToken::expires_at)
                .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
            kind: Some("authorized_user".to_string()),
        }
    }
}

fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, CredentialError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // Older token files carry a naive UTC timestamp without an offset.
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| CredentialError::Parse(format!("token expiry '{raw}': {e}")))
}

/// OAuth client identity plus the long-lived refresh token of a user grant.
#[derive(Clone)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub scopes: Vec<String>,
}

impl fmt::Debug for AuthorizedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedUser")
            .field("client_id", &self.client_id)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// How a credential obtains fresh access tokens.
#[derive(Debug, Clone)]
pub enum Grant {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
    /// Compute metadata server of the surrounding execution environment.
    Metadata { base_url: String },
    /// A bearer token handed to us as-is; cannot be refreshed.
    Static,
}

/// Opaque capability object shared by the Sheets and Drive handles.
pub struct ResolvedCredential {
    origin: CredentialOrigin,
    grant: Grant,
    http: reqwest::Client,
    token: RwLock<Option<AccessToken>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("origin", &self.origin)
            .field("grant", &self.grant)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl ResolvedCredential {
    pub fn new(
        origin: CredentialOrigin,
        grant: Grant,
        token: Option<AccessToken>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            origin,
            grant,
            http,
            token: RwLock::new(token),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Wrap a fixed bearer token; it is never refreshed.
    pub fn from_access_token(origin: CredentialOrigin, token: AccessToken) -> Self {
        Self::new(origin, Grant::Static, Some(token), reqwest::Client::new())
    }

    pub fn origin(&self) -> CredentialOrigin {
        self.origin
    }

    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    /// Holds an access token that has not expired.
    pub fn is_valid(&self) -> bool {
        self.token
            .read()
            .as_ref()
            .is_some_and(|token| !token.is_expired_at(Utc::now()))
    }

    /// Holds an access token whose expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.token
            .read()
            .as_ref()
            .is_some_and(|token| token.is_expired_at(Utc::now()))
    }

    /// Can mint a replacement token without user interaction.
    pub fn is_refreshable(&self) -> bool {
        match &self.grant {
            Grant::ServiceAccount(_) | Grant::Metadata { .. } => true,
            Grant::AuthorizedUser(user) => user.refresh_token.is_some(),
            Grant::Static => false,
        }
    }

    pub fn current_token(&self) -> Option<AccessToken> {
        self.token.read().clone()
    }

    /// Mint a new access token through the grant and store it in place.
    pub async fn refresh(&self) -> Result<(), CredentialError> {
        let outcome = self.mint().await;
        METRICS.record_credential_refresh(self.origin, outcome.is_ok());
        let token = outcome?;
        tracing::debug!(
            origin = %self.origin,
            expires_at = ?token.expires_at(),
            "access token refreshed"
        );
        *self.token.write() = Some(token);
        Ok(())
    }

    /// Return a usable bearer token, refreshing first when needed.
    ///
    /// Concurrent callers coalesce on a single refresh.
    pub async fn access_token(&self) -> Result<String, CredentialError> {
        if let Some(token) = self.valid_token() {
            return Ok(token);
        }
        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.valid_token() {
            return Ok(token);
        }
        if !self.is_refreshable() {
            return Err(CredentialError::Expired);
        }
        self.refresh().await?;
        self.valid_token().ok_or(CredentialError::Expired)
    }

    fn valid_token(&self) -> Option<String> {
        self.token
            .read()
            .as_ref()
            .filter(|token| !token.is_expired_at(Utc::now()))
            .map(|token| token.secret().to_string())
    }

    async fn mint(&self) -> Result<AccessToken, CredentialError> {
        match &self.grant {
            Grant::ServiceAccount(key) => oauth::exchange_jwt(&self.http, key, SCOPES).await,
            Grant::AuthorizedUser(user) => oauth::refresh_user_token(&self.http, user).await,
            Grant::Metadata { base_url } => {
                oauth::fetch_metadata_token(&self.http, base_url, SCOPES).await
            }
            Grant::Static => Err(CredentialError::Expired),
        }
    }

    /// Snapshot of a user grant in cache-file form, if this is a user credential.
    pub fn to_stored_token(&self) -> Option<StoredToken> {
        match &self.grant {
            Grant::AuthorizedUser(user) => {
                Some(StoredToken::from_parts(user, self.current_token().as_ref()))
            }
            _ => None,
        }
    }
}

/// Build a credential from a JSON credential file of any supported type.
pub fn credential_from_json(
    bytes: &[u8],
    origin: CredentialOrigin,
    http: reqwest::Client,
) -> Result<ResolvedCredential, CredentialError> {
    #[derive(Deserialize)]
    struct Probe {
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    let probe: Probe = serde_json::from_slice(bytes)
        .map_err(|e| CredentialError::Parse(format!("credential JSON: {e}")))?;
    match probe.kind.as_deref() {
        Some("service_account") => {
            let key = ServiceAccountKey::from_json(bytes)?;
            Ok(ResolvedCredential::new(
                origin,
                Grant::ServiceAccount(key),
                None,
                http,
            ))
        }
        Some("authorized_user") => {
            let stored = StoredToken::from_json(bytes)?;
            let token = stored.access_token()?;
            Ok(ResolvedCredential::new(
                origin,
                Grant::AuthorizedUser(stored.user()),
                token,
                http,
            ))
        }
        Some(other) => Err(CredentialError::Parse(format!(
            "unsupported credential type '{other}'"
        ))),
        None => Err(CredentialError::Parse(
            "credential JSON has no 'type' field".to_string(),
        )),
    }
}
