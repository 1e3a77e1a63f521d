//! Token endpoint exchanges for each supported grant type.

use super::CredentialError;
use super::credential::{AccessToken, AuthorizedUser, ServiceAccountKey};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};

pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const METADATA_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn into_access_token(self) -> AccessToken {
        let expires_at = self
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        AccessToken::new(self.access_token, expires_at)
    }
}

/// Signed RS256 assertion for the service-account JWT bearer grant.
pub fn build_assertion(key: &ServiceAccountKey, scopes: &[&str]) -> Result<String, CredentialError> {
    let iat = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: scopes.join(" "),
        aud: &key.token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    jsonwebtoken::encode(&header, &claims, key.signing_key())
        .map_err(|e| CredentialError::InvalidKey(e.to_string()))
}

pub async fn exchange_jwt(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
    scopes: &[&str],
) -> Result<AccessToken, CredentialError> {
    let assertion = build_assertion(key, scopes)?;
    let response = post_token_form(
        http,
        &key.token_uri,
        &[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)],
    )
    .await?;
    Ok(response.into_access_token())
}

pub async fn refresh_user_token(
    http: &reqwest::Client,
    user: &AuthorizedUser,
) -> Result<AccessToken, CredentialError> {
    let refresh_token = user
        .refresh_token
        .as_deref()
        .ok_or(CredentialError::Expired)?;
    let response = post_token_form(
        http,
        &user.token_uri,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", &user.client_id),
            ("client_secret", &user.client_secret),
            ("refresh_token", refresh_token),
        ],
    )
    .await
    .map_err(|e| CredentialError::Refresh(e.to_string()))?;
    Ok(response.into_access_token())
}

/// Trade an authorization code for tokens (the last step of the consent flow).
pub async fn exchange_code(
    http: &reqwest::Client,
    token_uri: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, CredentialError> {
    post_token_form(
        http,
        token_uri,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
        ],
    )
    .await
}

pub async fn fetch_metadata_token(
    http: &reqwest::Client,
    base_url: &str,
    scopes: &[&str],
) -> Result<AccessToken, CredentialError> {
    let url = format!(
        "{}/computeMetadata/v1/instance/service-accounts/default/token",
        base_url.trim_end_matches('/')
    );
    let response = http
        .get(&url)
        .header("Metadata-Flavor", "Google")
        .timeout(METADATA_TIMEOUT)
        .query(&[("scopes", scopes.join(","))])
        .send()
        .await
        .map_err(|e| CredentialError::Refresh(format!("metadata server: {e}")))?;
    read_token_response(response).await.map(TokenResponse::into_access_token)
}

async fn post_token_form(
    http: &reqwest::Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, CredentialError> {
    let response = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .map_err(|e| CredentialError::TokenExchange {
            status: 0,
            body: e.to_string(),
        })?;
    read_token_response(response).await
}

async fn read_token_response(response: reqwest::Response) -> Result<TokenResponse, CredentialError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CredentialError::TokenExchange {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| CredentialError::Parse(format!("token response: {e}")))
}
