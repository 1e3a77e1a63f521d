//! Installed-app consent flow with a loopback redirect listener.
//!
//! The consent URL is written to the log; the operator opens it in a browser,
//! approves access, and Google redirects back to `http://localhost:<port>/`
//! with an authorization code that is then exchanged for tokens.

use crate::auth::oauth::{self, AUTH_URI};
use crate::auth::{
    AuthorizedUser, CredentialError, CredentialOrigin, CredentialSource, Grant,
    ResolvedCredential, SCOPES,
};
use crate::auth::credential::DEFAULT_TOKEN_URI;
use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::Deserialize;
use std::future::IntoFuture;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct InteractiveOAuth {
    client_secrets_path: PathBuf,
    token_path: PathBuf,
    timeout: Duration,
    http: reqwest::Client,
}

impl InteractiveOAuth {
    pub fn new(
        client_secrets_path: PathBuf,
        token_path: PathBuf,
        timeout: Duration,
        http: reqwest::Client,
    ) -> Self {
        Self {
            client_secrets_path,
            token_path,
            timeout,
            http,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default = "default_auth_uri")]
    auth_uri: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_auth_uri() -> String {
    AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientSecrets {
    fn load(bytes: &[u8]) -> Result<Self, CredentialError> {
        let file: ClientSecretsFile = serde_json::from_slice(bytes)
            .map_err(|e| CredentialError::Parse(format!("client secrets: {e}")))?;
        file.installed.or(file.web).ok_or_else(|| {
            CredentialError::Parse("client secrets need an 'installed' or 'web' section".into())
        })
    }
}

#[async_trait]
impl CredentialSource for InteractiveOAuth {
    fn origin(&self) -> CredentialOrigin {
        CredentialOrigin::InteractiveOAuth
    }

    async fn load(&self) -> Result<ResolvedCredential, CredentialError> {
        if !self.client_secrets_path.is_file() {
            return Err(CredentialError::NotConfigured);
        }
        let bytes = tokio::fs::read(&self.client_secrets_path)
            .await
            .map_err(|source| CredentialError::Io {
                path: self.client_secrets_path.clone(),
                source,
            })?;
        let secrets = ClientSecrets::load(&bytes)?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| CredentialError::Flow(format!("bind redirect listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| CredentialError::Flow(e.to_string()))?
            .port();
        let redirect_uri = format!("http://localhost:{port}/");
        let state = random_state();

        let consent_url = reqwest::Url::parse_with_params(
            &secrets.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("scope", SCOPES.join(" ").as_str()),
                ("state", state.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| CredentialError::Parse(format!("auth_uri: {e}")))?;

        tracing::warn!(
            url = %consent_url,
            timeout_secs = self.timeout.as_secs(),
            "authorization required: open this URL in a browser"
        );

        let code = wait_for_redirect(listener, state, self.timeout).await?;
        let response = oauth::exchange_code(
            &self.http,
            &secrets.token_uri,
            &secrets.client_id,
            &secrets.client_secret,
            &code,
            &redirect_uri,
        )
        .await?;

        let user = AuthorizedUser {
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            refresh_token: response.refresh_token.clone(),
            token_uri: secrets.token_uri,
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        };
        let credential = ResolvedCredential::new(
            self.origin(),
            Grant::AuthorizedUser(user),
            Some(response.into_access_token()),
            self.http.clone(),
        );
        persist(&credential, &self.token_path);
        Ok(credential)
    }
}

/// Save the consented credential to the token cache; failure is only logged.
fn persist(credential: &ResolvedCredential, path: &Path) {
    let Some(stored) = credential.to_stored_token() else {
        return;
    };
    match stored.save(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "token cache updated"),
        Err(error) => tracing::warn!(
            path = %path.display(),
            error = %error,
            "failed to write token cache"
        ),
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Deserialize)]
struct RedirectParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type CodeSender = oneshot::Sender<Result<String, CredentialError>>;

#[derive(Clone)]
struct RedirectState {
    expected_state: Arc<str>,
    sender: Arc<parking_lot::Mutex<Option<CodeSender>>>,
}

async fn redirect_handler(
    State(state): State<RedirectState>,
    Query(params): Query<RedirectParams>,
) -> Html<&'static str> {
    let outcome = match params {
        RedirectParams {
            error: Some(error), ..
        } => Err(CredentialError::Flow(format!("consent denied: {error}"))),
        RedirectParams {
            state: Some(returned),
            code: Some(code),
            ..
        } if *returned == *state.expected_state => Ok(code),
        RedirectParams { code: Some(_), .. } => {
            Err(CredentialError::Flow("state parameter mismatch".into()))
        }
        _ => return Html("Waiting for authorization."),
    };

    let succeeded = outcome.is_ok();
    if let Some(sender) = state.sender.lock().take() {
        let _ = sender.send(outcome);
    }
    if succeeded {
        Html("Authorization complete. You can close this window.")
    } else {
        Html("Authorization failed. Check the server log.")
    }
}

/// Serve the redirect endpoint on `listener` until a code arrives or `timeout`
/// elapses.
pub async fn wait_for_redirect(
    listener: TcpListener,
    expected_state: String,
    timeout: Duration,
) -> Result<String, CredentialError> {
    let (tx, rx) = oneshot::channel();
    let app = Router::new()
        .route("/", get(redirect_handler))
        .with_state(RedirectState {
            expected_state: expected_state.into(),
            sender: Arc::new(parking_lot::Mutex::new(Some(tx))),
        });

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .into_future(),
    );

    let outcome = tokio::time::timeout(timeout, rx).await;
    cancel.cancel();
    let _ = server.await;

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(CredentialError::Flow("redirect listener closed".into())),
        Err(_) => Err(CredentialError::Timeout(timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StoredToken;
    use chrono::Utc;
    use tempfile::tempdir;

    async fn loopback() -> (TcpListener, u16) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn missing_client_secrets_is_not_configured() {
        let dir = tempdir().unwrap();
        let source = InteractiveOAuth::new(
            dir.path().join("credentials.json"),
            dir.path().join("token.json"),
            Duration::from_secs(1),
            reqwest::Client::new(),
        );
        assert!(source.load().await.unwrap_err().is_not_configured());
    }

    #[test]
    fn client_secrets_accept_installed_and_web() {
        let installed = br#"{"installed": {"client_id": "a", "client_secret": "b"}}"#;
        let web = br#"{"web": {"client_id": "c", "client_secret": "d", "token_uri": "https://t"}}"#;

        let parsed = ClientSecrets::load(installed).unwrap();
        assert_eq!(parsed.client_id, "a");
        assert_eq!(parsed.auth_uri, AUTH_URI);

        let parsed = ClientSecrets::load(web).unwrap();
        assert_eq!(parsed.token_uri, "https://t");

        assert!(ClientSecrets::load(br#"{"other": {}}"#).is_err());
    }

    #[tokio::test]
    async fn redirect_delivers_the_code() {
        let (listener, port) = loopback().await;
        let waiter = tokio::spawn(wait_for_redirect(
            listener,
            "xyz".into(),
            Duration::from_secs(10),
        ));

        let body = reqwest::get(format!("http://127.0.0.1:{port}/?state=xyz&code=4%2Fabc"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        assert!(body.contains("Authorization complete"));
        assert_eq!(waiter.await.unwrap().unwrap(), "4/abc");
    }

    #[tokio::test]
    async fn redirect_with_wrong_state_fails() {
        let (listener, port) = loopback().await;
        let waiter = tokio::spawn(wait_for_redirect(
            listener,
            "expected".into(),
            Duration::from_secs(10),
        ));

        reqwest::get(format!("http://127.0.0.1:{port}/?state=forged&code=abc"))
            .await
            .unwrap();

        assert!(matches!(
            waiter.await.unwrap(),
            Err(CredentialError::Flow(_))
        ));
    }

    #[tokio::test]
    async fn no_redirect_times_out() {
        let (listener, _) = loopback().await;
        let result = wait_for_redirect(listener, "s".into(), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CredentialError::Timeout(_))));
    }

    #[test]
    fn persist_round_trips_the_cache_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("token.json");
        let stored = StoredToken {
            token: Some("ya29.fresh".into()),
            refresh_token: Some("1//r".into()),
            token_uri: "https://oauth2.googleapis.com/token".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            scopes: vec!["https://www.googleapis.com/auth/drive".into()],
            expiry: Some((Utc::now() + chrono::Duration::hours(1)).to_rfc3339()),
            kind: None,
        };
        let credential = ResolvedCredential::new(
            CredentialOrigin::InteractiveOAuth,
            Grant::AuthorizedUser(stored.user()),
            stored.access_token().unwrap(),
            reqwest::Client::new(),
        );

        persist(&credential, &path);

        let reloaded = StoredToken::load(&path).unwrap();
        assert_eq!(reloaded.token.as_deref(), Some("ya29.fresh"));
        assert_eq!(reloaded.refresh_token.as_deref(), Some("1//r"));
        assert_eq!(reloaded.kind.as_deref(), Some("authorized_user"));
        assert!(!reloaded.access_token().unwrap().unwrap().is_expired_at(Utc::now()));
    }
}
