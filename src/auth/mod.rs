//! Credential acquisition.
//!
//! Credentials are resolved once at startup by walking a fixed, ordered list
//! of [`CredentialSource`]s and keeping the first one that produces a usable
//! [`ResolvedCredential`]. Sources that are simply not configured report
//! [`CredentialError::NotConfigured`] and are skipped quietly; any other error
//! is logged and the next source is tried.

pub mod credential;
pub mod oauth;
pub mod sources;

pub use credential::{
    AccessToken, AuthorizedUser, CredentialOrigin, Grant, ResolvedCredential, ServiceAccountKey,
    StoredToken, credential_from_json,
};

use crate::config::ServerConfig;
use crate::context::StartupError;
use crate::metrics::METRICS;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// OAuth scopes requested for every credential.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential source is not configured")]
    NotConfigured,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode credential blob: {0}")]
    Decode(String),
    #[error("failed to parse credential: {0}")]
    Parse(String),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("token endpoint returned {status}: {body}")]
    TokenExchange { status: u16, body: String },
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("access token expired and cannot be refreshed")]
    Expired,
    #[error("authorization flow failed: {0}")]
    Flow(String),
    #[error("timed out after {0}s waiting for authorization")]
    Timeout(u64),
}

impl CredentialError {
    pub fn is_not_configured(&self) -> bool {
        matches!(self, CredentialError::NotConfigured)
    }
}

/// One strategy for obtaining a credential.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn origin(&self) -> CredentialOrigin;

    /// Produce a usable credential, or explain why this source can't.
    async fn load(&self) -> Result<ResolvedCredential, CredentialError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Skipped,
    Failed(String),
}

/// What happened when a source was tried during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceAttempt {
    pub source: CredentialOrigin,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for SourceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Skipped => write!(f, "{}: not configured", self.source),
            AttemptOutcome::Failed(reason) => write!(f, "{}: {}", self.source, reason),
        }
    }
}

pub struct CredentialResolver {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|source| source.origin()))
            .finish()
    }
}

impl CredentialResolver {
    pub fn new(sources: Vec<Box<dyn CredentialSource>>) -> Self {
        Self { sources }
    }

    /// The standard chain: inline service account, service-account file,
    /// cached user token, interactive consent, ambient defaults.
    pub fn from_config(config: &ServerConfig, http: reqwest::Client) -> Self {
        Self::new(vec![
            Box::new(sources::InlineServiceAccount::new(
                config.credentials_config.clone(),
                http.clone(),
            )),
            Box::new(sources::ServiceAccountFile::new(
                config.service_account_path.clone(),
                http.clone(),
            )),
            Box::new(sources::CachedUserToken::new(
                config.token_path.clone(),
                http.clone(),
            )),
            Box::new(sources::InteractiveOAuth::new(
                config.credentials_path.clone(),
                config.token_path.clone(),
                config.oauth_flow_timeout,
                http.clone(),
            )),
            Box::new(sources::AmbientDefault::from_env(http)),
        ])
    }

    pub fn origins(&self) -> Vec<CredentialOrigin> {
        self.sources.iter().map(|source| source.origin()).collect()
    }

    /// Try each source in order and return the first credential obtained.
    pub async fn resolve(&self) -> Result<ResolvedCredential, StartupError> {
        let mut attempts = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let origin = source.origin();
            match source.load().await {
                Ok(credential) => {
                    tracing::info!(source = %origin, "credentials resolved");
                    METRICS.set_credential_origin(origin);
                    return Ok(credential);
                }
                Err(CredentialError::NotConfigured) => {
                    tracing::debug!(source = %origin, "credential source not configured");
                    attempts.push(SourceAttempt {
                        source: origin,
                        outcome: AttemptOutcome::Skipped,
                    });
                }
                Err(error) => {
                    tracing::warn!(source = %origin, error = %error, "credential source failed");
                    attempts.push(SourceAttempt {
                        source: origin,
                        outcome: AttemptOutcome::Failed(error.to_string()),
                    });
                }
            }
        }

        tracing::error!(attempted = attempts.len(), "all credential sources exhausted");
        Err(StartupError::AllCredentialsExhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        origin: CredentialOrigin,
        result: fn() -> Result<(), CredentialError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CredentialSource for Scripted {
        fn origin(&self) -> CredentialOrigin {
            self.origin
        }

        async fn load(&self) -> Result<ResolvedCredential, CredentialError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()?;
            Ok(ResolvedCredential::from_access_token(
                self.origin,
                AccessToken::new("token", None),
            ))
        }
    }

    #[tokio::test]
    async fn skipped_and_failed_sources_are_recorded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CredentialResolver::new(vec![
            Box::new(Scripted {
                origin: CredentialOrigin::InlineServiceAccount,
                result: || Err(CredentialError::NotConfigured),
                calls: calls.clone(),
            }),
            Box::new(Scripted {
                origin: CredentialOrigin::ServiceAccountFile,
                result: || Err(CredentialError::Parse("bad json".into())),
                calls: calls.clone(),
            }),
        ]);

        let err = resolver.resolve().await.unwrap_err();
        let StartupError::AllCredentialsExhausted { attempts } = err else {
            panic!("expected exhaustion, got {err:?}");
        };
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Skipped);
        assert_eq!(
            attempts[1].outcome,
            AttemptOutcome::Failed("failed to parse credential: bad json".into())
        );
    }

    #[tokio::test]
    async fn first_success_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CredentialResolver::new(vec![
            Box::new(Scripted {
                origin: CredentialOrigin::CachedUserToken,
                result: || Ok(()),
                calls: calls.clone(),
            }),
            Box::new(Scripted {
                origin: CredentialOrigin::AmbientDefault,
                result: || Ok(()),
                calls: calls.clone(),
            }),
        ]);

        let credential = resolver.resolve().await.unwrap();
        assert_eq!(credential.origin(), CredentialOrigin::CachedUserToken);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn standard_chain_order() {
        let config = ServerConfig::default();
        let resolver = CredentialResolver::from_config(&config, reqwest::Client::new());
        assert_eq!(
            resolver.origins(),
            vec![
                CredentialOrigin::InlineServiceAccount,
                CredentialOrigin::ServiceAccountFile,
                CredentialOrigin::CachedUserToken,
                CredentialOrigin::InteractiveOAuth,
                CredentialOrigin::AmbientDefault,
            ]
        );
    }
}
