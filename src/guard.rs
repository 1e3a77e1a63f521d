//! Shared-secret gate in front of the MCP HTTP routes.

use crate::config::ServerConfig;
use crate::metrics::METRICS;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub const API_KEY_HEADER: &str = "x-api-key";
const GENERATED_KEY_BYTES: usize = 32;

#[derive(Clone)]
pub struct AccessGuard {
    secret: Arc<str>,
    generated: bool,
}

impl fmt::Debug for AccessGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGuard")
            .field("secret", &"<redacted>")
            .field("generated", &self.generated)
            .finish()
    }
}

impl AccessGuard {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self {
            secret: secret.into(),
            generated: false,
        }
    }

    /// A fresh random secret, for when none was configured.
    pub fn generate() -> Self {
        let mut bytes = [0u8; GENERATED_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            secret: URL_SAFE_NO_PAD.encode(bytes).into(),
            generated: true,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        match config.api_key.as_deref() {
            Some(secret) => Self::new(secret),
            None => {
                let guard = Self::generate();
                tracing::warn!(
                    api_key = %guard.secret,
                    "no MCP_API_KEY configured; generated one for this run, clients must send it in the X-API-Key header"
                );
                guard
            }
        }
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Byte-for-byte comparison in constant time; empty never matches.
    pub fn check(&self, provided: &str) -> bool {
        if provided.is_empty() || self.secret.is_empty() {
            return false;
        }
        provided.as_bytes().ct_eq(self.secret.as_bytes()).into()
    }

    fn check_headers(&self, headers: &HeaderMap) -> bool {
        if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
            return self.check(key);
        }
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().strip_prefix("Bearer "))
            .is_some_and(|token| self.check(token.trim()))
    }
}

/// Middleware rejecting requests that don't carry the shared secret.
pub async fn require_api_key(
    State(guard): State<AccessGuard>,
    request: Request,
    next: Next,
) -> Response {
    if guard.check_headers(request.headers()) {
        return next.run(request).await;
    }

    METRICS.record_unauthorized();
    crate::log_security_event!(
        "access_denied",
        method = %request.method(),
        path = %request.uri().path(),
        has_api_key = request.headers().contains_key(API_KEY_HEADER),
        "rejected request without a valid API key"
    );
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "unauthorized" })),
    )
        .into_response()
}
