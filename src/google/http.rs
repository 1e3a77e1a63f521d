use super::{ClientBuildError, RemoteError};
use crate::auth::ResolvedCredential;
use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("google-sheets-mcp/", env!("CARGO_PKG_VERSION"));

/// Bearer-authenticated JSON client rooted at one API base URL.
pub(crate) struct ApiClient {
    service: &'static str,
    http: reqwest::Client,
    base: Url,
    credential: Arc<ResolvedCredential>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<GoogleErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

impl ApiClient {
    pub(crate) fn new(
        service: &'static str,
        base_url: &str,
        credential: Arc<ResolvedCredential>,
        timeout: Duration,
    ) -> Result<Self, ClientBuildError> {
        let base = Url::parse(base_url).map_err(|e| ClientBuildError::BaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ClientBuildError::BaseUrl {
                url: base_url.to_string(),
                reason: "URL cannot carry path segments".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            service,
            http,
            base,
            credential,
        })
    }

    /// Base URL with `segments` appended, each percent-encoded as one segment.
    pub(crate) fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url)
    }

    pub(crate) async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, RemoteError> {
        let token = self.credential.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = status_error(status.as_u16(), &body);
            tracing::debug!(service = self.service, status = status.as_u16(), error = %error, "API call failed");
            return Err(error);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

fn status_error(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => {
            let code = error
                .status
                .or_else(|| error.errors.into_iter().find_map(|detail| detail.reason));
            RemoteError::Status {
                status,
                code,
                message: error.message,
            }
        }
        Err(_) => RemoteError::Status {
            status,
            code: None,
            message: body.trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, CredentialOrigin};

    fn client(base: &str) -> Result<ApiClient, ClientBuildError> {
        let credential = Arc::new(ResolvedCredential::from_access_token(
            CredentialOrigin::AmbientDefault,
            AccessToken::new("t", None),
        ));
        ApiClient::new("sheets", base, credential, Duration::from_secs(5))
    }

    #[test]
    fn url_segments_are_encoded() {
        let api = client("https://sheets.googleapis.com/v4/spreadsheets").unwrap();
        let url = api.url(&["abc", "values", "My Sheet!A1:B2"]);
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/My%20Sheet!A1:B2"
        );
        assert_eq!(
            api.url(&["abc:batchUpdate"]).as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc:batchUpdate"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(
            client("not a url"),
            Err(ClientBuildError::BaseUrl { .. })
        ));
        assert!(matches!(
            client("mailto:someone@example.com"),
            Err(ClientBuildError::BaseUrl { .. })
        ));
    }

    #[test]
    fn google_error_bodies_are_parsed() {
        let body = r#"{"error": {"code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND"}}"#;
        let RemoteError::Status { status, code, message } = status_error(404, body) else {
            panic!("expected status error");
        };
        assert_eq!(status, 404);
        assert_eq!(code.as_deref(), Some("NOT_FOUND"));
        assert_eq!(message, "Requested entity was not found.");

        let legacy = r#"{"error": {"message": "Rate Limit Exceeded", "errors": [{"reason": "rateLimitExceeded"}]}}"#;
        let err = status_error(403, legacy);
        assert!(err.is_quota());

        let plain = status_error(502, "<html>Bad Gateway</html>");
        assert_eq!(plain.to_string(), "HTTP 502: <html>Bad Gateway</html>");
    }
}
