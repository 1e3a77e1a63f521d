//! Process-wide Google API context and its lifecycle.

use crate::auth::{CredentialResolver, ResolvedCredential, SourceAttempt};
use crate::config::ServerConfig;
use crate::google::{
    ClientBuildError, DRIVE_API_BASE, DriveApi, DriveService, SHEETS_API_BASE, SheetsApi,
    SheetsService,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Fatal failures while bringing the service context up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no credential source produced usable credentials ({})", summarize(attempts))]
    AllCredentialsExhausted { attempts: Vec<SourceAttempt> },
    #[error("failed to construct {service} client: {source}")]
    ServiceConstruction {
        service: &'static str,
        #[source]
        source: ClientBuildError,
    },
}

fn summarize(attempts: &[SourceAttempt]) -> String {
    if attempts.is_empty() {
        return "no sources configured".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Authenticated handles shared by every tool invocation.
pub struct ServiceContext {
    sheets: Arc<dyn SheetsApi>,
    drive: Arc<dyn DriveApi>,
    folder_id: Option<String>,
    credential: Option<Arc<ResolvedCredential>>,
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("folder_id", &self.folder_id)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    pub fn new(
        sheets: Arc<dyn SheetsApi>,
        drive: Arc<dyn DriveApi>,
        folder_id: Option<String>,
    ) -> Self {
        Self {
            sheets,
            drive,
            folder_id: folder_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Arc<ResolvedCredential>) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn sheets(&self) -> &dyn SheetsApi {
        self.sheets.as_ref()
    }

    pub fn drive(&self) -> &dyn DriveApi {
        self.drive.as_ref()
    }

    /// Working folder that scopes spreadsheet creation and listing.
    pub fn folder_id(&self) -> Option<&str> {
        self.folder_id.as_deref()
    }

    pub fn credential(&self) -> Option<&Arc<ResolvedCredential>> {
        self.credential.as_ref()
    }
}

/// Base URLs the Sheets and Drive handles are built against.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    pub sheets: String,
    pub drive: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            sheets: SHEETS_API_BASE.to_string(),
            drive: DRIVE_API_BASE.to_string(),
        }
    }
}

/// Logs teardown when dropped, whichever way acquisition or the server ended.
struct Teardown;

impl Drop for Teardown {
    fn drop(&mut self) {
        tracing::info!("cleaning up Google API services");
    }
}

/// Owns the [`ServiceContext`] from startup until the process shuts down.
pub struct ServiceLifespan {
    context: Arc<ServiceContext>,
    _teardown: Teardown,
}

impl fmt::Debug for ServiceLifespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLifespan")
            .field("context", &self.context)
            .finish()
    }
}

impl ServiceLifespan {
    /// Resolve credentials through the standard chain and build both API handles.
    pub async fn acquire(config: &ServerConfig) -> Result<Self, StartupError> {
        let teardown = Teardown;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StartupError::ServiceConstruction {
                service: "oauth",
                source: ClientBuildError::Http(e),
            })?;
        let resolver = CredentialResolver::from_config(config, http);
        Self::acquire_inner(config, &resolver, &ApiEndpoints::default(), teardown).await
    }

    pub async fn acquire_with(
        config: &ServerConfig,
        resolver: &CredentialResolver,
    ) -> Result<Self, StartupError> {
        Self::acquire_with_endpoints(config, resolver, &ApiEndpoints::default()).await
    }

    /// Like [`acquire_with`](Self::acquire_with), against explicit API base URLs.
    pub async fn acquire_with_endpoints(
        config: &ServerConfig,
        resolver: &CredentialResolver,
        endpoints: &ApiEndpoints,
    ) -> Result<Self, StartupError> {
        Self::acquire_inner(config, resolver, endpoints, Teardown).await
    }

    async fn acquire_inner(
        config: &ServerConfig,
        resolver: &CredentialResolver,
        endpoints: &ApiEndpoints,
        teardown: Teardown,
    ) -> Result<Self, StartupError> {
        tracing::info!("initializing Google API services");
        let credential = Arc::new(resolver.resolve().await?);

        let sheets =
            SheetsService::with_base_url(credential.clone(), &endpoints.sheets, config.request_timeout)
                .map_err(|source| StartupError::ServiceConstruction {
                    service: "sheets",
                    source,
                })?;
        let drive =
            DriveService::with_base_url(credential.clone(), &endpoints.drive, config.request_timeout)
                .map_err(|source| StartupError::ServiceConstruction {
                    service: "drive",
                    source,
                })?;

        let context = ServiceContext::new(
            Arc::new(sheets),
            Arc::new(drive),
            config.drive_folder_id.clone(),
        )
        .with_credential(credential);

        tracing::info!(
            folder = context.folder_id().unwrap_or("root"),
            "Google API services ready"
        );
        Ok(Self {
            context: Arc::new(context),
            _teardown: teardown,
        })
    }

    pub fn context(&self) -> Arc<ServiceContext> {
        self.context.clone()
    }
}
