use std::sync::Arc;

use idqp_core::domain::Credential;
use idqp_core::error::AppError;
use idqp_core::session::SessionStore;

use crate::api::QualityApi;
use crate::config::ClientConfig;
use crate::controllers::{DatasetController, IncidentController, OverviewController, RuleController};
use crate::http::{ApiClient, HealthStatus};

/// One operator console: a session, the transport bound to it, and a controller per screen.
///
/// All controllers share the same transport, so logging in or out is visible to every screen
/// on its next request.
pub struct QualityConsole {
    session: Arc<SessionStore>,
    client: ApiClient,
    pub datasets: DatasetController,
    pub rules: RuleController,
    pub incidents: IncidentController,
    pub overview: OverviewController,
}

impl QualityConsole {
    pub fn connect(config: &ClientConfig) -> Result<Self, AppError> {
        let config = config.clone().validated()?;
        let session = Arc::new(config.open_session()?);
        let client = ApiClient::new(&config, session.clone())?;
        tracing::info!(
            backend = client.base_url(),
            restored = session.is_authenticated(),
            "console connected"
        );
        Ok(Self::with_parts(session, client))
    }

    fn with_parts(session: Arc<SessionStore>, client: ApiClient) -> Self {
        let api: Arc<dyn QualityApi> = Arc::new(client.clone());
        Self {
            session,
            client,
            datasets: DatasetController::new(api.clone()),
            rules: RuleController::new(api.clone()),
            incidents: IncidentController::new(api.clone()),
            overview: OverviewController::new(api),
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Credential, AppError> {
        self.session.login(&self.client, email, password)
    }

    pub fn refresh_session(&self) -> Result<Credential, AppError> {
        self.session.refresh(&self.client)
    }

    pub fn logout(&self) -> Result<(), AppError> {
        self.session.logout()
    }

    pub fn health(&self) -> Result<HealthStatus, AppError> {
        self.client.health()
    }
}
