use std::sync::Arc;

use idqp_core::error::{AppError, ErrorKind};
use idqp_core::session::SessionStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;

const MAX_DETAIL_LEN: usize = 512;

/// Whether a request carries the session's bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// Login and refresh; a 401 here means bad credentials.
    Public,
    Protected,
}

/// One request/response exchange with the quality service.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub op: &'static str,
    pub method: &'static str,
    pub path: String,
    pub query: Vec<(&'static str, String)>,
    pub access: Access,
    /// Mutations are never flagged retryable.
    pub mutating: bool,
}

impl Call {
    pub fn get(op: &'static str, path: impl Into<String>) -> Self {
        Self {
            op,
            method: "GET",
            path: path.into(),
            query: Vec::new(),
            access: Access::Protected,
            mutating: false,
        }
    }

    pub fn post(op: &'static str, path: impl Into<String>) -> Self {
        Self {
            op,
            method: "POST",
            path: path.into(),
            query: Vec::new(),
            access: Access::Protected,
            mutating: true,
        }
    }

    pub fn public(mut self) -> Self {
        self.access = Access::Public;
        self
    }

    pub fn query(mut self, pairs: Vec<(&'static str, String)>) -> Self {
        self.query = pairs;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
}

/// HTTP transport bound to one backend and one session.
///
/// The bearer token is read from the session on every protected request; nothing about the
/// credential is cached on the agent.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    agent: ureq::Agent,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: Arc<SessionStore>) -> Result<Self, AppError> {
        let config = config.clone().validated()?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout()).build();
        Ok(Self {
            base_url: config.backend_url,
            agent,
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// `GET /health`; needs no credential.
    pub fn health(&self) -> Result<HealthStatus, AppError> {
        let status: HealthStatus = self.execute(&Call::get("health", "/health").public(), None::<&()>)?;
        if status.status != "ok" {
            return Err(AppError::new(ErrorKind::Server, "HTTP_BACKEND_UNHEALTHY", "Backend reported unhealthy")
                .with_details(format!("status={}", status.status))
                .with_retryable(true));
        }
        Ok(status)
    }

    pub(crate) fn execute<B, T>(&self, call: &Call, body: Option<&B>) -> Result<T, AppError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, call.path);
        let mut req = self.agent.request(call.method, &url);
        for (key, value) in &call.query {
            req = req.query(key, value);
        }
        // Snapshot of the credential this request carries; a 401 only ends that session.
        let sent = match call.access {
            Access::Protected => self.session.current_credential(),
            Access::Public => None,
        };
        if let Some(credential) = &sent {
            req = req.set("Authorization", &credential.bearer());
        }

        let resp = match body {
            Some(body) => req.send_json(body),
            None => req.call(),
        };

        match resp {
            Ok(r) => {
                tracing::debug!(op = call.op, method = call.method, path = %call.path, status = r.status(), "request completed");
                r.into_json::<T>().map_err(|e| {
                    AppError::new(ErrorKind::Decode, "HTTP_DECODE_FAILED", format!("Failed to decode {} response", call.op))
                        .with_details(e.to_string())
                })
            }
            Err(ureq::Error::Status(status, r)) => {
                let detail = read_detail(r);
                let sent_token = sent.as_ref().map(|c| c.token.as_str());
                let err = self.classify(call, status, detail, sent_token);
                tracing::warn!(op = call.op, status, code = %err.code, "request rejected");
                Err(err)
            }
            Err(ureq::Error::Transport(t)) => {
                tracing::warn!(op = call.op, error = %t, "transport failure");
                Err(AppError::new(
                    ErrorKind::Network,
                    "HTTP_TRANSPORT_FAILED",
                    format!("Failed to reach backend for {}", call.op),
                )
                .with_details(t.to_string())
                .with_retryable(!call.mutating))
            }
        }
    }

    fn classify(&self, call: &Call, status: u16, detail: Option<String>, sent_token: Option<&str>) -> AppError {
        let read_retry = !call.mutating;
        let (kind, code, message, retryable) = match status {
            401 if call.access == Access::Public => (
                ErrorKind::Authentication,
                "AUTH_INVALID_CREDENTIALS",
                "Incorrect email or password".to_string(),
                false,
            ),
            401 => {
                if let Some(token) = sent_token {
                    self.session.expire_if(token);
                }
                (
                    ErrorKind::Unauthorized,
                    "HTTP_UNAUTHORIZED",
                    "Session is missing or expired; log in again".to_string(),
                    false,
                )
            }
            403 => (
                ErrorKind::Forbidden,
                "HTTP_FORBIDDEN",
                format!("Not permitted to {}", call.op),
                false,
            ),
            404 => (ErrorKind::NotFound, "HTTP_NOT_FOUND", format!("{} target not found", call.op), false),
            409 => (ErrorKind::Conflict, "HTTP_CONFLICT", format!("{} conflicts with current state", call.op), false),
            400 | 422 => (
                ErrorKind::Validation,
                "HTTP_VALIDATION_FAILED",
                format!("Backend rejected {} input", call.op),
                false,
            ),
            429 => (
                ErrorKind::RateLimited,
                "HTTP_RATE_LIMITED",
                "Too many requests; wait a moment and try again".to_string(),
                read_retry,
            ),
            500..=599 => (
                ErrorKind::Server,
                "HTTP_SERVER_ERROR",
                format!("Backend failed to handle {}", call.op),
                read_retry,
            ),
            _ => (
                ErrorKind::Server,
                "HTTP_UNEXPECTED_STATUS",
                format!("Unexpected response to {}", call.op),
                false,
            ),
        };

        let details = match detail {
            Some(detail) => format!("status={status}; detail={detail}"),
            None => format!("status={status}"),
        };
        AppError::new(kind, code, message)
            .with_details(details)
            .with_retryable(retryable)
    }
}

/// Pull FastAPI's `{"detail": ...}` out of an error body, falling back to the raw text.
fn read_detail(resp: ureq::Response) -> Option<String> {
    let text = resp.into_string().ok()?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let detail = match serde_json::from_str::<ErrorBody>(text) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => text.to_string(),
    };
    Some(truncate(detail))
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_DETAIL_LEN {
        let mut cut = MAX_DETAIL_LEN;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}
