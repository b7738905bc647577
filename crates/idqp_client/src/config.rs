use std::path::{Path, PathBuf};
use std::time::Duration;

use idqp_core::error::{AppError, ErrorKind};
use idqp_core::session::{SessionStore, SqliteKeyValueStore};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

pub const ENV_BACKEND_URL: &str = "IDQP_BACKEND_URL";
pub const ENV_TIMEOUT_MS: &str = "IDQP_TIMEOUT_MS";
pub const ENV_SESSION_DB: &str = "IDQP_SESSION_DB";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub backend_url: String,
    pub timeout_ms: u64,
    /// Session database file; `None` keeps the session in memory only.
    pub session_db_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            session_db_path: None,
        }
    }
}

fn config_error(code: &str, message: impl Into<String>) -> AppError {
    AppError::new(ErrorKind::Config, code, message)
}

/// Trim trailing slashes and reject anything that is not a plain http(s) address.
pub fn normalize_base_url(raw: &str) -> Result<String, AppError> {
    let base_url = raw.trim().trim_end_matches('/').to_string();

    let rest = base_url
        .strip_prefix("http://")
        .or_else(|| base_url.strip_prefix("https://"))
        .ok_or_else(|| {
            config_error("CONFIG_BACKEND_URL_INVALID", "Backend URL must start with http:// or https://")
                .with_details(format!("backend_url={base_url}"))
        })?;

    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, _)) if !host.ends_with(']') && host.starts_with('[') => (authority, None),
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    };
    if host.is_empty() {
        return Err(config_error("CONFIG_BACKEND_URL_INVALID", "Backend URL has no host")
            .with_details(format!("backend_url={base_url}")));
    }
    if let Some(port) = port {
        if !matches!(port.parse::<u16>(), Ok(p) if p > 0) {
            return Err(config_error("CONFIG_BACKEND_URL_INVALID", "Backend URL has an invalid port")
                .with_details(format!("backend_url={base_url}")));
        }
    }
    // Userinfo in the authority hides the real host.
    if authority.contains('@') || base_url.chars().any(char::is_whitespace) {
        return Err(config_error(
            "CONFIG_BACKEND_URL_INVALID",
            "Backend URL must not contain credentials or whitespace",
        )
        .with_details(format!("backend_url={base_url}")));
    }

    Ok(base_url)
}

impl ClientConfig {
    /// Defaults overridden by `IDQP_*` environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_BACKEND_URL) {
            config.backend_url = url;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            config.timeout_ms = raw.trim().parse().map_err(|e| {
                config_error("CONFIG_TIMEOUT_INVALID", "Timeout must be a whole number of milliseconds")
                    .with_details(format!("{ENV_TIMEOUT_MS}={raw}; err={e}"))
            })?;
        }
        if let Some(path) = lookup(ENV_SESSION_DB).filter(|p| !p.trim().is_empty()) {
            config.session_db_path = Some(PathBuf::from(path));
        }
        config.validated()
    }

    pub fn from_json_str(text: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(text).map_err(|e| {
            config_error("CONFIG_PARSE_FAILED", "Failed to parse client configuration")
                .with_details(e.to_string())
        })?;
        config.validated()
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            config_error("CONFIG_READ_FAILED", "Failed to read client configuration")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validated(mut self) -> Result<Self, AppError> {
        self.backend_url = normalize_base_url(&self.backend_url)?;
        if self.timeout_ms == 0 {
            return Err(config_error("CONFIG_TIMEOUT_INVALID", "Timeout must be greater than zero"));
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Open the configured session storage and restore any persisted credential.
    pub fn open_session(&self) -> Result<SessionStore, AppError> {
        match &self.session_db_path {
            Some(path) => SessionStore::restore(SqliteKeyValueStore::open(path)?),
            None => Ok(SessionStore::in_memory()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults_point_at_local_backend() {
        let config = ClientConfig::from_lookup(|_| None).expect("defaults");
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.backend_url, "http://localhost:8000");
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            (ENV_BACKEND_URL, "https://dq.example.com/api/"),
            (ENV_TIMEOUT_MS, "2500"),
            (ENV_SESSION_DB, "/tmp/idqp/session.sqlite"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).expect("config");
        assert_eq!(config.backend_url, "https://dq.example.com/api");
        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert_eq!(config.session_db_path, Some(PathBuf::from("/tmp/idqp/session.sqlite")));
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let config = ClientConfig::from_json_str(r#"{"backendUrl": "http://10.0.0.5:8000"}"#).expect("parse");
        assert_eq!(config.backend_url, "http://10.0.0.5:8000");
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn rejects_bad_addresses() {
        for bad in [
            "localhost:8000",
            "ftp://example.com",
            "http://",
            "http://:8000",
            "http://user@evil.com",
            "http://host:",
        ] {
            let err = normalize_base_url(bad).expect_err(bad);
            assert_eq!(err.kind, ErrorKind::Config);
        }
        assert_eq!(normalize_base_url("http://127.0.0.1:8000//").unwrap(), "http://127.0.0.1:8000");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ClientConfig::from_json_str(r#"{"timeoutMs": 0}"#).unwrap_err();
        assert_eq!(err.code, "CONFIG_TIMEOUT_INVALID");
    }
}
