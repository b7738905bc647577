//! Authentication state: the active credential, its durable copy, and the
//! login/logout/refresh transitions that keep the two in step.
//!
//! Transports hold an `Arc<SessionStore>` and read `authorization_header()` on every
//! request, so attaching the credential is a consequence of the store's state rather
//! than a step callers have to remember.

pub mod kv;

use parking_lot::RwLock;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::Credential;
use crate::error::{AppError, ErrorKind};

pub use kv::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};

pub const KEY_TOKEN: &str = "token";
pub const KEY_IDENTIFIER: &str = "identifier";
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub const KEY_SAVED_AT: &str = "saved_at";

const ALL_KEYS: [&str; 4] = [KEY_TOKEN, KEY_IDENTIFIER, KEY_REFRESH_TOKEN, KEY_SAVED_AT];

/// Exchanges secrets for credentials. Implemented by the HTTP transport.
pub trait Authenticator {
    fn authenticate(&self, identifier: &str, secret: &str) -> Result<Credential, AppError>;

    /// Trade the credential's refresh token for a new credential.
    fn refresh(&self, credential: &Credential) -> Result<Credential, AppError>;
}

pub struct SessionStore {
    kv: Box<dyn KeyValueStore>,
    active: RwLock<Option<Credential>>,
}

fn now_rfc3339_utc() -> Result<String, AppError> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
        AppError::storage("SESSION_TIME_FAILED", "Failed to format time").with_details(e.to_string())
    })
}

impl SessionStore {
    /// Build a store over `kv`, reconstructing the credential persisted by an earlier process.
    pub fn restore(kv: impl KeyValueStore + 'static) -> Result<Self, AppError> {
        let kv: Box<dyn KeyValueStore> = Box::new(kv);
        let token = kv.get(KEY_TOKEN)?;
        let identifier = kv.get(KEY_IDENTIFIER)?;

        let active = match (token, identifier) {
            (Some(token), Some(identifier)) if !token.is_empty() => {
                let credential = Credential {
                    identifier,
                    token,
                    refresh_token: kv.get(KEY_REFRESH_TOKEN)?,
                    saved_at: kv.get(KEY_SAVED_AT)?,
                };
                tracing::info!(identifier = %credential.identifier, "restored session");
                Some(credential)
            }
            (None, None) => None,
            _ => {
                tracing::warn!("discarding incomplete persisted session");
                let removals: Vec<(&str, Option<&str>)> = ALL_KEYS.iter().map(|k| (*k, None)).collect();
                kv.write_batch(&removals)?;
                None
            }
        };

        Ok(Self {
            kv,
            active: RwLock::new(active),
        })
    }

    /// A store whose credential lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            kv: Box::new(MemoryKeyValueStore::new()),
            active: RwLock::new(None),
        }
    }

    /// Snapshot of the active credential.
    pub fn current_credential(&self) -> Option<Credential> {
        self.active.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.active.read().is_some()
    }

    /// `Authorization` header value for the next request, if a session is active.
    pub fn authorization_header(&self) -> Option<String> {
        self.active.read().as_ref().map(Credential::bearer)
    }

    /// Authenticate and make the result the active credential.
    ///
    /// A failed attempt leaves any prior credential in place.
    pub fn login(
        &self,
        auth: &dyn Authenticator,
        identifier: &str,
        secret: &str,
    ) -> Result<Credential, AppError> {
        let identifier = identifier.trim();
        if identifier.is_empty() || secret.is_empty() {
            return Err(AppError::validation(
                "AUTH_INPUT_REQUIRED",
                "Email and password are required",
            ));
        }

        let mut credential = auth.authenticate(identifier, secret)?;
        credential.identifier = identifier.to_string();
        let credential = self.install(credential)?;
        tracing::info!(identifier = %credential.identifier, "logged in");
        Ok(credential)
    }

    /// Exchange the stored refresh token for a fresh credential. Never called implicitly.
    pub fn refresh(&self, auth: &dyn Authenticator) -> Result<Credential, AppError> {
        let current = self.current_credential().ok_or_else(|| {
            AppError::new(ErrorKind::Unauthorized, "SESSION_MISSING", "No active session to refresh")
        })?;
        if current.refresh_token.is_none() {
            return Err(AppError::new(
                ErrorKind::Authentication,
                "SESSION_REFRESH_UNAVAILABLE",
                "Session has no refresh token; log in again",
            ));
        }

        let mut refreshed = auth.refresh(&current)?;
        refreshed.identifier = current.identifier.clone();
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = current.refresh_token;
        }
        let refreshed = self.install(refreshed)?;
        tracing::info!(identifier = %refreshed.identifier, "refreshed session");
        Ok(refreshed)
    }

    /// Drop the active credential and its durable copy. Calling it without a session is a no-op.
    ///
    /// The durable copy goes first: when removing it fails the session stays active, so memory
    /// never disagrees with what the next start would restore.
    pub fn logout(&self) -> Result<(), AppError> {
        let mut active = self.active.write();
        self.clear_durable()?;
        if let Some(previous) = active.take() {
            tracing::info!(identifier = %previous.identifier, "logged out");
        }
        Ok(())
    }

    /// The server rejected `rejected_token`: end the session so the user logs in again.
    ///
    /// Only a session still holding that token is ended. A credential installed after the
    /// rejected request went out is left alone. Returns whether a session was cleared.
    pub fn expire_if(&self, rejected_token: &str) -> bool {
        let mut active = self.active.write();
        if active.as_ref().map(|c| c.token.as_str()) != Some(rejected_token) {
            tracing::debug!("rejected credential already replaced; session kept");
            return false;
        }
        tracing::warn!("credential rejected by server; clearing session");
        if let Err(e) = self.clear_durable() {
            tracing::warn!(error = %e, "failed to remove expired session from storage");
        }
        active.take();
        true
    }

    fn clear_durable(&self) -> Result<(), AppError> {
        let removals: Vec<(&str, Option<&str>)> = ALL_KEYS.iter().map(|k| (*k, None)).collect();
        self.kv.write_batch(&removals)
    }

    // Writers hold the lock across the storage write so login, logout and expiry never
    // interleave between memory and disk.
    fn install(&self, mut credential: Credential) -> Result<Credential, AppError> {
        credential.saved_at = Some(now_rfc3339_utc()?);
        let mut active = self.active.write();
        self.kv.write_batch(&[
            (KEY_TOKEN, Some(credential.token.as_str())),
            (KEY_IDENTIFIER, Some(credential.identifier.as_str())),
            (KEY_REFRESH_TOKEN, credential.refresh_token.as_deref()),
            (KEY_SAVED_AT, credential.saved_at.as_deref()),
        ])?;
        *active = Some(credential.clone());
        Ok(credential)
    }
}
