//! SIP account credentials and their persistence
//!
//! Credentials are stored per namespace together with a `registered` flag that
//! records whether the user wants the account registered. The worker reads the
//! record at startup to auto-register, and the registration supervisor reads it
//! again whenever it has to recreate the engine account.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

/// SIP account credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl AccountCredentials {
    /// Build credentials, trimming whitespace and rejecting empty fields
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
    ) -> OrchestratorResult<Self> {
        let credentials = Self {
            username: username.into().trim().to_string(),
            password: password.into(),
            domain: domain.into().trim().to_string(),
        };
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.username.is_empty() {
            return Err(OrchestratorError::invalid_credentials("username", "must not be empty"));
        }
        if self.password.is_empty() {
            return Err(OrchestratorError::invalid_credentials("password", "must not be empty"));
        }
        if self.domain.is_empty() {
            return Err(OrchestratorError::invalid_credentials("domain", "must not be empty"));
        }
        if self.username.contains('@') || self.username.contains(char::is_whitespace) {
            return Err(OrchestratorError::invalid_credentials(
                "username",
                "must be a bare user part",
            ));
        }
        Ok(())
    }

    /// `sip:{username}@{domain}`
    pub fn identity(&self) -> String {
        format!("sip:{}@{}", self.username, self.domain)
    }

    /// `sip:{domain}`
    pub fn server_uri(&self) -> String {
        format!("sip:{}", self.domain)
    }
}

impl std::fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// A persisted account record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAccount {
    pub credentials: AccountCredentials,
    /// Whether the user wants this account registered
    pub registered: bool,
}

/// Namespaced credential persistence
///
/// Implementations are called from the worker task, so file or keychain access must
/// not block the runtime.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, namespace: &str) -> OrchestratorResult<Option<StoredAccount>>;

    async fn save(&self, namespace: &str, account: &StoredAccount) -> OrchestratorResult<()>;

    /// Update the registered flag of an existing record. Missing records are left alone.
    async fn set_registered(&self, namespace: &str, registered: bool) -> OrchestratorResult<()>;
}

/// Process-local store, used by tests and the demo
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<String, StoredAccount>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one record
    pub fn with_account(namespace: &str, account: StoredAccount) -> Self {
        let store = Self::new();
        store.records.lock().insert(namespace.to_string(), account);
        store
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, namespace: &str) -> OrchestratorResult<Option<StoredAccount>> {
        Ok(self.records.lock().get(namespace).cloned())
    }

    async fn save(&self, namespace: &str, account: &StoredAccount) -> OrchestratorResult<()> {
        self.records
            .lock()
            .insert(namespace.to_string(), account.clone());
        Ok(())
    }

    async fn set_registered(&self, namespace: &str, registered: bool) -> OrchestratorResult<()> {
        if let Some(record) = self.records.lock().get_mut(namespace) {
            record.registered = registered;
        }
        Ok(())
    }
}

/// One JSON document holding every namespace's record
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialDocument {
    #[serde(default)]
    accounts: HashMap<String, StoredAccount>,
}

/// Store backed by a single JSON file
///
/// The file is read on every load and rewritten on every save; writes go through a
/// sibling temporary file that is renamed into place. I/O runs on `tokio::fs`.
#[derive(Debug)]
pub struct JsonFileCredentialStore {
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl JsonFileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> OrchestratorResult<CredentialDocument> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CredentialDocument::default()),
            Err(e) => {
                return Err(OrchestratorError::storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        if raw.trim().is_empty() {
            return Ok(CredentialDocument::default());
        }
        serde_json::from_str(&raw).map_err(|e| {
            OrchestratorError::storage(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    async fn write_document(&self, document: &CredentialDocument) -> OrchestratorResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                OrchestratorError::storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| OrchestratorError::storage(format!("failed to encode credentials: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await.map_err(|e| {
            OrchestratorError::storage(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).await.map_err(|e| {
            OrchestratorError::storage(format!("failed to replace {}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), "Credentials written");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for JsonFileCredentialStore {
    async fn load(&self, namespace: &str) -> OrchestratorResult<Option<StoredAccount>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.accounts.remove(namespace))
    }

    async fn save(&self, namespace: &str, account: &StoredAccount) -> OrchestratorResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        document.accounts.insert(namespace.to_string(), account.clone());
        self.write_document(&document).await
    }

    async fn set_registered(&self, namespace: &str, registered: bool) -> OrchestratorResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        match document.accounts.get_mut(namespace) {
            Some(record) if record.registered != registered => {
                record.registered = registered;
                self.write_document(&document).await
            }
            _ => Ok(()),
        }
    }
}
