//! Credential persistence.
//!
//! The resolver only talks to the [`CredentialStore`] trait. Two stores ship
//! with the crate: [`InMemoryCredentialStore`] for tests and ephemeral
//! sessions, and [`JsonFileCredentialStore`] which keeps every record in one
//! pretty-printed JSON file and rewrites it atomically on each mutation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remora_core::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

/// A stored credential. Secret fields hold `enc:v1:` envelopes, or legacy
/// plaintext that the resolver migrates on first use.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub id: String,
    pub server: String,
    /// SMB share; empty for SFTP/FTP.
    #[serde(default)]
    pub share: String,
    pub username: String,
    #[serde(default)]
    pub encrypted_password: String,
    #[serde(default)]
    pub domain: Option<String>,
    /// Inline PEM or a key file path.
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn new(server: &str, share: &str, username: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            server: server.trim().to_ascii_lowercase(),
            share: share.trim_matches('/').to_string(),
            username: username.to_string(),
            encrypted_password: String::new(),
            domain: None,
            private_key: None,
            private_key_passphrase: None,
            updated_at: Utc::now(),
        }
    }

    /// Case-insensitive server and share match.
    pub fn matches(&self, server: &str, share: &str) -> bool {
        self.server.eq_ignore_ascii_case(server.trim())
            && self.share.eq_ignore_ascii_case(share.trim_matches('/'))
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("share", &self.share)
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("has_password", &!self.encrypted_password.is_empty())
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_by_credential_id(&self, id: &str) -> EngineResult<Option<CredentialRecord>>;

    async fn get_by_server_and_share(
        &self,
        server: &str,
        share: &str,
    ) -> EngineResult<Option<CredentialRecord>>;

    /// Fails with `AlreadyExists` when the id is taken.
    async fn insert(&self, record: CredentialRecord) -> EngineResult<()>;

    /// Fails with `NotFound` when the id is unknown.
    async fn update(&self, record: CredentialRecord) -> EngineResult<()>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> EngineResult<bool>;
}

// ── In-memory ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<String, CredentialRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_by_credential_id(&self, id: &str) -> EngineResult<Option<CredentialRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn get_by_server_and_share(
        &self,
        server: &str,
        share: &str,
    ) -> EngineResult<Option<CredentialRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.matches(server, share))
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn insert(&self, record: CredentialRecord) -> EngineResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(EngineError::already_exists(format!(
                "Credential '{}' already exists",
                record.id
            )));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, record: CredentialRecord) -> EngineResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(EngineError::not_found(format!(
                "Credential '{}' not found",
                record.id
            ))),
        }
    }

    async fn delete(&self, id: &str) -> EngineResult<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

// ── JSON file ────────────────────────────────────────────────────────

#[derive(Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    credentials: Vec<CredentialRecord>,
}

/// All records in one JSON file, cached in memory.
pub struct JsonFileCredentialStore {
    path: PathBuf,
    records: Mutex<Vec<CredentialRecord>>,
}

impl JsonFileCredentialStore {
    /// Open (or lazily create) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => {
                let file: CredentialFile = serde_json::from_str(&raw).map_err(|e| {
                    EngineError::invalid_input(format!(
                        "Corrupt credential store {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                file.credentials
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        log::debug!(
            "Loaded {} credential record(s) from {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &[CredentialRecord]) -> EngineResult<()> {
        let file = CredentialFile {
            credentials: records.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| EngineError::io(format!("Failed to serialize credentials: {}", e)))?;
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for JsonFileCredentialStore {
    async fn get_by_credential_id(&self, id: &str) -> EngineResult<Option<CredentialRecord>> {
        Ok(self.records.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn get_by_server_and_share(
        &self,
        server: &str,
        share: &str,
    ) -> EngineResult<Option<CredentialRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.matches(server, share))
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn insert(&self, record: CredentialRecord) -> EngineResult<()> {
        let mut records = self.records.lock().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(EngineError::already_exists(format!(
                "Credential '{}' already exists",
                record.id
            )));
        }
        let mut next = records.clone();
        next.push(record);
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn update(&self, record: CredentialRecord) -> EngineResult<()> {
        let mut records = self.records.lock().await;
        let index = records
            .iter()
            .position(|r| r.id == record.id)
            .ok_or_else(|| EngineError::not_found(format!("Credential '{}' not found", record.id)))?;
        let mut next = records.clone();
        next[index] = record;
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn delete(&self, id: &str) -> EngineResult<bool> {
        let mut records = self.records.lock().await;
        let next: Vec<_> = records.iter().filter(|r| r.id != id).cloned().collect();
        if next.len() == records.len() {
            return Ok(false);
        }
        self.persist(&next).await?;
        *records = next;
        Ok(true)
    }
}
