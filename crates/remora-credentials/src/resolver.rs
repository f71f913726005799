//! Turns a server/share (or an explicit credential id) into usable credentials.
//!
//! Lookup order:
//! 1. explicit credential id, when the caller supplies one and it exists
//! 2. the newest record stored for the server and share
//! 3. an empty username becomes the configured default username
//! 4. an empty password becomes the configured default password, if any
//!
//! Stored values that are not `enc:v1:` envelopes are treated as legacy
//! plaintext: they are encrypted and written back on first use.

use crate::crypto::PasswordCipher;
use crate::store::{CredentialRecord, CredentialStore};
use chrono::Utc;
use remora_core::{EngineError, EngineResult, ResolvedCredentials};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// Process-wide fallback identity.
#[derive(Clone, Default)]
pub struct DefaultCredentials {
    pub username: String,
    /// Plaintext or an `enc:v1:` envelope.
    pub password: Option<String>,
}

pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
    cipher: Arc<PasswordCipher>,
    default_username: String,
    /// Always an envelope.
    default_password: Option<String>,
}

impl CredentialResolver {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cipher: Arc<PasswordCipher>,
        defaults: DefaultCredentials,
    ) -> EngineResult<Self> {
        let default_password = match defaults.password.filter(|p| !p.is_empty()) {
            None => None,
            Some(p) if PasswordCipher::is_envelope(&p) => Some(p),
            Some(p) => Some(cipher.encrypt(&p)?),
        };
        Ok(Self {
            store,
            cipher,
            default_username: defaults.username,
            default_password,
        })
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Resolve credentials for `server`/`share`. Never logs secrets.
    pub async fn resolve(
        &self,
        server: &str,
        share: &str,
        credential_id: Option<&str>,
    ) -> EngineResult<ResolvedCredentials> {
        let record = self.lookup(server, share, credential_id).await?;
        let mut resolved = match record {
            Some(record) => self.reveal_record(record).await?,
            None => ResolvedCredentials::anonymous(),
        };

        if resolved.username.is_empty() {
            resolved.username = self.default_username.clone();
        }
        if !resolved.has_password() {
            if let Some(sealed) = &self.default_password {
                resolved.password = Some(self.cipher.decrypt(sealed)?);
            }
        }
        Ok(resolved)
    }

    /// Store (or replace) the credentials for `server`/`share`, encrypting the
    /// password.
    pub async fn save(
        &self,
        server: &str,
        share: &str,
        username: &str,
        password: &SecretString,
        domain: Option<&str>,
    ) -> EngineResult<CredentialRecord> {
        let encrypted = if password.expose_secret().is_empty() {
            String::new()
        } else {
            self.cipher.encrypt(password.expose_secret())?
        };
        let domain = domain.map(str::to_string).filter(|d| !d.is_empty());

        match self.store.get_by_server_and_share(server, share).await? {
            Some(mut existing) => {
                existing.username = username.to_string();
                existing.encrypted_password = encrypted;
                existing.domain = domain;
                existing.updated_at = Utc::now();
                self.store.update(existing.clone()).await?;
                log::info!("Updated credentials for {}/{}", server, share);
                Ok(existing)
            }
            None => {
                let mut record = CredentialRecord::new(server, share, username);
                record.encrypted_password = encrypted;
                record.domain = domain;
                self.store.insert(record.clone()).await?;
                log::info!("Saved credentials for {}/{}", server, share);
                Ok(record)
            }
        }
    }

    async fn lookup(
        &self,
        server: &str,
        share: &str,
        credential_id: Option<&str>,
    ) -> EngineResult<Option<CredentialRecord>> {
        if let Some(id) = credential_id.filter(|id| !id.is_empty()) {
            if let Some(record) = self.store.get_by_credential_id(id).await? {
                return Ok(Some(record));
            }
            log::warn!(
                "Credential '{}' not found, falling back to {}/{}",
                id,
                server,
                share
            );
        }
        self.store.get_by_server_and_share(server, share).await
    }

    async fn reveal_record(&self, mut record: CredentialRecord) -> EngineResult<ResolvedCredentials> {
        let mut migrated = false;
        let password = self.reveal(&mut record.encrypted_password, &mut migrated)?;
        let private_key = match record.private_key.as_mut() {
            Some(v) => self.reveal(v, &mut migrated)?,
            None => None,
        };
        let passphrase = match record.private_key_passphrase.as_mut() {
            Some(v) => self.reveal(v, &mut migrated)?,
            None => None,
        };

        if migrated {
            record.updated_at = Utc::now();
            match self.store.update(record.clone()).await {
                Ok(()) => log::info!("Encrypted legacy credential '{}'", record.id),
                Err(e) => log::warn!(
                    "Could not write back encrypted credential '{}': {}",
                    record.id,
                    e
                ),
            }
        }

        Ok(ResolvedCredentials {
            username: record.username,
            password,
            domain: record.domain.filter(|d| !d.is_empty()),
            private_key,
            private_key_passphrase: passphrase,
        })
    }

    /// Decrypt one stored value in place, sealing legacy plaintext.
    fn reveal(&self, stored: &mut String, migrated: &mut bool) -> EngineResult<Option<SecretString>> {
        if stored.is_empty() {
            return Ok(None);
        }
        match self.cipher.decrypt(stored) {
            Ok(secret) => Ok(Some(secret)),
            Err(e) if e.is_unparseable() => {
                let plain = SecretString::new(std::mem::take(stored));
                *stored = self.cipher.encrypt(plain.expose_secret())?;
                *migrated = true;
                Ok(Some(plain))
            }
            Err(_) => Err(EngineError::auth_failed(
                "Stored credential cannot be decrypted; re-enter the password",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryCredentialStore, MockCredentialStore};
    use remora_core::ErrorKind;

    fn cipher() -> Arc<PasswordCipher> {
        Arc::new(PasswordCipher::from_master(
            &SecretString::new("master".into()),
            1_000,
        ))
    }

    fn resolver(store: Arc<dyn CredentialStore>, defaults: DefaultCredentials) -> CredentialResolver {
        CredentialResolver::new(store, cipher(), defaults).unwrap()
    }

    #[tokio::test]
    async fn empty_password_falls_back_to_default() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store
            .insert(CredentialRecord::new("nas", "photos", "bob"))
            .await
            .unwrap();
        let r = resolver(
            store,
            DefaultCredentials {
                username: "guest".into(),
                password: Some("fallback".into()),
            },
        );

        let creds = r.resolve("nas", "photos", None).await.unwrap();
        assert_eq!(creds.username, "bob");
        assert_eq!(creds.password_str(), "fallback");
    }

    #[tokio::test]
    async fn stored_password_is_never_replaced() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let r = resolver(
            store,
            DefaultCredentials {
                username: "guest".into(),
                password: Some("fallback".into()),
            },
        );
        r.save("nas", "photos", "", &SecretString::new("mine".into()), None)
            .await
            .unwrap();

        let creds = r.resolve("NAS", "Photos", None).await.unwrap();
        assert_eq!(creds.password_str(), "mine");
        assert_eq!(creds.username, "guest");
    }

    #[tokio::test]
    async fn no_record_uses_defaults() {
        let r = resolver(
            Arc::new(InMemoryCredentialStore::new()),
            DefaultCredentials {
                username: "guest".into(),
                password: None,
            },
        );
        let creds = r.resolve("h", "", None).await.unwrap();
        assert_eq!(creds.username, "guest");
        assert!(creds.password.is_none());
    }

    #[tokio::test]
    async fn explicit_id_wins_over_server_lookup() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let r = resolver(store.clone(), DefaultCredentials::default());
        r.save("h", "s", "by-share", &SecretString::new("a".into()), None)
            .await
            .unwrap();
        let mut other = CredentialRecord::new("elsewhere", "", "by-id");
        other.encrypted_password = cipher().encrypt("b").unwrap();
        store.insert(other.clone()).await.unwrap();

        let creds = r.resolve("h", "s", Some(&other.id)).await.unwrap();
        assert_eq!(creds.username, "by-id");
        assert_eq!(creds.password_str(), "b");

        let creds = r.resolve("h", "s", Some("missing")).await.unwrap();
        assert_eq!(creds.username, "by-share");
    }

    #[tokio::test]
    async fn legacy_plaintext_is_encrypted_and_written_back() {
        let mut legacy = CredentialRecord::new("nas", "media", "bob");
        legacy.encrypted_password = "plain-old".into();

        let mut store = MockCredentialStore::new();
        let found = legacy.clone();
        store
            .expect_get_by_server_and_share()
            .returning(move |_, _| Ok(Some(found.clone())));
        store
            .expect_update()
            .withf(|rec| {
                rec.encrypted_password.starts_with(crate::crypto::ENVELOPE_PREFIX)
                    && !rec.encrypted_password.contains("plain-old")
            })
            .times(1)
            .returning(|_| Ok(()));

        let r = resolver(Arc::new(store), DefaultCredentials::default());
        let creds = r.resolve("nas", "media", None).await.unwrap();
        assert_eq!(creds.password_str(), "plain-old");
    }

    #[tokio::test]
    async fn undecryptable_envelope_is_auth_failure() {
        let other = PasswordCipher::from_master(&SecretString::new("different".into()), 1_000);
        let mut rec = CredentialRecord::new("nas", "media", "bob");
        rec.encrypted_password = other.encrypt("pw").unwrap();

        let mut store = MockCredentialStore::new();
        store
            .expect_get_by_server_and_share()
            .returning(move |_, _| Ok(Some(rec.clone())));
        store.expect_update().never();

        let r = resolver(Arc::new(store), DefaultCredentials::default());
        let err = r.resolve("nas", "media", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthFailed);
    }

    #[test]
    fn default_password_is_kept_sealed() {
        let r = resolver(
            Arc::new(InMemoryCredentialStore::new()),
            DefaultCredentials {
                username: String::new(),
                password: Some("secret".into()),
            },
        );
        let sealed = r.default_password.as_deref().unwrap();
        assert!(PasswordCipher::is_envelope(sealed));
        assert!(!sealed.contains("secret"));
    }
}
