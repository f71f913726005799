//! Plain-text credentials handed to a protocol client for one connect.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Decrypted credentials. Lives only for the duration of a connect attempt;
/// secrets are wrapped so they never appear in `Debug` output.
pub struct ResolvedCredentials {
    pub username: String,
    pub password: Option<SecretString>,
    pub domain: Option<String>,
    /// PEM-encoded private key (SFTP).
    pub private_key: Option<SecretString>,
    pub private_key_passphrase: Option<SecretString>,
}

impl ResolvedCredentials {
    pub fn anonymous() -> Self {
        Self {
            username: String::new(),
            password: None,
            domain: None,
            private_key: None,
            private_key_passphrase: None,
        }
    }

    pub fn password(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: Some(SecretString::new(password.to_string())),
            ..Self::anonymous()
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string()).filter(|d| !d.is_empty());
        self
    }

    /// Borrow the password, empty string when none is set.
    pub fn password_str(&self) -> &str {
        self.password
            .as_ref()
            .map(|p| p.expose_secret().as_str())
            .unwrap_or("")
    }

    pub fn has_password(&self) -> bool {
        !self.password_str().is_empty()
    }
}

impl Clone for ResolvedCredentials {
    fn clone(&self) -> Self {
        let copy = |s: &Option<SecretString>| {
            s.as_ref()
                .map(|v| SecretString::new(v.expose_secret().clone()))
        };
        Self {
            username: self.username.clone(),
            password: copy(&self.password),
            domain: self.domain.clone(),
            private_key: copy(&self.private_key),
            private_key_passphrase: copy(&self.private_key_passphrase),
        }
    }
}

impl fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("domain", &self.domain)
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .finish()
    }
}
