//! Credential resolution with encryption at rest.

pub mod crypto;
pub mod resolver;
pub mod store;

pub use crypto::{CryptoError, PasswordCipher, DEFAULT_PBKDF2_ITERATIONS, ENVELOPE_PREFIX};
pub use resolver::{CredentialResolver, DefaultCredentials};
pub use store::{CredentialRecord, CredentialStore, InMemoryCredentialStore, JsonFileCredentialStore};
