//! Shared data model.

use crate::media::MediaType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Protocols & schemes ─────────────────────────────────────────────

/// Wire protocols that have a client in this engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Protocol {
    Smb,
    Sftp,
    Ftp,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Smb, Protocol::Sftp, Protocol::Ftp];

    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Smb => 445,
            Protocol::Sftp => 22,
            Protocol::Ftp => 21,
        }
    }

    pub fn scheme(self) -> Scheme {
        match self {
            Protocol::Smb => Scheme::Smb,
            Protocol::Sftp => Scheme::Sftp,
            Protocol::Ftp => Scheme::Ftp,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme().as_str())
    }
}

/// Every URI scheme the engine understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Scheme {
    Smb,
    Sftp,
    Ftp,
    File,
    Cloud,
}

impl Scheme {
    pub const ALL: [Scheme; 5] = [
        Scheme::Smb,
        Scheme::Sftp,
        Scheme::Ftp,
        Scheme::File,
        Scheme::Cloud,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Smb => "smb",
            Scheme::Sftp => "sftp",
            Scheme::Ftp => "ftp",
            Scheme::File => "file",
            Scheme::Cloud => "cloud",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "smb" => Some(Scheme::Smb),
            "sftp" => Some(Scheme::Sftp),
            "ftp" => Some(Scheme::Ftp),
            "file" => Some(Scheme::File),
            "cloud" => Some(Scheme::Cloud),
            _ => None,
        }
    }

    /// The remote protocol behind this scheme, if it is one.
    pub fn protocol(self) -> Option<Protocol> {
        match self {
            Scheme::Smb => Some(Protocol::Smb),
            Scheme::Sftp => Some(Protocol::Sftp),
            Scheme::Ftp => Some(Protocol::Ftp),
            Scheme::File | Scheme::Cloud => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Connection descriptor ───────────────────────────────────────────

/// Identifies one pooled session. Immutable once built; the host is
/// normalised so that `NAS.local` and `nas.local` share a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    protocol: Protocol,
    host: String,
    port: u16,
    share_or_base_path: String,
    username: String,
    domain: Option<String>,
}

impl ConnectionDescriptor {
    pub fn new(
        protocol: Protocol,
        host: &str,
        port: Option<u16>,
        share_or_base_path: &str,
        username: &str,
        domain: Option<&str>,
    ) -> Self {
        Self {
            protocol,
            host: host.trim().to_ascii_lowercase(),
            port: port.unwrap_or_else(|| protocol.default_port()),
            share_or_base_path: share_or_base_path.trim_matches('/').to_string(),
            username: username.trim().to_string(),
            domain: domain
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn share(&self) -> &str {
        &self.share_or_base_path
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// `host:port:share/user`, the pool key.
    pub fn pool_key(&self) -> String {
        format!(
            "{}:{}:{}/{}",
            self.host, self.port, self.share_or_base_path, self.username
        )
    }

    /// `host:port`, the per-resource throttle key.
    pub fn resource_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.pool_key())
    }
}

// ─── Listing / media records ─────────────────────────────────────────

/// One directory entry as returned by a protocol client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileInfo {
    pub name: String,
    /// Path relative to the share / server root, `/`-separated.
    pub path: String,
    pub size: u64,
    pub is_directory: bool,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The engine's output unit. `path` is a full URI so that downstream code
/// can re-resolve the connection without extra state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub created_date: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

// ─── Operation context ───────────────────────────────────────────────

/// Queue priority for throttled operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    /// Interactive "open this file" actions.
    High,
    /// Background prefetch and scans.
    #[default]
    Low,
}

/// Per-call options threaded through every filesystem operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    pub priority: Priority,
    /// Explicit credential record to use; otherwise resolved by server+share.
    pub credential_id: Option<String>,
}

impl OpContext {
    pub fn interactive() -> Self {
        Self {
            priority: Priority::High,
            credential_id: None,
        }
    }

    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_credential(mut self, id: impl Into<String>) -> Self {
        self.credential_id = Some(id.into());
        self
    }
}
