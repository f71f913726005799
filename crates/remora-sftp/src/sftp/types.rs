// ── SFTP client configuration ────────────────────────────────────────────────

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How the server's host key is checked against `known_hosts`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum KnownHostsPolicy {
    /// Trust on first use: unknown hosts are recorded, changed keys rejected.
    #[default]
    AcceptNew,
    /// Only hosts already present in `known_hosts` are accepted.
    Strict,
    /// No verification at all. Logged at every connect.
    AcceptAll,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SftpConfig {
    #[serde(default)]
    pub known_hosts_policy: KnownHostsPolicy,
    /// Defaults to `~/.ssh/known_hosts`.
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound for any single blocking libssh2 call.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default)]
    pub compress: bool,
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_operation_timeout_secs() -> u64 {
    60
}

fn default_keepalive_secs() -> u64 {
    30
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            known_hosts_policy: KnownHostsPolicy::default(),
            known_hosts_path: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            keepalive_interval_secs: default_keepalive_secs(),
            compress: false,
        }
    }
}

impl SftpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn known_hosts_file(&self) -> Option<PathBuf> {
        self.known_hosts_path
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")))
    }
}
