//! SMB driver configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SmbConfig {
    /// `smbclient` binary; a bare name is looked up on `PATH`.
    #[serde(default = "default_smbclient_path")]
    pub smbclient_path: PathBuf,
    /// Wall-clock limit for one `smbclient` invocation.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Passed as `-m`, e.g. `SMB3`. `None` leaves negotiation to smbclient.
    #[serde(default)]
    pub max_protocol: Option<String>,
}

fn default_smbclient_path() -> PathBuf {
    PathBuf::from("smbclient")
}

fn default_command_timeout_secs() -> u64 {
    60
}

impl Default for SmbConfig {
    fn default() -> Self {
        Self {
            smbclient_path: default_smbclient_path(),
            command_timeout_secs: default_command_timeout_secs(),
            max_protocol: None,
        }
    }
}

impl SmbConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
