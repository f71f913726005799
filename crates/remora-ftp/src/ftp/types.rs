//! Shared types for the FTP crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ─── Configuration ───────────────────────────────────────────────────

/// How the data connection is opened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    /// `PASV` (RFC 959).
    #[default]
    Passive,
    /// `EPSV` (RFC 2428); connects back to the control host.
    ExtendedPassive,
}

/// Client-wide FTP settings; per-server identity comes from the descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FtpConfig {
    #[serde(default)]
    pub data_channel_mode: DataChannelMode,
    /// TCP connect timeout for the control connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Timeout for each control reply.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Data-channel connect and idle timeout.
    #[serde(default = "default_data_timeout")]
    pub data_timeout_secs: u64,
    /// Use MLSD when the server advertises it.
    #[serde(default = "default_true")]
    pub prefer_mlsd: bool,
    /// Send `OPTS UTF8 ON` when advertised.
    #[serde(default = "default_true")]
    pub utf8: bool,
}

fn default_connect_timeout() -> u64 {
    15
}
fn default_command_timeout() -> u64 {
    30
}
fn default_data_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            data_channel_mode: DataChannelMode::Passive,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            data_timeout_secs: default_data_timeout(),
            prefer_mlsd: true,
            utf8: true,
        }
    }
}

impl FtpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_secs)
    }
}

// ─── Wire ────────────────────────────────────────────────────────────

/// A complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// Full response text (all lines joined).
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Last line without the reply code, e.g. `Transfer complete`.
    pub fn message(&self) -> &str {
        self.lines
            .last()
            .map(|l| l.get(4..).unwrap_or("").trim())
            .unwrap_or("")
    }

    /// Positive preliminary (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Positive completion (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Positive intermediate (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

/// Capabilities advertised in the `FEAT` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFeatures {
    pub mlsd: bool,
    pub size: bool,
    pub mdtm: bool,
    pub utf8: bool,
    pub epsv: bool,
    pub raw_features: Vec<String>,
}

// ─── Listing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpEntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One parsed listing line.
#[derive(Debug, Clone, PartialEq)]
pub struct FtpEntry {
    pub name: String,
    pub kind: FtpEntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub link_target: Option<String>,
}
