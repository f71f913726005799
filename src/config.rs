//! Engine configuration.
//!
//! One camelCase JSON document; every field has a default, so an empty
//! object (or a missing file) yields a working configuration.

use remora_core::progress::DEFAULT_PROGRESS_INTERVAL;
use remora_core::{EngineError, EngineResult};
use remora_credentials::DEFAULT_PBKDF2_ITERATIONS;
use remora_ftp::FtpConfig;
use remora_pool::{PoolConfig, ThrottleConfig};
use remora_sftp::SftpConfig;
use remora_smb::SmbConfig;
use remora_transfer::UnifiedFileCache;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub smb: SmbConfig,
    #[serde(default)]
    pub sftp: SftpConfig,
    #[serde(default)]
    pub ftp: FtpConfig,
    /// Minimum time between two progress snapshots.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_cache_dir() -> PathBuf {
    UnifiedFileCache::default_root()
}

fn default_progress_interval_ms() -> u64 {
    DEFAULT_PROGRESS_INTERVAL.as_millis() as u64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig::default(),
            pool: PoolConfig::default(),
            cache_dir: default_cache_dir(),
            smb: SmbConfig::default(),
            sftp: SftpConfig::default(),
            ftp: FtpConfig::default(),
            progress_interval_ms: default_progress_interval_ms(),
            credentials: CredentialsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read the configuration from `path`. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Self::default()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                EngineError::invalid_input(format!("Invalid config {}: {}", path.display(), e))
                    .with_cause(e)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Credential storage and fallback identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    /// JSON credential store; `None` keeps credentials in memory only.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub default_username: String,
    /// Plaintext or an `enc:v1:` envelope; encrypted in memory at startup.
    #[serde(default)]
    pub default_password: Option<String>,
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,
}

fn default_pbkdf2_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            default_username: String::new(),
            default_password: None,
            pbkdf2_iterations: default_pbkdf2_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `remora_ftp=trace,info`.
    #[serde(default = "default_level")]
    pub level: String,
    /// One JSON object per line instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_ftp::DataChannelMode;
    use remora_sftp::KnownHostsPolicy;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.pool.idle_timeout_secs, 45);
        assert_eq!(config.throttle.smb.per_resource, 4);
        assert_eq!(config.throttle.ftp.global, 4);
        assert_eq!(config.sftp.known_hosts_policy, KnownHostsPolicy::AcceptNew);
        assert!(config.cache_dir.ends_with("remora"));
    }

    #[test]
    fn partial_documents_are_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remora.json");
        std::fs::write(
            &path,
            r#"{
                "ftp": { "dataChannelMode": "extendedPassive" },
                "throttle": { "sftp": { "perResource": 1, "global": 1 } },
                "credentials": { "defaultUsername": "guest" },
                "logging": { "json": true }
            }"#,
        )
        .unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.ftp.data_channel_mode, DataChannelMode::ExtendedPassive);
        assert_eq!(config.ftp.command_timeout_secs, 30);
        assert_eq!(config.throttle.sftp.per_resource, 1);
        assert_eq!(config.throttle.smb.per_resource, 4);
        assert_eq!(config.credentials.default_username, "guest");
        assert_eq!(config.credentials.pbkdf2_iterations, DEFAULT_PBKDF2_ITERATIONS);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert_eq!(err.kind, remora_core::ErrorKind::InvalidInput);
    }
}
