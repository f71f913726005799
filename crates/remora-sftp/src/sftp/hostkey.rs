// ── Host-key verification against known_hosts ────────────────────────────────

use crate::sftp::error::map_ssh_error;
use crate::sftp::types::KnownHostsPolicy;
use remora_core::{EngineError, EngineResult};
use ssh2::{CheckResult, KnownHostFileKind, KnownHostKeyFormat, Session};
use std::path::Path;

/// `known_hosts` host token: plain for port 22, `[host]:port` otherwise.
pub(crate) fn host_entry(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Check the negotiated host key. Runs on the blocking pool after the
/// handshake, before any credential is sent.
pub(crate) fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    policy: KnownHostsPolicy,
    known_hosts: Option<&Path>,
) -> EngineResult<()> {
    if policy == KnownHostsPolicy::AcceptAll {
        log::warn!(
            "Host key verification disabled for {}:{}; the connection is open to impersonation",
            host,
            port
        );
        return Ok(());
    }

    let (key, key_type) = session
        .host_key()
        .ok_or_else(|| EngineError::protocol(format!("{} presented no host key", host)))?;

    let mut known = session
        .known_hosts()
        .map_err(|e| map_ssh_error(e, "known_hosts init"))?;
    if let Some(path) = known_hosts.filter(|p| p.exists()) {
        known
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(|e| map_ssh_error(e, &format!("read {}", path.display())))?;
    }

    match known.check_port(host, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(EngineError::auth_failed(format!(
            "Host key for {}:{} does not match known_hosts; refusing to connect",
            host, port
        ))),
        CheckResult::NotFound if policy == KnownHostsPolicy::Strict => Err(EngineError::auth_failed(
            format!("{}:{} is not in known_hosts (strict host key policy)", host, port),
        )),
        CheckResult::NotFound => {
            log::info!("Recording new host key for {}:{}", host, port);
            let Some(path) = known_hosts else {
                return Ok(());
            };
            known
                .add(
                    &host_entry(host, port),
                    key,
                    "added by remora",
                    KnownHostKeyFormat::from(key_type),
                )
                .map_err(|e| map_ssh_error(e, "known_hosts add"))?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            known
                .write_file(path, KnownHostFileKind::OpenSSH)
                .map_err(|e| map_ssh_error(e, &format!("write {}", path.display())))?;
            Ok(())
        }
        CheckResult::Failure => Err(EngineError::protocol(format!(
            "Host key check failed for {}:{}",
            host, port
        ))),
    }
}
