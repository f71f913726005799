//! Building `smbclient -c` command strings.
//!
//! Arguments are double-quoted; smbclient has no escape for a quote inside a
//! quoted argument, so such paths are rejected up front. `;` separates
//! commands in a `-c` string even inside quotes and is rejected too.

use remora_core::{EngineError, EngineResult};
use std::path::Path;

/// Share-relative `/` path → quoted `\` path. The share root is `\`.
pub fn remote_arg(path: &str) -> EngineResult<String> {
    let trimmed = path.trim_matches('/');
    check(trimmed)?;
    if trimmed.is_empty() {
        return Ok("\"\\\"".to_string());
    }
    Ok(format!("\"{}\"", trimmed.replace('/', "\\")))
}

/// Quoted local path for `get`/`put`.
pub fn local_arg(path: &Path) -> EngineResult<String> {
    let s = path
        .to_str()
        .ok_or_else(|| EngineError::invalid_input(format!("Non UTF-8 local path: {}", path.display())))?;
    check(s)?;
    Ok(format!("\"{}\"", s))
}

/// `ls` mask for the contents of `dir`.
pub fn list_mask(dir: &str) -> EngineResult<String> {
    let trimmed = dir.trim_matches('/');
    check(trimmed)?;
    if trimmed.is_empty() {
        Ok("\"*\"".to_string())
    } else {
        Ok(format!("\"{}\\*\"", trimmed.replace('/', "\\")))
    }
}

fn check(s: &str) -> EngineResult<()> {
    if s.contains(['"', ';', '\n', '\r']) {
        return Err(EngineError::invalid_input(format!(
            "Path cannot be passed to smbclient: {:?}",
            s
        )));
    }
    Ok(())
}
