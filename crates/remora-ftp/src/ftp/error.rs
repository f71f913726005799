//! FTP reply codes → engine error taxonomy.

use remora_core::{EngineError, ErrorKind};

/// Classify a negative reply into the most appropriate error kind.
pub fn from_reply(code: u16, text: &str) -> EngineError {
    let lower = text.to_lowercase();
    let kind = match code {
        421 | 425 | 426 => ErrorKind::NetworkUnreachable,
        430 | 530 | 332 => ErrorKind::AuthFailed,
        450 | 550 | 553 => {
            if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
                ErrorKind::PermissionDenied
            } else if lower.contains("exist") && !lower.contains("not exist") && !lower.contains("n't exist") {
                ErrorKind::AlreadyExists
            } else if code == 553 {
                ErrorKind::ProtocolError
            } else {
                ErrorKind::NotFound
            }
        }
        532 => ErrorKind::PermissionDenied,
        _ => ErrorKind::ProtocolError,
    };
    EngineError::new(kind, format!("{} {}", code, text.trim()))
}
