//! `NT_STATUS_*` codes printed by smbclient → engine error taxonomy.

use lazy_static::lazy_static;
use regex::Regex;
use remora_core::{EngineError, ErrorKind};

lazy_static! {
    static ref NT_STATUS: Option<Regex> = Regex::new(r"NT_STATUS_[A-Z0-9_]+").ok();
}

/// First status token in `output`, ignoring `NT_STATUS_OK`.
pub fn extract(output: &str) -> Option<&str> {
    NT_STATUS
        .as_ref()?
        .find_iter(output)
        .map(|m| m.as_str())
        .find(|s| *s != "NT_STATUS_OK")
}

pub fn kind_of(status: &str) -> ErrorKind {
    match status.trim_start_matches("NT_STATUS_") {
        "LOGON_FAILURE" | "WRONG_PASSWORD" | "NO_SUCH_USER" | "ACCOUNT_DISABLED"
        | "ACCOUNT_LOCKED_OUT" | "ACCOUNT_RESTRICTION" | "PASSWORD_EXPIRED"
        | "PASSWORD_MUST_CHANGE" | "INVALID_LOGON_HOURS" | "LOGON_TYPE_NOT_GRANTED" => {
            ErrorKind::AuthFailed
        }
        "ACCESS_DENIED" | "NETWORK_ACCESS_DENIED" | "SHARING_VIOLATION" | "CANNOT_DELETE"
        | "MEDIA_WRITE_PROTECTED" => ErrorKind::PermissionDenied,
        "OBJECT_NAME_NOT_FOUND" | "OBJECT_PATH_NOT_FOUND" | "NO_SUCH_FILE" | "NOT_FOUND"
        | "BAD_NETWORK_NAME" | "OBJECT_NAME_INVALID" => ErrorKind::NotFound,
        "OBJECT_NAME_COLLISION" => ErrorKind::AlreadyExists,
        "IO_TIMEOUT" => ErrorKind::Timeout,
        "HOST_UNREACHABLE" | "NETWORK_UNREACHABLE" | "CONNECTION_REFUSED" | "CONNECTION_RESET"
        | "CONNECTION_DISCONNECTED" | "CONNECTION_ABORTED" | "BAD_NETWORK_PATH"
        | "NETWORK_NAME_DELETED" | "INVALID_NETWORK_RESPONSE" | "END_OF_FILE"
        | "UNSUCCESSFUL" => ErrorKind::NetworkUnreachable,
        "NOT_SUPPORTED" => ErrorKind::Unsupported,
        _ => ErrorKind::ProtocolError,
    }
}

/// Error for a failed invocation; `output` is the merged stdout/stderr.
pub fn to_error(status: Option<&str>, context: &str, output: &str) -> EngineError {
    let detail = output
        .lines()
        .map(str::trim)
        .find(|l| status.map_or(!l.is_empty(), |s| l.contains(s)))
        .unwrap_or("smbclient failed");
    let kind = status.map(kind_of).unwrap_or(ErrorKind::ProtocolError);
    EngineError::new(kind, format!("{}: {}", context, detail))
}
