// ── libssh2 error codes → engine error taxonomy ──────────────────────────────

use remora_core::{EngineError, ErrorKind};
use ssh2::ErrorCode;

// SFTP status codes (draft-ietf-secsh-filexfer-02 and later).
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_CONNECTION: i32 = 6;
const FX_CONNECTION_LOST: i32 = 7;
const FX_OP_UNSUPPORTED: i32 = 8;
const FX_NO_SUCH_PATH: i32 = 10;
const FX_FILE_ALREADY_EXISTS: i32 = 11;

pub fn kind_of(code: ErrorCode) -> ErrorKind {
    match code {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => ErrorKind::NotFound,
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => ErrorKind::PermissionDenied,
        ErrorCode::SFTP(FX_FILE_ALREADY_EXISTS) => ErrorKind::AlreadyExists,
        ErrorCode::SFTP(FX_NO_CONNECTION) | ErrorCode::SFTP(FX_CONNECTION_LOST) => {
            ErrorKind::NetworkUnreachable
        }
        ErrorCode::SFTP(FX_OP_UNSUPPORTED) => ErrorKind::Unsupported,
        ErrorCode::SFTP(_) => ErrorKind::ProtocolError,
        // LIBSSH2_ERROR_AUTHENTICATION_FAILED, _PUBLICKEY_UNVERIFIED, _PASSWORD_EXPIRED
        ErrorCode::Session(-18) | ErrorCode::Session(-19) | ErrorCode::Session(-15) => {
            ErrorKind::AuthFailed
        }
        ErrorCode::Session(-9) => ErrorKind::Timeout,
        // socket none / banner recv / banner send / send / disconnect / recv
        ErrorCode::Session(-1)
        | ErrorCode::Session(-2)
        | ErrorCode::Session(-3)
        | ErrorCode::Session(-7)
        | ErrorCode::Session(-13)
        | ErrorCode::Session(-43) => ErrorKind::NetworkUnreachable,
        ErrorCode::Session(_) => ErrorKind::ProtocolError,
    }
}

/// Convert a libssh2 error, naming the path or action it concerns.
pub fn map_ssh_error(err: ssh2::Error, context: &str) -> EngineError {
    let kind = kind_of(err.code());
    EngineError::new(kind, format!("{}: {}", context, err.message())).with_cause(err)
}
