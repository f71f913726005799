// ── remora-sftp / sftp module ─────────────────────────────────────────────────
//
// SFTP driver over libssh2:
//   • Session setup with explicit host-key policy (TOFU, strict, accept-all)
//   • Private-key (inline PEM or file), password and keyboard-interactive auth
//   • Directory listing, stat, rename, mkdir, delete
//   • Streaming uploads / downloads with progress
//   • Keepalive liveness probe

pub mod auth;
pub mod client;
pub mod error;
pub mod hostkey;
pub mod session;
pub mod types;

pub use client::SftpClient;
pub use session::SftpSession;
pub use types::*;
