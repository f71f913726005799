//! # remora-ftp: native FTP client
//!
//! RFC 959 with the extensions a media browser needs:
//! - **RFC 2389**: FEAT negotiation
//! - **RFC 3659**: MLSD, SIZE
//! - **RFC 2428**: EPSV
//!
//! Architecture:
//! - `types`: configuration, replies, listing entries
//! - `error`: reply code → error kind mapping
//! - `protocol`: low-level command/response codec
//! - `transfer`: passive data channels (PASV/EPSV)
//! - `parser`: Unix/Windows/MLSD listing parser
//! - `session`: one authenticated control connection
//! - `client`: the `ProtocolClient` implementation

pub mod client;
pub mod error;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::FtpClient;
pub use session::FtpSession;
pub use types::*;
