//! # remora-smb: SMB/CIFS via `smbclient`
//!
//! Each operation runs one `smbclient //host/share -c '<cmd>'` invocation;
//! there is no persistent SMB connection behind an [`SmbSession`], only the
//! target and a private auth file.
//!
//! - `types`: driver configuration
//! - `command`: quoting of share paths and local paths
//! - `status`: NT_STATUS → error kind
//! - `parser`: `ls` output
//! - `session`: subprocess invocation and the file operations
//! - `client`: the `ProtocolClient` implementation

pub mod client;
pub mod command;
pub mod parser;
pub mod session;
pub mod status;
pub mod types;

pub use client::SmbClient;
pub use session::SmbSession;
pub use types::SmbConfig;
