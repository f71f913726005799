pub mod smb;

pub use smb::{SmbClient, SmbConfig, SmbSession};
