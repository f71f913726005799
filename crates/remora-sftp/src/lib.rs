pub mod sftp;

pub use sftp::{KnownHostsPolicy, SftpClient, SftpConfig, SftpSession};
