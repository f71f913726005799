pub mod ftp;

pub use ftp::{DataChannelMode, FtpClient, FtpConfig, FtpSession};
