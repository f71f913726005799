//! Media discovery over remote and local filesystems.

pub mod filter;
pub mod scanner;

pub use filter::{ScanFilter, ScanOptions, ScanProgress};
pub use scanner::{ChunkedScan, MediaScanner, ScanPage};
