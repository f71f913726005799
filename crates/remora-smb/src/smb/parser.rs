//! Parser for smbclient `ls` output.
//!
//! ```text
//!   .                                   D        0  Mon Jan  1 12:00:00 2024
//!   photo.jpg                           A   123456  Tue Feb  6 09:15:42 2024
//!   Old Albums                          D        0  Sat Dec 30 18:01:07 2023
//!
//!         122880 blocks of size 4096. 60000 blocks available
//! ```

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LS_LINE: Option<Regex> = Regex::new(
        r"^\s{2}(?P<name>.+?)\s+(?P<attr>[DAHSRNLIC]*)\s+(?P<size>\d+)\s+(?P<date>[A-Z][a-z]{2}\s+[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+\d{4})\s*$"
    )
    .ok();
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmbEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Parse every entry line; `.`, `..` and the trailing summary are skipped.
pub fn parse_ls(output: &str) -> Vec<SmbEntry> {
    let Some(re) = LS_LINE.as_ref() else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let name = caps.name("name")?.as_str().to_string();
            if name == "." || name == ".." {
                return None;
            }
            let is_directory = caps.name("attr")?.as_str().contains('D');
            Some(SmbEntry {
                name,
                is_directory,
                size: if is_directory {
                    0
                } else {
                    caps.name("size")?.as_str().parse().unwrap_or(0)
                },
                modified: parse_time(caps.name("date")?.as_str()),
            })
        })
        .collect()
}

/// smbclient prints local time as `%a %b %e %H:%M:%S %Y`.
fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let normalised = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let naive = NaiveDateTime::parse_from_str(&normalised, "%a %b %d %H:%M:%S %Y").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
