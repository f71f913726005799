//! LIST / MLSD reply body parser.
//!
//! Three line formats are recognised, tried in this order:
//! 1. MLSD facts (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//! 2. Unix `ls -l`: `-rw-r--r-- 1 owner group 1234 Jan  1 12:00 file.txt`
//! 3. Windows/IIS: `01-01-26  12:00AM       1234 file.txt`
//!
//! Lines matching none of them are dropped.

use crate::ftp::types::{FtpEntry, FtpEntryKind};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNIX_LINE: Option<Regex> = Regex::new(
        r"(?x)
        ^([dlcbps-][rwxsStT-]{9})[+@.]?\s+  # mode
        \d+\s+                              # link count
        \S+\s+                              # owner
        (?:\S+\s+)?                         # group (absent on some servers)
        (\d+)\s+                            # size
        (\w{3}\s+\d{1,2}\s+[\d:]{4,5})\s    # date
        (.+)$                               # name, possibly `name -> target`
        ",
    )
    .ok();
    static ref WINDOWS_LINE: Option<Regex> = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+           # date
        (\d{1,2}:\d{2}(?:AM|PM)?)\s+        # time
        (<DIR>|\d+)\s+                      # size or <DIR>
        (.+)$                               # name
        ",
    )
    .ok();
}

/// Parse a complete LIST or MLSD body. `.` and `..` are filtered out.
pub fn parse_listing(raw: &str) -> Vec<FtpEntry> {
    raw.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .filter_map(parse_line)
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

fn parse_line(line: &str) -> Option<FtpEntry> {
    if line.contains('=') && line.contains(';') {
        if let Some(e) = parse_mlsd(line) {
            return Some(e);
        }
    }
    parse_unix(line).or_else(|| parse_windows(line.trim()))
}

// ─── MLSD ────────────────────────────────────────────────────────────

fn parse_mlsd(line: &str) -> Option<FtpEntry> {
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut kind = FtpEntryKind::Unknown;
    let mut size = 0;
    let mut modified = None;
    for fact in facts.split(';') {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match value.to_ascii_lowercase().as_str() {
                    "file" => FtpEntryKind::File,
                    "dir" | "cdir" | "pdir" => FtpEntryKind::Directory,
                    "os.unix=symlink" | "os.unix=slink" => FtpEntryKind::Symlink,
                    _ => FtpEntryKind::Unknown,
                }
            }
            "size" => size = value.parse().unwrap_or(0),
            "modify" => modified = parse_mlsd_time(value),
            _ => {}
        }
    }

    // `cdir`/`pdir` entries describe the listed directory itself.
    if facts.to_ascii_lowercase().contains("type=cdir") || facts.to_ascii_lowercase().contains("type=pdir") {
        return None;
    }

    Some(FtpEntry {
        name: name.to_string(),
        kind,
        size,
        modified,
        link_target: None,
    })
}

/// `YYYYMMDDHHMMSS[.sss]`, always UTC.
fn parse_mlsd_time(s: &str) -> Option<DateTime<Utc>> {
    let base = s.get(..14)?;
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Unix ────────────────────────────────────────────────────────────

fn parse_unix(line: &str) -> Option<FtpEntry> {
    let caps = UNIX_LINE.as_ref()?.captures(line)?;
    let mode = caps.get(1)?.as_str();
    let size = caps.get(2)?.as_str().parse::<u64>().unwrap_or(0);
    let modified = parse_unix_date(caps.get(3)?.as_str(), Utc::now());
    let raw_name = caps.get(4)?.as_str();

    let kind = match mode.as_bytes().first() {
        Some(b'd') => FtpEntryKind::Directory,
        Some(b'l') => FtpEntryKind::Symlink,
        Some(b'-') => FtpEntryKind::File,
        _ => FtpEntryKind::Unknown,
    };

    let (name, link_target) = match (kind, raw_name.split_once(" -> ")) {
        (FtpEntryKind::Symlink, Some((n, t))) => (n.to_string(), Some(t.to_string())),
        _ => (raw_name.to_string(), None),
    };

    Some(FtpEntry {
        name,
        kind,
        size,
        modified,
        link_target,
    })
}

/// `Jan  1 12:00` (within the last six months) or `Jan  1  2025`.
fn parse_unix_date(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let normalised = s.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalised.contains(':') {
        let with_year = format!("{} {}", now.year(), normalised);
        let dt = NaiveDateTime::parse_from_str(&with_year, "%Y %b %d %H:%M").ok()?;
        let dt = Utc.from_utc_datetime(&dt);
        // A date in the future belongs to the previous year.
        if dt > now + chrono::Duration::days(1) {
            let prev = format!("{} {}", now.year() - 1, normalised);
            let dt = NaiveDateTime::parse_from_str(&prev, "%Y %b %d %H:%M").ok()?;
            return Some(Utc.from_utc_datetime(&dt));
        }
        return Some(dt);
    }

    let date = NaiveDate::parse_from_str(&normalised, "%b %d %Y").ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

// ─── Windows ─────────────────────────────────────────────────────────

fn parse_windows(line: &str) -> Option<FtpEntry> {
    let caps = WINDOWS_LINE.as_ref()?.captures(line)?;
    let date = caps.get(1)?.as_str();
    let time = caps.get(2)?.as_str();
    let size_or_dir = caps.get(3)?.as_str();
    let name = caps.get(4)?.as_str().to_string();

    let (kind, size) = if size_or_dir == "<DIR>" {
        (FtpEntryKind::Directory, 0)
    } else {
        (FtpEntryKind::File, size_or_dir.parse().unwrap_or(0))
    };

    Some(FtpEntry {
        name,
        kind,
        size,
        modified: parse_windows_date(date, time),
        link_target: None,
    })
}

fn parse_windows_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let combined = format!("{} {}", date, time);
    ["%m-%d-%y %I:%M%p", "%m-%d-%Y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&combined, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mlsd_and_skips_cdir() {
        let body = "type=cdir;modify=20260101000000; .\r\n\
                    type=file;size=1234;modify=20260102030405; holiday photo.jpg\r\n\
                    type=dir;modify=20260101120000; Videos\r\n";
        let entries = parse_listing(body);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "holiday photo.jpg");
        assert_eq!(entries[0].kind, FtpEntryKind::File);
        assert_eq!(entries[0].size, 1234);
        assert_eq!(
            entries[0].modified,
            Some(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap())
        );
        assert_eq!(entries[1].kind, FtpEntryKind::Directory);
    }

    #[test]
    fn parses_unix_listing() {
        let body = "total 12\n\
                    drwxr-xr-x   2 ftp ftp  4096 Jan  1  2025 .\n\
                    drwxr-xr-x   2 ftp ftp  4096 Jan  1  2025 Music\n\
                    -rw-r--r--   1 ftp ftp  5120 Mar 15  2024 clip one.mp4\n\
                    lrwxrwxrwx   1 ftp ftp     9 Jun  1  2024 latest -> clip one.mp4\n";
        let entries = parse_listing(body);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, FtpEntryKind::Directory);
        assert_eq!(entries[1].name, "clip one.mp4");
        assert_eq!(entries[1].size, 5120);
        assert_eq!(
            entries[1].modified,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(entries[2].name, "latest");
        assert_eq!(entries[2].link_target.as_deref(), Some("clip one.mp4"));
    }

    #[test]
    fn recent_unix_dates_roll_back_a_year() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let dt = parse_unix_date("Dec 24 18:30", now).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 12, 24, 18, 30, 0).unwrap());
        let dt = parse_unix_date("Jan  5 09:00", now).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn parses_windows_listing() {
        let body = "01-15-26  03:30PM       <DIR>          Photos\r\n\
                    01-16-26  09:05AM              2048 report.pdf\r\n";
        let entries = parse_listing(body);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, FtpEntryKind::Directory);
        assert_eq!(entries[1].size, 2048);
        assert_eq!(
            entries[1].modified,
            Some(Utc.with_ymd_and_hms(2026, 1, 16, 9, 5, 0).unwrap())
        );
    }

    #[test]
    fn unparseable_lines_are_dropped() {
        assert!(parse_listing("garbage\n\n").is_empty());
    }
}
