//! Resource addressing.
//!
//! ```text
//! smb://host[:port]/share/remote/path
//! sftp://host[:port]/remote/path
//! ftp://host[:port]/remote/path
//! file:///absolute/local/path
//! cloud://providerId/fileId
//! ```
//!
//! SFTP and FTP have no share component: the whole path is the remote path.

use crate::error::{EngineError, EngineResult};
use crate::types::{ConnectionDescriptor, Protocol, Scheme};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

/// A path on a remote server, plus the connection identity needed to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteLocation {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    /// SMB share name; empty for SFTP/FTP.
    pub share: String,
    /// `/`-separated path below the share (SMB, no leading slash) or the
    /// absolute server path (SFTP/FTP, leading slash).
    pub path: String,
}

impl RemoteLocation {
    pub fn new(protocol: Protocol, host: &str, port: Option<u16>, share: &str, path: &str) -> Self {
        let share = share.trim_matches('/').to_string();
        let path = normalise_path(protocol, path);
        Self {
            protocol,
            host: host.trim().to_ascii_lowercase(),
            port: port.unwrap_or_else(|| protocol.default_port()),
            share,
            path,
        }
    }

    /// Descriptor for the given identity.
    pub fn descriptor(&self, username: &str, domain: Option<&str>) -> ConnectionDescriptor {
        ConnectionDescriptor::new(
            self.protocol,
            &self.host,
            Some(self.port),
            &self.share,
            username,
            domain,
        )
    }

    /// `host:port`, the per-resource throttle key.
    pub fn resource_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
    }

    /// Same server, port and share, i.e. reachable over one session.
    pub fn same_endpoint(&self, other: &RemoteLocation) -> bool {
        self.protocol == other.protocol
            && self.host == other.host
            && self.port == other.port
            && self.share.eq_ignore_ascii_case(&other.share)
    }

    /// A location on the same endpoint with a different path.
    pub fn with_path(&self, path: &str) -> Self {
        Self {
            path: normalise_path(self.protocol, path),
            ..self.clone()
        }
    }

    /// Child entry of this (directory) location.
    pub fn join(&self, name: &str) -> Self {
        let base = self.path.trim_end_matches('/');
        let joined = if base.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", base, name)
        };
        self.with_path(&joined)
    }

    /// Parent directory; `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.path.trim_end_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        let parent = match trimmed.rfind('/') {
            Some(idx) => &trimmed[..idx],
            None => "",
        };
        Some(self.with_path(parent))
    }
}

fn normalise_path(protocol: Protocol, path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let joined = segments.join("/");
    match protocol {
        Protocol::Smb => joined,
        Protocol::Sftp | Protocol::Ftp => format!("/{}", joined),
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)?;
        if !self.share.is_empty() {
            write!(f, "/{}", utf8_percent_encode(&self.share, SEGMENT))?;
        }
        for seg in self.path.split('/').filter(|s| !s.is_empty()) {
            write!(f, "/{}", utf8_percent_encode(seg, SEGMENT))?;
        }
        Ok(())
    }
}

/// Any resource the engine can address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceUri {
    Remote(RemoteLocation),
    Local(PathBuf),
    Cloud { provider_id: String, file_id: String },
}

impl ResourceUri {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| EngineError::invalid_input(format!("Invalid URI '{}': {}", raw, e)))?;
        let scheme = Scheme::parse(url.scheme()).ok_or_else(|| {
            EngineError::unsupported(format!("Unsupported scheme '{}'", url.scheme()))
        })?;

        match scheme {
            Scheme::File => {
                let path = url.to_file_path().map_err(|_| {
                    EngineError::invalid_input(format!("Not an absolute file URI: '{}'", raw))
                })?;
                Ok(ResourceUri::Local(path))
            }
            Scheme::Cloud => {
                let provider_id = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| EngineError::invalid_input(format!("Missing provider in '{}'", raw)))?
                    .to_string();
                let file_id = decoded_segments(&url)?.join("/");
                if file_id.is_empty() {
                    return Err(EngineError::invalid_input(format!("Missing file id in '{}'", raw)));
                }
                Ok(ResourceUri::Cloud {
                    provider_id,
                    file_id,
                })
            }
            Scheme::Smb | Scheme::Sftp | Scheme::Ftp => {
                let protocol = scheme
                    .protocol()
                    .ok_or_else(|| EngineError::unsupported(format!("No protocol for '{}'", scheme)))?;
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| EngineError::invalid_input(format!("Missing host in '{}'", raw)))?;
                let segments = decoded_segments(&url)?;
                let (share, path) = match protocol {
                    Protocol::Smb => {
                        let mut it = segments.into_iter();
                        let share = it.next().unwrap_or_default();
                        (share, it.collect::<Vec<_>>().join("/"))
                    }
                    _ => (String::new(), segments.join("/")),
                };
                Ok(ResourceUri::Remote(RemoteLocation::new(
                    protocol,
                    host,
                    url.port(),
                    &share,
                    &path,
                )))
            }
        }
    }

    pub fn local(path: impl AsRef<Path>) -> Self {
        ResourceUri::Local(path.as_ref().to_path_buf())
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            ResourceUri::Remote(loc) => loc.protocol.scheme(),
            ResourceUri::Local(_) => Scheme::File,
            ResourceUri::Cloud { .. } => Scheme::Cloud,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteLocation> {
        match self {
            ResourceUri::Remote(loc) => Some(loc),
            _ => None,
        }
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            ResourceUri::Local(p) => Some(p.as_path()),
            _ => None,
        }
    }

    /// Child entry of this (directory) resource.
    pub fn join(&self, name: &str) -> EngineResult<Self> {
        match self {
            ResourceUri::Remote(loc) => Ok(ResourceUri::Remote(loc.join(name))),
            ResourceUri::Local(p) => Ok(ResourceUri::Local(p.join(name))),
            ResourceUri::Cloud { .. } => Err(EngineError::unsupported(
                "cloud resources have no directory structure",
            )),
        }
    }

    /// Final path component.
    pub fn name(&self) -> String {
        match self {
            ResourceUri::Remote(loc) => loc.name().to_string(),
            ResourceUri::Local(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            ResourceUri::Cloud { file_id, .. } => file_id.clone(),
        }
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceUri::Remote(loc) => loc.fmt(f),
            ResourceUri::Local(p) => match Url::from_file_path(p) {
                Ok(u) => f.write_str(u.as_str()),
                Err(_) => write!(f, "file://{}", p.display()),
            },
            ResourceUri::Cloud {
                provider_id,
                file_id,
            } => write!(
                f,
                "cloud://{}/{}",
                provider_id,
                utf8_percent_encode(file_id, SEGMENT)
            ),
        }
    }
}

impl std::str::FromStr for ResourceUri {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceUri::parse(s)
    }
}

fn decoded_segments(url: &Url) -> EngineResult<Vec<String>> {
    let Some(segments) = url.path_segments() else {
        return Ok(Vec::new());
    };
    segments
        .filter(|s| !s.is_empty())
        .map(|s| {
            percent_decode_str(s)
                .decode_utf8()
                .map(|c| c.into_owned())
                .map_err(|e| EngineError::invalid_input(format!("Bad percent-encoding in '{}': {}", s, e)))
        })
        .collect()
}
