//! Passive data channels (RFC 959 `PASV`, RFC 2428 `EPSV`).

use crate::ftp::error::from_reply;
use crate::ftp::protocol::FtpCodec;
use crate::ftp::types::DataChannelMode;
use lazy_static::lazy_static;
use regex::Regex;
use remora_core::{EngineError, EngineResult};
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

lazy_static! {
    static ref PASV_ADDR: Option<Regex> =
        Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})").ok();
    static ref EPSV_PORT: Option<Regex> = Regex::new(r"\((.)(.)(.)(\d+)(.)\)").ok();
}

/// Negotiate a passive data connection and connect to it.
///
/// `control_peer` is the address of the control connection; it replaces a
/// PASV address of `0.0.0.0` and is the only host EPSV ever connects to.
pub async fn open_data_channel(
    codec: &mut FtpCodec,
    mode: DataChannelMode,
    control_peer: SocketAddr,
    data_timeout: Duration,
) -> EngineResult<TcpStream> {
    let addr = match mode {
        DataChannelMode::Passive => {
            let resp = codec.execute("PASV").await?;
            if resp.code != 227 {
                return Err(from_reply(resp.code, resp.message()));
            }
            let mut addr = parse_pasv_response(&resp.text())?;
            if addr.ip().is_unspecified() {
                addr.set_ip(control_peer.ip());
            }
            addr
        }
        DataChannelMode::ExtendedPassive => {
            let resp = codec.execute("EPSV").await?;
            if resp.code != 229 {
                return Err(from_reply(resp.code, resp.message()));
            }
            SocketAddr::new(control_peer.ip(), parse_epsv_response(&resp.text())?)
        }
    };

    log::debug!("Opening FTP data channel to {}", addr);
    match timeout(data_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(EngineError::network(format!("Data connection to {} failed: {}", addr, e))),
        Err(_) => Err(EngineError::timeout(format!("Data connection to {} timed out", addr))),
    }
}

/// `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
pub(crate) fn parse_pasv_response(text: &str) -> EngineResult<SocketAddr> {
    let caps = PASV_ADDR
        .as_ref()
        .and_then(|re| re.captures(text))
        .ok_or_else(|| EngineError::protocol(format!("Cannot parse PASV reply: {}", text)))?;

    let mut nums = [0u8; 6];
    for (i, slot) in nums.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse::<u8>()
            .map_err(|_| EngineError::protocol(format!("PASV value out of range: {}", text)))?;
    }
    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok(SocketAddr::new(ip, port))
}

/// `229 Entering Extended Passive Mode (|||port|)`
pub(crate) fn parse_epsv_response(text: &str) -> EngineResult<u16> {
    let caps = EPSV_PORT
        .as_ref()
        .and_then(|re| re.captures(text))
        .ok_or_else(|| EngineError::protocol(format!("Cannot parse EPSV reply: {}", text)))?;
    let delim = &caps[1];
    if &caps[2] != delim || &caps[3] != delim || &caps[5] != delim {
        return Err(EngineError::protocol(format!("Malformed EPSV reply: {}", text)));
    }
    caps[4]
        .parse::<u16>()
        .map_err(|_| EngineError::protocol(format!("EPSV port out of range: {}", text)))
}
