//! Low-level FTP command/response codec (RFC 959 §4).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n`
//! - Reading single-line and multi-line replies
//! - Parsing the 3-digit reply code

use crate::ftp::types::FtpResponse;
use remora_core::{EngineError, EngineResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// The FTP command/response codec operating on split halves.
pub struct FtpCodec {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FtpCodec {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::new(rd),
            writer: wr,
        }
    }

    /// Send a raw FTP command (without the trailing CRLF).
    pub async fn send_command(&mut self, cmd: &str) -> EngineResult<()> {
        if cmd.contains('\r') || cmd.contains('\n') {
            return Err(EngineError::invalid_input("FTP command must be a single line"));
        }
        let line = format!("{}\r\n", cmd);
        self.writer.write_all(line.as_bytes()).await?;
        if cmd.starts_with("PASS ") {
            log::trace!(">>> PASS ****");
        } else {
            log::trace!(">>> {}", cmd);
        }
        Ok(())
    }

    /// Read a single line from the control channel (including CRLF).
    async fn read_line_raw(&mut self) -> EngineResult<String> {
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf).await?;
        if n == 0 {
            return Err(EngineError::network("Server closed the control connection"));
        }
        Ok(buf)
    }

    /// Read a complete FTP response (possibly multi-line).
    ///
    /// Multi-line responses look like:
    /// ```text
    /// 220-Welcome to my FTP server
    /// 220-This is line 2
    /// 220 End of greeting
    /// ```
    pub async fn read_response(&mut self) -> EngineResult<FtpResponse> {
        let first = self.read_line_raw().await?;
        let first_trimmed = first.trim_end_matches(['\r', '\n']);
        let code = parse_code(first_trimmed)?;
        let mut lines = vec![first_trimmed.to_string()];

        // "NNN-" means more lines follow until "NNN " is seen.
        if first_trimmed.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let next = self.read_line_raw().await?;
                let next_trimmed = next.trim_end_matches(['\r', '\n']);
                lines.push(next_trimmed.to_string());
                if next_trimmed.starts_with(&terminator) || next_trimmed == terminator.trim_end() {
                    break;
                }
            }
        }

        let resp = FtpResponse { code, lines };
        log::trace!("<<< {} {}", resp.code, resp.message());
        Ok(resp)
    }

    /// Send a command and return the response.
    pub async fn execute(&mut self, cmd: &str) -> EngineResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Parse the 3-digit reply code from the start of a line.
fn parse_code(line: &str) -> EngineResult<u16> {
    let code = line
        .get(..3)
        .ok_or_else(|| EngineError::protocol(format!("Response too short: '{}'", line)))?;
    match code.parse::<u16>() {
        Ok(c) if (100..600).contains(&c) => Ok(c),
        _ => Err(EngineError::protocol(format!("Invalid reply code in: '{}'", line))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair(server_bytes: &'static [u8]) -> (FtpCodec, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(server_bytes).await.unwrap();
            sock.shutdown().await.unwrap();
            let mut received = Vec::new();
            let _ = sock.read_to_end(&mut received).await;
            received
        });
        let codec = FtpCodec::from_tcp(TcpStream::connect(addr).await.unwrap());
        (codec, server)
    }

    #[tokio::test]
    async fn reads_multi_line_reply() {
        let (mut codec, _server) =
            pair(b"220-Welcome\r\n220-second line\r\n 220 indented is not the end\r\n220 Ready\r\n").await;
        let resp = codec.read_response().await.unwrap();
        assert_eq!(resp.code, 220);
        assert_eq!(resp.lines.len(), 4);
        assert_eq!(resp.message(), "Ready");
    }

    #[tokio::test]
    async fn closed_connection_is_network_error() {
        let (mut codec, _server) = pair(b"").await;
        let err = codec.read_response().await.unwrap_err();
        assert_eq!(err.kind, remora_core::ErrorKind::NetworkUnreachable);
    }

    #[tokio::test]
    async fn rejects_garbage_and_multiline_commands() {
        let (mut codec, _server) = pair(b"hello\r\n").await;
        assert_eq!(
            codec.read_response().await.unwrap_err().kind,
            remora_core::ErrorKind::ProtocolError
        );
        assert_eq!(
            codec.send_command("DELE a\r\nQUIT").await.unwrap_err().kind,
            remora_core::ErrorKind::InvalidInput
        );
    }
}
