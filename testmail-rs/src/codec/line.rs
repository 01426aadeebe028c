//! CRLF line framing over a buffered async stream

use crate::codec::dot::{stuff_block, TERMINATOR};
use crate::error::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Owns one connection and is its only writer.
///
/// Every write is flushed before returning, so a reply is never left
/// half-buffered while the session waits for the next client line.
pub struct LineCodec<S> {
    stream: BufReader<S>,
}

impl<S> LineCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read one raw line including its terminator. `None` at end of stream.
    ///
    /// A final unterminated fragment before EOF is returned as a line.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let n = self.stream.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        debug!("recv {}", show_raw(&line));
        Ok(Some(line))
    }

    /// Write `content` followed by CRLF.
    pub async fn write_line(&mut self, content: &str) -> Result<()> {
        self.write_raw_line(content.as_bytes()).await
    }

    /// Write a sequence of lines as a single flush.
    pub async fn write_lines<T: AsRef<str>>(&mut self, lines: &[T]) -> Result<()> {
        let mut buf = Vec::new();
        for line in lines {
            debug!("send {}", line.as_ref());
            buf.extend_from_slice(line.as_ref().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send `payload` as a dot-stuffed multi-line block followed by the `.`
    /// terminator line.
    pub async fn send_multiline(&mut self, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(payload.len() + 16);
        for line in stuff_block(payload) {
            buf.extend_from_slice(&line);
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(TERMINATOR);
        buf.extend_from_slice(b"\r\n");

        debug!("send multi-line block ({} bytes)", buf.len());
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn write_raw_line(&mut self, content: &[u8]) -> Result<()> {
        debug!("send {}", String::from_utf8_lossy(content));
        let mut buf = Vec::with_capacity(content.len() + 2);
        buf.extend_from_slice(content);
        buf.extend_from_slice(b"\r\n");
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Render a raw line for logging with CR, LF and TAB made visible; a hex dump
/// is appended when the line holds any non-printable byte.
pub fn show_raw(raw: &[u8]) -> String {
    let mut visible = String::with_capacity(raw.len() + 8);
    let mut printable = true;

    for &b in raw {
        match b {
            b'\r' => visible.push_str("\\r"),
            b'\n' => visible.push_str("\\n"),
            b'\t' => visible.push_str("\\t"),
            0x20..=0x7e => visible.push(b as char),
            _ => {
                visible.push('?');
                printable = false;
            }
        }
    }

    if printable {
        return visible;
    }

    let hex: String = raw.iter().map(|b| format!("{:02X}", b)).collect();
    format!("{} [hex: {}]", visible, hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_read_lines_until_eof() {
        let (mut client, server) = duplex(1024);
        let mut codec = LineCodec::new(server);

        client.write_all(b"USER bob\r\nPASS x\r\npartial").await.unwrap();
        drop(client);

        assert_eq!(codec.read_line().await.unwrap(), Some(b"USER bob\r\n".to_vec()));
        assert_eq!(codec.read_line().await.unwrap(), Some(b"PASS x\r\n".to_vec()));
        assert_eq!(codec.read_line().await.unwrap(), Some(b"partial".to_vec()));
        assert_eq!(codec.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_multiline_stuffs_and_terminates() {
        let (mut client, server) = duplex(1024);
        let mut codec = LineCodec::new(server);

        codec.write_line("+OK").await.unwrap();
        codec.send_multiline(b"a\r\n.b\r\n").await.unwrap();
        drop(codec);

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "+OK\r\na\r\n..b\r\n.\r\n");
    }

    #[test]
    fn test_show_raw() {
        assert_eq!(show_raw(b"NOOP\r\n"), "NOOP\\r\\n");
        assert_eq!(show_raw(b"a\x00"), "a? [hex: 6100]");
    }

    #[test]
    fn test_show_raw_line_endings_and_tabs_skip_hex() {
        assert_eq!(show_raw(b"\tx\n"), "\\tx\\n");
        assert_eq!(
            show_raw(b"caf\xc3\xa9\r\n"),
            "caf??\\r\\n [hex: 636166C3A90D0A]"
        );
    }
}
