/*
 * codec.rs
 * Copyright (C) 2026 The mockmail authors
 *
 * This file is part of mockmail, an in-memory multi-protocol (SMTP/IMAP/POP3) mail
 * server used as a test double.
 *
 * mockmail is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mockmail is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mockmail.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Line/literal codec shared by all three protocol sessions.
//!
//! Reads CRLF-terminated lines up to a configurable maximum; IMAP literal continuation
//! (`{N}`/`{N+}`, RFC 7888 LITERAL+) is layered on top by `read_literal` plus the trailing-spec
//! parser below, rather than baked into line reading, since SMTP and POP3 never see literals.
//! Writes are line-buffered and flushed at the end of each response group.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{MailError, MailResult};
use crate::net::MaybeTls;

pub const DEFAULT_MAX_LINE: usize = 65536;

pub struct Codec<S> {
    reader: BufReader<S>,
    max_line: usize,
    /// Bytes accumulated by an in-progress `read_line`. Kept on `self` rather than as a local
    /// so that `read_line` is safe to drop mid-await (e.g. losing a `tokio::select!` race
    /// against IDLE's event stream) without losing already-read bytes of the next line.
    line_buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Codec<S> {
    pub fn new(stream: S) -> Self {
        Self { reader: BufReader::new(stream), max_line: DEFAULT_MAX_LINE, line_buf: Vec::new() }
    }

    pub fn with_max_line(stream: S, max_line: usize) -> Self {
        Self { reader: BufReader::new(stream), max_line, line_buf: Vec::new() }
    }

    /// Swap the underlying stream for an upgraded (TLS) one, preserving `max_line` but
    /// discarding any buffered bytes — safe only when called between commands, never mid-line.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    /// Read one CRLF- (or bare LF-) terminated line, stripped of its terminator. Fails
    /// `Protocol` if the line exceeds `max_line`, `Io` on premature EOF.
    pub async fn read_line(&mut self) -> MailResult<String> {
        loop {
            let mut byte = [0u8; 1];
            let n = tokio::io::AsyncReadExt::read(&mut self.reader, &mut byte).await?;
            if n == 0 {
                if self.line_buf.is_empty() {
                    return Err(MailError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed",
                    )));
                }
                self.line_buf.clear();
                return Err(MailError::protocol("premature EOF mid-line"));
            }
            if byte[0] == b'\n' {
                if self.line_buf.last() == Some(&b'\r') {
                    self.line_buf.pop();
                }
                break;
            }
            self.line_buf.push(byte[0]);
            if self.line_buf.len() > self.max_line {
                self.line_buf.clear();
                return Err(MailError::protocol("line too long"));
            }
        }
        let buf = std::mem::take(&mut self.line_buf);
        String::from_utf8(buf).map_err(|_| MailError::protocol("non-UTF-8 command line"))
    }

    /// Read exactly `n` octets (arbitrary bytes, including NUL and embedded CRLF) for an
    /// IMAP literal payload.
    pub async fn read_literal(&mut self, n: usize) -> MailResult<Vec<u8>> {
        if n > self.max_line * 64 {
            return Err(MailError::protocol("literal too large"));
        }
        let mut buf = vec![0u8; n];
        tokio::io::AsyncReadExt::read_exact(&mut self.reader, &mut buf)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    MailError::protocol("premature EOF reading literal")
                } else {
                    MailError::Io(e)
                }
            })?;
        Ok(buf)
    }

    pub async fn write_line(&mut self, line: &str) -> MailResult<()> {
        let w = self.reader.get_mut();
        w.write_all(line.as_bytes()).await?;
        w.write_all(b"\r\n").await?;
        Ok(())
    }

    pub async fn write_raw(&mut self, data: &[u8]) -> MailResult<()> {
        self.reader.get_mut().write_all(data).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> MailResult<()> {
        self.reader.get_mut().flush().await?;
        Ok(())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + MaybeTls> Codec<S> {
    /// Whether the underlying stream is already TLS, for STARTTLS/STLS to refuse a second
    /// upgrade.
    pub fn is_tls(&self) -> bool {
        self.reader.get_ref().is_tls()
    }
}

/// A trailing `{N}` (synchronizing) or `{N+}` (non-synchronizing, LITERAL+) literal spec at
/// the end of an IMAP command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralSpec {
    pub len: usize,
    pub non_sync: bool,
}

/// If `line` ends with a literal specifier, return it along with the line with the specifier
/// stripped. Otherwise return `None`.
pub fn parse_trailing_literal(line: &str) -> Option<(String, LiteralSpec)> {
    let trimmed = line.trim_end();
    if !trimmed.ends_with('}') {
        return None;
    }
    let open = trimmed.rfind('{')?;
    let inner = &trimmed[open + 1..trimmed.len() - 1];
    let (digits, non_sync) = if let Some(stripped) = inner.strip_suffix('+') { (stripped, true) } else { (inner, false) };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let len: usize = digits.parse().ok()?;
    Some((trimmed[..open].to_string(), LiteralSpec { len, non_sync }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sync_and_nonsync_literal() {
        let (head, spec) = parse_trailing_literal("a1 APPEND INBOX {310}").unwrap();
        assert_eq!(head, "a1 APPEND INBOX");
        assert_eq!(spec, LiteralSpec { len: 310, non_sync: false });

        let (head, spec) = parse_trailing_literal("a1 APPEND INBOX {310+}").unwrap();
        assert_eq!(head, "a1 APPEND INBOX");
        assert_eq!(spec, LiteralSpec { len: 310, non_sync: true });
    }

    #[test]
    fn no_literal_returns_none() {
        assert!(parse_trailing_literal("a1 NOOP").is_none());
    }

    #[tokio::test]
    async fn read_line_strips_crlf() {
        let input = b"HELO example.com\r\n".to_vec();
        let mut codec = Codec::new(tokio::io::join(&input[..], tokio::io::sink()));
        let line = codec.read_line().await.unwrap();
        assert_eq!(line, "HELO example.com");
    }

    #[tokio::test]
    async fn oversize_line_is_protocol_error() {
        let input = vec![b'a'; 200];
        let mut codec = Codec::with_max_line(tokio::io::join(&input[..], tokio::io::sink()), 100);
        let err = codec.read_line().await.unwrap_err();
        assert!(matches!(err, MailError::Protocol(_)));
    }
}
