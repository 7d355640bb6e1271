/*
 * mod.rs
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

//! SMTP session: `GREETED → MAIL → RCPT → DATA → END`, `RSET` returns to `GREETED`.

pub mod dot_stuffer;

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;

use crate::auth::AuthManager;
use crate::codec::Codec;
use crate::delivery::{DeliveryPipeline, ReceivedMessage};
use crate::error::{one_line, MailError, MailResult};
use crate::net::MaybeTls;
use crate::sasl::{self, SaslMechanism};
use dot_stuffer::unstuff_line;

const MAX_MESSAGE_SIZE: usize = 35 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Greeted,
    Mail,
    Rcpt,
}

/// Run one SMTP session to completion. `hostname` is used in the greeting and EHLO reply.
pub async fn run_session<S>(
    stream: S,
    hostname: String,
    pipeline: Arc<DeliveryPipeline>,
    auth: Arc<AuthManager>,
    tls_acceptor: Option<TlsAcceptor>,
) -> MailResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + MaybeTls,
{
    let mut codec = Codec::new(stream);
    codec.write_line(&format!("220 {} mockmail SMTP ready", hostname)).await?;
    codec.flush().await?;

    let mut state = State::Greeted;
    let mut from: Option<String> = None;
    let mut rcpts: Vec<String> = Vec::new();

    loop {
        let line = match codec.read_line().await {
            Ok(l) => l,
            Err(e) => {
                let _ = codec.write_line("421 connection problem, closing").await;
                return Err(e);
            }
        };
        let (verb, rest) = split_command(&line);
        let verb_upper = verb.to_ascii_uppercase();

        match verb_upper.as_str() {
            "HELO" => {
                codec.write_line(&format!("250 {} Hello {}", hostname, rest.trim())).await?;
                state = State::Greeted;
                from = None;
                rcpts.clear();
            }
            "EHLO" => {
                codec.write_line(&format!("250-{} Hello {}", hostname, rest.trim())).await?;
                codec.write_line("250-PIPELINING").await?;
                codec.write_line("250-8BITMIME").await?;
                codec.write_line("250-SIZE 36700160").await?;
                codec.write_line("250-AUTH PLAIN LOGIN").await?;
                codec.write_line("250 HELP").await?;
                state = State::Greeted;
                from = None;
                rcpts.clear();
            }
            "AUTH" => {
                handle_auth(&mut codec, rest, &auth, pipeline.store()).await?;
            }
            "MAIL" => {
                if state != State::Greeted {
                    codec.write_line("503 bad sequence of commands").await?;
                    continue;
                }
                match parse_address(rest, "FROM") {
                    Some(addr) => {
                        from = Some(addr);
                        rcpts.clear();
                        state = State::Mail;
                        codec.write_line("250 OK").await?;
                    }
                    None => {
                        codec.write_line("500 syntax error in MAIL FROM").await?;
                    }
                }
            }
            "RCPT" => {
                if state != State::Mail && state != State::Rcpt {
                    codec.write_line("503 bad sequence of commands").await?;
                    continue;
                }
                match parse_address(rest, "TO") {
                    Some(addr) => {
                        if !auth.auth_disabled() && auth.resolve_recipient(&addr).await.is_none() {
                            codec.write_line(&format!("550 no such user: {}", one_line(&addr))).await?;
                            continue;
                        }
                        rcpts.push(addr);
                        state = State::Rcpt;
                        codec.write_line("250 OK").await?;
                    }
                    None => {
                        codec.write_line("500 syntax error in RCPT TO").await?;
                    }
                }
            }
            "DATA" => {
                if state != State::Rcpt || rcpts.is_empty() {
                    codec.write_line("503 bad sequence of commands").await?;
                    continue;
                }
                codec.write_line("354 Start mail input; end with <CRLF>.<CRLF>").await?;
                let raw = match read_data(&mut codec).await {
                    Ok(Some(raw)) => raw,
                    Ok(None) => {
                        codec.write_line("552 message exceeds maximum size").await?;
                        state = State::Greeted;
                        from = None;
                        rcpts.clear();
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let message = ReceivedMessage {
                    from: from.clone().unwrap_or_default(),
                    rcpts: rcpts.clone(),
                    raw,
                };
                pipeline.deliver(&message).await;
                codec.write_line("250 OK: message accepted").await?;
                state = State::Greeted;
                from = None;
                rcpts.clear();
            }
            "RSET" => {
                state = State::Greeted;
                from = None;
                rcpts.clear();
                codec.write_line("250 OK").await?;
            }
            "NOOP" => {
                codec.write_line("250 OK").await?;
            }
            "VRFY" => {
                codec.write_line("252 cannot VRFY user, but will accept message").await?;
            }
            "STARTTLS" => {
                if codec.is_tls() {
                    codec.write_line("454 TLS not available due to temporary reason").await?;
                } else if let Some(acceptor) = tls_acceptor.as_ref() {
                    codec.write_line("220 Go ahead").await?;
                    codec.flush().await?;
                    let stream = codec.into_inner().try_starttls(Some(acceptor)).await.map_err(MailError::Io)?;
                    codec = Codec::new(stream);
                    // RFC 3207 §4.2: discard any prior EHLO/MAIL/RCPT state, client must reissue.
                    state = State::Greeted;
                    from = None;
                    rcpts.clear();
                } else {
                    codec.write_line("454 TLS not available").await?;
                }
            }
            "QUIT" => {
                codec.write_line("221 Bye").await?;
                codec.flush().await?;
                return Ok(());
            }
            "" => {
                codec.write_line("500 command unrecognized").await?;
            }
            _ => {
                codec.write_line(&format!("500 command unrecognized: {}", one_line(&verb_upper))).await?;
            }
        }
        codec.flush().await?;
    }
}

async fn handle_auth<S>(
    codec: &mut Codec<S>,
    rest: &str,
    auth: &Arc<AuthManager>,
    store: &Arc<crate::store::Store>,
) -> MailResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut parts = rest.trim().splitn(2, char::is_whitespace);
    let mechanism_name = parts.next().unwrap_or("");
    let initial = parts.next();
    let Some(mechanism) = SaslMechanism::from_name(mechanism_name) else {
        codec.write_line("504 unrecognized authentication type").await?;
        return Ok(());
    };
    match mechanism {
        SaslMechanism::Plain => {
            let response = match initial {
                Some(r) => r.to_string(),
                None => {
                    codec.write_line("334 ").await?;
                    codec.flush().await?;
                    codec.read_line().await?
                }
            };
            let decoded = match sasl::b64_decode(&response) {
                Ok(d) => d,
                Err(_) => {
                    codec.write_line("501 invalid base64 data").await?;
                    return Ok(());
                }
            };
            let Ok((_authzid, login, password)) = sasl::parse_plain_credentials(&decoded) else {
                codec.write_line("501 malformed auth input").await?;
                return Ok(());
            };
            finish_auth(codec, auth, store, &login, &password).await
        }
        SaslMechanism::Login => {
            codec.write_line(&format!("334 {}", sasl::LOGIN_USERNAME_PROMPT)).await?;
            codec.flush().await?;
            let login_b64 = codec.read_line().await?;
            codec.write_line(&format!("334 {}", sasl::LOGIN_PASSWORD_PROMPT)).await?;
            codec.flush().await?;
            let password_b64 = codec.read_line().await?;
            let (Ok(login_bytes), Ok(password_bytes)) = (sasl::b64_decode(&login_b64), sasl::b64_decode(&password_b64)) else {
                codec.write_line("501 invalid base64 data").await?;
                return Ok(());
            };
            let login = String::from_utf8_lossy(&login_bytes).into_owned();
            let password = String::from_utf8_lossy(&password_bytes).into_owned();
            finish_auth(codec, auth, store, &login, &password).await
        }
    }
}

async fn finish_auth<S>(
    codec: &mut Codec<S>,
    auth: &Arc<AuthManager>,
    store: &Arc<crate::store::Store>,
    login: &str,
    password: &str,
) -> MailResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match auth.authenticate(login, password, store).await {
        Ok(_) => codec.write_line("235 authentication successful").await,
        Err(_) => codec.write_line("535 authentication failed").await,
    }
}

/// Read the `.`-terminated message body, un-stuffing lines as they arrive. Returns `None` if
/// the accumulated body would exceed the size limit advertised in EHLO.
async fn read_data<S>(codec: &mut Codec<S>) -> MailResult<Option<Vec<u8>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    loop {
        let line = codec.read_line().await?;
        match unstuff_line(&line) {
            None => break,
            Some(content) => {
                raw.extend_from_slice(content.as_bytes());
                raw.extend_from_slice(b"\r\n");
                if raw.len() > MAX_MESSAGE_SIZE {
                    // Drain until the terminator so the connection stays in sync.
                    loop {
                        let l = codec.read_line().await?;
                        if unstuff_line(&l).is_none() {
                            break;
                        }
                    }
                    return Ok(None);
                }
            }
        }
    }
    Ok(Some(raw))
}

fn split_command(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

/// Parse `MAIL FROM:<addr> ...` / `RCPT TO:<addr> ...`, tolerant of a space before `:`.
fn parse_address(rest: &str, keyword: &str) -> Option<String> {
    let rest = rest.trim();
    let upper = rest.to_ascii_uppercase();
    let prefix = format!("{}:", keyword);
    if !upper.starts_with(&prefix) {
        return None;
    }
    let after = rest[prefix.len()..].trim_start();
    let addr_part = after.split_whitespace().next().unwrap_or(after);
    let addr = addr_part.strip_prefix('<').and_then(|s| s.strip_suffix('>')).unwrap_or(addr_part);
    if addr.is_empty() && keyword == "FROM" {
        return Some(String::new());
    }
    if addr.is_empty() {
        return None;
    }
    Some(addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthManager;
    use crate::store::Store;
    use std::sync::Arc;

    #[test]
    fn parses_mail_from_with_angle_brackets() {
        assert_eq!(parse_address("FROM:<a@b.com> SIZE=100", "FROM").as_deref(), Some("a@b.com"));
    }

    #[test]
    fn parses_rcpt_to_without_size_param() {
        assert_eq!(parse_address("TO:<test@localhost>", "TO").as_deref(), Some("test@localhost"));
    }

    #[test]
    fn rejects_wrong_keyword() {
        assert_eq!(parse_address("TO:<a@b>", "FROM"), None);
    }

    #[tokio::test]
    async fn full_session_delivers_message() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(false));
        auth.set_user("test", "test@localhost", "pw").await;
        store.ensure_inbox("test").await;
        let pipeline = Arc::new(DeliveryPipeline::new(store.clone(), auth.clone()));

        let script = b"EHLO client.example\r\nMAIL FROM:<a@b>\r\nRCPT TO:<test@localhost>\r\nDATA\r\nSubject: hi\r\n\r\nhello\r\n.\r\nQUIT\r\n".to_vec();
        let mut output = Vec::new();
        {
            let input = &script[..];
            run_session(tokio::io::join(input, &mut output), "mockmail".to_string(), pipeline, auth, None).await.unwrap();
        }
        let folder = store.get_folder("test", "INBOX").await.unwrap();
        assert_eq!(folder.message_count().await, 1);
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("220 "));
        assert!(text.contains("250 OK: message accepted"));
        assert!(text.contains("221 Bye"));
    }

    #[tokio::test]
    async fn rcpt_to_unknown_user_rejected_when_auth_enabled() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(false));
        let pipeline = Arc::new(DeliveryPipeline::new(store.clone(), auth.clone()));

        let script = b"EHLO client.example\r\nMAIL FROM:<a@b>\r\nRCPT TO:<ghost@localhost>\r\nQUIT\r\n".to_vec();
        let mut output = Vec::new();
        run_session(tokio::io::join(&script[..], &mut output), "mockmail".to_string(), pipeline, auth, None).await.unwrap();
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("550 no such user"));
    }

    #[tokio::test]
    async fn rcpt_to_unknown_user_accepted_when_auth_disabled() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(true));
        let pipeline = Arc::new(DeliveryPipeline::new(store.clone(), auth.clone()));

        let script = b"EHLO client.example\r\nMAIL FROM:<a@b>\r\nRCPT TO:<newbie@localhost>\r\nDATA\r\nhi\r\n.\r\nQUIT\r\n".to_vec();
        let mut output = Vec::new();
        run_session(tokio::io::join(&script[..], &mut output), "mockmail".to_string(), pipeline, auth, None).await.unwrap();
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("250 OK: message accepted"));
    }

    #[tokio::test]
    async fn dot_stuffed_body_line_is_preserved() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(false));
        auth.set_user("test", "test@localhost", "pw").await;
        store.ensure_inbox("test").await;
        let pipeline = Arc::new(DeliveryPipeline::new(store.clone(), auth.clone()));
        let script = b"EHLO c\r\nMAIL FROM:<a@b>\r\nRCPT TO:<test@localhost>\r\nDATA\r\n..leading dot\r\n.\r\nQUIT\r\n".to_vec();
        let mut output = Vec::new();
        run_session(tokio::io::join(&script[..], &mut output), "mockmail".to_string(), pipeline, auth, None).await.unwrap();
        let folder = store.get_folder("test", "INBOX").await.unwrap();
        let msgs = folder.messages().await;
        assert_eq!(msgs[0].raw, b".leading dot\r\n");
    }

    #[tokio::test]
    async fn starttls_without_configured_acceptor_is_refused() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(true));
        let pipeline = Arc::new(DeliveryPipeline::new(store.clone(), auth.clone()));
        let script = b"EHLO c\r\nSTARTTLS\r\nQUIT\r\n".to_vec();
        let mut output = Vec::new();
        run_session(tokio::io::join(&script[..], &mut output), "mockmail".to_string(), pipeline, auth, None).await.unwrap();
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("454 TLS not available"));
        assert!(text.contains("221 Bye"));
    }
}
