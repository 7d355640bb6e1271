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

//! POP3 session: `AUTHORIZATION → TRANSACTION → UPDATE`.
//!
//! TRANSACTION operates against a snapshot of INBOX taken at login; message numbers are
//! 1..N in that snapshot's order and never renumber mid-session. DELE only marks a number in
//! a session-local set; the actual removal happens in UPDATE (on QUIT), re-resolved against
//! whatever the store looks like by then so a message delivered or expunged concurrently
//! doesn't corrupt the session's view. A dropped connection without QUIT leaves the store
//! untouched, matching RFC 1939 §3.

use std::collections::HashSet;
use std::sync::Arc;

use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;

use crate::auth::AuthManager;
use crate::codec::Codec;
use crate::error::{MailError, MailResult};
use crate::net::MaybeTls;
use crate::store::{Store, StoredMessage, INBOX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Authorization,
    Transaction,
}

/// Run one POP3 session to completion.
pub async fn run_session<S>(
    stream: S,
    hostname: String,
    auth: Arc<AuthManager>,
    store: Arc<Store>,
    tls_acceptor: Option<TlsAcceptor>,
) -> MailResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + MaybeTls,
{
    let mut codec = Codec::new(stream);
    let banner_tag = format!("<{}.{}@{}>", std::process::id(), banner_nonce(), hostname);
    codec.write_line(&format!("+OK POP3 server ready {}", banner_tag)).await?;
    codec.flush().await?;

    let mut state = State::Authorization;
    let mut pending_user: Option<String> = None;
    let mut login: Option<String> = None;
    let mut snapshot: Vec<StoredMessage> = Vec::new();
    let mut deleted: HashSet<usize> = HashSet::new();

    loop {
        let line = codec.read_line().await?;
        let (verb, rest) = split_command(&line);
        let verb_upper = verb.to_ascii_uppercase();

        match (state, verb_upper.as_str()) {
            (_, "QUIT") => {
                if state == State::Transaction {
                    apply_deletions(&store, login.as_deref().unwrap(), &snapshot, &deleted).await;
                }
                codec.write_line("+OK POP3 server signing off").await?;
                codec.flush().await?;
                return Ok(());
            }
            (_, "NOOP") => {
                codec.write_line("+OK").await?;
            }
            (State::Authorization, "USER") => {
                pending_user = Some(rest.trim().to_string());
                codec.write_line("+OK").await?;
            }
            (State::Authorization, "PASS") => {
                let Some(user) = pending_user.take() else {
                    codec.write_line("-ERR USER required first").await?;
                    continue;
                };
                match auth.authenticate(&user, rest.trim(), &store).await {
                    Ok(authed) => {
                        store.ensure_inbox(&authed.login).await;
                        let folder = store.get_folder(&authed.login, INBOX).await.unwrap();
                        snapshot = folder.messages().await;
                        deleted.clear();
                        login = Some(authed.login);
                        state = State::Transaction;
                        codec.write_line(&format!("+OK {} messages waiting", snapshot.len())).await?;
                    }
                    Err(_) => {
                        codec.write_line("-ERR authentication failed").await?;
                    }
                }
            }
            (State::Authorization, "APOP") => {
                let mut parts = rest.trim().splitn(2, char::is_whitespace);
                let user = parts.next().unwrap_or("").to_string();
                let digest = parts.next().unwrap_or("").to_string();
                match auth.get_user(&user).await {
                    Some(u) if apop_digest(&banner_tag, &u.password) == digest.to_ascii_lowercase() => {
                        store.ensure_inbox(&u.login).await;
                        let folder = store.get_folder(&u.login, INBOX).await.unwrap();
                        snapshot = folder.messages().await;
                        deleted.clear();
                        login = Some(u.login.clone());
                        state = State::Transaction;
                        codec.write_line(&format!("+OK {} messages waiting", snapshot.len())).await?;
                    }
                    _ => {
                        codec.write_line("-ERR authentication failed").await?;
                    }
                }
            }
            (State::Authorization, "STLS") => {
                // RFC 2595 §4: STLS is only valid before authentication; a successful upgrade
                // requires USER/PASS (or APOP) to be reissued over the new, encrypted channel.
                if codec.is_tls() {
                    codec.write_line("-ERR command not permitted when TLS active").await?;
                } else if let Some(acceptor) = tls_acceptor.as_ref() {
                    codec.write_line("+OK Begin TLS negotiation").await?;
                    codec.flush().await?;
                    let stream = codec.into_inner().try_starttls(Some(acceptor)).await.map_err(MailError::Io)?;
                    codec = Codec::new(stream);
                    pending_user = None;
                } else {
                    codec.write_line("-ERR TLS not available").await?;
                }
            }
            (State::Authorization, _) => {
                codec.write_line("-ERR unknown command in AUTHORIZATION state").await?;
            }
            (State::Transaction, "STAT") => {
                let (count, size) = live_summary(&snapshot, &deleted);
                codec.write_line(&format!("+OK {} {}", count, size)).await?;
            }
            (State::Transaction, "LIST") => {
                let arg = rest.trim();
                if arg.is_empty() {
                    let (count, size) = live_summary(&snapshot, &deleted);
                    codec.write_line(&format!("+OK {} messages ({} octets)", count, size)).await?;
                    for (i, msg) in snapshot.iter().enumerate() {
                        let num = i + 1;
                        if !deleted.contains(&num) {
                            codec.write_line(&format!("{} {}", num, msg.size())).await?;
                        }
                    }
                    codec.write_line(".").await?;
                } else {
                    match parse_msg_num(arg, &snapshot, &deleted) {
                        Ok(num) => codec.write_line(&format!("+OK {} {}", num, snapshot[num - 1].size())).await?,
                        Err(msg) => codec.write_line(&format!("-ERR {}", msg)).await?,
                    }
                }
            }
            (State::Transaction, "RETR") => {
                match parse_msg_num(rest.trim(), &snapshot, &deleted) {
                    Ok(num) => {
                        let msg = &snapshot[num - 1];
                        codec.write_line(&format!("+OK {} octets", msg.raw.len())).await?;
                        write_dot_stuffed(&mut codec, &msg.raw).await?;
                    }
                    Err(msg) => codec.write_line(&format!("-ERR {}", msg)).await?,
                }
            }
            (State::Transaction, "TOP") => {
                let mut parts = rest.trim().splitn(2, char::is_whitespace);
                let num_arg = parts.next().unwrap_or("");
                let n_lines: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                match parse_msg_num(num_arg, &snapshot, &deleted) {
                    Ok(num) => {
                        let msg = &snapshot[num - 1];
                        codec.write_line("+OK top of message follows").await?;
                        write_top(&mut codec, &msg.raw, n_lines).await?;
                    }
                    Err(msg) => codec.write_line(&format!("-ERR {}", msg)).await?,
                }
            }
            (State::Transaction, "DELE") => {
                match parse_msg_num(rest.trim(), &snapshot, &deleted) {
                    Ok(num) => {
                        deleted.insert(num);
                        codec.write_line(&format!("+OK message {} deleted", num)).await?;
                    }
                    Err(msg) => codec.write_line(&format!("-ERR {}", msg)).await?,
                }
            }
            (State::Transaction, "RSET") => {
                deleted.clear();
                codec.write_line("+OK").await?;
            }
            (State::Transaction, "UIDL") => {
                let arg = rest.trim();
                if arg.is_empty() {
                    codec.write_line("+OK unique-id listing follows").await?;
                    for (i, msg) in snapshot.iter().enumerate() {
                        let num = i + 1;
                        if !deleted.contains(&num) {
                            codec.write_line(&format!("{} {}", num, msg.uid)).await?;
                        }
                    }
                    codec.write_line(".").await?;
                } else {
                    match parse_msg_num(arg, &snapshot, &deleted) {
                        Ok(num) => codec.write_line(&format!("+OK {} {}", num, snapshot[num - 1].uid)).await?,
                        Err(msg) => codec.write_line(&format!("-ERR {}", msg)).await?,
                    }
                }
            }
            (State::Transaction, _) => {
                codec.write_line("-ERR unknown command in TRANSACTION state").await?;
            }
        }
        codec.flush().await?;
    }
}

fn split_command(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

fn live_summary(snapshot: &[StoredMessage], deleted: &HashSet<usize>) -> (usize, u64) {
    let mut count = 0;
    let mut size = 0u64;
    for (i, msg) in snapshot.iter().enumerate() {
        if !deleted.contains(&(i + 1)) {
            count += 1;
            size += msg.size();
        }
    }
    (count, size)
}

fn parse_msg_num(arg: &str, snapshot: &[StoredMessage], deleted: &HashSet<usize>) -> Result<usize, String> {
    let num: usize = arg.parse().map_err(|_| "invalid message number".to_string())?;
    if num == 0 || num > snapshot.len() {
        return Err("no such message".to_string());
    }
    if deleted.contains(&num) {
        return Err("message already deleted".to_string());
    }
    Ok(num)
}

/// Split a canonicalized (CRLF-terminated) raw message into its lines, without a trailing
/// empty entry for the terminator after the last line.
fn split_lines(raw: &[u8]) -> Vec<&str> {
    let text = std::str::from_utf8(raw).unwrap_or("");
    let mut lines: Vec<&str> = text.split("\r\n").collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

async fn write_dot_stuffed<S>(codec: &mut Codec<S>, raw: &[u8]) -> MailResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for line in split_lines(raw) {
        if let Some(rest) = line.strip_prefix('.') {
            codec.write_line(&format!("..{}", rest)).await?;
        } else {
            codec.write_line(line).await?;
        }
    }
    codec.write_line(".").await
}

async fn write_top<S>(codec: &mut Codec<S>, raw: &[u8], n_lines: usize) -> MailResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut in_body = false;
    let mut body_lines_sent = 0usize;
    for line in split_lines(raw) {
        if in_body && body_lines_sent >= n_lines {
            break;
        }
        if let Some(rest) = line.strip_prefix('.') {
            codec.write_line(&format!("..{}", rest)).await?;
        } else {
            codec.write_line(line).await?;
        }
        if in_body {
            body_lines_sent += 1;
        } else if line.is_empty() {
            in_body = true;
        }
    }
    codec.write_line(".").await
}

/// Apply session-local DELE marks atomically against the store's current state: messages
/// still present at the snapshot's UID are expunged, others (already gone) are skipped.
async fn apply_deletions(store: &Arc<Store>, login: &str, snapshot: &[StoredMessage], deleted: &HashSet<usize>) {
    let Some(folder) = store.get_folder(login, INBOX).await else { return };
    for &num in deleted {
        let uid = snapshot[num - 1].uid;
        if let Some(seq) = folder.find_seq_by_uid(uid).await {
            let _ = folder.set_flags_by_seq(seq, &[crate::store::Flag::Deleted], &[], false).await;
        }
    }
    folder.expunge().await;
}

fn apop_digest(banner_tag: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(banner_tag.as_bytes());
    hasher.update(password.as_bytes());
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Non-cryptographic nonce mixed into the greeting banner; used only to make the APOP
/// challenge string unique per connection.
fn banner_nonce() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FlagSet;

    #[tokio::test]
    async fn user_pass_login_lists_snapshot() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(false));
        auth.set_user("test", "test@localhost", "pw").await;
        let folder = store.ensure_inbox("test").await;
        folder.append(b"Subject: one\r\n\r\nbody\r\n".to_vec(), FlagSet::new(), None).await;

        let script = b"USER test\r\nPASS pw\r\nSTAT\r\nQUIT\r\n".to_vec();
        let mut output = Vec::new();
        run_session(tokio::io::join(&script[..], &mut output), "mockmail".to_string(), auth, store, None).await.unwrap();
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("+OK 1 messages waiting"));
        assert!(text.contains("+OK 1 "));
        assert!(text.contains("+OK POP3 server signing off"));
    }

    #[tokio::test]
    async fn dele_then_quit_removes_message() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(false));
        auth.set_user("test", "test@localhost", "pw").await;
        let folder = store.ensure_inbox("test").await;
        folder.append(b"Subject: one\r\n\r\nbody\r\n".to_vec(), FlagSet::new(), None).await;

        let script = b"USER test\r\nPASS pw\r\nDELE 1\r\nQUIT\r\n".to_vec();
        let mut output = Vec::new();
        run_session(tokio::io::join(&script[..], &mut output), "mockmail".to_string(), auth, store.clone(), None).await.unwrap();
        assert_eq!(folder.message_count().await, 0);
    }

    #[tokio::test]
    async fn dele_without_quit_leaves_store_unchanged() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(false));
        auth.set_user("test", "test@localhost", "pw").await;
        let folder = store.ensure_inbox("test").await;
        folder.append(b"Subject: one\r\n\r\nbody\r\n".to_vec(), FlagSet::new(), None).await;

        // No QUIT: the connection just ends after DELE, so the reader hits EOF.
        let script = b"USER test\r\nPASS pw\r\nDELE 1\r\n".to_vec();
        let mut output = Vec::new();
        let result = run_session(tokio::io::join(&script[..], &mut output), "mockmail".to_string(), auth, store.clone(), None).await;
        assert!(result.is_err());
        assert_eq!(folder.message_count().await, 1);
    }

    #[test]
    fn apop_digest_is_stable_for_same_inputs() {
        let a = apop_digest("<1234@host>", "secret");
        let b = apop_digest("<1234@host>", "secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn stls_without_configured_acceptor_is_refused() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(false));
        let script = b"STLS\r\nQUIT\r\n".to_vec();
        let mut output = Vec::new();
        run_session(tokio::io::join(&script[..], &mut output), "mockmail".to_string(), auth, store, None).await.unwrap();
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("-ERR TLS not available"));
        assert!(text.contains("+OK POP3 server signing off"));
    }
}
