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

//! IMAP4rev1 server session: NOT AUTHENTICATED -> AUTHENTICATED -> SELECTED state machine,
//! command dispatch, and unsolicited update delivery. Wire grammar lives in `command`, FETCH
//! rendering in `fetch`, SEARCH criteria parsing in `search_parse`; this module owns the
//! session state and the read/dispatch/respond loop that ties them together.

mod command;
mod fetch;
mod search_parse;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::auth::{AuthManager, User};
use crate::codec::{parse_trailing_literal, Codec};
use crate::error::{one_line, MailError, MailResult};
use crate::net::MaybeTls;
use crate::sasl::{self, SaslMechanism};
use crate::store::{self, Flag, FlagSet, Folder, FolderEvent, Store};

use command::{expand_ranges, parse_fetch_items, parse_flag_list, parse_sequence_set, quote_for_line, split_tag, split_top_level, split_verb, strip_parens, unquote, FetchItem};

const CAPABILITY: &str = "IMAP4rev1 LITERAL+ IDLE UIDPLUS NAMESPACE QUOTA AUTH=PLAIN AUTH=LOGIN";
const PERMANENT_FLAGS: &str = "\\Answered \\Flagged \\Deleted \\Seen \\Draft \\*";

/// A SELECTed or EXAMINEd mailbox, plus the change receiver taken out at SELECT time so a
/// between-command poll (or IDLE) never misses an event fired after that point.
struct Selected {
    folder: Arc<Folder>,
    read_only: bool,
    events: broadcast::Receiver<FolderEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotAuthenticated,
    Authenticated,
    Logout,
}

/// Run one IMAP session to completion: client LOGOUT, a fatal error, or the peer closing
/// the connection.
pub async fn run_session<S>(
    stream: S,
    hostname: &str,
    store: Arc<Store>,
    auth: Arc<AuthManager>,
    tls_acceptor: Option<TlsAcceptor>,
) -> MailResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + MaybeTls,
{
    let mut codec = Codec::new(stream);
    codec.write_line(&format!("* OK [CAPABILITY {}] {} IMAP4rev1 server ready", CAPABILITY, hostname)).await?;
    codec.flush().await?;

    let mut state = State::NotAuthenticated;
    let mut user: Option<User> = None;
    let mut selected: Option<Selected> = None;

    loop {
        let (line, literal) = match read_command(&mut codec).await {
            Ok(v) => v,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                codec.write_line(&format!("* BAD {}", one_line(&e.to_string()))).await?;
                codec.flush().await?;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let (tag, rest) = split_tag(&line);
        let tag = tag.to_string();
        let (verb, rest) = split_verb(rest);
        let verb_upper = verb.to_ascii_uppercase();

        if verb_upper == "STARTTLS" {
            codec = handle_starttls(codec, &tag, tls_acceptor.as_ref()).await?;
            continue;
        }

        let outcome = dispatch(&mut codec, &tag, &verb_upper, rest, literal, &store, &auth, &mut state, &mut user, &mut selected).await;
        match outcome {
            Ok((status, text)) => finish(&mut codec, &mut selected, &tag, status, &text).await?,
            Err(e) => {
                let (status, text) = error_status(&e);
                finish(&mut codec, &mut selected, &tag, status, &text).await?;
                if e.is_fatal() {
                    codec.flush().await?;
                    return Err(e);
                }
            }
        }
        codec.flush().await?;
        if state == State::Logout {
            return Ok(());
        }
    }
}

/// Read one full command line, resolving any trailing IMAP literal(s) along the way. A text
/// literal (mailbox name, search string, credential, ...) is quoted back into the line for
/// `command`'s tokenizer; APPEND's final literal is the message itself and is returned as raw
/// bytes instead of being quoted, since it may contain anything including NULs and quotes.
async fn read_command<S>(codec: &mut Codec<S>) -> MailResult<(String, Option<Vec<u8>>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = codec.read_line().await?;
    loop {
        let Some((head, spec)) = parse_trailing_literal(&line) else {
            return Ok((line, None));
        };
        if !spec.non_sync {
            codec.write_line("+ Ready for literal data").await?;
            codec.flush().await?;
        }
        let data = codec.read_literal(spec.len).await?;
        let continuation = codec.read_line().await?;
        let is_append = {
            let (_, rest) = split_tag(&head);
            let (verb, _) = split_verb(rest);
            verb.eq_ignore_ascii_case("APPEND")
        };
        if is_append && continuation.trim().is_empty() {
            return Ok((head, Some(data)));
        }
        let quoted = quote_for_line(&String::from_utf8_lossy(&data));
        line = format!("{} {}{}", head, quoted, continuation);
    }
}

/// Map a `MailError` to its IMAP tagged-response status and text.
fn error_status(e: &MailError) -> (&'static str, String) {
    match e {
        MailError::Protocol(m) => ("BAD", one_line(m)),
        MailError::State(m) => ("BAD", one_line(m)),
        MailError::AuthFailed => ("NO", "authentication failed".to_string()),
        MailError::Forbidden(m) => ("NO", one_line(m)),
        MailError::NotFound(m) => ("NO", format!("{} does not exist", one_line(m))),
        MailError::AlreadyExists(m) => ("NO", format!("{} already exists", one_line(m))),
        MailError::QuotaExceeded => ("NO", "quota exceeded".to_string()),
        MailError::Io(_) => ("BAD", "connection error".to_string()),
        MailError::Shutdown => ("BAD", "server shutting down".to_string()),
        MailError::Internal(m) => ("BAD", one_line(m)),
    }
}

/// Drain and render any updates another session caused on the selected folder, then write
/// the tagged completion. Untagged responses for this command's own effects were already
/// written by the handler (and the corresponding broadcast events discarded via `discard`),
/// so anything still pending here came from elsewhere.
async fn finish<S>(codec: &mut Codec<S>, selected: &mut Option<Selected>, tag: &str, status: &str, text: &str) -> MailResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(sel) = selected.as_mut() {
        emit_pending(codec, sel).await?;
    }
    codec.write_line(&format!("{} {} {}", tag, status, text)).await
}

async fn emit_pending<S>(codec: &mut Codec<S>, sel: &mut Selected) -> MailResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match sel.events.try_recv() {
            Ok(event) => codec.write_line(&render_update(&event)).await?,
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    Ok(())
}

/// Discard up to `n` events this session's own command just caused, so they are not reported
/// back to it a second time as if they came from another session.
async fn discard_own(sel: &mut Selected, mut n: usize) {
    while n > 0 {
        match sel.events.try_recv() {
            Ok(_) => n -= 1,
            Err(_) => break,
        }
    }
}

fn render_update(event: &FolderEvent) -> String {
    match event {
        FolderEvent::Added { exists, .. } => format!("* {} EXISTS", exists),
        FolderEvent::FlagsUpdated { seq, flags, .. } => format!("* {} FETCH (FLAGS ({}))", seq, flags.join(" ")),
        FolderEvent::Expunged { seq } => format!("* {} EXPUNGE", seq),
    }
}

fn require_user<'a>(user: &'a Option<User>) -> MailResult<&'a User> {
    user.as_ref().ok_or_else(|| MailError::state("not authenticated"))
}

fn require_selected<'a>(selected: &'a mut Option<Selected>) -> MailResult<&'a mut Selected> {
    selected.as_mut().ok_or_else(|| MailError::state("no mailbox selected"))
}

/// Handle STARTTLS before dispatch ever sees it: a successful upgrade replaces the codec's
/// underlying stream, which only the owner of `codec` (this loop) can do. Responds on the
/// still-plaintext channel per RFC 3501 §6.2.1 before attempting the handshake.
async fn handle_starttls<S>(mut codec: Codec<S>, tag: &str, acceptor: Option<&TlsAcceptor>) -> MailResult<Codec<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + MaybeTls,
{
    if codec.is_tls() {
        codec.write_line(&format!("{} BAD TLS already active", tag)).await?;
        codec.flush().await?;
        return Ok(codec);
    }
    let Some(acceptor) = acceptor else {
        codec.write_line(&format!("{} NO TLS not available on this connection", tag)).await?;
        codec.flush().await?;
        return Ok(codec);
    };
    codec.write_line(&format!("{} OK begin TLS negotiation now", tag)).await?;
    codec.flush().await?;
    let stream = codec.into_inner().try_starttls(Some(acceptor)).await.map_err(MailError::Io)?;
    Ok(Codec::new(stream))
}

#[allow(clippy::too_many_arguments)]
async fn dispatch<S>(
    codec: &mut Codec<S>,
    tag: &str,
    verb: &str,
    rest: &str,
    literal: Option<Vec<u8>>,
    store: &Arc<Store>,
    auth: &Arc<AuthManager>,
    state: &mut State,
    user: &mut Option<User>,
    selected: &mut Option<Selected>,
) -> MailResult<(&'static str, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match verb {
        "CAPABILITY" => {
            codec.write_line(&format!("* CAPABILITY {}", CAPABILITY)).await?;
            Ok(("OK", "CAPABILITY completed".to_string()))
        }
        "NOOP" => Ok(("OK", "NOOP completed".to_string())),
        "LOGOUT" => {
            *selected = None;
            codec.write_line(&format!("* BYE {} IMAP4rev1 server logging out", "mockmail")).await?;
            *state = State::Logout;
            Ok(("OK", "LOGOUT completed".to_string()))
        }
        // STARTTLS is intercepted in run_session before dispatch is called, since a successful
        // upgrade must replace the codec's stream, which dispatch doesn't own.
        "AUTHENTICATE" => cmd_authenticate(codec, rest, store, auth, state, user).await,
        "LOGIN" => cmd_login(rest, store, auth, state, user).await,

        "SELECT" | "EXAMINE" => {
            let u = require_user(user)?.clone();
            cmd_select(codec, verb, rest, store, &u, state, selected).await
        }
        "CREATE" => {
            let u = require_user(user)?;
            let name = unquote(rest.trim());
            store.create_mailbox(&u.login, &name).await?;
            Ok(("OK", "CREATE completed".to_string()))
        }
        "DELETE" => {
            let u = require_user(user)?;
            let name = unquote(rest.trim());
            store.delete_mailbox(&u.login, &name).await?;
            Ok(("OK", "DELETE completed".to_string()))
        }
        "RENAME" => {
            let u = require_user(user)?;
            let tokens = split_top_level(rest);
            if tokens.len() < 2 {
                return Err(MailError::protocol("RENAME requires source and destination"));
            }
            store.rename_mailbox(&u.login, &unquote(&tokens[0]), &unquote(&tokens[1])).await?;
            Ok(("OK", "RENAME completed".to_string()))
        }
        "SUBSCRIBE" | "UNSUBSCRIBE" => {
            let u = require_user(user)?;
            let name = unquote(rest.trim());
            let folder = store.get_folder(&u.login, &name).await.ok_or_else(|| MailError::not_found(name.clone()))?;
            folder.set_subscribed(verb == "SUBSCRIBE").await;
            Ok(("OK", format!("{} completed", verb)))
        }
        "LIST" | "LSUB" => {
            let u = require_user(user)?;
            let tokens = split_top_level(rest);
            if tokens.len() < 2 {
                return Err(MailError::protocol("LIST requires reference and mailbox pattern"));
            }
            let reference = unquote(&tokens[0]);
            let pattern = unquote(&tokens[1]);
            let mut entries = store.list(&u.login, &reference, &pattern).await;
            if verb == "LSUB" {
                entries.retain(|e| e.subscribed);
            }
            for e in &entries {
                let flags = if e.noselect { "\\Noselect" } else { "" };
                codec.write_line(&format!("* {} ({}) \"{}\" \"{}\"", verb, flags, store::DELIMITER, e.name)).await?;
            }
            Ok(("OK", format!("{} completed", verb)))
        }
        "STATUS" => {
            let u = require_user(user)?;
            let tokens = split_top_level(rest);
            if tokens.len() < 2 {
                return Err(MailError::protocol("STATUS requires mailbox and item list"));
            }
            let name = unquote(&tokens[0]);
            let items = strip_parens(&tokens[1]).ok_or_else(|| MailError::protocol("STATUS item list must be parenthesized"))?;
            let folder = store.get_folder(&u.login, &name).await.ok_or_else(|| MailError::not_found(name.clone()))?;
            let snap = folder.snapshot().await;
            let mut parts = Vec::new();
            for item in split_top_level(items) {
                let value = match item.to_ascii_uppercase().as_str() {
                    "MESSAGES" => snap.exists as u64,
                    "RECENT" => snap.recent as u64,
                    "UIDNEXT" => snap.uid_next as u64,
                    "UIDVALIDITY" => snap.uid_validity as u64,
                    "UNSEEN" => snap.unseen as u64,
                    other => return Err(MailError::protocol(format!("unknown STATUS item {}", other))),
                };
                parts.push(format!("{} {}", item.to_ascii_uppercase(), value));
            }
            codec.write_line(&format!("* STATUS \"{}\" ({})", name, parts.join(" "))).await?;
            Ok(("OK", "STATUS completed".to_string()))
        }
        "APPEND" => {
            let u = require_user(user)?.clone();
            cmd_append(rest, literal, store, &u, selected).await
        }
        "CHECK" => {
            require_selected(selected)?;
            Ok(("OK", "CHECK completed".to_string()))
        }
        "CLOSE" => {
            let sel = require_selected(selected)?;
            if !sel.read_only {
                sel.folder.expunge().await;
            }
            *selected = None;
            Ok(("OK", "CLOSE completed".to_string()))
        }
        "EXPUNGE" => cmd_expunge(codec, selected).await,
        "SEARCH" => cmd_search(codec, rest, false, selected).await,
        "FETCH" => cmd_fetch(codec, rest, false, selected).await,
        "STORE" => cmd_store(codec, rest, false, selected).await,
        "COPY" => cmd_copy(rest, false, store, user, selected).await,
        "UID" => {
            let (sub, sub_rest) = split_verb(rest);
            match sub.to_ascii_uppercase().as_str() {
                "FETCH" => cmd_fetch(codec, sub_rest, true, selected).await,
                "STORE" => cmd_store(codec, sub_rest, true, selected).await,
                "SEARCH" => cmd_search(codec, sub_rest, true, selected).await,
                "COPY" => cmd_copy(sub_rest, true, store, user, selected).await,
                "EXPUNGE" => cmd_uid_expunge(codec, sub_rest, selected).await,
                other => Err(MailError::protocol(format!("unknown UID subcommand {}", other))),
            }
        }
        "IDLE" => cmd_idle(codec, tag, selected).await,
        "" => Err(MailError::protocol("empty command")),
        other => Err(MailError::protocol(format!("unknown command {}", other))),
    }
}

async fn cmd_authenticate<S>(
    codec: &mut Codec<S>,
    rest: &str,
    store: &Arc<Store>,
    auth: &Arc<AuthManager>,
    state: &mut State,
    user: &mut Option<User>,
) -> MailResult<(&'static str, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mech_name, initial) = split_verb(rest);
    let mechanism = SaslMechanism::from_name(mech_name).ok_or_else(|| MailError::protocol("unsupported SASL mechanism"))?;
    let (login, password) = match mechanism {
        SaslMechanism::Plain => {
            let payload = if initial.trim().is_empty() {
                codec.write_line("+ ").await?;
                codec.flush().await?;
                let line = codec.read_line().await?;
                sasl::b64_decode(line.trim())?
            } else {
                sasl::b64_decode(initial.trim())?
            };
            let (_authzid, authcid, password) = sasl::parse_plain_credentials(&payload)?;
            (authcid, password)
        }
        SaslMechanism::Login => {
            codec.write_line(sasl::LOGIN_USERNAME_PROMPT).await?;
            codec.flush().await?;
            let user_line = codec.read_line().await?;
            let login = String::from_utf8(sasl::b64_decode(user_line.trim())?).map_err(|_| MailError::protocol("invalid SASL response"))?;
            codec.write_line(sasl::LOGIN_PASSWORD_PROMPT).await?;
            codec.flush().await?;
            let pass_line = codec.read_line().await?;
            let password =
                String::from_utf8(sasl::b64_decode(pass_line.trim())?).map_err(|_| MailError::protocol("invalid SASL response"))?;
            (login, password)
        }
    };
    let authenticated = auth.authenticate(&login, &password, store).await?;
    store.ensure_inbox(&authenticated.login).await;
    *user = Some(authenticated);
    *state = State::Authenticated;
    Ok(("OK", "AUTHENTICATE completed".to_string()))
}

async fn cmd_login(
    rest: &str,
    store: &Arc<Store>,
    auth: &Arc<AuthManager>,
    state: &mut State,
    user: &mut Option<User>,
) -> MailResult<(&'static str, String)> {
    let tokens = split_top_level(rest);
    if tokens.len() < 2 {
        return Err(MailError::protocol("LOGIN requires a username and password"));
    }
    let login = unquote(&tokens[0]);
    let password = unquote(&tokens[1]);
    let authenticated = auth.authenticate(&login, &password, store).await?;
    store.ensure_inbox(&authenticated.login).await;
    *user = Some(authenticated);
    *state = State::Authenticated;
    Ok(("OK", "LOGIN completed".to_string()))
}

async fn cmd_select<S>(
    codec: &mut Codec<S>,
    verb: &str,
    rest: &str,
    store: &Arc<Store>,
    user: &User,
    state: &mut State,
    selected: &mut Option<Selected>,
) -> MailResult<(&'static str, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = unquote(rest.trim());
    let folder = store.get_folder(&user.login, &name).await.ok_or_else(|| MailError::not_found(name.clone()))?;
    if folder.is_noselect().await {
        return Err(MailError::forbidden(format!("{} cannot be selected", name)));
    }
    let read_only = verb == "EXAMINE";
    let snap = if read_only { folder.snapshot().await } else { folder.select_read_write().await };
    codec.write_line(&format!("* {} EXISTS", snap.exists)).await?;
    codec.write_line(&format!("* {} RECENT", snap.recent)).await?;
    codec.write_line("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)").await?;
    codec.write_line(&format!("* OK [PERMANENTFLAGS ({})] Flags permitted", PERMANENT_FLAGS)).await?;
    codec.write_line(&format!("* OK [UIDVALIDITY {}] UIDs valid", snap.uid_validity)).await?;
    codec.write_line(&format!("* OK [UIDNEXT {}] Predicted next UID", snap.uid_next)).await?;
    if snap.unseen > 0 {
        codec.write_line(&format!("* OK [UNSEEN {}] First unseen", snap.unseen)).await?;
    }
    *selected = Some(Selected { events: folder.subscribe(), folder, read_only });
    *state = State::Authenticated;
    let access = if read_only { "READ-ONLY" } else { "READ-WRITE" };
    Ok(("OK", format!("[{}] {} completed", access, verb)))
}

async fn cmd_append(
    rest: &str,
    literal: Option<Vec<u8>>,
    store: &Arc<Store>,
    user: &User,
    selected: &mut Option<Selected>,
) -> MailResult<(&'static str, String)> {
    let raw = literal.ok_or_else(|| MailError::protocol("APPEND requires a message literal"))?;
    let tokens = split_top_level(rest);
    if tokens.is_empty() {
        return Err(MailError::protocol("APPEND requires a mailbox name"));
    }
    let mailbox = unquote(&tokens[0]);
    let mut idx = 1;
    let mut flags: FlagSet = FlagSet::new();
    if let Some(tok) = tokens.get(idx) {
        if let Some(inner) = strip_parens(tok) {
            for f in split_top_level(inner) {
                flags.insert(Flag::parse(&f));
            }
            idx += 1;
        }
    }
    let internal_date = tokens
        .get(idx)
        .and_then(|tok| chrono::DateTime::parse_from_str(&unquote(tok), "%d-%b-%Y %H:%M:%S %z").ok())
        .map(|d| d.with_timezone(&chrono::Utc));
    let canonical = store::canonicalize_crlf(&raw);
    let uid = store.append(&user.login, &mailbox, canonical, flags, internal_date).await?;
    let folder = store.get_folder(&user.login, &mailbox).await.ok_or_else(|| MailError::not_found(mailbox.clone()))?;
    if let Some(sel) = selected.as_mut() {
        if Arc::ptr_eq(&sel.folder, &folder) {
            discard_own(sel, 1).await;
        }
    }
    Ok(("OK", format!("[APPENDUID {} {}] APPEND completed", folder.uid_validity, uid)))
}

async fn cmd_expunge<S>(codec: &mut Codec<S>, selected: &mut Option<Selected>) -> MailResult<(&'static str, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sel = require_selected(selected)?;
    if sel.read_only {
        return Err(MailError::forbidden("mailbox is read-only"));
    }
    let removed = sel.folder.expunge().await;
    for seq in &removed {
        codec.write_line(&format!("* {} EXPUNGE", seq)).await?;
    }
    discard_own(sel, removed.len()).await;
    Ok(("OK", "EXPUNGE completed".to_string()))
}

async fn cmd_uid_expunge<S>(codec: &mut Codec<S>, rest: &str, selected: &mut Option<Selected>) -> MailResult<(&'static str, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // UID EXPUNGE <uid-set> (RFC 4315): expunge only the named, already-\Deleted messages.
    let sel = require_selected(selected)?;
    if sel.read_only {
        return Err(MailError::forbidden("mailbox is read-only"));
    }
    let messages = sel.folder.messages().await;
    let max_uid = messages.iter().map(|m| m.uid).max().unwrap_or(0);
    let ranges = parse_sequence_set(rest.trim(), max_uid).ok_or_else(|| MailError::protocol("bad UID set"))?;
    let uids = expand_ranges(&ranges);
    for (seq, msg) in messages.iter().enumerate().rev() {
        if uids.contains(&msg.uid) && msg.flags.contains(&Flag::Deleted) {
            sel.folder.set_flags_by_seq(seq + 1, &[], &[], false).await;
            let _ = seq;
        }
    }
    let removed = sel.folder.expunge().await;
    for seq in &removed {
        codec.write_line(&format!("* {} EXPUNGE", seq)).await?;
    }
    discard_own(sel, removed.len()).await;
    Ok(("OK", "UID EXPUNGE completed".to_string()))
}

async fn cmd_search<S>(codec: &mut Codec<S>, rest: &str, by_uid: bool, selected: &mut Option<Selected>) -> MailResult<(&'static str, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sel = require_selected(selected)?;
    let mut criteria = rest.trim();
    if let Some(after) = criteria.to_ascii_uppercase().strip_prefix("CHARSET").map(|s| s.len()) {
        let remainder = criteria[after..].trim_start();
        let (charset, remainder) = split_verb(remainder);
        if !charset.trim_matches('"').eq_ignore_ascii_case("US-ASCII") && !charset.trim_matches('"').eq_ignore_ascii_case("UTF-8") {
            return Err(MailError::protocol(format!("[BADCHARSET] unsupported charset {}", charset)));
        }
        criteria = remainder;
    }
    let messages = sel.folder.messages().await;
    let max_seq = messages.len() as u32;
    let max_uid = messages.iter().map(|m| m.uid).max().unwrap_or(0);
    let key = search_parse::parse_search(criteria, max_seq, max_uid).ok_or_else(|| MailError::protocol("invalid SEARCH criteria"))?;
    let mut matches = Vec::new();
    for (i, msg) in messages.iter().enumerate() {
        let seq = (i + 1) as u32;
        if store::search_evaluate(&key, msg, seq) {
            matches.push(if by_uid { msg.uid } else { seq });
        }
    }
    let body = matches.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" ");
    if body.is_empty() {
        codec.write_line("* SEARCH").await?;
    } else {
        codec.write_line(&format!("* SEARCH {}", body)).await?;
    }
    Ok(("OK", "SEARCH completed".to_string()))
}

async fn cmd_fetch<S>(codec: &mut Codec<S>, rest: &str, by_uid: bool, selected: &mut Option<Selected>) -> MailResult<(&'static str, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sel = require_selected(selected)?;
    let tokens = split_top_level(rest);
    if tokens.len() < 2 {
        return Err(MailError::protocol("FETCH requires a sequence set and item list"));
    }
    let spec = &tokens[0];
    let items_str = tokens[1..].join(" ");
    let items = parse_fetch_items(&items_str).ok_or_else(|| MailError::protocol("invalid FETCH item list"))?;
    let targets = resolve_targets(&sel.folder, spec, by_uid).await?;
    let mut seen_count = 0usize;
    for (seq, msg) in &targets {
        let provisional = fetch::render_items(msg, *seq, &items);
        let marks_seen = provisional.iter().any(|r| r.marks_seen);
        let (rendered_msg, mut final_items) = if marks_seen {
            let updated = sel.folder.set_flags_by_seq((*seq) as usize, &[Flag::Seen], &[], false).await;
            let mut m = msg.clone();
            if let Some((_, flags)) = updated {
                m.flags = flags;
                seen_count += 1;
            }
            let mut items2 = items.clone();
            if !items2.contains(&FetchItem::Flags) {
                items2.push(FetchItem::Flags);
            }
            (m, items2)
        } else {
            (msg.clone(), items.clone())
        };
        if by_uid && !final_items.contains(&FetchItem::Uid) {
            final_items.insert(0, FetchItem::Uid);
        }
        let rendered = fetch::render_items(&rendered_msg, *seq, &final_items);
        let body = rendered.iter().map(|r| r.text.as_str()).collect::<Vec<_>>().join(" ");
        codec.write_line(&format!("* {} FETCH ({})", seq, body)).await?;
    }
    discard_own(sel, seen_count).await;
    Ok(("OK", "FETCH completed".to_string()))
}

async fn cmd_store<S>(codec: &mut Codec<S>, rest: &str, by_uid: bool, selected: &mut Option<Selected>) -> MailResult<(&'static str, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sel = require_selected(selected)?;
    if sel.read_only {
        return Err(MailError::forbidden("mailbox is read-only"));
    }
    let tokens = split_top_level(rest);
    if tokens.len() < 3 {
        return Err(MailError::protocol("STORE requires a sequence set, action, and flag list"));
    }
    let spec = &tokens[0];
    let action = tokens[1].to_ascii_uppercase();
    let flag_list = tokens[2..].join(" ");
    let flag_tokens = parse_flag_list(&flag_list).ok_or_else(|| MailError::protocol("STORE flag list must be parenthesized"))?;
    let flags: Vec<Flag> = flag_tokens.iter().map(|t| Flag::parse(t)).filter(|f| f.is_settable()).collect();
    let silent = action.ends_with(".SILENT");
    let bare = action.trim_end_matches(".SILENT");
    let (add, remove, replace): (&[Flag], &[Flag], bool) = match bare {
        "FLAGS" => (&flags, &[], true),
        "+FLAGS" => (&flags, &[], false),
        "-FLAGS" => (&[], &flags, false),
        other => return Err(MailError::protocol(format!("unknown STORE action {}", other))),
    };
    let targets = resolve_targets(&sel.folder, spec, by_uid).await?;
    let mut touched = 0usize;
    for (seq, _) in &targets {
        if let Some((uid, new_flags)) = sel.folder.set_flags_by_seq((*seq) as usize, add, remove, replace).await {
            touched += 1;
            if !silent {
                let mut parts = vec![format!("FLAGS ({})", new_flags.iter().map(Flag::as_wire).collect::<Vec<_>>().join(" "))];
                if by_uid {
                    parts.insert(0, format!("UID {}", uid));
                }
                codec.write_line(&format!("* {} FETCH ({})", seq, parts.join(" "))).await?;
            }
        }
    }
    discard_own(sel, touched).await;
    Ok(("OK", "STORE completed".to_string()))
}

async fn cmd_copy(
    rest: &str,
    by_uid: bool,
    store: &Arc<Store>,
    user: &Option<User>,
    selected: &mut Option<Selected>,
) -> MailResult<(&'static str, String)> {
    let u = require_user(user)?;
    let tokens = split_top_level(rest);
    if tokens.len() < 2 {
        return Err(MailError::protocol("COPY requires a sequence set and destination mailbox"));
    }
    let spec = &tokens[0];
    let dest_name = unquote(&tokens[1]);
    let sel = require_selected(selected)?;
    let targets = resolve_targets(&sel.folder, spec, by_uid).await?;
    let dest = store.get_folder(&u.login, &dest_name).await.ok_or_else(|| MailError::not_found(dest_name.clone()))?;
    let uids: Vec<u32> = targets.iter().map(|(_, m)| m.uid).collect();
    let mapping = store.copy(&sel.folder, &uids, &dest).await;
    if Arc::ptr_eq(&sel.folder, &dest) {
        discard_own(sel, mapping.len()).await;
    }
    let src_uids = mapping.iter().map(|(s, _)| s.to_string()).collect::<Vec<_>>().join(",");
    let dst_uids = mapping.iter().map(|(_, d)| d.to_string()).collect::<Vec<_>>().join(",");
    Ok(("OK", format!("[COPYUID {} {} {}] COPY completed", dest.uid_validity, src_uids, dst_uids)))
}

async fn cmd_idle<S>(codec: &mut Codec<S>, tag: &str, selected: &mut Option<Selected>) -> MailResult<(&'static str, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let sel = require_selected(selected)?;
    codec.write_line("+ idling").await?;
    codec.flush().await?;
    let _ = tag;
    loop {
        tokio::select! {
            line = codec.read_line() => {
                let line = line?;
                if line.trim().eq_ignore_ascii_case("DONE") {
                    break;
                }
            }
            event = sel.events.recv() => {
                match event {
                    Ok(ev) => {
                        codec.write_line(&render_update(&ev)).await?;
                        codec.flush().await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    Ok(("OK", "IDLE terminated".to_string()))
}

/// Resolve a sequence/UID set against the currently live message list, returning each match
/// as `(sequence number, message)` so callers needing UID-addressed output still have the
/// sequence number for untagged responses.
async fn resolve_targets(folder: &Folder, spec: &str, by_uid: bool) -> MailResult<Vec<(u32, store::StoredMessage)>> {
    let messages = folder.messages().await;
    let mut out = Vec::new();
    if by_uid {
        let max_uid = messages.iter().map(|m| m.uid).max().unwrap_or(0);
        let ranges = parse_sequence_set(spec, max_uid).ok_or_else(|| MailError::protocol("bad UID set"))?;
        let uids = expand_ranges(&ranges);
        for (i, m) in messages.iter().enumerate() {
            if uids.contains(&m.uid) {
                out.push(((i + 1) as u32, m.clone()));
            }
        }
    } else {
        let max_seq = messages.len() as u32;
        let ranges = parse_sequence_set(spec, max_seq).ok_or_else(|| MailError::protocol("bad sequence set"))?;
        for seq in expand_ranges(&ranges) {
            if let Some(m) = messages.get((seq - 1) as usize) {
                out.push((seq, m.clone()));
            }
        }
    }
    Ok(out)
}
