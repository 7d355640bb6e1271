/*
 * error.rs
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

//! Error kinds shared by the store and the protocol sessions.

use std::fmt;

/// Error raised by the store or by a protocol session.
///
/// Each variant maps to a wire-level response at the protocol layer: `BAD`/`NO` for IMAP,
/// `5xx`/`4xx` for SMTP, `-ERR` for POP3. `Io`, `Protocol`, and `Shutdown` terminate the
/// connection after a best-effort reply; the rest leave the session alive.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("command not allowed in current state: {0}")]
    State(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server is shutting down")]
    Shutdown,

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl MailError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True if this error must terminate the connection rather than just fail the command.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Protocol(_) | Self::Shutdown | Self::Internal(_))
    }
}

pub type MailResult<T> = Result<T, MailError>;

/// Wraps a message for display in a protocol response line; collapses CR/LF so a single
/// reply never spans more than the wire format allows.
pub fn one_line(msg: &str) -> String {
    msg.replace(['\r', '\n'], " ")
}

impl fmt::Display for HumanPhrase<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", one_line(self.0))
    }
}

/// Helper for building a human-readable phrase for IMAP NO/BAD and SMTP reply text.
pub struct HumanPhrase<'a>(pub &'a str);
