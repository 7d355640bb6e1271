/*
 * message.rs
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

//! Stored message and flag set.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// IMAP message flag. `Recent` is exclusive: set once on arrival, cleared by the next
/// read-write SELECT that observes it. `Keyword` carries arbitrary user-defined flags.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    Keyword(String),
}

impl Flag {
    /// Parse a flag token as it appears on the wire, e.g. `\Seen` or `Urgent`.
    pub fn parse(token: &str) -> Flag {
        match token {
            t if t.eq_ignore_ascii_case("\\Seen") => Flag::Seen,
            t if t.eq_ignore_ascii_case("\\Answered") => Flag::Answered,
            t if t.eq_ignore_ascii_case("\\Flagged") => Flag::Flagged,
            t if t.eq_ignore_ascii_case("\\Deleted") => Flag::Deleted,
            t if t.eq_ignore_ascii_case("\\Draft") => Flag::Draft,
            t if t.eq_ignore_ascii_case("\\Recent") => Flag::Recent,
            other => Flag::Keyword(other.to_string()),
        }
    }

    /// Wire representation, e.g. `\Seen` or `Urgent`.
    pub fn as_wire(&self) -> String {
        match self {
            Flag::Seen => "\\Seen".to_string(),
            Flag::Answered => "\\Answered".to_string(),
            Flag::Flagged => "\\Flagged".to_string(),
            Flag::Deleted => "\\Deleted".to_string(),
            Flag::Draft => "\\Draft".to_string(),
            Flag::Recent => "\\Recent".to_string(),
            Flag::Keyword(k) => k.clone(),
        }
    }

    /// System flags settable by STORE (`\Recent` is server-managed and excluded).
    pub fn is_settable(&self) -> bool {
        !matches!(self, Flag::Recent)
    }
}

pub type FlagSet = BTreeSet<Flag>;

/// A message held in a folder. `raw` is the canonicalized (CRLF) RFC 822/MIME byte stream;
/// envelope, body structure, and section extraction are derived from it on demand via the
/// MIME parser rather than cached, since the store never needs to re-serialize a message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uid: u32,
    pub flags: FlagSet,
    pub internal_date: DateTime<Utc>,
    pub raw: Vec<u8>,
}

impl StoredMessage {
    pub fn size(&self) -> u64 {
        self.raw.len() as u64
    }
}

/// Canonicalize line endings to CRLF, once, at append time (APPEND and SMTP delivery both
/// funnel through this so stored bytes are consistent regardless of how they arrived).
pub fn canonicalize_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'\r' => {
                out.push(b'\r');
                out.push(b'\n');
                if i + 1 < data.len() && data[i + 1] == b'\n' {
                    i += 2;
                } else {
                    i += 1;
                }
            }
            b'\n' => {
                out.push(b'\r');
                out.push(b'\n');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_roundtrip() {
        assert_eq!(Flag::parse("\\Seen"), Flag::Seen);
        assert_eq!(Flag::parse("\\DELETED"), Flag::Deleted);
        assert_eq!(Flag::parse("Urgent"), Flag::Keyword("Urgent".to_string()));
        assert_eq!(Flag::Seen.as_wire(), "\\Seen");
    }

    #[test]
    fn canonicalize_mixed_endings() {
        let out = canonicalize_crlf(b"a\r\nb\nc\rd");
        assert_eq!(out, b"a\r\nb\r\nc\r\nd");
    }
}
