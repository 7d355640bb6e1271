/*
 * search.rs
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

//! IMAP SEARCH criteria tree and evaluator.

use chrono::NaiveDate;

use crate::store::message::{Flag, StoredMessage};

/// A parsed SEARCH key. Juxtaposition in the wire grammar is implicit AND; `And` here models
/// that explicitly so the tree is uniform.
#[derive(Debug, Clone)]
pub enum SearchKey {
    All,
    Answered,
    Deleted,
    Flagged,
    Seen,
    Recent,
    New,
    Old,
    Unanswered,
    Unflagged,
    Unseen,
    Undeleted,
    Draft,
    Undraft,
    Keyword(String),
    Unkeyword(String),
    From(String),
    To(String),
    Cc(String),
    Bcc(String),
    Subject(String),
    Body(String),
    Text(String),
    Header(String, String),
    Larger(u64),
    Smaller(u64),
    Before(NaiveDate),
    On(NaiveDate),
    Since(NaiveDate),
    SentBefore(NaiveDate),
    SentOn(NaiveDate),
    SentSince(NaiveDate),
    Uid(Vec<(u32, u32)>),
    SeqSet(Vec<(u32, u32)>),
    And(Vec<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    Not(Box<SearchKey>),
}

fn set_contains(ranges: &[(u32, u32)], n: u32) -> bool {
    ranges.iter().any(|&(lo, hi)| n >= lo && n <= hi)
}

/// Evaluate one key against one message. `seq` is the message's current 1-based sequence
/// number; `max_uid`/`max_seq` support the NEW/OLD aliases (NEW == RECENT && UNSEEN per RFC).
pub fn evaluate(key: &SearchKey, msg: &StoredMessage, seq: u32) -> bool {
    match key {
        SearchKey::All => true,
        SearchKey::Answered => msg.flags.contains(&Flag::Answered),
        SearchKey::Deleted => msg.flags.contains(&Flag::Deleted),
        SearchKey::Flagged => msg.flags.contains(&Flag::Flagged),
        SearchKey::Seen => msg.flags.contains(&Flag::Seen),
        SearchKey::Recent => msg.flags.contains(&Flag::Recent),
        SearchKey::New => msg.flags.contains(&Flag::Recent) && !msg.flags.contains(&Flag::Seen),
        SearchKey::Old => !msg.flags.contains(&Flag::Recent),
        SearchKey::Unanswered => !msg.flags.contains(&Flag::Answered),
        SearchKey::Unflagged => !msg.flags.contains(&Flag::Flagged),
        SearchKey::Unseen => !msg.flags.contains(&Flag::Seen),
        SearchKey::Undeleted => !msg.flags.contains(&Flag::Deleted),
        SearchKey::Draft => msg.flags.contains(&Flag::Draft),
        SearchKey::Undraft => !msg.flags.contains(&Flag::Draft),
        SearchKey::Keyword(k) => msg.flags.contains(&Flag::Keyword(k.clone())),
        SearchKey::Unkeyword(k) => !msg.flags.contains(&Flag::Keyword(k.clone())),
        SearchKey::Larger(n) => msg.size() > *n,
        SearchKey::Smaller(n) => msg.size() < *n,
        SearchKey::Before(d) => msg.internal_date.date_naive() < *d,
        SearchKey::On(d) => msg.internal_date.date_naive() == *d,
        SearchKey::Since(d) => msg.internal_date.date_naive() >= *d,
        SearchKey::SentBefore(d) => sent_date(msg).map_or(false, |sd| sd < *d),
        SearchKey::SentOn(d) => sent_date(msg).map_or(false, |sd| sd == *d),
        SearchKey::SentSince(d) => sent_date(msg).map_or(false, |sd| sd >= *d),
        SearchKey::Uid(ranges) => set_contains(ranges, msg.uid),
        SearchKey::SeqSet(ranges) => set_contains(ranges, seq),
        SearchKey::From(s) => header_contains(msg, "from", s),
        SearchKey::To(s) => header_contains(msg, "to", s),
        SearchKey::Cc(s) => header_contains(msg, "cc", s),
        SearchKey::Bcc(s) => header_contains(msg, "bcc", s),
        SearchKey::Subject(s) => header_contains(msg, "subject", s),
        SearchKey::Header(name, s) => {
            if s.is_empty() {
                header_value(msg, name).is_some()
            } else {
                header_contains(msg, name, s)
            }
        }
        SearchKey::Body(s) => body_contains(msg, s),
        SearchKey::Text(s) => header_any_contains(msg, s) || body_contains(msg, s),
        SearchKey::And(keys) => keys.iter().all(|k| evaluate(k, msg, seq)),
        SearchKey::Or(a, b) => evaluate(a, msg, seq) || evaluate(b, msg, seq),
        SearchKey::Not(k) => !evaluate(k, msg, seq),
    }
}

fn sent_date(msg: &StoredMessage) -> Option<NaiveDate> {
    crate::mime::parse_envelope(&msg.raw).ok().and_then(|e| e.date).map(|d| d.date_naive())
}

fn split_header_body(raw: &[u8]) -> (&[u8], &[u8]) {
    for i in 0..raw.len().saturating_sub(3) {
        if &raw[i..i + 4] == b"\r\n\r\n" {
            return (&raw[..i], &raw[i + 4..]);
        }
    }
    for i in 0..raw.len().saturating_sub(1) {
        if &raw[i..i + 2] == b"\n\n" {
            return (&raw[..i], &raw[i + 2..]);
        }
    }
    (raw, &[])
}

fn header_value(msg: &StoredMessage, name: &str) -> Option<String> {
    let (headers, _) = split_header_body(&msg.raw);
    let text = String::from_utf8_lossy(headers);
    let mut current: Option<String> = None;
    let mut found: Option<String> = None;
    for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(c) = current.as_mut() {
                c.push(' ');
                c.push_str(line.trim());
            }
            continue;
        }
        if let Some((n, v)) = line.split_once(':') {
            if n.eq_ignore_ascii_case(name) {
                found = Some(v.trim().to_string());
                current = found.clone();
            } else {
                current = None;
            }
        }
    }
    found
}

fn header_contains(msg: &StoredMessage, name: &str, needle: &str) -> bool {
    header_value(msg, name).map_or(false, |v| contains_ci(&v, needle))
}

fn header_any_contains(msg: &StoredMessage, needle: &str) -> bool {
    let (headers, _) = split_header_body(&msg.raw);
    contains_ci(&String::from_utf8_lossy(headers), needle)
}

fn body_contains(msg: &StoredMessage, needle: &str) -> bool {
    if let Ok((plain, html, _)) = crate::mime::extract_structured_body(&msg.raw) {
        if plain.as_deref().map_or(false, |s| contains_ci(s, needle)) {
            return true;
        }
        if html.as_deref().map_or(false, |s| contains_ci(s, needle)) {
            return true;
        }
    }
    let (_, body) = split_header_body(&msg.raw);
    contains_ci(&String::from_utf8_lossy(body), needle)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::message::FlagSet;
    use chrono::Utc;

    fn msg(raw: &[u8], flags: FlagSet) -> StoredMessage {
        StoredMessage { uid: 1, flags, internal_date: Utc::now(), raw: raw.to_vec() }
    }

    #[test]
    fn subject_search_is_case_insensitive_substring() {
        let m = msg(b"From: a@b\r\nSubject: Hello World\r\n\r\nbody", FlagSet::new());
        assert!(evaluate(&SearchKey::Subject("hello".into()), &m, 1));
        assert!(!evaluate(&SearchKey::Subject("xyz".into()), &m, 1));
    }

    #[test]
    fn uid_search_matches_exact_set() {
        let m = msg(b"Subject: x\r\n\r\n", FlagSet::new());
        let key = SearchKey::Uid(vec![(1, 1)]);
        assert!(evaluate(&key, &m, 5));
    }

    #[test]
    fn and_or_not_compose() {
        let mut flags = FlagSet::new();
        flags.insert(Flag::Seen);
        let m = msg(b"Subject: x\r\n\r\n", flags);
        assert!(evaluate(&SearchKey::And(vec![SearchKey::Seen, SearchKey::All]), &m, 1));
        assert!(!evaluate(&SearchKey::Not(Box::new(SearchKey::Seen)), &m, 1));
        assert!(evaluate(
            &SearchKey::Or(Box::new(SearchKey::Deleted), Box::new(SearchKey::Seen)),
            &m,
            1
        ));
    }
}
