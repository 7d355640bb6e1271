/*
 * search_parse.rs
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

//! Wire grammar for SEARCH criteria, parsed into `store::SearchKey`. `OR`/`NOT` take one or two
//! whole search-keys as their arguments, which may themselves span several tokens (e.g. `HEADER
//! field value`), so this walks a token cursor rather than pre-splitting into fixed arity.

use std::collections::VecDeque;

use chrono::NaiveDate;

use crate::store::SearchKey;

use super::command::{split_top_level, strip_parens, unquote};

/// Parse a full SEARCH criteria string (criteria already has any leading `CHARSET spec`
/// stripped by the caller) against the current mailbox's highest sequence number and UID.
pub fn parse_search(s: &str, max_seq: u32, max_uid: u32) -> Option<SearchKey> {
    let tokens = split_top_level(s);
    if tokens.is_empty() {
        return None;
    }
    let mut cursor: VecDeque<String> = tokens.into();
    let mut keys = Vec::new();
    while !cursor.is_empty() {
        keys.push(parse_one(&mut cursor, max_seq, max_uid)?);
    }
    Some(if keys.len() == 1 { keys.into_iter().next().unwrap() } else { SearchKey::And(keys) })
}

fn parse_one(tokens: &mut VecDeque<String>, max_seq: u32, max_uid: u32) -> Option<SearchKey> {
    let tok = tokens.pop_front()?;
    if let Some(inner) = strip_parens(&tok) {
        let mut sub: VecDeque<String> = split_top_level(inner).into();
        let mut keys = Vec::new();
        while !sub.is_empty() {
            keys.push(parse_one(&mut sub, max_seq, max_uid)?);
        }
        return Some(if keys.len() == 1 { keys.into_iter().next().unwrap() } else { SearchKey::And(keys) });
    }
    let upper = tok.to_ascii_uppercase();
    match upper.as_str() {
        "ALL" => Some(SearchKey::All),
        "ANSWERED" => Some(SearchKey::Answered),
        "DELETED" => Some(SearchKey::Deleted),
        "FLAGGED" => Some(SearchKey::Flagged),
        "SEEN" => Some(SearchKey::Seen),
        "RECENT" => Some(SearchKey::Recent),
        "NEW" => Some(SearchKey::New),
        "OLD" => Some(SearchKey::Old),
        "UNANSWERED" => Some(SearchKey::Unanswered),
        "UNFLAGGED" => Some(SearchKey::Unflagged),
        "UNSEEN" => Some(SearchKey::Unseen),
        "UNDELETED" => Some(SearchKey::Undeleted),
        "DRAFT" => Some(SearchKey::Draft),
        "UNDRAFT" => Some(SearchKey::Undraft),
        "KEYWORD" => Some(SearchKey::Keyword(unquote(&tokens.pop_front()?))),
        "UNKEYWORD" => Some(SearchKey::Unkeyword(unquote(&tokens.pop_front()?))),
        "FROM" => Some(SearchKey::From(unquote(&tokens.pop_front()?))),
        "TO" => Some(SearchKey::To(unquote(&tokens.pop_front()?))),
        "CC" => Some(SearchKey::Cc(unquote(&tokens.pop_front()?))),
        "BCC" => Some(SearchKey::Bcc(unquote(&tokens.pop_front()?))),
        "SUBJECT" => Some(SearchKey::Subject(unquote(&tokens.pop_front()?))),
        "BODY" => Some(SearchKey::Body(unquote(&tokens.pop_front()?))),
        "TEXT" => Some(SearchKey::Text(unquote(&tokens.pop_front()?))),
        "HEADER" => {
            let name = unquote(&tokens.pop_front()?);
            let value = unquote(&tokens.pop_front()?);
            Some(SearchKey::Header(name, value))
        }
        "LARGER" => tokens.pop_front()?.parse().ok().map(SearchKey::Larger),
        "SMALLER" => tokens.pop_front()?.parse().ok().map(SearchKey::Smaller),
        "BEFORE" => parse_date(&tokens.pop_front()?).map(SearchKey::Before),
        "ON" => parse_date(&tokens.pop_front()?).map(SearchKey::On),
        "SINCE" => parse_date(&tokens.pop_front()?).map(SearchKey::Since),
        "SENTBEFORE" => parse_date(&tokens.pop_front()?).map(SearchKey::SentBefore),
        "SENTON" => parse_date(&tokens.pop_front()?).map(SearchKey::SentOn),
        "SENTSINCE" => parse_date(&tokens.pop_front()?).map(SearchKey::SentSince),
        "UID" => {
            let spec = tokens.pop_front()?;
            super::command::parse_sequence_set(&spec, max_uid).map(SearchKey::Uid)
        }
        "OR" => {
            let a = parse_one(tokens, max_seq, max_uid)?;
            let b = parse_one(tokens, max_seq, max_uid)?;
            Some(SearchKey::Or(Box::new(a), Box::new(b)))
        }
        "NOT" => {
            let a = parse_one(tokens, max_seq, max_uid)?;
            Some(SearchKey::Not(Box::new(a)))
        }
        _ => super::command::parse_sequence_set(&tok, max_seq).map(SearchKey::SeqSet),
    }
}

/// IMAP SEARCH date: `DD-Mon-YYYY`, e.g. `01-Jan-2026`.
fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = unquote(s);
    NaiveDate::parse_from_str(&s, "%d-%b-%Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_flags_and() {
        let key = parse_search("SEEN FLAGGED", 10, 10).unwrap();
        match key {
            SearchKey::And(keys) => assert_eq!(keys.len(), 2),
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn or_takes_two_keys() {
        let key = parse_search("OR SEEN DELETED", 10, 10).unwrap();
        assert!(matches!(key, SearchKey::Or(_, _)));
    }

    #[test]
    fn header_takes_two_string_args() {
        let key = parse_search("HEADER \"X-Spam\" yes", 10, 10).unwrap();
        match key {
            SearchKey::Header(name, value) => {
                assert_eq!(name, "X-Spam");
                assert_eq!(value, "yes");
            }
            _ => panic!("expected Header"),
        }
    }

    #[test]
    fn parenthesized_group_nests() {
        let key = parse_search("OR (SEEN FLAGGED) DELETED", 10, 10).unwrap();
        match key {
            SearchKey::Or(a, b) => {
                assert!(matches!(*a, SearchKey::And(_)));
                assert!(matches!(*b, SearchKey::Deleted));
            }
            _ => panic!("expected Or"),
        }
    }

    #[test]
    fn bare_sequence_set_is_seqset() {
        let key = parse_search("1:3", 10, 10).unwrap();
        assert!(matches!(key, SearchKey::SeqSet(ranges) if ranges == vec![(1, 3)]));
    }

    #[test]
    fn since_date_parses() {
        let key = parse_search("SINCE 01-Jan-2026", 10, 10).unwrap();
        assert!(matches!(key, SearchKey::Since(_)));
    }
}
