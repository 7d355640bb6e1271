/*
 * command.rs
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

//! Tokenizing helpers for IMAP command lines: tag/verb splitting, quoted strings, parenthesized
//! lists, sequence sets, and the FETCH item/section grammar. Literal arguments never reach this
//! layer as raw bytes (see `mod.rs::read_command`, which folds text literals into quoted strings
//! before tokenizing and special-cases APPEND's binary message literal).

/// Split `tag COMMAND rest` into `(tag, "COMMAND rest")`.
pub fn split_tag(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

/// Split `COMMAND rest` into `(COMMAND, rest)`.
pub fn split_verb(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

/// Split on top-level whitespace: depth inside `()`, `[]`, `<>`, or a quoted string is never a
/// split point, so `BODY[HEADER.FIELDS (A B)]` and `(FLAGS UID)` each stay one token.
pub fn split_top_level(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                cur.push(c);
                if let Some(next) = chars.next() {
                    cur.push(next);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            '(' | '[' | '<' if !in_quotes => {
                depth += 1;
                cur.push(c);
            }
            ')' | ']' | '>' if !in_quotes => {
                depth -= 1;
                cur.push(c);
            }
            c if c.is_whitespace() && depth == 0 && !in_quotes => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// Strip a balanced `(...)` wrapper, if present.
pub fn strip_parens(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Unquote a double-quoted IMAP string, or pass an atom through unchanged.
pub fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        let inner = &s[1..s.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        out
    } else {
        s.to_string()
    }
}

/// Quote arbitrary text for re-insertion into a command line in place of a literal (used by
/// `mod.rs::read_command` for any literal argument except APPEND's message body).
pub fn quote_for_line(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parse a flag list `(\Seen \Answered custom)`, returning the flag tokens in order.
pub fn parse_flag_list(s: &str) -> Option<Vec<String>> {
    let inner = strip_parens(s)?;
    Some(split_top_level(inner))
}

/// Parse an IMAP sequence set `1,3:5,7:*`. `*` resolves to `max` (highest sequence number or
/// UID currently in the mailbox; callers pass the right one for the context).
pub fn parse_sequence_set(s: &str, max: u32) -> Option<Vec<(u32, u32)>> {
    let mut out = Vec::new();
    for part in s.split(',') {
        if part.is_empty() {
            return None;
        }
        if let Some((a, b)) = part.split_once(':') {
            let lo = parse_seq_num(a, max)?;
            let hi = parse_seq_num(b, max)?;
            out.push(if lo <= hi { (lo, hi) } else { (hi, lo) });
        } else {
            let n = parse_seq_num(part, max)?;
            out.push((n, n));
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn parse_seq_num(s: &str, max: u32) -> Option<u32> {
    if s == "*" {
        Some(max)
    } else {
        s.parse().ok()
    }
}

/// Expand a sequence-set range list into the individual numbers it names, ascending and deduped.
pub fn expand_ranges(ranges: &[(u32, u32)]) -> Vec<u32> {
    let mut out: Vec<u32> = ranges.iter().flat_map(|&(lo, hi)| lo..=hi).collect();
    out.sort_unstable();
    out.dedup();
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionKind {
    Full,
    Header,
    HeaderFields(Vec<String>),
    HeaderFieldsNot(Vec<String>),
    Text,
    Mime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Dotted MIME part number this section addresses (e.g. `"1.2"`); empty means the
    /// top-level message.
    pub part: String,
    pub kind: SectionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    Uid,
    Flags,
    InternalDate,
    Rfc822,
    Rfc822Header,
    Rfc822Text,
    Rfc822Size,
    Envelope,
    Body,
    BodyStructure,
    BodySection { peek: bool, section: Section, partial: Option<(u32, u32)> },
}

/// Parse the FETCH item list: a macro (`ALL`/`FAST`/`FULL`), a single atom, or a parenthesized
/// list of atoms/`BODY[...]`/`BODY.PEEK[...]` items.
pub fn parse_fetch_items(s: &str) -> Option<Vec<FetchItem>> {
    let trimmed = s.trim();
    match trimmed.to_ascii_uppercase().as_str() {
        "ALL" => return Some(vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size, FetchItem::Envelope]),
        "FAST" => return Some(vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size]),
        "FULL" => {
            return Some(vec![
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Rfc822Size,
                FetchItem::Envelope,
                FetchItem::Body,
            ])
        }
        _ => {}
    }
    let inner = strip_parens(trimmed).unwrap_or(trimmed);
    let tokens = split_top_level(inner);
    if tokens.is_empty() {
        return None;
    }
    tokens.iter().map(|t| parse_one_fetch_item(t)).collect()
}

fn parse_one_fetch_item(tok: &str) -> Option<FetchItem> {
    let upper = tok.to_ascii_uppercase();
    if let Some(bracket_pos) = tok.find('[') {
        let prefix = &upper[..bracket_pos];
        let peek = match prefix {
            "BODY" => false,
            "BODY.PEEK" => true,
            _ => return None,
        };
        let close = tok.rfind(']')?;
        let section_content = &tok[bracket_pos + 1..close];
        let section = parse_section(section_content)?;
        let after = &tok[close + 1..];
        let partial = if after.is_empty() { None } else { parse_partial(after) };
        return Some(FetchItem::BodySection { peek, section, partial });
    }
    match upper.as_str() {
        "UID" => Some(FetchItem::Uid),
        "FLAGS" => Some(FetchItem::Flags),
        "INTERNALDATE" => Some(FetchItem::InternalDate),
        "RFC822" => Some(FetchItem::Rfc822),
        "RFC822.HEADER" => Some(FetchItem::Rfc822Header),
        "RFC822.TEXT" => Some(FetchItem::Rfc822Text),
        "RFC822.SIZE" => Some(FetchItem::Rfc822Size),
        "ENVELOPE" => Some(FetchItem::Envelope),
        "BODY" => Some(FetchItem::Body),
        "BODYSTRUCTURE" => Some(FetchItem::BodyStructure),
        _ => None,
    }
}

fn parse_section(content: &str) -> Option<Section> {
    let content = content.trim();
    if content.is_empty() {
        return Some(Section { part: String::new(), kind: SectionKind::Full });
    }
    let mut rest = content;
    let mut segments: Vec<&str> = Vec::new();
    loop {
        let digits_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits_len == 0 {
            break;
        }
        segments.push(&rest[..digits_len]);
        rest = &rest[digits_len..];
        match rest.strip_prefix('.') {
            Some(stripped) => rest = stripped,
            None => break,
        }
    }
    let part = segments.join(".");
    let rest = rest.trim();
    if rest.is_empty() {
        return Some(Section { part, kind: SectionKind::Full });
    }
    let rest_upper = rest.to_ascii_uppercase();
    if rest_upper == "HEADER" {
        return Some(Section { part, kind: SectionKind::Header });
    }
    if rest_upper == "TEXT" {
        return Some(Section { part, kind: SectionKind::Text });
    }
    if rest_upper == "MIME" {
        return Some(Section { part, kind: SectionKind::Mime });
    }
    if let Some(after) = strip_ci_prefix(rest, "HEADER.FIELDS.NOT") {
        let names = parse_field_name_list(after.trim())?;
        return Some(Section { part, kind: SectionKind::HeaderFieldsNot(names) });
    }
    if let Some(after) = strip_ci_prefix(rest, "HEADER.FIELDS") {
        let names = parse_field_name_list(after.trim())?;
        return Some(Section { part, kind: SectionKind::HeaderFields(names) });
    }
    None
}

fn strip_ci_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn parse_field_name_list(s: &str) -> Option<Vec<String>> {
    let inner = strip_parens(s)?;
    Some(split_top_level(inner).into_iter().map(|t| unquote(&t)).collect())
}

fn parse_partial(s: &str) -> Option<(u32, u32)> {
    let s = s.strip_prefix('<')?.strip_suffix('>')?;
    let (a, b) = s.split_once('.')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_tag_and_verb() {
        let (tag, rest) = split_tag("a1 SELECT INBOX");
        assert_eq!(tag, "a1");
        let (verb, rest) = split_verb(rest);
        assert_eq!(verb, "SELECT");
        assert_eq!(rest, "INBOX");
    }

    #[test]
    fn top_level_split_keeps_bracket_sections_whole() {
        let toks = split_top_level("(UID BODY[HEADER.FIELDS (SUBJECT)] FLAGS)");
        assert_eq!(toks, vec!["(UID", "BODY[HEADER.FIELDS", "(SUBJECT)]", "FLAGS)"]);
    }

    #[test]
    fn fetch_items_parenthesized_list() {
        let inner = strip_parens("(UID FLAGS)").unwrap();
        let items: Vec<FetchItem> = split_top_level(inner).iter().map(|t| parse_one_fetch_item(t).unwrap()).collect();
        assert_eq!(items, vec![FetchItem::Uid, FetchItem::Flags]);
    }

    #[test]
    fn header_fields_section_parses_names() {
        let item = parse_one_fetch_item("BODY[HEADER.FIELDS (Subject To)]").unwrap();
        match item {
            FetchItem::BodySection { peek, section, partial } => {
                assert!(!peek);
                assert_eq!(section.part, "");
                assert_eq!(section.kind, SectionKind::HeaderFields(vec!["Subject".into(), "To".into()]));
                assert_eq!(partial, None);
            }
            _ => panic!("wrong item"),
        }
    }

    #[test]
    fn body_peek_with_part_number_and_partial() {
        let item = parse_one_fetch_item("BODY.PEEK[1.2]<10.20>").unwrap();
        match item {
            FetchItem::BodySection { peek, section, partial } => {
                assert!(peek);
                assert_eq!(section.part, "1.2");
                assert_eq!(section.kind, SectionKind::Full);
                assert_eq!(partial, Some((10, 20)));
            }
            _ => panic!("wrong item"),
        }
    }

    #[test]
    fn mime_section_on_subpart() {
        let item = parse_one_fetch_item("BODY[2.MIME]").unwrap();
        match item {
            FetchItem::BodySection { section, .. } => {
                assert_eq!(section.part, "2");
                assert_eq!(section.kind, SectionKind::Mime);
            }
            _ => panic!("wrong item"),
        }
    }

    #[test]
    fn sequence_set_parses_ranges_and_star() {
        let ranges = parse_sequence_set("1,3:5,7:*", 10).unwrap();
        assert_eq!(ranges, vec![(1, 1), (3, 5), (7, 10)]);
        assert_eq!(expand_ranges(&ranges), vec![1, 3, 4, 5, 7, 8, 9, 10]);
    }

    #[test]
    fn flag_list_parses() {
        assert_eq!(parse_flag_list("(\\Seen \\Deleted)").unwrap(), vec!["\\Seen", "\\Deleted"]);
    }
}
