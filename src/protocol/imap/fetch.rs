/*
 * fetch.rs
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

//! FETCH item formatting: flags/dates/sizes straight off `StoredMessage`, ENVELOPE and
//! BODYSTRUCTURE from the MIME parser, and BODY[section]<partial> slicing of the raw bytes
//! (or a sub-part's bytes, located via `structure::EntityNode`).

use std::collections::HashMap;

use crate::mime::{self, EntityNode, EnvelopeHeaders, MimeHandler, MimeParseError, MimeParser};
use crate::store::{Flag, StoredMessage};

use super::command::{FetchItem, Section, SectionKind};

/// One rendered `FETCH` data item, e.g. `UID 4` or `FLAGS (\Seen)`; joined with spaces and
/// wrapped in parens by the caller.
pub struct RenderedItem {
    pub text: String,
    /// True if this item implicitly set `\Seen` (a non-`.PEEK` `BODY[...]`/`RFC822`/
    /// `RFC822.TEXT` fetch of an unseen message) and the caller should fold in `FLAGS` too.
    pub marks_seen: bool,
}

pub fn render_items(msg: &StoredMessage, seq: u32, items: &[FetchItem]) -> Vec<RenderedItem> {
    items.iter().map(|item| render_one(msg, seq, item)).collect()
}

fn render_one(msg: &StoredMessage, _seq: u32, item: &FetchItem) -> RenderedItem {
    match item {
        FetchItem::Uid => RenderedItem { text: format!("UID {}", msg.uid), marks_seen: false },
        FetchItem::Flags => RenderedItem { text: format!("FLAGS ({})", flags_wire(msg)), marks_seen: false },
        FetchItem::InternalDate => {
            RenderedItem { text: format!("INTERNALDATE \"{}\"", format_internal_date(msg)), marks_seen: false }
        }
        FetchItem::Rfc822Size => RenderedItem { text: format!("RFC822.SIZE {}", msg.raw.len()), marks_seen: false },
        FetchItem::Rfc822 => {
            RenderedItem { text: literal_item("RFC822", &msg.raw), marks_seen: !msg.flags.contains(&Flag::Seen) }
        }
        FetchItem::Rfc822Header => {
            let (header, _) = split_header_body(&msg.raw);
            RenderedItem { text: literal_item("RFC822.HEADER", header), marks_seen: false }
        }
        FetchItem::Rfc822Text => {
            let (_, body) = split_header_body(&msg.raw);
            RenderedItem { text: literal_item("RFC822.TEXT", body), marks_seen: !msg.flags.contains(&Flag::Seen) }
        }
        FetchItem::Envelope => RenderedItem { text: format!("ENVELOPE {}", render_envelope(msg)), marks_seen: false },
        FetchItem::Body => {
            let tree = mime::parse_structure(&msg.raw);
            RenderedItem { text: format!("BODY {}", render_structure(tree.as_ref(), false)), marks_seen: false }
        }
        FetchItem::BodyStructure => {
            let tree = mime::parse_structure(&msg.raw);
            RenderedItem {
                text: format!("BODYSTRUCTURE {}", render_structure(tree.as_ref(), true)),
                marks_seen: false,
            }
        }
        FetchItem::BodySection { peek, section, partial } => render_section(msg, *peek, section, *partial),
    }
}

fn flags_wire(msg: &StoredMessage) -> String {
    msg.flags.iter().map(|f| f.as_wire()).collect::<Vec<_>>().join(" ")
}

fn format_internal_date(msg: &StoredMessage) -> String {
    // RFC 3501 date-time, e.g. "05-Jan-2026 10:11:12 +0000".
    msg.internal_date.format("%d-%b-%Y %H:%M:%S %z").to_string()
}

fn split_header_body(raw: &[u8]) -> (&[u8], &[u8]) {
    for i in 0..raw.len().saturating_sub(3) {
        if &raw[i..i + 4] == b"\r\n\r\n" {
            return (&raw[..i + 2], &raw[i + 4..]);
        }
    }
    (raw, &[])
}

fn literal_item(name: &str, data: &[u8]) -> String {
    format!("{} {{{}}}\r\n{}", name, data.len(), String::from_utf8_lossy(data))
}

fn quote_nstring(s: Option<&str>) -> String {
    match s {
        None => "NIL".to_string(),
        Some(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

fn render_address_list(addrs: &[mime::EmailAddress]) -> String {
    if addrs.is_empty() {
        return "NIL".to_string();
    }
    let rendered: Vec<String> = addrs
        .iter()
        .map(|a| {
            format!(
                "({} NIL {} {})",
                quote_nstring(a.display_name()),
                quote_nstring(Some(a.local_part())),
                quote_nstring(Some(a.domain())),
            )
        })
        .collect();
    format!("({})", rendered.join(" "))
}

/// Renders the 10-element ENVELOPE structure (RFC 3501 §7.4.2). `EnvelopeHeaders` doesn't carry
/// Sender/Reply-To/Bcc separately, so the RFC 5322 defaulting rule applies: Sender and Reply-To
/// fall back to From when absent, and Bcc is always NIL (this store never retains it, matching
/// how it never appears on the wire to any recipient either).
fn render_envelope(msg: &StoredMessage) -> String {
    let env: EnvelopeHeaders = mime::parse_envelope(&msg.raw).unwrap_or_default();
    let date = match &env.date {
        Some(d) => quote_nstring(Some(&d.to_rfc2822())),
        None => "NIL".to_string(),
    };
    let subject = quote_nstring(env.subject.as_deref());
    let from = render_address_list(&env.from);
    let sender = if env.from.is_empty() { "NIL".to_string() } else { from.clone() };
    let reply_to = sender.clone();
    let to = render_address_list(&env.to);
    let cc = render_address_list(&env.cc);
    let bcc = "NIL";
    let in_reply_to = "NIL";
    let message_id = match &env.message_id {
        Some(id) => quote_nstring(Some(&id.to_string())),
        None => "NIL".to_string(),
    };
    format!(
        "({} {} {} {} {} {} {} {} {} {})",
        date, subject, from, sender, reply_to, to, cc, bcc, in_reply_to, message_id
    )
}

/// Renders `BODY`/`BODYSTRUCTURE` for one entity, recursing for multipart children.
/// `extended` controls whether disposition/language/location extension data (BODYSTRUCTURE
/// only) is appended after the basic fields.
fn render_structure(node: Option<&EntityNode>, extended: bool) -> String {
    let Some(node) = node else {
        return "(\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 0 0)".to_string();
    };
    if node.is_multipart() {
        let parts: Vec<String> = node.children.iter().map(|c| render_structure(Some(c), extended)).collect();
        let mut out = format!("({} \"{}\"", parts.join(""), node.sub_type.to_uppercase());
        if extended {
            out.push_str(" NIL NIL NIL");
        }
        out.push(')');
        return out;
    }
    let params = if node.params.is_empty() {
        "NIL".to_string()
    } else {
        let pairs: Vec<String> =
            node.params.iter().map(|(k, v)| format!("\"{}\" \"{}\"", k.to_uppercase(), v)).collect();
        format!("({})", pairs.join(" "))
    };
    let id = quote_nstring(node.id.as_deref());
    let description = quote_nstring(node.description.as_deref());
    let encoding = format!("\"{}\"", node.encoding.to_uppercase());
    let mut out = format!(
        "(\"{}\" \"{}\" {} {} {} {} {}",
        node.primary_type.to_uppercase(),
        node.sub_type.to_uppercase(),
        params,
        id,
        description,
        encoding,
        node.size,
    );
    if node.primary_type.eq_ignore_ascii_case("text") {
        out.push_str(&format!(" {}", node.lines));
    }
    if extended {
        let disposition = match &node.disposition {
            Some(d) => format!("(\"{}\" NIL)", d.to_uppercase()),
            None => "NIL".to_string(),
        };
        out.push_str(&format!(" {} NIL NIL", disposition));
    }
    out.push(')');
    out
}

/// Resolve which byte range a `BODY[section]` addresses: the whole message, one sub-part's raw
/// bytes, or a header/text/MIME sub-view of one.
fn resolve_section(msg: &StoredMessage, section: &Section) -> Vec<u8> {
    let (headers, body) = split_header_body(&msg.raw);
    if section.part.is_empty() {
        return match &section.kind {
            SectionKind::Full => msg.raw.clone(),
            SectionKind::Header => headers.to_vec(),
            SectionKind::Text => body.to_vec(),
            SectionKind::Mime => Vec::new(),
            SectionKind::HeaderFields(names) => extract_header_fields(headers, names, false),
            SectionKind::HeaderFieldsNot(names) => extract_header_fields(headers, names, true),
        };
    }
    let tree = mime::parse_structure(&msg.raw);
    let Some(root) = tree.as_ref() else { return Vec::new() };
    // A non-multipart message has no child numbered "1"; IMAP still addresses its sole
    // top-level part as "1", so fall back to the root itself in that case.
    let part = if !root.is_multipart() && section.part == "1" {
        Some(root)
    } else {
        root.find(&section.part)
    };
    let Some(part) = part else { return Vec::new() };
    let part_bytes = extract_part_bytes(&msg.raw, part);
    let (part_headers, part_body) = split_header_body(&part_bytes);
    match &section.kind {
        SectionKind::Full => part_bytes,
        SectionKind::Header | SectionKind::Mime => part_headers.to_vec(),
        SectionKind::Text => part_body.to_vec(),
        SectionKind::HeaderFields(names) => extract_header_fields(part_headers, names, false),
        SectionKind::HeaderFieldsNot(names) => extract_header_fields(part_headers, names, true),
    }
}

/// Reconstruct one entity's bytes (headers rebuilt from parsed fields, plus its raw body) by
/// replaying the message through a handler keyed on the same part-numbering scheme
/// `structure::StructureCollector` uses. The parser doesn't retain original byte offsets, so
/// this is a rebuild rather than a literal slice of `raw` — acceptable for a sub-part fetch on
/// a test double, and documented as such.
fn extract_part_bytes(raw: &[u8], node: &EntityNode) -> Vec<u8> {
    let mut parser = MimeParser::new(PartBytesCollector::default());
    let _ = parser.receive(raw);
    let _ = parser.close();
    parser.into_inner().parts.remove(&node.part_number).unwrap_or_default()
}

#[derive(Default)]
struct PartBuilder {
    part_number: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

#[derive(Default)]
struct PartBytesCollector {
    stack: Vec<PartBuilder>,
    child_counter: Vec<usize>,
    parts: HashMap<String, Vec<u8>>,
}

impl PartBytesCollector {
    fn push_header(&mut self, name: &str, value: &str) {
        if let Some(top) = self.stack.last_mut() {
            top.headers.push((name.to_string(), value.to_string()));
        }
    }
}

impl MimeHandler for PartBytesCollector {
    fn start_entity(&mut self, _boundary: Option<&str>) -> Result<(), MimeParseError> {
        let part_number = if self.stack.is_empty() {
            String::new()
        } else {
            let counter = self.child_counter.last_mut().expect("counter pushed with stack frame");
            *counter += 1;
            let parent = &self.stack.last().unwrap().part_number;
            if parent.is_empty() { counter.to_string() } else { format!("{}.{}", parent, counter) }
        };
        self.stack.push(PartBuilder { part_number, ..Default::default() });
        self.child_counter.push(0);
        Ok(())
    }

    fn content_type(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.push_header("Content-Type", v);
        Ok(())
    }

    fn content_disposition(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.push_header("Content-Disposition", v);
        Ok(())
    }

    fn content_transfer_encoding(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.push_header("Content-Transfer-Encoding", v);
        Ok(())
    }

    fn content_id(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.push_header("Content-ID", v);
        Ok(())
    }

    fn content_description(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.push_header("Content-Description", v);
        Ok(())
    }

    fn mime_version(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.push_header("MIME-Version", v);
        Ok(())
    }

    fn header(&mut self, name: &str, value: &str) -> Result<(), MimeParseError> {
        self.push_header(name, value);
        Ok(())
    }

    fn body_content(&mut self, data: &[u8]) -> Result<(), MimeParseError> {
        if let Some(top) = self.stack.last_mut() {
            top.body.extend_from_slice(data);
            top.body.extend_from_slice(b"\r\n");
        }
        Ok(())
    }

    fn end_entity(&mut self, _boundary: Option<&str>) -> Result<(), MimeParseError> {
        self.child_counter.pop();
        if let Some(builder) = self.stack.pop() {
            let mut out = Vec::new();
            for (name, value) in &builder.headers {
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(b": ");
                out.extend_from_slice(value.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&builder.body);
            self.parts.insert(builder.part_number, out);
        }
        Ok(())
    }
}

fn extract_header_fields(headers: &[u8], names: &[String], negate: bool) -> Vec<u8> {
    let text = String::from_utf8_lossy(headers);
    let mut out = String::new();
    let mut keep = false;
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(' ') && !line.starts_with('\t') {
            keep = match line.split_once(':') {
                Some((name, _)) => {
                    let matched = names.iter().any(|n| n.eq_ignore_ascii_case(name.trim()));
                    matched != negate
                }
                None => false,
            };
        }
        if keep {
            out.push_str(line);
            out.push_str("\r\n");
        }
    }
    out.push_str("\r\n");
    out.into_bytes()
}

fn apply_partial(data: Vec<u8>, partial: Option<(u32, u32)>) -> Vec<u8> {
    match partial {
        None => data,
        Some((start, len)) => {
            let start = start as usize;
            if start >= data.len() {
                return Vec::new();
            }
            let end = (start + len as usize).min(data.len());
            data[start..end].to_vec()
        }
    }
}

fn render_section(msg: &StoredMessage, peek: bool, section: &Section, partial: Option<(u32, u32)>) -> RenderedItem {
    let data = apply_partial(resolve_section(msg, section), partial);
    let spec = render_section_spec(section, partial);
    let marks_seen = !peek && !msg.flags.contains(&Flag::Seen);
    RenderedItem { text: format!("{} {{{}}}\r\n{}", spec, data.len(), String::from_utf8_lossy(&data)), marks_seen }
}

fn render_section_spec(section: &Section, partial: Option<(u32, u32)>) -> String {
    let inner = match &section.kind {
        SectionKind::Full => section.part.clone(),
        SectionKind::Header => join_part(&section.part, "HEADER"),
        SectionKind::Text => join_part(&section.part, "TEXT"),
        SectionKind::Mime => join_part(&section.part, "MIME"),
        SectionKind::HeaderFields(names) => join_part(&section.part, &format!("HEADER.FIELDS ({})", names.join(" "))),
        SectionKind::HeaderFieldsNot(names) => {
            join_part(&section.part, &format!("HEADER.FIELDS.NOT ({})", names.join(" ")))
        }
    };
    let partial_spec = match partial {
        Some((start, len)) => format!("<{}.{}>", start, len),
        None => String::new(),
    };
    format!("BODY[{}]{}", inner, partial_spec)
}

fn join_part(part: &str, suffix: &str) -> String {
    if part.is_empty() {
        suffix.to_string()
    } else {
        format!("{}.{}", part, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FlagSet;
    use chrono::Utc;

    fn msg(raw: &[u8], flags: FlagSet) -> StoredMessage {
        StoredMessage { uid: 7, flags, internal_date: Utc::now(), raw: raw.to_vec() }
    }

    #[test]
    fn flags_and_uid_render() {
        let m = msg(b"Subject: x\r\n\r\nbody", FlagSet::new());
        let items = render_items(&m, 1, &[FetchItem::Uid, FetchItem::Flags]);
        assert_eq!(items[0].text, "UID 7");
        assert_eq!(items[1].text, "FLAGS ()");
    }

    #[test]
    fn rfc822_size_is_raw_len() {
        let m = msg(b"Subject: x\r\n\r\nbody", FlagSet::new());
        let items = render_items(&m, 1, &[FetchItem::Rfc822Size]);
        assert_eq!(items[0].text, format!("RFC822.SIZE {}", m.raw.len()));
    }

    #[test]
    fn envelope_defaults_sender_to_from() {
        let raw = b"From: alice@example.com\r\nTo: bob@example.com\r\nSubject: Hi\r\n\r\nbody";
        let m = msg(raw, FlagSet::new());
        let items = render_items(&m, 1, &[FetchItem::Envelope]);
        assert!(items[0].text.contains("\"alice\" \"example.com\""));
        assert!(items[0].text.starts_with("ENVELOPE ("));
    }

    #[test]
    fn body_header_section_extracts_only_subject() {
        let raw = b"From: a@b\r\nSubject: Hi\r\nTo: c@d\r\n\r\nbody text";
        let m = msg(raw, FlagSet::new());
        let section = Section { part: String::new(), kind: SectionKind::HeaderFields(vec!["Subject".into()]) };
        let rendered = render_section(&m, true, &section, None);
        assert!(rendered.text.contains("Subject: Hi"));
        assert!(!rendered.text.contains("From:"));
        assert!(!rendered.marks_seen);
    }

    #[test]
    fn non_peek_body_section_marks_seen() {
        let raw = b"Subject: x\r\n\r\nbody";
        let m = msg(raw, FlagSet::new());
        let section = Section { part: String::new(), kind: SectionKind::Full };
        let rendered = render_section(&m, false, &section, None);
        assert!(rendered.marks_seen);
    }

    #[test]
    fn partial_slices_the_result() {
        let raw = b"Subject: x\r\n\r\n0123456789";
        let m = msg(raw, FlagSet::new());
        let section = Section { part: String::new(), kind: SectionKind::Text };
        let rendered = render_section(&m, true, &section, Some((2, 4)));
        assert!(rendered.text.ends_with("2345"));
    }

    #[test]
    fn multipart_subpart_section_extracts_its_own_body() {
        let raw = b"Content-Type: multipart/mixed; boundary=sep\r\n\r\n--sep\r\nContent-Type: text/plain\r\n\r\nfirst\r\n--sep\r\nContent-Type: text/html\r\n\r\n<p>second</p>\r\n--sep--\r\n";
        let m = msg(raw, FlagSet::new());
        let section = Section { part: "2".to_string(), kind: SectionKind::Text };
        let rendered = render_section(&m, true, &section, None);
        assert!(rendered.text.contains("second"));
        assert!(!rendered.text.contains("first"));
    }

    #[test]
    fn single_part_message_body_one_is_the_whole_message() {
        let raw = b"Content-Type: text/plain\r\n\r\nhello";
        let m = msg(raw, FlagSet::new());
        let section = Section { part: "1".to_string(), kind: SectionKind::Full };
        let rendered = render_section(&m, true, &section, None);
        assert!(rendered.text.contains("hello"));
    }
}
