/*
 * structure.rs
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

//! A `MimeHandler` that collects entity metadata into a tree addressable by IMAP part number
//! (`1`, `1.1`, `2`, ...), for BODY/BODYSTRUCTURE and FETCH BODY[n] section lookups.

use crate::mime::content_type::parse_content_type;
use crate::mime::handler::{MimeHandler, MimeParseError};
use crate::mime::parser::MimeParser;

#[derive(Debug, Clone)]
pub struct EntityNode {
    pub part_number: String,
    pub primary_type: String,
    pub sub_type: String,
    pub params: Vec<(String, String)>,
    pub id: Option<String>,
    pub description: Option<String>,
    pub encoding: String,
    pub disposition: Option<String>,
    pub size: usize,
    pub lines: usize,
    pub children: Vec<EntityNode>,
}

impl EntityNode {
    pub fn is_multipart(&self) -> bool {
        self.primary_type.eq_ignore_ascii_case("multipart")
    }

    /// Find the entity addressed by an IMAP section part number such as "1.2". An empty
    /// string addresses the top-level message itself.
    pub fn find(&self, part_number: &str) -> Option<&EntityNode> {
        if part_number.is_empty() || part_number == self.part_number {
            return Some(self);
        }
        for child in &self.children {
            if part_number == child.part_number || part_number.starts_with(&format!("{}.", child.part_number)) {
                return child.find(part_number);
            }
        }
        None
    }
}

struct Building {
    part_number: String,
    primary_type: String,
    sub_type: String,
    params: Vec<(String, String)>,
    id: Option<String>,
    description: Option<String>,
    encoding: String,
    disposition: Option<String>,
    size: usize,
    lines: usize,
    children: Vec<EntityNode>,
}

impl Building {
    fn new(part_number: String) -> Self {
        Self {
            part_number,
            primary_type: "text".to_string(),
            sub_type: "plain".to_string(),
            params: Vec::new(),
            id: None,
            description: None,
            encoding: "7bit".to_string(),
            disposition: None,
            size: 0,
            lines: 0,
            children: Vec::new(),
        }
    }

    fn finish(self) -> EntityNode {
        EntityNode {
            part_number: self.part_number,
            primary_type: self.primary_type,
            sub_type: self.sub_type,
            params: self.params,
            id: self.id,
            description: self.description,
            encoding: self.encoding,
            disposition: self.disposition,
            size: self.size,
            lines: self.lines,
            children: self.children,
        }
    }
}

/// Collects `EntityNode`s in document order; `start_entity`/`end_entity` nest exactly like the
/// MIME tree, so a simple stack reconstructs it without needing parent pointers from the parser.
#[derive(Default)]
pub struct StructureCollector {
    stack: Vec<Building>,
    child_counter: Vec<usize>,
    root: Option<EntityNode>,
}

impl StructureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_root(self) -> Option<EntityNode> {
        self.root
    }

    fn current_mut(&mut self) -> Option<&mut Building> {
        self.stack.last_mut()
    }
}

impl MimeHandler for StructureCollector {
    fn start_entity(&mut self, _boundary: Option<&str>) -> Result<(), MimeParseError> {
        let part_number = if self.stack.is_empty() {
            String::new()
        } else {
            let counter = self.child_counter.last_mut().expect("counter pushed with stack frame");
            *counter += 1;
            let parent_number = &self.stack.last().unwrap().part_number;
            if parent_number.is_empty() {
                counter.to_string()
            } else {
                format!("{}.{}", parent_number, counter)
            }
        };
        self.stack.push(Building::new(part_number));
        self.child_counter.push(0);
        Ok(())
    }

    fn content_type(&mut self, content_type: &str) -> Result<(), MimeParseError> {
        if let Some(ct) = parse_content_type(content_type) {
            if let Some(node) = self.current_mut() {
                node.primary_type = ct.get_primary_type().to_string();
                node.sub_type = ct.get_sub_type().to_string();
                for key in ["charset", "name", "boundary", "format"] {
                    if let Some(v) = ct.get_parameter(key) {
                        node.params.push((key.to_string(), v.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    fn content_disposition(&mut self, value: &str) -> Result<(), MimeParseError> {
        if let Some(node) = self.current_mut() {
            node.disposition = Some(value.to_string());
        }
        Ok(())
    }

    fn content_transfer_encoding(&mut self, encoding: &str) -> Result<(), MimeParseError> {
        if let Some(node) = self.current_mut() {
            node.encoding = encoding.to_string();
        }
        Ok(())
    }

    fn content_id(&mut self, id: &str) -> Result<(), MimeParseError> {
        if let Some(node) = self.current_mut() {
            node.id = Some(id.to_string());
        }
        Ok(())
    }

    fn content_description(&mut self, description: &str) -> Result<(), MimeParseError> {
        if let Some(node) = self.current_mut() {
            node.description = Some(description.to_string());
        }
        Ok(())
    }

    fn body_content(&mut self, data: &[u8]) -> Result<(), MimeParseError> {
        if let Some(node) = self.current_mut() {
            node.size += data.len() + 2; // +CRLF, matching the per-line delivery contract
            node.lines += 1;
        }
        Ok(())
    }

    fn end_entity(&mut self, _boundary: Option<&str>) -> Result<(), MimeParseError> {
        self.child_counter.pop();
        if let Some(building) = self.stack.pop() {
            let node = building.finish();
            if let Some(parent) = self.stack.last_mut() {
                parent.children.push(node);
            } else {
                self.root = Some(node);
            }
        }
        Ok(())
    }
}

/// Parse a full message into its entity tree.
pub fn parse_structure(raw: &[u8]) -> Option<EntityNode> {
    let mut parser = MimeParser::new(StructureCollector::new());
    let _ = parser.receive(raw);
    let _ = parser.close();
    parser.into_inner().into_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_part_message_has_empty_part_number() {
        let msg = b"Content-Type: text/plain\r\n\r\nhello\r\n";
        let root = parse_structure(msg).unwrap();
        assert_eq!(root.part_number, "");
        assert_eq!(root.primary_type, "text");
        assert!(root.children.is_empty());
    }

    #[test]
    fn multipart_children_numbered_from_one() {
        let msg = b"Content-Type: multipart/mixed; boundary=sep\r\n\r\n--sep\r\nContent-Type: text/plain\r\n\r\nfirst\r\n--sep\r\nContent-Type: text/html\r\n\r\n<p>second</p>\r\n--sep--\r\n";
        let root = parse_structure(msg).unwrap();
        assert!(root.is_multipart());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].part_number, "1");
        assert_eq!(root.children[1].part_number, "2");
        assert_eq!(root.children[1].sub_type, "html");
    }

    #[test]
    fn find_locates_nested_part_by_number() {
        let msg = b"Content-Type: multipart/mixed; boundary=sep\r\n\r\n--sep\r\nContent-Type: text/plain\r\n\r\nfirst\r\n--sep--\r\n";
        let root = parse_structure(msg).unwrap();
        assert!(root.find("1").is_some());
        assert!(root.find("2").is_none());
        assert_eq!(root.find("").unwrap().part_number, "");
    }
}
