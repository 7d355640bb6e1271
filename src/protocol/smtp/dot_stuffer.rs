/*
 * dot_stuffer.rs
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

//! Dot-stuffing reversal for SMTP DATA (RFC 5321 §4.5.2).

/// Inverse of stuffing, applied per already-unterminated line read from the wire during DATA:
/// a line consisting of a single `.` ends the message; any other line starting with `.` has
/// its first `.` removed before being stored.
pub fn unstuff_line(line: &str) -> Option<&str> {
    if line == "." {
        None
    } else if let Some(rest) = line.strip_prefix('.') {
        Some(rest)
    } else {
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_dot_line_signals_end() {
        assert_eq!(unstuff_line("."), None);
    }

    #[test]
    fn stuffed_dot_is_unstuffed() {
        assert_eq!(unstuff_line("..hello"), Some(".hello"));
    }

    #[test]
    fn ordinary_line_passes_through() {
        assert_eq!(unstuff_line("hello"), Some("hello"));
    }
}
