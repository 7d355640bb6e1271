/*
 * plain.rs
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

//! PLAIN SASL (RFC 4616), server side: parse the decoded initial response into credentials.

use super::SaslError;

/// Parse a decoded PLAIN response: `authzid NUL authcid NUL password`.
pub fn parse_plain_credentials(credentials: &[u8]) -> Result<(String, String, String), SaslError> {
    let mut first = None;
    let mut second = None;
    for (i, &b) in credentials.iter().enumerate() {
        if b == 0 {
            if first.is_none() {
                first = Some(i);
            } else {
                second = Some(i);
                break;
            }
        }
    }
    let (f, s) = first.and_then(|f| second.map(|s| (f, s))).ok_or_else(SaslError::plain_invalid)?;
    let authzid = String::from_utf8(credentials[..f].to_vec()).map_err(|_| SaslError::plain_invalid())?;
    let authcid = String::from_utf8(credentials[f + 1..s].to_vec()).map_err(|_| SaslError::plain_invalid())?;
    let password = String::from_utf8(credentials[s + 1..].to_vec()).map_err(|_| SaslError::plain_invalid())?;
    Ok((authzid, authcid, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_authzid_authcid_password() {
        let raw = b"\0test\0secret";
        let (authzid, authcid, password) = parse_plain_credentials(raw).unwrap();
        assert_eq!(authzid, "");
        assert_eq!(authcid, "test");
        assert_eq!(password, "secret");
    }

    #[test]
    fn rejects_missing_separators() {
        assert!(parse_plain_credentials(b"notnulseparated").is_err());
    }
}
