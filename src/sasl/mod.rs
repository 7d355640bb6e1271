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

//! SASL, server side: PLAIN and LOGIN, the two mechanisms every client under test actually
//! speaks. Challenge/response framing (base64 on the wire) lives here; credential checking is
//! the caller's job via `crate::auth::AuthManager`.

mod mechanism;
mod plain;

use base64::Engine;

pub use mechanism::SaslMechanism;
pub use plain::parse_plain_credentials;

#[derive(Debug)]
pub struct SaslError {
    pub message: String,
}

impl SaslError {
    pub fn invalid(msg: &str) -> Self {
        Self { message: msg.to_string() }
    }
    pub fn plain_invalid() -> Self {
        Self::invalid("invalid PLAIN credentials format")
    }
}

impl std::fmt::Display for SaslError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SaslError {}

pub fn b64_decode(s: &str) -> Result<Vec<u8>, SaslError> {
    base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|_| SaslError::invalid("invalid base64"))
}

pub fn b64_encode(b: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(b)
}

/// LOGIN's two prompts, base64-encoded, sent as continuation challenges.
pub const LOGIN_USERNAME_PROMPT: &str = "VXNlcm5hbWU6";
pub const LOGIN_PASSWORD_PROMPT: &str = "UGFzc3dvcmQ6";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_prompts_decode_as_expected() {
        assert_eq!(b64_decode(LOGIN_USERNAME_PROMPT).unwrap(), b"Username:");
        assert_eq!(b64_decode(LOGIN_PASSWORD_PROMPT).unwrap(), b"Password:");
    }

    #[test]
    fn roundtrips_arbitrary_bytes() {
        let data = b"hello\0world";
        let encoded = b64_encode(data);
        assert_eq!(b64_decode(&encoded).unwrap(), data);
    }
}
