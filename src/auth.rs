/*
 * auth.rs
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

//! User directory and credential check. Created explicitly via `set_user`, or lazily on
//! first authentication when `auth.disabled` is set.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{MailError, MailResult};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct User {
    pub login: String,
    pub email: String,
    pub password: String,
}

pub struct AuthManager {
    users: RwLock<HashMap<String, User>>,
    auth_disabled: bool,
}

impl AuthManager {
    pub fn new(auth_disabled: bool) -> Self {
        Self { users: RwLock::new(HashMap::new()), auth_disabled }
    }

    pub async fn set_user(&self, login: &str, email: &str, password: &str) {
        let mut users = self.users.write().await;
        users.insert(
            login.to_string(),
            User { login: login.to_string(), email: email.to_string(), password: password.to_string() },
        );
    }

    /// Register `alias` as an additional credential string that authenticates as
    /// `canonical_login`'s existing user. Used when `users.login = email`: the configured
    /// login form is what a client types at `LOGIN`/`AUTH`/`USER`, but the store still owns
    /// folders under the one canonical login so delivery and authorization never see two
    /// identities for the same mailbox.
    pub async fn set_user_alias(&self, alias: &str, canonical_login: &str) {
        let mut users = self.users.write().await;
        if let Some(user) = users.get(canonical_login).cloned() {
            users.insert(alias.to_string(), user);
        }
    }

    pub async fn get_user(&self, login: &str) -> Option<User> {
        self.users.read().await.get(login).cloned()
    }

    pub async fn user_exists(&self, login: &str) -> bool {
        self.users.read().await.contains_key(login)
    }

    /// Check credentials. When `auth.disabled` is set, any password succeeds and an unknown
    /// login is auto-provisioned (email defaults to `login@localhost`) rather than rejected.
    pub async fn authenticate(&self, login: &str, password: &str, store: &Store) -> MailResult<User> {
        if let Some(user) = self.get_user(login).await {
            if user.password == password || self.auth_disabled {
                return Ok(user);
            }
            return Err(MailError::AuthFailed);
        }
        if self.auth_disabled {
            let email = if login.contains('@') { login.to_string() } else { format!("{}@localhost", login) };
            self.set_user(login, &email, password).await;
            store.ensure_inbox(login).await;
            return Ok(User { login: login.to_string(), email, password: password.to_string() });
        }
        Err(MailError::AuthFailed)
    }

    /// Resolve an RFC 5321 recipient/mailbox address to a login the store can use as an
    /// owner key. Matches by exact login or by stored email (case-insensitive).
    pub async fn resolve_recipient(&self, address: &str) -> Option<String> {
        let users = self.users.read().await;
        if let Some(u) = users.get(address) {
            return Some(u.login.clone());
        }
        users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(address) || u.login.eq_ignore_ascii_case(address))
            .map(|u| u.login.clone())
    }

    pub fn auth_disabled(&self) -> bool {
        self.auth_disabled
    }

    /// Only the owning user may operate on their own folders.
    pub fn authorize(&self, session_login: &str, target_login: &str) -> MailResult<()> {
        if session_login == target_login {
            Ok(())
        } else {
            Err(MailError::forbidden("cannot access another user's mailbox"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auth_disabled_auto_provisions() {
        let store = Store::new();
        let auth = AuthManager::new(true);
        let user = auth.authenticate("newbie", "anything", &store).await.unwrap();
        assert_eq!(user.login, "newbie");
        assert!(store.get_folder("newbie", "INBOX").await.is_some());
    }

    #[tokio::test]
    async fn alias_authenticates_as_canonical_user() {
        let store = Store::new();
        let auth = AuthManager::new(false);
        auth.set_user("test", "test@localhost", "pw").await;
        auth.set_user_alias("test@localhost", "test").await;
        let user = auth.authenticate("test@localhost", "pw", &store).await.unwrap();
        assert_eq!(user.login, "test");
    }

    #[tokio::test]
    async fn wrong_password_rejected_when_enabled() {
        let store = Store::new();
        let auth = AuthManager::new(false);
        auth.set_user("test", "test@localhost", "secret").await;
        assert!(auth.authenticate("test", "wrong", &store).await.is_err());
        assert!(auth.authenticate("test", "secret", &store).await.is_ok());
    }
}
