/*
 * delivery.rs
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

//! Hands an accepted SMTP message to the mailbox store. RCPT-time acceptance already checked
//! the recipient exists (or auth is disabled); this only re-resolves it, so a race where a
//! user is deleted between RCPT and DATA just drops the message with a logged warning rather
//! than failing a transaction SMTP has already acknowledged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use crate::auth::AuthManager;
use crate::store::{FlagSet, Store};

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub from: String,
    pub rcpts: Vec<String>,
    pub raw: Vec<u8>,
}

/// Accepts `ReceivedMessage`s off the SMTP DATA path and resolves each recipient to an
/// INBOX append. Also keeps the log and counter the programmatic test API
/// (`getReceivedMessages`, `waitForIncomingEmail`) reads from; every message SMTP has
/// acknowledged lands here exactly once, regardless of whether any recipient resolved.
pub struct DeliveryPipeline {
    store: Arc<Store>,
    auth: Arc<AuthManager>,
    received: RwLock<Vec<ReceivedMessage>>,
    received_total: AtomicU64,
    received_notify: Notify,
}

impl DeliveryPipeline {
    pub fn new(store: Arc<Store>, auth: Arc<AuthManager>) -> Self {
        Self {
            store,
            auth,
            received: RwLock::new(Vec::new()),
            received_total: AtomicU64::new(0),
            received_notify: Notify::new(),
        }
    }

    /// Deliver to every resolvable recipient's INBOX. Returns the number of mailboxes the
    /// message actually landed in.
    pub async fn deliver(&self, message: &ReceivedMessage) -> usize {
        let mut delivered = 0;
        for rcpt in &message.rcpts {
            match self.auth.resolve_recipient(rcpt).await {
                Some(login) => {
                    let _ = self
                        .store
                        .append(&login, crate::store::INBOX, message.raw.clone(), FlagSet::new(), None)
                        .await;
                    delivered += 1;
                }
                None if self.auth.auth_disabled() => {
                    let local = rcpt.split('@').next().unwrap_or(rcpt);
                    self.auth.set_user(local, rcpt, "").await;
                    self.store.ensure_inbox(local).await;
                    let _ = self
                        .store
                        .append(local, crate::store::INBOX, message.raw.clone(), FlagSet::new(), None)
                        .await;
                    delivered += 1;
                }
                None => {
                    tracing::warn!(recipient = %rcpt, "dropping message for unknown recipient at delivery time");
                }
            }
        }
        self.received.write().await.push(message.clone());
        self.received_total.fetch_add(1, Ordering::SeqCst);
        self.received_notify.notify_waiters();
        delivered
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub async fn received_messages(&self) -> Vec<ReceivedMessage> {
        self.received.read().await.clone()
    }

    pub async fn received_messages_for_domain(&self, domain: &str) -> Vec<ReceivedMessage> {
        self.received
            .read()
            .await
            .iter()
            .filter(|m| m.rcpts.iter().any(|r| r.rsplit('@').next().map(|d| d.eq_ignore_ascii_case(domain)).unwrap_or(false)))
            .cloned()
            .collect()
    }

    /// Block until at least `count` messages have been accepted since this call started, or
    /// `timeout` elapses. The `Notify` future is created and the starting count read before
    /// any `await`, so a delivery racing the call itself is never missed.
    pub async fn wait_for_incoming_email(&self, timeout: Duration, count: u64) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.received_notify.notified();
            if self.received_total.load(Ordering::SeqCst) >= count {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.received_total.load(Ordering::SeqCst) >= count;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_known_recipient_inbox() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(false));
        auth.set_user("test", "test@localhost", "pw").await;
        store.ensure_inbox("test").await;
        let pipeline = DeliveryPipeline::new(store.clone(), auth);
        let msg = ReceivedMessage { from: "a@b".to_string(), rcpts: vec!["test@localhost".to_string()], raw: b"Subject: hi\r\n\r\nhello".to_vec() };
        let delivered = pipeline.deliver(&msg).await;
        assert_eq!(delivered, 1);
        let folder = store.get_folder("test", "INBOX").await.unwrap();
        assert_eq!(folder.message_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_recipient_dropped_when_auth_enabled() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(false));
        let pipeline = DeliveryPipeline::new(store.clone(), auth);
        let msg = ReceivedMessage { from: "a@b".to_string(), rcpts: vec!["ghost@localhost".to_string()], raw: b"hi".to_vec() };
        let delivered = pipeline.deliver(&msg).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn unknown_recipient_auto_provisioned_when_auth_disabled() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(true));
        let pipeline = DeliveryPipeline::new(store.clone(), auth);
        let msg = ReceivedMessage { from: "a@b".to_string(), rcpts: vec!["newbie@localhost".to_string()], raw: b"hi".to_vec() };
        let delivered = pipeline.deliver(&msg).await;
        assert_eq!(delivered, 1);
        let folder = store.get_folder("newbie", "INBOX").await.unwrap();
        assert_eq!(folder.message_count().await, 1);
    }

    #[tokio::test]
    async fn received_messages_filters_by_domain() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(true));
        let pipeline = DeliveryPipeline::new(store, auth);
        pipeline
            .deliver(&ReceivedMessage { from: "a@b".to_string(), rcpts: vec!["x@foo.test".to_string()], raw: b"hi".to_vec() })
            .await;
        pipeline
            .deliver(&ReceivedMessage { from: "a@b".to_string(), rcpts: vec!["y@bar.test".to_string()], raw: b"hi".to_vec() })
            .await;
        assert_eq!(pipeline.received_messages().await.len(), 2);
        assert_eq!(pipeline.received_messages_for_domain("foo.test").await.len(), 1);
    }

    #[tokio::test]
    async fn wait_for_incoming_email_returns_true_once_count_reached() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(true));
        let pipeline = Arc::new(DeliveryPipeline::new(store, auth));
        let waiter = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.wait_for_incoming_email(Duration::from_millis(500), 2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline
            .deliver(&ReceivedMessage { from: "a@b".to_string(), rcpts: vec!["x@foo.test".to_string()], raw: b"hi".to_vec() })
            .await;
        pipeline
            .deliver(&ReceivedMessage { from: "a@b".to_string(), rcpts: vec!["y@foo.test".to_string()], raw: b"hi".to_vec() })
            .await;
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_for_incoming_email_times_out_when_short() {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(true));
        let pipeline = DeliveryPipeline::new(store, auth);
        pipeline
            .deliver(&ReceivedMessage { from: "a@b".to_string(), rcpts: vec!["x@foo.test".to_string()], raw: b"hi".to_vec() })
            .await;
        let ok = pipeline.wait_for_incoming_email(Duration::from_millis(50), 2).await;
        assert!(!ok);
    }
}
