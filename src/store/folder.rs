/*
 * folder.rs
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

//! A folder: ordered message list, UID assignment, flags, subscription state.
//!
//! The store owns folders outright and stores the parent as a path string rather than a
//! back-pointer (see `Store::parent_path`), so renaming or deleting a subtree never has to
//! walk up broken links. Concurrency follows the global/per-folder split from the spec: the
//! store's directory map is an `RwLock`, and each folder's message list is its own `RwLock`
//! so concurrent FETCH/SEARCH readers don't block each other while a writer (APPEND, STORE,
//! EXPUNGE) takes it exclusively. Listener notifications fire while that write guard is held,
//! so two listeners of the same folder always observe events in the same order.

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};

use crate::store::events::FolderEvent;
use crate::store::message::{Flag, FlagSet, StoredMessage};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Mutable part of a folder: everything that changes over its lifetime.
#[derive(Debug, Default)]
struct FolderState {
    uid_next: u32,
    subscribed: bool,
    /// Set when a folder with children was "deleted" while messages remained further down
    /// the tree; retained per standard IMAP \Noselect semantics instead of being removed.
    noselect: bool,
    messages: Vec<StoredMessage>,
}

/// A single mailbox folder. `uid_validity` is fixed at creation and never changes for the
/// lifetime of this instance; a folder recreated under the same name gets a fresh one.
pub struct Folder {
    pub path: String,
    pub owner: String,
    pub uid_validity: u32,
    state: RwLock<FolderState>,
    events: broadcast::Sender<FolderEvent>,
}

/// Snapshot of folder counters, taken under the read lock, for SELECT/EXAMINE/STATUS replies.
#[derive(Debug, Clone)]
pub struct FolderSnapshot {
    pub exists: usize,
    pub recent: usize,
    pub uid_validity: u32,
    pub uid_next: u32,
    pub unseen: usize,
}

impl Folder {
    pub fn new(path: impl Into<String>, owner: impl Into<String>, uid_validity: u32) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            owner: owner.into(),
            uid_validity,
            state: RwLock::new(FolderState { uid_next: 1, ..Default::default() }),
            events: tx,
        }
    }

    /// Rebuild a folder under a new path/owner with an existing message list carried over
    /// verbatim — UIDs, flags, and `uid_next` untouched. Used by rename (and the rename-like
    /// move of child folders and of INBOX's own messages), where `append()` would be wrong:
    /// it would assign fresh UIDs under the preserved `uid_validity`, breaking the
    /// `(uidvalidity, uid)` stability a renamed folder must keep (spec.md §3/§8).
    pub fn with_preserved_messages(
        path: impl Into<String>,
        owner: impl Into<String>,
        uid_validity: u32,
        uid_next: u32,
        subscribed: bool,
        messages: Vec<StoredMessage>,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            owner: owner.into(),
            uid_validity,
            state: RwLock::new(FolderState { uid_next, subscribed, noselect: false, messages }),
            events: tx,
        }
    }

    /// Subscribe to this folder's change stream. Register before releasing any lock that
    /// might deliver the event you're waiting for, to avoid a lost wakeup.
    pub fn subscribe(&self) -> broadcast::Receiver<FolderEvent> {
        self.events.subscribe()
    }

    pub async fn is_noselect(&self) -> bool {
        self.state.read().await.noselect
    }

    pub async fn set_noselect(&self, value: bool) {
        self.state.write().await.noselect = value;
    }

    pub async fn is_subscribed(&self) -> bool {
        self.state.read().await.subscribed
    }

    pub async fn set_subscribed(&self, value: bool) {
        self.state.write().await.subscribed = value;
    }

    pub async fn snapshot(&self) -> FolderSnapshot {
        let st = self.state.read().await;
        FolderSnapshot {
            exists: st.messages.len(),
            recent: st.messages.iter().filter(|m| m.flags.contains(&Flag::Recent)).count(),
            uid_validity: self.uid_validity,
            uid_next: st.uid_next,
            unseen: st.messages.iter().filter(|m| !m.flags.contains(&Flag::Seen)).count(),
        }
    }

    /// Full message snapshot (cloned) for FETCH/SEARCH; cheap relative to socket I/O and
    /// keeps the lock held only for the duration of the clone.
    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.state.read().await.messages.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    pub async fn uid_next(&self) -> u32 {
        self.state.read().await.uid_next
    }

    /// SELECT/EXAMINE (read-write) clears `\Recent` on every message in the folder and
    /// reports the pre-clear counts. EXAMINE (read-only) must not call this.
    pub async fn select_read_write(&self) -> FolderSnapshot {
        let mut st = self.state.write().await;
        let exists = st.messages.len();
        let recent = st.messages.iter().filter(|m| m.flags.contains(&Flag::Recent)).count();
        let unseen = st.messages.iter().filter(|m| !m.flags.contains(&Flag::Seen)).count();
        for m in st.messages.iter_mut() {
            m.flags.remove(&Flag::Recent);
        }
        FolderSnapshot { exists, recent, uid_validity: self.uid_validity, uid_next: st.uid_next, unseen }
    }

    /// Assign `uid = uid_next++`, mark `\Recent`, append, and notify listeners while the
    /// write guard is held. Returns the new UID.
    pub async fn append(&self, raw: Vec<u8>, mut flags: FlagSet, internal_date: Option<DateTime<Utc>>) -> u32 {
        let mut st = self.state.write().await;
        let uid = st.uid_next;
        st.uid_next += 1;
        flags.insert(Flag::Recent);
        let msg = StoredMessage { uid, flags, internal_date: internal_date.unwrap_or_else(Utc::now), raw };
        st.messages.push(msg);
        let exists = st.messages.len();
        let recent = st.messages.iter().filter(|m| m.flags.contains(&Flag::Recent)).count();
        let _ = self.events.send(FolderEvent::Added { uid, exists, recent });
        uid
    }

    pub async fn set_flags_by_seq(
        &self,
        seq: usize,
        add: &[Flag],
        remove: &[Flag],
        replace: bool,
    ) -> Option<(u32, FlagSet)> {
        let mut st = self.state.write().await;
        if seq == 0 || seq > st.messages.len() {
            return None;
        }
        let msg = &mut st.messages[seq - 1];
        if replace {
            msg.flags.clear();
            for f in add {
                msg.flags.insert(f.clone());
            }
        } else {
            for f in add {
                msg.flags.insert(f.clone());
            }
            for f in remove {
                msg.flags.remove(f);
            }
        }
        let uid = msg.uid;
        let flags = msg.flags.clone();
        let wire: Vec<String> = flags.iter().map(|f| f.as_wire()).collect();
        let _ = self.events.send(FolderEvent::FlagsUpdated { uid, seq, flags: wire });
        Some((uid, flags))
    }

    pub async fn find_seq_by_uid(&self, uid: u32) -> Option<usize> {
        let st = self.state.read().await;
        st.messages.iter().position(|m| m.uid == uid).map(|i| i + 1)
    }

    pub async fn message_at_seq(&self, seq: usize) -> Option<StoredMessage> {
        let st = self.state.read().await;
        if seq == 0 {
            return None;
        }
        st.messages.get(seq - 1).cloned()
    }

    /// Clear every message without requiring `\Deleted`. Used when renaming INBOX (its
    /// messages move to the new name and INBOX itself is left present but empty) and when a
    /// folder with children is deleted: a `\Noselect` folder retained only because it still
    /// has descendants must still have had its own messages removed.
    pub async fn clear_messages(&self) {
        self.state.write().await.messages.clear();
    }

    /// Remove every `\Deleted` message. Returns the removed sequence numbers in descending
    /// order, matching the order clients must apply them in (no renumbering surprises).
    pub async fn expunge(&self) -> Vec<usize> {
        let mut st = self.state.write().await;
        let mut removed_seqs = Vec::new();
        let mut i = 0;
        let mut seq = 1usize;
        while i < st.messages.len() {
            if st.messages[i].flags.contains(&Flag::Deleted) {
                removed_seqs.push(seq);
                st.messages.remove(i);
            } else {
                i += 1;
                seq += 1;
            }
        }
        removed_seqs.reverse();
        for &s in &removed_seqs {
            let _ = self.events.send(FolderEvent::Expunged { seq: s });
        }
        removed_seqs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uid_next_is_monotonic() {
        let f = Folder::new("INBOX", "alice", 1);
        let u1 = f.append(b"a".to_vec(), FlagSet::new(), None).await;
        let u2 = f.append(b"b".to_vec(), FlagSet::new(), None).await;
        assert!(u2 > u1);
        assert_eq!(f.uid_next().await, u2 + 1);
    }

    #[tokio::test]
    async fn expunge_returns_descending_seqs_and_preserves_uids() {
        let f = Folder::new("INBOX", "alice", 1);
        let u1 = f.append(b"one".to_vec(), FlagSet::new(), None).await;
        let u2 = f.append(b"two".to_vec(), FlagSet::new(), None).await;
        f.set_flags_by_seq(1, &[Flag::Deleted], &[], false).await;
        let removed = f.expunge().await;
        assert_eq!(removed, vec![1]);
        let msgs = f.messages().await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].uid, u2);
        assert!(u1 < u2);
    }

    #[tokio::test]
    async fn select_read_write_clears_recent() {
        let f = Folder::new("INBOX", "alice", 1);
        f.append(b"one".to_vec(), FlagSet::new(), None).await;
        let snap = f.select_read_write().await;
        assert_eq!(snap.recent, 1);
        let msgs = f.messages().await;
        assert!(!msgs[0].flags.contains(&Flag::Recent));
    }
}
