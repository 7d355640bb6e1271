/*
 * store.rs
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

//! The mailbox store: per-user hierarchical folders, held in one flat directory map keyed
//! by (owner, canonical path). A folder keeps only its own path string, never a parent
//! pointer, so the store can always resolve the tree without worrying about dangling links
//! (see module doc on `Folder`). The directory map itself is an `RwLock`: readers (LIST,
//! STATUS) take it shared, writers (CREATE/DELETE/RENAME) take it exclusive; message-list
//! mutation goes through the per-folder lock instead, so two SELECTed sessions on different
//! folders never contend on this one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{MailError, MailResult};
use crate::store::folder::Folder;
use crate::store::message::FlagSet;

pub const DELIMITER: char = '/';
pub const INBOX: &str = "INBOX";

/// Canonicalize a mailbox path: INBOX is matched case-insensitively (RFC 3501); every other
/// name is case-sensitive and must not start or end with the delimiter.
pub fn canonicalize(path: &str) -> String {
    if path.eq_ignore_ascii_case(INBOX) {
        INBOX.to_string()
    } else {
        path.to_string()
    }
}

pub fn is_valid_name(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    !path.starts_with(DELIMITER) && !path.ends_with(DELIMITER)
}

pub fn parent_path(path: &str) -> Option<String> {
    path.rfind(DELIMITER).map(|i| path[..i].to_string())
}

type FolderKey = (String, String);

pub struct Store {
    folders: RwLock<BTreeMap<FolderKey, Arc<Folder>>>,
    uid_validity_seq: AtomicU32,
}

/// One row of a LIST/LSUB reply.
pub struct ListEntry {
    pub name: String,
    pub noselect: bool,
    pub subscribed: bool,
}

impl Store {
    pub fn new() -> Self {
        Self { folders: RwLock::new(BTreeMap::new()), uid_validity_seq: AtomicU32::new(1) }
    }

    fn next_uid_validity(&self) -> u32 {
        self.uid_validity_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Ensure `owner` has an INBOX, creating one if this is their first appearance. Used by
    /// auto-provisioning when `auth.disabled` is set, and at explicit user creation.
    pub async fn ensure_inbox(&self, owner: &str) -> Arc<Folder> {
        let key = (owner.to_string(), INBOX.to_string());
        {
            let folders = self.folders.read().await;
            if let Some(f) = folders.get(&key) {
                return f.clone();
            }
        }
        let mut folders = self.folders.write().await;
        folders
            .entry(key)
            .or_insert_with(|| Arc::new(Folder::new(INBOX, owner, self.next_uid_validity())))
            .clone()
    }

    pub async fn get_folder(&self, owner: &str, path: &str) -> Option<Arc<Folder>> {
        let path = canonicalize(path);
        let folders = self.folders.read().await;
        folders.get(&(owner.to_string(), path)).cloned()
    }

    /// Create intermediate parents as needed. Fails `AlreadyExists` if the leaf exists,
    /// `Forbidden` for INBOX (reserved, always present).
    pub async fn create_mailbox(&self, owner: &str, path: &str) -> MailResult<()> {
        let path = canonicalize(path);
        if path == INBOX {
            return Err(MailError::forbidden("INBOX always exists and cannot be created"));
        }
        if !is_valid_name(&path) {
            return Err(MailError::protocol(format!("invalid mailbox name: {}", path)));
        }
        let mut folders = self.folders.write().await;
        if folders.contains_key(&(owner.to_string(), path.clone())) {
            return Err(MailError::already_exists(path));
        }
        // Create missing ancestors first (each a selectable, empty folder).
        let mut segments: Vec<&str> = path.split(DELIMITER).collect();
        let leaf = segments.pop().unwrap();
        let mut prefix = String::new();
        for seg in &segments {
            if !prefix.is_empty() {
                prefix.push(DELIMITER);
            }
            prefix.push_str(seg);
            let key = (owner.to_string(), prefix.clone());
            folders
                .entry(key)
                .or_insert_with(|| Arc::new(Folder::new(prefix.clone(), owner, self.next_uid_validity())));
        }
        let full = if prefix.is_empty() { leaf.to_string() } else { format!("{}{}{}", prefix, DELIMITER, leaf) };
        folders.insert(
            (owner.to_string(), full.clone()),
            Arc::new(Folder::new(full, owner, self.next_uid_validity())),
        );
        Ok(())
    }

    /// INBOX cannot be deleted. A folder with children is retained with `\Noselect` if it
    /// still has descendants after its own messages are gone; otherwise it's removed outright.
    pub async fn delete_mailbox(&self, owner: &str, path: &str) -> MailResult<()> {
        let path = canonicalize(path);
        if path == INBOX {
            return Err(MailError::forbidden("INBOX cannot be deleted"));
        }
        let mut folders = self.folders.write().await;
        let key = (owner.to_string(), path.clone());
        let folder = folders.get(&key).cloned().ok_or_else(|| MailError::not_found(path.clone()))?;
        let prefix = format!("{}{}", path, DELIMITER);
        let has_children = folders.keys().any(|(o, p)| o == owner && p.starts_with(&prefix));
        if has_children {
            drop(folders);
            folder.clear_messages().await;
            folder.set_noselect(true).await;
        } else {
            folders.remove(&key);
        }
        Ok(())
    }

    /// Atomic with respect to other sessions because the whole rename happens under the
    /// write lock. UIDVALIDITY of the renamed folder is preserved; renaming INBOX moves its
    /// messages into `to` and leaves INBOX itself present and empty.
    pub async fn rename_mailbox(&self, owner: &str, from: &str, to: &str) -> MailResult<()> {
        let from = canonicalize(from);
        let to = canonicalize(to);
        if !is_valid_name(&to) || to == INBOX {
            return Err(MailError::protocol(format!("invalid rename target: {}", to)));
        }
        let mut folders = self.folders.write().await;
        if folders.contains_key(&(owner.to_string(), to.clone())) {
            return Err(MailError::already_exists(to));
        }
        if from == INBOX {
            let inbox = folders.get(&(owner.to_string(), INBOX.to_string())).cloned().ok_or_else(|| {
                MailError::internal("INBOX missing for existing user")
            })?;
            let messages = inbox.messages().await;
            let uid_next = inbox.uid_next().await;
            let subscribed = inbox.is_subscribed().await;
            let new_folder = Arc::new(Folder::with_preserved_messages(
                to.clone(),
                owner,
                inbox.uid_validity,
                uid_next,
                subscribed,
                messages,
            ));
            inbox.clear_messages().await;
            folders.insert((owner.to_string(), to), new_folder);
            return Ok(());
        }
        let old_key = (owner.to_string(), from.clone());
        let folder = folders.remove(&old_key).ok_or_else(|| MailError::not_found(from.clone()))?;
        // Rebuild with the new path but the same uid_validity/uid_next/messages (UIDs
        // untouched — `append()` would assign fresh ones, which is wrong here).
        let messages = folder.messages().await;
        let uid_next = folder.uid_next().await;
        let subscribed = folder.is_subscribed().await;
        let renamed = Arc::new(Folder::with_preserved_messages(
            to.clone(),
            owner,
            folder.uid_validity,
            uid_next,
            subscribed,
            messages,
        ));
        folders.insert((owner.to_string(), to.clone()), renamed);
        // Move any descendants along with their prefix.
        let prefix = format!("{}{}", from, DELIMITER);
        let child_keys: Vec<FolderKey> =
            folders.keys().filter(|(o, p)| o == owner && p.starts_with(&prefix)).cloned().collect();
        for (o, p) in child_keys {
            if let Some(child) = folders.remove(&(o.clone(), p.clone())) {
                let new_path = format!("{}{}", to, &p[from.len()..]);
                let msgs = child.messages().await;
                let child_uid_next = child.uid_next().await;
                let child_subscribed = child.is_subscribed().await;
                let moved = Arc::new(Folder::with_preserved_messages(
                    new_path.clone(),
                    &o,
                    child.uid_validity,
                    child_uid_next,
                    child_subscribed,
                    msgs,
                ));
                folders.insert((o, new_path), moved);
            }
        }
        Ok(())
    }

    /// `*` matches any sequence including the delimiter; `%` matches any sequence except it.
    pub async fn list(&self, owner: &str, reference: &str, pattern: &str) -> Vec<ListEntry> {
        let full_pattern = if reference.is_empty() { pattern.to_string() } else { format!("{}{}", reference, pattern) };
        let folders = self.folders.read().await;
        let mut out = Vec::new();
        for ((o, path), folder) in folders.iter() {
            if o != owner {
                continue;
            }
            if glob_match(&full_pattern, path) {
                out.push(ListEntry {
                    name: path.clone(),
                    noselect: folder.is_noselect().await,
                    subscribed: folder.is_subscribed().await,
                });
            }
        }
        out
    }

    pub async fn append(
        &self,
        owner: &str,
        path: &str,
        raw: Vec<u8>,
        flags: FlagSet,
        internal_date: Option<DateTime<Utc>>,
    ) -> MailResult<u32> {
        let folder = self.get_folder(owner, path).await.ok_or_else(|| MailError::not_found(path.to_string()))?;
        Ok(folder.append(raw, flags, internal_date).await)
    }

    /// Append every message named by `uid_set` from `source` into `dest`; returns the
    /// old-UID -> new-UID mapping in source order, for UIDPLUS COPYUID.
    pub async fn copy(
        &self,
        source: &Folder,
        uids: &[u32],
        dest: &Folder,
    ) -> Vec<(u32, u32)> {
        let mut mapping = Vec::new();
        let messages = source.messages().await;
        for uid in uids {
            if let Some(m) = messages.iter().find(|m| m.uid == *uid) {
                let new_uid = dest.append(m.raw.clone(), m.flags.clone(), Some(m.internal_date)).await;
                mapping.push((*uid, new_uid));
            }
        }
        mapping
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// IMAP LIST-style glob: `*` = any run of characters (including the delimiter), `%` = any
/// run except the delimiter.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[char], n: &[char]) -> bool {
        match p.first() {
            None => n.is_empty(),
            Some('*') => (0..=n.len()).any(|i| inner(&p[1..], &n[i..])),
            Some('%') => {
                for i in 0..=n.len() {
                    if n[..i].contains(&DELIMITER) {
                        break;
                    }
                    if inner(&p[1..], &n[i..]) {
                        return true;
                    }
                }
                false
            }
            Some(&c) => n.first() == Some(&c) && inner(&p[1..], &n[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    inner(&p, &n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get_mailbox() {
        let store = Store::new();
        store.ensure_inbox("alice").await;
        store.create_mailbox("alice", "Work").await.unwrap();
        assert!(store.get_folder("alice", "Work").await.is_some());
        assert!(matches!(
            store.create_mailbox("alice", "INBOX").await,
            Err(MailError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn create_nested_creates_parents() {
        let store = Store::new();
        store.ensure_inbox("alice").await;
        store.create_mailbox("alice", "Work/Projects").await.unwrap();
        assert!(store.get_folder("alice", "Work").await.is_some());
        assert!(store.get_folder("alice", "Work/Projects").await.is_some());
    }

    #[tokio::test]
    async fn delete_retains_noselect_when_children_present() {
        let store = Store::new();
        store.ensure_inbox("alice").await;
        store.create_mailbox("alice", "Work/Projects").await.unwrap();
        store.delete_mailbox("alice", "Work").await.unwrap();
        let f = store.get_folder("alice", "Work").await.unwrap();
        assert!(f.is_noselect().await);
    }

    #[test]
    fn glob_matches_star_and_percent() {
        assert!(glob_match("*", "INBOX/Sub"));
        assert!(!glob_match("%", "INBOX/Sub"));
        assert!(glob_match("INBOX/%", "INBOX/Sub"));
        assert!(glob_match("INBOX*", "INBOX/Sub/Deep"));
    }
}
