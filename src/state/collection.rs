//! Hash-indexed user collections with cached serialized forms.
//!
//! Each collection optionally maintains three blobs rebuilt lazily after a
//! membership change: the nicklist, the info-list (concatenated fake
//! MyINFO frames) and the IP list. Delivery primitives iterate entries and
//! queue onto each member's outbound channel.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use super::hub::strip_my_flag;
use super::user::{my_flag, nick_hash, OutMsg, UserEntry};

#[derive(Debug, Default)]
struct ListCache {
    dirty: bool,
    nick_list: String,
    info_list: String,
    /// The info list with the TLS status bit cleared in every entry, for
    /// recipients the TLS filter hides the bit from.
    info_list_no_tls: String,
    ip_list: String,
}

/// A mapping from nick hash to shared user entry.
#[derive(Debug)]
pub struct UserCollection {
    name: &'static str,
    /// Prefix of the cached nicklist form, e.g. `$NickList `.
    nick_prefix: &'static str,
    with_nick_list: bool,
    with_info_list: bool,
    with_ip_list: bool,
    users: DashMap<u64, Arc<UserEntry>>,
    cache: Mutex<ListCache>,
}

impl UserCollection {
    pub fn new(
        name: &'static str,
        nick_prefix: &'static str,
        with_nick_list: bool,
        with_info_list: bool,
        with_ip_list: bool,
    ) -> UserCollection {
        UserCollection {
            name,
            nick_prefix,
            with_nick_list,
            with_info_list,
            with_ip_list,
            users: DashMap::new(),
            cache: Mutex::new(ListCache {
                dirty: true,
                ..Default::default()
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn contains_hash(&self, hash: u64) -> bool {
        self.users.contains_key(&hash)
    }

    pub fn add(&self, entry: Arc<UserEntry>) -> bool {
        let inserted = self.users.insert(entry.hash, entry).is_none();

        if inserted {
            self.invalidate();
        }

        inserted
    }

    pub fn remove(&self, hash: u64) -> Option<Arc<UserEntry>> {
        let removed = self.users.remove(&hash).map(|(_, e)| e);

        if removed.is_some() {
            self.invalidate();
        }

        removed
    }

    pub fn get(&self, hash: u64) -> Option<Arc<UserEntry>> {
        self.users.get(&hash).map(|e| Arc::clone(&e))
    }

    pub fn get_by_nick(&self, nick: &str) -> Option<Arc<UserEntry>> {
        self.get(nick_hash(nick))
    }

    /// Snapshot of the membership; sends iterate this so a slow consumer
    /// cannot hold a shard lock.
    pub fn snapshot(&self) -> Vec<Arc<UserEntry>> {
        self.users.iter().map(|e| Arc::clone(&e)).collect()
    }

    /// Mark the cached forms stale; they rebuild on next read.
    pub fn invalidate(&self) {
        self.cache.lock().dirty = true;
    }

    fn rebuild_if_dirty(&self) {
        let mut cache = self.cache.lock();

        if !cache.dirty {
            return;
        }

        cache.nick_list.clear();
        cache.info_list.clear();
        cache.info_list_no_tls.clear();
        cache.ip_list.clear();

        if self.with_nick_list {
            cache.nick_list.push_str(self.nick_prefix);
        }

        if self.with_ip_list {
            cache.ip_list.push_str("$UserIP ");
        }

        for entry in self.users.iter() {
            let user = entry.user.read();

            if self.with_nick_list {
                cache.nick_list.push_str(&user.nick);
                cache.nick_list.push_str("$$");
            }

            if self.with_info_list {
                cache.info_list.push_str(&user.fake_my_info);
                cache.info_list.push('|');

                let stripped = if user.has_flag(my_flag::TLS) {
                    strip_my_flag(&user.fake_my_info, my_flag::TLS)
                } else {
                    None
                };

                cache
                    .info_list_no_tls
                    .push_str(stripped.as_deref().unwrap_or(&user.fake_my_info));
                cache.info_list_no_tls.push('|');
            }

            if self.with_ip_list {
                cache.ip_list.push_str(&user.nick);
                cache.ip_list.push(' ');
                cache.ip_list.push_str(&user.ip);
                cache.ip_list.push_str("$$");
            }
        }

        cache.dirty = false;
    }

    /// The cached `$NickList ...$$` frame.
    pub fn nick_list(&self) -> String {
        self.rebuild_if_dirty();
        self.cache.lock().nick_list.clone()
    }

    /// The cached concatenation of fake MyINFO frames, pipe-terminated.
    pub fn info_list(&self) -> String {
        self.rebuild_if_dirty();
        self.cache.lock().info_list.clone()
    }

    /// The info list as seen by recipients without the TLS flag: every
    /// entry has its TLS status bit cleared, mirroring what the live
    /// broadcast split sends them.
    pub fn info_list_without_tls(&self) -> String {
        self.rebuild_if_dirty();
        self.cache.lock().info_list_no_tls.clone()
    }

    /// The cached `$UserIP nick ip$$...` frame.
    pub fn ip_list(&self) -> String {
        self.rebuild_if_dirty();
        self.cache.lock().ip_list.clone()
    }

    fn send_entry(entry: &UserEntry, data: &str, delayed: bool) -> bool {
        let msg = if delayed {
            OutMsg::delayed(bytes::Bytes::copy_from_slice(data.as_bytes()))
        } else {
            OutMsg::immediate(bytes::Bytes::copy_from_slice(data.as_bytes()))
        };

        entry.send(msg)
    }

    /// Write `data` to every member. Bots are skipped by construction
    /// (they have no endpoint).
    pub fn send_to_all(&self, data: &str, delayed: bool) -> usize {
        let mut count = 0;

        for entry in self.snapshot() {
            if Self::send_entry(&entry, data, delayed) {
                count += 1;
            }
        }

        count
    }

    /// Write to members whose class is within `[min, max]`.
    pub fn send_to_all_with_class(&self, data: &str, min: i32, max: i32, delayed: bool) -> usize {
        let mut count = 0;

        for entry in self.snapshot() {
            let class = entry.user.read().class.value();

            if class >= min && class <= max && Self::send_entry(&entry, data, delayed) {
                count += 1;
            }
        }

        count
    }

    /// Write to members that negotiated `feature`.
    pub fn send_to_all_with_feature(&self, data: &str, feature: u32, delayed: bool) -> usize {
        let mut count = 0;

        for entry in self.snapshot() {
            if entry.has_feature(feature) && Self::send_entry(&entry, data, delayed) {
                count += 1;
            }
        }

        count
    }

    /// Class window and feature combined; the `$UserIP` login path.
    pub fn send_to_all_with_class_feature(
        &self,
        data: &str,
        min: i32,
        max: i32,
        feature: u32,
        delayed: bool,
    ) -> usize {
        let mut count = 0;

        for entry in self.snapshot() {
            if !entry.has_feature(feature) {
                continue;
            }

            let class = entry.user.read().class.value();

            if class >= min && class <= max && Self::send_entry(&entry, data, delayed) {
                count += 1;
            }
        }

        count
    }

    /// Write to members whose MyINFO status byte carries `flag`.
    pub fn send_to_all_with_my_flag(&self, data: &str, flag: u8, delayed: bool) -> usize {
        let mut count = 0;

        for entry in self.snapshot() {
            if entry.user.read().has_flag(flag) && Self::send_entry(&entry, data, delayed) {
                count += 1;
            }
        }

        count
    }

    /// Complement of [`Self::send_to_all_with_my_flag`].
    pub fn send_to_all_without_my_flag(&self, data: &str, flag: u8, delayed: bool) -> usize {
        let mut count = 0;

        for entry in self.snapshot() {
            if !entry.user.read().has_flag(flag) && Self::send_entry(&entry, data, delayed) {
                count += 1;
            }
        }

        count
    }

    /// Personalized delivery: each member receives
    /// `<prefix><own nick><suffix>`.
    pub fn send_to_all_with_nick(&self, prefix: &str, suffix: &str, delayed: bool) -> usize {
        let mut count = 0;

        for entry in self.snapshot() {
            let data = {
                let user = entry.user.read();
                format!("{}{}{}", prefix, user.nick, suffix)
            };

            if Self::send_entry(&entry, &data, delayed) {
                count += 1;
            }
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::user::{my_flag, OutMsg};
    use tokio::sync::mpsc;

    fn data_of(msg: OutMsg) -> bytes::Bytes {
        match msg {
            OutMsg::Data { data, .. } => data,
            other => panic!("expected data, got {other:?}"),
        }
    }

    fn entry_with_channel(nick: &str, features: u32) -> (Arc<UserEntry>, mpsc::Receiver<OutMsg>) {
        let (tx, rx) = mpsc::channel(16);
        let entry = Arc::new(UserEntry::new(nick, Some(tx), features));
        entry.user.write().fake_my_info = format!("$MyINFO $ALL {} x$ $1\u{1}$$0$", nick);
        entry.user.write().ip = "1.2.3.4".to_string();
        (entry, rx)
    }

    #[test]
    fn membership_and_lookup() {
        let coll = UserCollection::new("users", "$NickList ", true, true, true);
        let (alice, _rx) = entry_with_channel("Alice", 0);

        assert!(coll.add(Arc::clone(&alice)));
        assert!(!coll.add(alice));
        assert!(coll.contains_hash(nick_hash("alice")));
        assert!(coll.get_by_nick("ALICE").is_some());
        assert!(coll.remove(nick_hash("Alice")).is_some());
        assert!(coll.is_empty());
    }

    #[test]
    fn caches_rebuild_after_invalidation() {
        let coll = UserCollection::new("users", "$NickList ", true, true, true);
        let (alice, _a) = entry_with_channel("alice", 0);
        let (bob, _b) = entry_with_channel("bob", 0);
        coll.add(alice);

        let first = coll.nick_list();
        assert!(first.contains("alice$$"));

        coll.add(bob);
        let second = coll.nick_list();
        assert!(second.contains("alice$$") && second.contains("bob$$"));
        assert!(coll.info_list().matches('|').count() == 2);
        assert!(coll.ip_list().contains("bob 1.2.3.4$$"));
    }

    #[test]
    fn info_list_strips_tls_only_in_the_filtered_form() {
        let coll = UserCollection::new("users", "$NickList ", true, true, true);
        let (tls, _t) = entry_with_channel("tls", 0);
        let (plain, _p) = entry_with_channel("plain", 0);
        {
            let mut user = tls.user.write();
            user.my_flag |= my_flag::TLS;
            user.fake_my_info = format!(
                "$MyINFO $ALL tls x$ $1{}$$0$",
                char::from(my_flag::NORMAL | my_flag::TLS)
            );
        }
        coll.add(tls);
        coll.add(plain);

        let raw = coll.info_list();
        let filtered = coll.info_list_without_tls();

        assert!(raw.contains(char::from(my_flag::NORMAL | my_flag::TLS)));
        assert!(!filtered.contains(char::from(my_flag::NORMAL | my_flag::TLS)));
        // Entries without the bit are byte-identical in both forms.
        assert!(raw.contains("$MyINFO $ALL plain "));
        assert!(filtered.contains("$MyINFO $ALL plain "));
        assert_eq!(raw.len(), filtered.len());
    }

    #[tokio::test]
    async fn class_and_feature_filters() {
        let coll = UserCollection::new("users", "$NickList ", false, false, false);
        let (op, mut op_rx) = entry_with_channel("op", crate::state::features::USERIP2);
        let (guest, mut guest_rx) = entry_with_channel("guest", 0);
        op.user.write().class = crate::state::user::UserClass::Op;
        coll.add(op);
        coll.add(guest);

        let sent = coll.send_to_all_with_class_feature(
            "$UserIP x 1.1.1.1$$",
            4,
            10,
            crate::state::features::USERIP2,
            false,
        );
        assert_eq!(sent, 1);
        assert!(op_rx.try_recv().is_ok());
        assert!(guest_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn my_flag_split_covers_everyone_once() {
        let coll = UserCollection::new("users", "$NickList ", false, false, false);
        let (tls, mut tls_rx) = entry_with_channel("tls", 0);
        let (plain, mut plain_rx) = entry_with_channel("plain", 0);
        tls.user.write().my_flag |= my_flag::TLS;
        coll.add(tls);
        coll.add(plain);

        coll.send_to_all_with_my_flag("with", my_flag::TLS, false);
        coll.send_to_all_without_my_flag("without", my_flag::TLS, false);

        assert_eq!(&data_of(tls_rx.try_recv().unwrap())[..], b"with");
        assert_eq!(&data_of(plain_rx.try_recv().unwrap())[..], b"without");
        assert!(tls_rx.try_recv().is_err());
        assert!(plain_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn personalized_send() {
        let coll = UserCollection::new("users", "$NickList ", false, false, false);
        let (alice, mut rx) = entry_with_channel("alice", 0);
        coll.add(alice);

        coll.send_to_all_with_nick("$Hello ", "!", false);
        assert_eq!(&data_of(rx.try_recv().unwrap())[..], b"$Hello alice!");
    }
}
