//! The Hub - central shared state.
//!
//! All connection tasks share one `Arc<Hub>`: the user collections, the
//! abuse controller, the load meter, the lookup facades and the current
//! configuration. Handlers receive it as explicit context; nothing global.
//!
//! Lock order when more than one is needed: collection shard, then user
//! record. Never iterate a collection while holding a user write lock.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nmdc_proto::frames;
use nmdc_proto::message::MyInfoArgs;

use crate::config::Config;
use crate::db::{BanStore, GeoLookup, Hooks, RegStore};
use crate::security::{HubFlood, TempBans};
use crate::state::collection::UserCollection;
use crate::state::load::LoadMeter;
use crate::state::user::{my_flag, UserEntry};

/// Per-zone user accounting. Zone 0 is the main zone; further zones are
/// defined by country-code lists in the configuration.
#[derive(Debug)]
pub struct Zones {
    /// Country codes per configured zone, uppercased.
    defs: Vec<Vec<String>>,
    caps: Vec<u32>,
    counts: Vec<AtomicU32>,
}

impl Zones {
    pub fn from_config(config: &Config) -> Zones {
        let defs: Vec<Vec<String>> = config
            .zones
            .iter()
            .map(|z| {
                z.cc
                    .split(',')
                    .map(|cc| cc.trim().to_uppercase())
                    .collect()
            })
            .collect();

        let mut caps = vec![config.limits.max_users_total];
        caps.extend(config.zones.iter().map(|z| z.max_users));

        let counts = (0..caps.len()).map(|_| AtomicU32::new(0)).collect();

        Zones { defs, caps, counts }
    }

    /// Zone index for a country code; unknown countries land in the main
    /// zone.
    pub fn zone_of(&self, country: Option<&str>) -> usize {
        if let Some(cc) = country {
            for (i, def) in self.defs.iter().enumerate() {
                if def.iter().any(|d| d == cc) {
                    return i + 1;
                }
            }
        }

        0
    }

    pub fn cap(&self, zone: usize) -> u32 {
        self.caps.get(zone).copied().unwrap_or(u32::MAX)
    }

    pub fn count(&self, zone: usize) -> u32 {
        self.counts
            .get(zone)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn enter(&self, zone: usize) {
        if let Some(count) = self.counts.get(zone) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn leave(&self, zone: usize) {
        if let Some(count) = self.counts.get(zone) {
            let _ = count.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
        }
    }

    /// Label used in capacity refusals.
    pub fn describe(&self, zone: usize) -> String {
        if zone == 0 {
            "main zone".to_string()
        } else {
            format!(
                "country zone {}",
                self.defs
                    .get(zone - 1)
                    .map(|d| d.join(","))
                    .unwrap_or_default()
            )
        }
    }
}

/// Central shared state container.
pub struct Hub {
    config: RwLock<Arc<Config>>,
    pub config_path: String,

    /// Every in-list user; carries all three cached list forms.
    pub users: UserCollection,
    /// Operator-visible users; cached `$OpList` form.
    pub ops: UserCollection,
    /// Bots; cached `$BotList` form.
    pub bots: UserCollection,
    pub active: UserCollection,
    pub passive: UserCollection,
    /// Main-chat subscribers.
    pub chat: UserCollection,

    pub temp_bans: TempBans,
    pub hub_flood: HubFlood,
    pub load: LoadMeter,
    pub zones: Zones,

    pub reg_store: Arc<dyn RegStore>,
    pub ban_store: Arc<dyn BanStore>,
    pub geo: Arc<dyn GeoLookup>,
    pub hooks: Arc<dyn Hooks>,

    /// Sum of visible shares of in-list users.
    total_share: AtomicU64,
    total_share_peak: AtomicU64,
    /// Runtime hub topic; seeded from config, settable by operators.
    pub topic: RwLock<String>,
    /// Sessions that passed the capacity gate, listed or not.
    pub conn_count: AtomicU32,
    pub users_peak: AtomicU32,
    redirect_cursor: AtomicUsize,

    pub started: Instant,
}

impl Hub {
    pub fn new(
        config: Config,
        config_path: String,
        reg_store: Arc<dyn RegStore>,
        ban_store: Arc<dyn BanStore>,
        geo: Arc<dyn GeoLookup>,
        hooks: Arc<dyn Hooks>,
    ) -> Hub {
        let zones = Zones::from_config(&config);
        let topic = RwLock::new(config.server.hub_topic.clone());

        Hub {
            topic,
            config: RwLock::new(Arc::new(config)),
            config_path,
            users: UserCollection::new("users", "$NickList ", true, true, true),
            ops: UserCollection::new("ops", "$OpList ", true, false, false),
            bots: UserCollection::new("bots", "$BotList ", true, false, false),
            active: UserCollection::new("active", "$NickList ", false, false, false),
            passive: UserCollection::new("passive", "$NickList ", false, false, false),
            chat: UserCollection::new("chat", "$NickList ", false, false, false),
            temp_bans: TempBans::default(),
            hub_flood: HubFlood::default(),
            load: LoadMeter::new(),
            zones,
            reg_store,
            ban_store,
            geo,
            hooks,
            total_share: AtomicU64::new(0),
            total_share_peak: AtomicU64::new(0),
            conn_count: AtomicU32::new(0),
            users_peak: AtomicU32::new(0),
            redirect_cursor: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// Current configuration snapshot; cheap to clone, safe to hold.
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read())
    }

    /// Swap in a reloaded configuration at a tick boundary.
    pub fn set_config(&self, config: Config) {
        *self.config.write() = Arc::new(config);
    }

    /// Unix seconds.
    pub fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Nick the hub speaks as in chat explanations.
    pub fn security_nick(&self) -> String {
        let config = self.config();

        if config.server.hub_name.is_empty() {
            "Hub-Security".to_string()
        } else {
            config.server.hub_name.clone()
        }
    }

    /// A hub-originated chat line frame.
    pub fn chat_line(&self, text: &str) -> String {
        frames::chat(&self.security_nick(), text)
    }

    /// Deliver a notice to the operator chat.
    pub fn report_to_opchat(&self, text: &str) {
        let frame = self.chat_line(text);
        self.ops.send_to_all(&frame, false);
        tracing::info!(report = %text, "opchat");
    }

    /// Next redirect target, round-robin over the configured list.
    pub fn next_redirect(&self) -> Option<String> {
        let config = self.config();

        if config.server.redirects.is_empty() {
            return None;
        }

        let i = self.redirect_cursor.fetch_add(1, Ordering::Relaxed);
        Some(config.server.redirects[i % config.server.redirects.len()].clone())
    }

    pub fn total_share(&self) -> u64 {
        self.total_share.load(Ordering::Relaxed)
    }

    pub fn total_share_peak(&self) -> u64 {
        self.total_share_peak.load(Ordering::Relaxed)
    }

    /// Account a visible-share delta for one user.
    pub fn share_delta(&self, old: u64, new: u64) {
        if new >= old {
            let total = self.total_share.fetch_add(new - old, Ordering::Relaxed) + (new - old);
            self.total_share_peak.fetch_max(total, Ordering::Relaxed);
        } else {
            self.total_share.fetch_sub(old - new, Ordering::Relaxed);
        }
    }

    /// Insert a freshly promoted user into every collection it belongs to,
    /// in one place so the membership invariants hold.
    pub fn insert_user(&self, entry: &Arc<UserEntry>) -> bool {
        let (passive, visible_share, hide_chat_user, op_visible) = {
            let user = entry.user.read();
            let config = self.config();
            let op_visible = (user.class.value() >= config.limits.oplist_class && !user.hide_keys)
                || (user.show_keys && !user.hide_keys);
            (user.passive, user.visible_share(), user.hide_chat, op_visible)
        };

        if !self.users.add(Arc::clone(entry)) {
            return false;
        }

        entry.user.write().in_list = true;
        self.share_delta(0, visible_share);

        if entry.is_bot() {
            self.bots.add(Arc::clone(entry));
        } else {
            if passive {
                self.passive.add(Arc::clone(entry));
            } else {
                self.active.add(Arc::clone(entry));
            }

            if !hide_chat_user {
                self.chat.add(Arc::clone(entry));
            }
        }

        if op_visible {
            self.ops.add(Arc::clone(entry));
        }

        self.users_peak
            .fetch_max(self.users.len() as u32, Ordering::Relaxed);
        true
    }

    /// Remove a user from every collection and broadcast the quit.
    pub fn remove_user(&self, entry: &Arc<UserEntry>) {
        let (nick, visible_share, was_listed) = {
            let mut user = entry.user.write();
            let was = user.in_list;
            user.in_list = false;
            (user.nick.clone(), user.visible_share(), was)
        };

        if !was_listed {
            return;
        }

        self.users.remove(entry.hash);
        self.ops.remove(entry.hash);
        self.bots.remove(entry.hash);
        self.active.remove(entry.hash);
        self.passive.remove(entry.hash);
        self.chat.remove(entry.hash);
        self.share_delta(visible_share, 0);

        let config = self.config();
        let quit = frames::quit(&nick);
        self.users.send_to_all(&quit, config.myinfo.delayed);
    }

    /// Switch a user between the active and passive collections after a
    /// mode change.
    pub fn set_user_mode(&self, entry: &Arc<UserEntry>, passive: bool) {
        if entry.is_bot() {
            return;
        }

        if passive {
            self.active.remove(entry.hash);

            if !self.passive.contains_hash(entry.hash) {
                self.passive.add(Arc::clone(entry));
            }
        } else {
            self.passive.remove(entry.hash);

            if !self.active.contains_hash(entry.hash) {
                self.active.add(Arc::clone(entry));
            }
        }
    }

    /// The login presentation sequence: MyINFO (with the optional TLS
    /// split), short OpList, UserIP to qualifying operators, BotList.
    pub fn show_user_to_all(&self, entry: &Arc<UserEntry>) {
        let config = self.config();
        let delayed = config.myinfo.delayed;

        let (fake, nick, ip, is_tls, op_visible) = {
            let user = entry.user.read();
            let op_visible = (user.class.value() >= config.limits.oplist_class && !user.hide_keys)
                || (user.show_keys && !user.hide_keys);
            (
                user.fake_my_info.clone(),
                user.nick.clone(),
                user.ip.clone(),
                user.has_flag(my_flag::TLS),
                op_visible,
            )
        };

        self.broadcast_my_info(&fake, is_tls, delayed);

        if op_visible {
            let frame = frames::op_list(&nick);
            self.users.send_to_all(&frame, delayed);
        }

        {
            let ip = if entry.is_bot() { "127.0.0.1" } else { ip.as_str() };
            let frame = frames::user_ip(&nick, ip);
            self.users.send_to_all_with_class_feature(
                &frame,
                config.limits.user_ip_class,
                10,
                crate::state::features::USERIP2,
                delayed,
            );
        }

        if entry.is_bot() {
            let frame = frames::bot_list(&nick);
            self.users
                .send_to_all_with_feature(&frame, crate::state::features::BOTLIST, delayed);
        }
    }

    /// Broadcast a fake MyINFO, splitting by the TLS flag when the filter
    /// is on.
    pub fn broadcast_my_info(&self, fake: &str, sender_is_tls: bool, delayed: bool) {
        let config = self.config();

        if config.myinfo.tls_filter && sender_is_tls {
            self.users
                .send_to_all_with_my_flag(fake, my_flag::TLS, delayed);

            if let Some(stripped) = strip_my_flag(fake, my_flag::TLS) {
                self.users
                    .send_to_all_without_my_flag(&stripped, my_flag::TLS, delayed);
            }
        } else {
            self.users.send_to_all(fake, delayed);
        }
    }
}

/// Clear a status-byte bit in a serialized MyINFO.
///
/// Everything else round-trips byte-exactly; returns `None` when the frame
/// does not parse.
pub fn strip_my_flag(fake: &str, flag: u8) -> Option<String> {
    let mut args = MyInfoArgs::parse(fake).ok()?;
    let mut bytes = args.speed.clone().into_bytes();
    let last = bytes.last_mut()?;
    *last &= !flag;
    args.speed = String::from_utf8_lossy(&bytes).into_owned();
    Some(args.to_frame())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::db::{FileBanStore, NoGeo, NoHooks};

    fn hub() -> Hub {
        let config = Config::default();
        let reg = Arc::new(crate::db::ConfigRegStore::new(&[]));
        Hub::new(
            config,
            String::new(),
            reg,
            Arc::new(FileBanStore::default()),
            Arc::new(NoGeo),
            Arc::new(NoHooks),
        )
    }

    fn listed_entry(hub: &Hub, nick: &str, share: u64) -> Arc<UserEntry> {
        let entry = Arc::new(UserEntry::new(nick, None, 0));
        {
            let mut user = entry.user.write();
            user.share = share;
            user.fake_my_info = format!("$MyINFO $ALL {nick} x$ $1\u{1}$$0$");
        }
        assert!(hub.insert_user(&entry));
        entry
    }

    #[test]
    fn total_share_tracks_membership() {
        let hub = hub();
        let a = listed_entry(&hub, "a", 100);
        let _b = listed_entry(&hub, "b", 50);
        assert_eq!(hub.total_share(), 150);

        hub.remove_user(&a);
        assert_eq!(hub.total_share(), 50);
        assert_eq!(hub.total_share_peak(), 150);
        assert!(!a.user.read().in_list);
    }

    #[test]
    fn bots_never_join_mode_or_chat_collections() {
        let hub = hub();
        let bot = listed_entry(&hub, "opchat-bot", 0);
        assert!(hub.bots.contains_hash(bot.hash));
        assert!(!hub.active.contains_hash(bot.hash));
        assert!(!hub.passive.contains_hash(bot.hash));
        assert!(!hub.chat.contains_hash(bot.hash));
    }

    #[test]
    fn duplicate_insert_is_refused() {
        let hub = hub();
        let a = listed_entry(&hub, "a", 0);
        assert!(!hub.insert_user(&a));
    }

    #[test]
    fn mode_switch_moves_collections() {
        let hub = hub();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let entry = Arc::new(UserEntry::new("switcher", Some(tx), 0));
        hub.insert_user(&entry);
        assert!(hub.active.contains_hash(entry.hash));

        hub.set_user_mode(&entry, true);
        assert!(hub.passive.contains_hash(entry.hash));
        assert!(!hub.active.contains_hash(entry.hash));

        hub.set_user_mode(&entry, false);
        assert!(hub.active.contains_hash(entry.hash));
    }

    #[test]
    fn strip_my_flag_touches_only_the_bit() {
        let fake = format!(
            "$MyINFO $ALL alice d$ $100{}$$123$",
            char::from(my_flag::NORMAL | my_flag::TLS)
        );
        let stripped = strip_my_flag(&fake, my_flag::TLS).unwrap();
        let expected = format!(
            "$MyINFO $ALL alice d$ $100{}$$123$",
            char::from(my_flag::NORMAL)
        );
        assert_eq!(stripped, expected);
        // Only the status byte differs.
        assert_eq!(fake.len(), stripped.len());
    }

    #[test]
    fn zones_classify_and_count() {
        let mut config = Config::default();
        config.zones.push(ZoneConfig {
            cc: "RU,UA".to_string(),
            max_users: 10,
        });
        let zones = Zones::from_config(&config);

        assert_eq!(zones.zone_of(Some("RU")), 1);
        assert_eq!(zones.zone_of(Some("DE")), 0);
        assert_eq!(zones.zone_of(None), 0);
        assert_eq!(zones.cap(1), 10);

        zones.enter(1);
        zones.enter(1);
        assert_eq!(zones.count(1), 2);
        zones.leave(1);
        assert_eq!(zones.count(1), 1);
    }

    #[test]
    fn redirects_round_robin() {
        let hub = hub();
        assert_eq!(hub.next_redirect(), None);

        let mut config = Config::default();
        config.server.redirects = vec!["a:411".into(), "b:411".into()];
        hub.set_config(config);

        assert_eq!(hub.next_redirect().unwrap(), "a:411");
        assert_eq!(hub.next_redirect().unwrap(), "b:411");
        assert_eq!(hub.next_redirect().unwrap(), "a:411");
    }
}
