//! Temporary ban tables.
//!
//! Two in-memory tables, one keyed by lower-cased-nick hash and one by the
//! IPv4 number. Entries expire lazily on lookup and eagerly in the
//! periodic sweep. Persistent bans are the business of the external store;
//! these tables exist so abuse control works without touching it.

use dashmap::DashMap;
use std::net::IpAddr;

use crate::error::CloseReason;
use crate::state::user::nick_hash;

/// Why a temp ban exists; decides the close reason on re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanKind {
    BadPassword,
    FastReconnect,
    ProtocolFlood,
    Clone,
}

impl BanKind {
    pub fn label(&self) -> &'static str {
        match self {
            BanKind::BadPassword => "bad_password",
            BanKind::FastReconnect => "fast_reconnect",
            BanKind::ProtocolFlood => "protocol_flood",
            BanKind::Clone => "clone",
        }
    }

    /// The close reason a banned reconnect gets.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            BanKind::BadPassword => CloseReason::Password,
            BanKind::FastReconnect => CloseReason::Reconnect,
            BanKind::ProtocolFlood => CloseReason::LoginError,
            BanKind::Clone => CloseReason::Clone,
        }
    }
}

/// One temp-ban entry.
#[derive(Debug, Clone)]
pub struct TempBan {
    /// Unix seconds.
    pub until: i64,
    pub reason: String,
    pub kind: BanKind,
}

impl TempBan {
    pub fn active(&self, now: i64) -> bool {
        self.until > now
    }
}

/// Map an address to the IPv4 table key. IPv6 peers only get nick bans.
pub fn ip_key(ip: IpAddr) -> Option<u32> {
    match ip {
        IpAddr::V4(v4) => Some(u32::from(v4)),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(u32::from),
    }
}

/// The two temp-ban tables.
#[derive(Debug, Default)]
pub struct TempBans {
    by_nick: DashMap<u64, TempBan>,
    by_ip: DashMap<u32, TempBan>,
}

impl TempBans {
    pub fn add_nick(&self, nick: &str, until: i64, reason: &str, kind: BanKind) {
        self.by_nick.insert(
            nick_hash(nick),
            TempBan {
                until,
                reason: reason.to_string(),
                kind,
            },
        );
    }

    pub fn add_ip(&self, ip: IpAddr, until: i64, reason: &str, kind: BanKind) {
        if let Some(key) = ip_key(ip) {
            self.by_ip.insert(
                key,
                TempBan {
                    until,
                    reason: reason.to_string(),
                    kind,
                },
            );
        }
    }

    /// Active ban for this nick; expired entries are removed on the way.
    pub fn get_nick(&self, nick: &str, now: i64) -> Option<TempBan> {
        let key = nick_hash(nick);
        let ban = self.by_nick.get(&key).map(|b| b.clone())?;

        if ban.active(now) {
            Some(ban)
        } else {
            self.by_nick.remove(&key);
            None
        }
    }

    /// Active ban for this address.
    pub fn get_ip(&self, ip: IpAddr, now: i64) -> Option<TempBan> {
        let key = ip_key(ip)?;
        let ban = self.by_ip.get(&key).map(|b| b.clone())?;

        if ban.active(now) {
            Some(ban)
        } else {
            self.by_ip.remove(&key);
            None
        }
    }

    pub fn remove_nick(&self, nick: &str) {
        self.by_nick.remove(&nick_hash(nick));
    }

    pub fn remove_ip(&self, ip: IpAddr) {
        if let Some(key) = ip_key(ip) {
            self.by_ip.remove(&key);
        }
    }

    /// Drop every expired entry; returns how many went away.
    pub fn sweep(&self, now: i64) -> usize {
        let before = self.by_nick.len() + self.by_ip.len();
        self.by_nick.retain(|_, ban| ban.active(now));
        self.by_ip.retain(|_, ban| ban.active(now));
        before - (self.by_nick.len() + self.by_ip.len())
    }

    pub fn len(&self) -> usize {
        self.by_nick.len() + self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_nick.is_empty() && self.by_ip.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn ip_bans_expire_lazily() {
        let bans = TempBans::default();
        bans.add_ip(ip("10.0.0.1"), 200, "bad password", BanKind::BadPassword);

        let hit = bans.get_ip(ip("10.0.0.1"), 100).unwrap();
        assert_eq!(hit.kind, BanKind::BadPassword);
        assert_eq!(hit.kind.close_reason(), CloseReason::Password);

        assert!(bans.get_ip(ip("10.0.0.1"), 201).is_none());
        // lazy removal happened
        assert!(bans.is_empty());
    }

    #[test]
    fn nick_bans_are_case_insensitive() {
        let bans = TempBans::default();
        bans.add_nick("Eve2", 500, "Clone detected", BanKind::Clone);
        assert!(bans.get_nick("eve2", 100).is_some());
        assert!(bans.get_nick("EVE2", 100).is_some());
        assert!(bans.get_nick("eve3", 100).is_none());
    }

    #[test]
    fn sweep_removes_expired() {
        let bans = TempBans::default();
        bans.add_nick("a", 100, "x", BanKind::FastReconnect);
        bans.add_nick("b", 300, "x", BanKind::FastReconnect);
        bans.add_ip(ip("10.0.0.1"), 100, "x", BanKind::ProtocolFlood);

        assert_eq!(bans.sweep(200), 2);
        assert_eq!(bans.len(), 1);
        assert!(bans.get_nick("b", 200).is_some());
    }

    #[test]
    fn ipv6_mapped_v4_shares_the_table() {
        let bans = TempBans::default();
        bans.add_ip(ip("10.0.0.9"), 500, "x", BanKind::Clone);
        assert!(bans.get_ip(ip("::ffff:10.0.0.9"), 100).is_some());
        assert!(bans.get_ip(ip("2001:db8::1"), 100).is_none());
    }
}
