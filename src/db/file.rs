//! File- and config-backed implementations of the lookup facades.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::config::RegBlock;

use super::{BanHit, BanQuery, BanStore, RegData, RegStore};

/// Registration store built from the `[[registered]]` config blocks.
pub struct ConfigRegStore {
    by_nick: HashMap<String, RegData>,
}

impl ConfigRegStore {
    pub fn new(blocks: &[RegBlock]) -> ConfigRegStore {
        let mut by_nick = HashMap::with_capacity(blocks.len());

        for block in blocks {
            by_nick.insert(
                block.nick.to_lowercase(),
                RegData {
                    nick: block.nick.clone(),
                    class: block.class,
                    pwd_hash: block.password.clone(),
                    pwd_plain: block.password_plain.clone(),
                    enabled: block.enabled,
                    pwd_change: block.pwd_change,
                    hide_share: block.hide_share,
                    hide_keys: block.hide_keys,
                    show_keys: block.show_keys,
                    hide_chat: block.hide_chat,
                    hide_ctm_msg: block.hide_ctm_msg,
                    hide_kick: block.hide_kick,
                    class_protect: block.class_protect,
                    class_hide_kick: block.class_hide_kick,
                    auth_ip: block.auth_ip.clone(),
                    alternate_ip: block.alternate_ip.clone(),
                    fake_ip: block.fake_ip.clone(),
                },
            );
        }

        ConfigRegStore { by_nick }
    }
}

impl RegStore for ConfigRegStore {
    fn find(&self, nick: &str) -> Option<RegData> {
        self.by_nick.get(&nick.to_lowercase()).cloned()
    }
}

/// One persistent ban row. Any populated selector must match.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistentBan {
    /// Exact nick, case-insensitive.
    #[serde(default)]
    pub nick: String,
    /// Exact IP or CIDR range.
    #[serde(default)]
    pub ip: String,
    /// Nick prefix; only applied to unregistered sessions.
    #[serde(default)]
    pub prefix: String,
    /// Share window in bytes; both zero disables.
    #[serde(default)]
    pub share_min: u64,
    #[serde(default)]
    pub share_max: u64,
    #[serde(default)]
    pub reason: String,
    /// Unix seconds; absent means permanent.
    pub expires: Option<i64>,
}

impl PersistentBan {
    fn matches(&self, query: &BanQuery<'_>) -> bool {
        let mut selective = false;

        if !self.nick.is_empty() {
            selective = true;

            if !self.nick.eq_ignore_ascii_case(query.nick) {
                return false;
            }
        }

        if !self.prefix.is_empty() {
            selective = true;

            if !query.check_prefix
                || !query
                    .nick
                    .to_lowercase()
                    .starts_with(&self.prefix.to_lowercase())
            {
                return false;
            }
        }

        if !self.ip.is_empty() {
            selective = true;

            let Some(ip) = query.ip else {
                return false;
            };

            let hit = if let Ok(net) = self.ip.parse::<ipnet::IpNet>() {
                net.contains(&ip)
            } else if let Ok(single) = self.ip.parse::<IpAddr>() {
                single == ip
            } else {
                false
            };

            if !hit {
                return false;
            }
        }

        if self.share_min != 0 || self.share_max != 0 {
            selective = true;

            let Some(share) = query.share else {
                return false;
            };

            if share < self.share_min || (self.share_max != 0 && share > self.share_max) {
                return false;
            }
        }

        selective
    }
}

#[derive(Debug, Default, Deserialize)]
struct BanFile {
    #[serde(default)]
    ban: Vec<PersistentBan>,
}

/// Ban store read from a TOML file of `[[ban]]` rows.
#[derive(Default)]
pub struct FileBanStore {
    bans: Vec<PersistentBan>,
}

impl FileBanStore {
    /// Load from `path`; a missing file is an empty store.
    pub fn load(path: &Path) -> anyhow::Result<FileBanStore> {
        if !path.exists() {
            return Ok(FileBanStore::default());
        }

        let text = std::fs::read_to_string(path)?;
        let file: BanFile = toml::from_str(&text)?;

        Ok(FileBanStore { bans: file.ban })
    }

    pub fn from_rows(bans: Vec<PersistentBan>) -> FileBanStore {
        FileBanStore { bans }
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}

impl BanStore for FileBanStore {
    fn check(&self, query: &BanQuery<'_>, now: i64) -> Option<BanHit> {
        for ban in &self.bans {
            if let Some(expires) = ban.expires {
                if expires <= now {
                    continue;
                }
            }

            if ban.matches(query) {
                return Some(BanHit {
                    reason: ban.reason.clone(),
                    expires: ban.expires,
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query<'a>(nick: &'a str, ip: &str, share: Option<u64>) -> BanQuery<'a> {
        BanQuery {
            nick,
            ip: ip.parse().ok(),
            share,
            check_prefix: true,
        }
    }

    fn ban() -> PersistentBan {
        PersistentBan {
            nick: String::new(),
            ip: String::new(),
            prefix: String::new(),
            share_min: 0,
            share_max: 0,
            reason: "test".into(),
            expires: None,
        }
    }

    #[test]
    fn nick_and_range_bans() {
        let store = FileBanStore::from_rows(vec![
            PersistentBan {
                nick: "Troll".into(),
                ..ban()
            },
            PersistentBan {
                ip: "10.1.0.0/16".into(),
                ..ban()
            },
        ]);

        assert!(store.check(&query("troll", "1.1.1.1", None), 0).is_some());
        assert!(store.check(&query("ok", "10.1.2.3", None), 0).is_some());
        assert!(store.check(&query("ok", "10.2.0.1", None), 0).is_none());
    }

    #[test]
    fn prefix_ban_spares_registered() {
        let store = FileBanStore::from_rows(vec![PersistentBan {
            prefix: "[BAD]".into(),
            ..ban()
        }]);

        assert!(store.check(&query("[BAD]guy", "1.1.1.1", None), 0).is_some());

        let mut reg_query = query("[BAD]guy", "1.1.1.1", None);
        reg_query.check_prefix = false;
        assert!(store.check(&reg_query, 0).is_none());
    }

    #[test]
    fn share_window_ban() {
        let store = FileBanStore::from_rows(vec![PersistentBan {
            share_min: 100,
            share_max: 200,
            ..ban()
        }]);

        assert!(store.check(&query("x", "1.1.1.1", Some(150)), 0).is_some());
        assert!(store.check(&query("x", "1.1.1.1", Some(50)), 0).is_none());
        assert!(store.check(&query("x", "1.1.1.1", None), 0).is_none());
    }

    #[test]
    fn expired_rows_are_skipped() {
        let store = FileBanStore::from_rows(vec![PersistentBan {
            nick: "old".into(),
            expires: Some(100),
            ..ban()
        }]);

        assert!(store.check(&query("old", "1.1.1.1", None), 50).is_some());
        assert!(store.check(&query("old", "1.1.1.1", None), 150).is_none());
    }

    #[test]
    fn empty_selectors_never_match() {
        let store = FileBanStore::from_rows(vec![ban()]);
        assert!(store.check(&query("anyone", "1.1.1.1", None), 0).is_none());
    }
}
