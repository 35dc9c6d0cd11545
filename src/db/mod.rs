//! Lookup facades for externally persisted state.
//!
//! The accounts, bans and geolocation stores are external collaborators;
//! the core only consumes lookup-by-key contracts. The default
//! implementations here are file/config backed and cheap enough to call on
//! the hot path.

mod file;

pub use file::{ConfigRegStore, FileBanStore, PersistentBan};

use std::net::IpAddr;

/// Immutable registration snapshot loaded at `$ValidateNick`.
#[derive(Debug, Clone)]
pub struct RegData {
    pub nick: String,
    pub class: i32,
    /// bcrypt hash; empty when only a plaintext credential exists.
    pub pwd_hash: String,
    /// Plaintext credential for test rigs.
    pub pwd_plain: String,
    pub enabled: bool,
    pub pwd_change: bool,
    pub hide_share: bool,
    pub hide_keys: bool,
    pub show_keys: bool,
    pub hide_chat: bool,
    pub hide_ctm_msg: bool,
    pub hide_kick: bool,
    pub class_protect: i32,
    pub class_hide_kick: i32,
    pub auth_ip: String,
    pub alternate_ip: String,
    pub fake_ip: String,
}

impl RegData {
    /// Whether the login must go through a password round.
    pub fn needs_password(&self) -> bool {
        !self.pwd_hash.is_empty() || !self.pwd_plain.is_empty() || self.pwd_change
    }

    /// Verify a presented credential.
    pub fn check_password(&self, presented: &str) -> bool {
        if !self.pwd_hash.is_empty() {
            return bcrypt::verify(presented, &self.pwd_hash).unwrap_or(false);
        }

        if !self.pwd_plain.is_empty() {
            return self.pwd_plain == presented;
        }

        false
    }
}

/// Registration lookup contract.
pub trait RegStore: Send + Sync {
    fn find(&self, nick: &str) -> Option<RegData>;
}

/// What a persistent-ban lookup is asked about.
#[derive(Debug, Clone)]
pub struct BanQuery<'a> {
    pub nick: &'a str,
    pub ip: Option<IpAddr>,
    /// Set on the first MyINFO, when the share is known.
    pub share: Option<u64>,
    /// Prefix bans only apply to unregistered users.
    pub check_prefix: bool,
}

/// A matched persistent ban.
#[derive(Debug, Clone)]
pub struct BanHit {
    pub reason: String,
    /// Unix seconds; `None` is permanent.
    pub expires: Option<i64>,
}

/// Persistent ban lookup contract (nick / IP / range / share / prefix).
pub trait BanStore: Send + Sync {
    fn check(&self, query: &BanQuery<'_>, now: i64) -> Option<BanHit>;
}

/// Geolocation lookup contract.
pub trait GeoLookup: Send + Sync {
    /// Two-letter country code, when known.
    fn country(&self, ip: IpAddr) -> Option<String>;
}

/// Geo lookup that knows nothing; zones collapse to the main zone.
pub struct NoGeo;

impl GeoLookup for NoGeo {
    fn country(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}

/// Script-callback dispatch contract. Returning `false` vetoes the action.
///
/// Callbacks run on the calling task and are expected to be fast; the
/// dispatcher logs overruns but never offloads them.
pub trait Hooks: Send + Sync {
    fn on_new_conn(&self, _ip: IpAddr) -> bool {
        true
    }

    fn on_parsed_msg(&self, _nick: Option<&str>, _kind: nmdc_proto::MsgKind) -> bool {
        true
    }

    fn on_first_my_info(&self, _nick: &str) -> bool {
        true
    }

    fn on_search(&self, _nick: &str, _pattern: &str) -> bool {
        true
    }

    fn on_user_login(&self, _nick: &str) -> bool {
        true
    }

    fn on_bad_pass(&self, _nick: &str) -> bool {
        true
    }
}

/// Hook dispatch that allows everything.
pub struct NoHooks;

impl Hooks for NoHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(hash: &str, plain: &str) -> RegData {
        RegData {
            nick: "x".into(),
            class: 2,
            pwd_hash: hash.into(),
            pwd_plain: plain.into(),
            enabled: true,
            pwd_change: false,
            hide_share: false,
            hide_keys: false,
            show_keys: false,
            hide_chat: false,
            hide_ctm_msg: false,
            hide_kick: false,
            class_protect: 0,
            class_hide_kick: 0,
            auth_ip: String::new(),
            alternate_ip: String::new(),
            fake_ip: String::new(),
        }
    }

    #[test]
    fn plaintext_credentials() {
        let data = reg("", "hunter2");
        assert!(data.needs_password());
        assert!(data.check_password("hunter2"));
        assert!(!data.check_password("wrong"));
    }

    #[test]
    fn bcrypt_credentials() {
        let hash = bcrypt::hash("hunter2", 4).unwrap();
        let data = reg(&hash, "");
        assert!(data.needs_password());
        assert!(data.check_password("hunter2"));
        assert!(!data.check_password("wrong"));
    }

    #[test]
    fn password_free_registration() {
        let data = reg("", "");
        assert!(!data.needs_password());
        assert!(!data.check_password(""));
    }
}
