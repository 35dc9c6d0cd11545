//! The logical user record and its authority model.

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Status-byte bits carried in MyINFO.
pub mod my_flag {
    pub const NORMAL: u8 = 1;
    pub const AWAY: u8 = 2;
    pub const SERVER: u8 = 4;
    pub const FIREBALL: u8 = 8;
    pub const TLS: u8 = 16;
    pub const NAT: u8 = 32;
}

/// Monotonic authority levels.
///
/// The numeric gaps are part of the protocol folklore: configs express
/// thresholds as these numbers, so conversions keep them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UserClass {
    Pinger,
    Guest,
    Reg,
    Vip,
    Op,
    Cheef,
    Admin,
    Master,
}

impl UserClass {
    /// The classic numeric value.
    pub fn value(&self) -> i32 {
        match self {
            UserClass::Pinger => -1,
            UserClass::Guest => 0,
            UserClass::Reg => 2,
            UserClass::Vip => 3,
            UserClass::Op => 4,
            UserClass::Cheef => 5,
            UserClass::Admin => 7,
            UserClass::Master => 10,
        }
    }

    /// Snap a configured number to the class at or below it.
    pub fn from_value(value: i32) -> UserClass {
        match value {
            i32::MIN..=-1 => UserClass::Pinger,
            0 | 1 => UserClass::Guest,
            2 => UserClass::Reg,
            3 => UserClass::Vip,
            4 => UserClass::Op,
            5 | 6 => UserClass::Cheef,
            7..=9 => UserClass::Admin,
            _ => UserClass::Master,
        }
    }

    pub fn is_op(&self) -> bool {
        *self >= UserClass::Op
    }
}

/// Hash used as the key of every user collection.
///
/// FNV-1a over the lower-cased nick; the protocol is case-preserving but
/// case-insensitive for identity.
pub fn nick_hash(nick: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;

    for b in nick.bytes() {
        hash ^= b.to_ascii_lowercase() as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }

    hash
}

/// Expiry-stamped restrictions; 0 means unrestricted.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserRights {
    pub no_search_until: i64,
    pub no_ctm_until: i64,
    pub no_chat_until: i64,
    pub no_pm_until: i64,
}

impl UserRights {
    fn allowed(until: i64, now: i64) -> bool {
        until == 0 || until < now
    }

    pub fn can_search(&self, now: i64) -> bool {
        Self::allowed(self.no_search_until, now)
    }

    pub fn can_ctm(&self, now: i64) -> bool {
        Self::allowed(self.no_ctm_until, now)
    }

    pub fn can_chat(&self, now: i64) -> bool {
        Self::allowed(self.no_chat_until, now)
    }

    pub fn can_pm(&self, now: i64) -> bool {
        Self::allowed(self.no_pm_until, now)
    }
}

/// Last-event timestamps, unix seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserTimes {
    pub login: i64,
    pub chat: i64,
    pub search: i64,
    pub info: i64,
    pub ctm_msg: i64,
    pub search_msg: i64,
    pub nicklist: i64,
}

/// Same-message anti-flood hash slots.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloodHashes {
    pub chat: u64,
    pub pm: u64,
    pub mcto: u64,
    pub search: u64,
}

/// Hub-wide RevConnectToMe flood state, scoped to the target user.
#[derive(Debug, Clone, Copy, Default)]
pub struct RctmState {
    pub count: u32,
    pub time: i64,
    pub locked: bool,
}

/// The nick-identified participant for the lifetime of a session.
#[derive(Debug)]
pub struct User {
    pub nick: String,
    pub class: UserClass,
    pub share: u64,
    pub passive: bool,
    /// MyINFO status byte as last broadcast.
    pub my_flag: u8,
    /// Raw MyINFO exactly as the client sent it.
    pub my_info: String,
    /// The rewritten MyINFO other users see.
    pub fake_my_info: String,
    pub ext_json: String,
    pub in_list: bool,
    pub hide_share: bool,
    pub hide_ctm_msg: bool,
    pub hide_kick: bool,
    /// Stay out of the main-chat collection.
    pub hide_chat: bool,
    /// Keep this user out of the op list even when the class qualifies.
    pub hide_keys: bool,
    /// Show in the op list below the qualifying class.
    pub show_keys: bool,
    /// Protected from kicks by classes at or below this.
    pub class_protect: i32,
    pub class_hide_kick: i32,
    pub lan: bool,
    /// IP shown to other users; may be the registered fake IP.
    pub ip: String,
    pub country: String,
    pub rights: UserRights,
    pub t: UserTimes,
    pub flood_hashes: FloodHashes,
    /// Searches since the last pacing window opened.
    pub search_number: u32,
    /// Results delivered for the current passive search.
    pub sr_counter: u32,
    pub rctm: RctmState,
    /// A password-change round is in progress.
    pub set_pass: bool,
    pub hub_url: String,
}

impl User {
    pub fn new(nick: &str) -> User {
        User {
            nick: nick.to_string(),
            class: UserClass::Guest,
            share: 0,
            passive: false,
            my_flag: my_flag::NORMAL,
            my_info: String::new(),
            fake_my_info: String::new(),
            ext_json: String::new(),
            in_list: false,
            hide_share: false,
            hide_ctm_msg: false,
            hide_kick: false,
            hide_chat: false,
            hide_keys: false,
            show_keys: false,
            class_protect: 0,
            class_hide_kick: 0,
            lan: false,
            ip: String::new(),
            country: String::new(),
            rights: UserRights::default(),
            t: UserTimes::default(),
            flood_hashes: FloodHashes::default(),
            search_number: 0,
            sr_counter: 0,
            rctm: RctmState::default(),
            set_pass: false,
            hub_url: String::new(),
        }
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.my_flag & flag != 0
    }

    /// Share the user contributes to the hub total.
    pub fn visible_share(&self) -> u64 {
        if self.hide_share {
            0
        } else {
            self.share
        }
    }
}

/// One unit handed to a connection's event loop: a frame to write, or a
/// request to close issued by another session (kick, force-move).
#[derive(Debug, Clone)]
pub enum OutMsg {
    Data {
        data: bytes::Bytes,
        /// Delayed frames batch into the ZPipe buffer; immediate ones
        /// flush it.
        delayed: bool,
    },
    Close {
        reason: crate::error::CloseReason,
        drain_ms: u64,
    },
}

impl OutMsg {
    pub fn immediate(data: impl Into<bytes::Bytes>) -> OutMsg {
        OutMsg::Data {
            data: data.into(),
            delayed: false,
        }
    }

    pub fn delayed(data: impl Into<bytes::Bytes>) -> OutMsg {
        OutMsg::Data {
            data: data.into(),
            delayed: true,
        }
    }
}

/// Outbound channel of one connection.
pub type ConnTx = mpsc::Sender<OutMsg>;

/// The shared user object: record plus delivery endpoint.
///
/// Collections hold `Arc<UserEntry>`; the connection task holds another.
/// Bots have no endpoint and never receive traffic.
#[derive(Debug)]
pub struct UserEntry {
    pub hash: u64,
    pub user: RwLock<User>,
    pub tx: Option<ConnTx>,
    /// Feature bits negotiated at `$Supports`; immutable afterwards.
    pub features: u32,
}

impl UserEntry {
    pub fn new(nick: &str, tx: Option<ConnTx>, features: u32) -> UserEntry {
        UserEntry {
            hash: nick_hash(nick),
            user: RwLock::new(User::new(nick)),
            tx,
            features,
        }
    }

    pub fn is_bot(&self) -> bool {
        self.tx.is_none()
    }

    pub fn has_feature(&self, bit: u32) -> bool {
        self.features & bit != 0
    }

    /// Queue one frame, dropping it if the consumer is too slow.
    pub fn send(&self, msg: OutMsg) -> bool {
        match &self.tx {
            Some(tx) => tx.try_send(msg).is_ok(),
            None => false,
        }
    }

    /// Ask the owning connection task to close.
    pub fn request_close(&self, reason: crate::error::CloseReason, drain_ms: u64) -> bool {
        self.send(OutMsg::Close { reason, drain_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nick_hash_is_case_insensitive() {
        assert_eq!(nick_hash("Alice"), nick_hash("alice"));
        assert_eq!(nick_hash("ALICE"), nick_hash("aLiCe"));
        assert_ne!(nick_hash("alice"), nick_hash("bob"));
    }

    #[test]
    fn class_ordering_and_values() {
        assert!(UserClass::Pinger < UserClass::Guest);
        assert!(UserClass::Op > UserClass::Vip);
        assert_eq!(UserClass::Master.value(), 10);
        assert_eq!(UserClass::from_value(7), UserClass::Admin);
        assert_eq!(UserClass::from_value(1), UserClass::Guest);
        assert_eq!(UserClass::from_value(-1), UserClass::Pinger);

        for class in [
            UserClass::Pinger,
            UserClass::Guest,
            UserClass::Reg,
            UserClass::Vip,
            UserClass::Op,
            UserClass::Cheef,
            UserClass::Admin,
            UserClass::Master,
        ] {
            assert_eq!(UserClass::from_value(class.value()), class);
        }
    }

    #[test]
    fn rights_expire() {
        let rights = UserRights {
            no_chat_until: 100,
            ..Default::default()
        };
        assert!(!rights.can_chat(50));
        assert!(rights.can_chat(101));
        assert!(rights.can_search(50));
    }

    #[test]
    fn hidden_share_is_invisible() {
        let mut user = User::new("x");
        user.share = 42;
        assert_eq!(user.visible_share(), 42);
        user.hide_share = true;
        assert_eq!(user.visible_share(), 0);
    }
}
