//! Protocol flood counters.
//!
//! Two scopes: per-connection counters, one per command kind, and hub-wide
//! counters for the kinds a coordinated flood can ride (chat, private
//! messages, MCTo, search, RevConnectToMe). Hub-wide detection locks the
//! command for everyone until a full quiet period passes; the RCTM counter
//! lives on the target user so one victim's lock does not mute the hub.

use parking_lot::Mutex;

use crate::config::{FloodAction, FloodConfig, FloodRule, HubFloodConfig};
use crate::state::user::User;

/// Per-connection flood buckets, in the order of the counter arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodKind {
    Ctm = 0,
    Rctm,
    Sr,
    Search,
    MyInfo,
    ExtJson,
    NickList,
    Priv,
    Chat,
    GetInfo,
    McTo,
    In,
    Ping,
    Unknown,
}

pub const FLOOD_KINDS: usize = 14;

impl FloodKind {
    pub fn name(&self) -> &'static str {
        match self {
            FloodKind::Ctm => "ConnectToMe",
            FloodKind::Rctm => "RevConnectToMe",
            FloodKind::Sr => "SR",
            FloodKind::Search => "Search",
            FloodKind::MyInfo => "MyINFO",
            FloodKind::ExtJson => "ExtJSON",
            FloodKind::NickList => "GetNickList",
            FloodKind::Priv => "To",
            FloodKind::Chat => "Chat",
            FloodKind::GetInfo => "GetINFO",
            FloodKind::McTo => "MCTo",
            FloodKind::In => "IN",
            FloodKind::Ping => "Ping",
            FloodKind::Unknown => "Unknown",
        }
    }

    pub fn rule(&self, config: &FloodConfig) -> FloodRule {
        match self {
            FloodKind::Ctm => config.ctm,
            FloodKind::Rctm => config.rctm,
            FloodKind::Sr => config.sr,
            FloodKind::Search => config.search,
            FloodKind::MyInfo => config.myinfo,
            FloodKind::ExtJson => config.extjson,
            FloodKind::NickList => config.nicklist,
            FloodKind::Priv => config.to,
            FloodKind::Chat => config.chat,
            FloodKind::GetInfo => config.getinfo,
            FloodKind::McTo => config.mcto,
            FloodKind::In => config.in_cmd,
            FloodKind::Ping => config.ping,
            FloodKind::Unknown => config.unknown,
        }
    }
}

/// What the dispatcher should do with the offending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloodVerdict {
    /// Under the limit, or the rule is disabled.
    Pass,
    /// Over the limit with the notify action; let it through.
    Notify { report: Option<String> },
    /// Over the limit; swallow the command.
    Drop { report: Option<String> },
    /// Over the limit with the kick action; close and temp-ban.
    Kick { report: Option<String> },
}

/// Per-connection counter state.
#[derive(Debug)]
pub struct FloodTrack {
    counts: [u32; FLOOD_KINDS],
    times: [i64; FLOOD_KINDS],
    reports: [i64; FLOOD_KINDS],
}

impl Default for FloodTrack {
    fn default() -> Self {
        FloodTrack {
            counts: [0; FLOOD_KINDS],
            times: [0; FLOOD_KINDS],
            reports: [i64::MIN / 2; FLOOD_KINDS],
        }
    }
}

impl FloodTrack {
    /// Count one command and apply the configured rule.
    ///
    /// `exempt` short-circuits for high classes; `locked` suppresses the
    /// operator report for kinds that are currently hub-locked unless
    /// reporting of locked kinds is enabled.
    pub fn check(
        &mut self,
        kind: FloodKind,
        config: &FloodConfig,
        now: i64,
        exempt: bool,
        locked: bool,
    ) -> FloodVerdict {
        if exempt {
            return FloodVerdict::Pass;
        }

        let rule = kind.rule(config);

        if !rule.enabled() {
            return FloodVerdict::Pass;
        }

        let slot = kind as usize;

        if self.counts[slot] == 0 {
            self.counts[slot] = 1;
            self.times[slot] = now;
            return FloodVerdict::Pass;
        }

        let elapsed = now - self.times[slot];

        if !(0..=rule.period as i64).contains(&elapsed) {
            self.counts[slot] = 1;
            self.times[slot] = now;
            return FloodVerdict::Pass;
        }

        self.counts[slot] += 1;

        if self.counts[slot] <= rule.limit {
            return FloodVerdict::Pass;
        }

        // Over the limit: build a rate-limited report.
        let report = if now - self.reports[slot] >= config.report_time as i64 {
            self.reports[slot] = now;

            if config.report && (config.report_locked || !locked) {
                Some(format!(
                    "Protocol flood detected: {} [{}:{}:{}]",
                    kind.name(),
                    self.counts[slot],
                    elapsed,
                    rule.period
                ))
            } else {
                None
            }
        } else {
            None
        };

        match rule.action {
            FloodAction::Notify => FloodVerdict::Notify { report },
            FloodAction::Drop => FloodVerdict::Drop { report },
            FloodAction::Kick => FloodVerdict::Kick { report },
        }
    }
}

/// Hub-wide buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllFloodKind {
    Chat = 0,
    Priv,
    McTo,
    Search,
}

const ALL_FLOOD_KINDS: usize = 4;

impl AllFloodKind {
    pub fn name(&self) -> &'static str {
        match self {
            AllFloodKind::Chat => "Chat",
            AllFloodKind::Priv => "To",
            AllFloodKind::McTo => "MCTo",
            AllFloodKind::Search => "Search",
        }
    }

    fn rule(&self, config: &HubFloodConfig) -> FloodRule {
        match self {
            AllFloodKind::Chat => config.chat,
            AllFloodKind::Priv => config.to,
            AllFloodKind::McTo => config.mcto,
            AllFloodKind::Search => config.search,
        }
    }
}

/// Outcome of a hub-wide check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllFloodVerdict {
    Pass,
    /// Drop the command; `notice` is set on the edge transitions so the
    /// operator chat sees one lock and one unlock message.
    Locked { notice: Option<String> },
    Unlocked { notice: String },
}

#[derive(Debug, Default, Clone, Copy)]
struct AllSlot {
    count: u32,
    time: i64,
    locked: bool,
}

/// Hub-wide flood state shared by all connections.
#[derive(Debug, Default)]
pub struct HubFlood {
    slots: Mutex<[AllSlot; ALL_FLOOD_KINDS]>,
}

impl HubFlood {
    /// Count one command against the hub-wide bucket.
    pub fn check(
        &self,
        kind: AllFloodKind,
        config: &HubFloodConfig,
        now: i64,
        exempt: bool,
    ) -> AllFloodVerdict {
        if exempt {
            return AllFloodVerdict::Pass;
        }

        let rule = kind.rule(config);

        if !rule.enabled() {
            return AllFloodVerdict::Pass;
        }

        let mut slots = self.slots.lock();
        let slot = &mut slots[kind as usize];

        if slot.count == 0 {
            slot.count = 1;
            slot.time = now;
            slot.locked = false;
            return AllFloodVerdict::Pass;
        }

        let elapsed = now - slot.time;

        if !(0..=rule.period as i64).contains(&elapsed) {
            slot.count = 1;
            slot.time = now;

            if slot.locked {
                slot.locked = false;
                return AllFloodVerdict::Unlocked {
                    notice: format!(
                        "Protocol command has been unlocked after stopped flood from all: {}",
                        kind.name()
                    ),
                };
            }

            return AllFloodVerdict::Pass;
        }

        slot.count += 1;

        if slot.count <= rule.limit {
            return AllFloodVerdict::Pass;
        }

        // Locked; keep the window sliding so release needs real quiet.
        slot.time = now;

        let notice = if slot.locked {
            None
        } else {
            slot.locked = true;
            Some(format!(
                "Protocol command has been locked due to detection of flood from all: {} [{}:{}:{}]",
                kind.name(),
                slot.count,
                elapsed,
                rule.period
            ))
        };

        AllFloodVerdict::Locked { notice }
    }

    /// Whether a kind is currently locked, for report suppression.
    pub fn is_locked(&self, kind: AllFloodKind) -> bool {
        self.slots.lock()[kind as usize].locked
    }
}

/// Per-target RevConnectToMe variant of the hub-wide check. The state
/// lives on the target user so the caller must hold its write lock.
pub fn check_rctm_to_user(
    target: &mut User,
    rule: FloodRule,
    now: i64,
    exempt: bool,
) -> AllFloodVerdict {
    if exempt || !rule.enabled() {
        return AllFloodVerdict::Pass;
    }

    if target.rctm.count == 0 {
        target.rctm.count = 1;
        target.rctm.time = now;
        target.rctm.locked = false;
        return AllFloodVerdict::Pass;
    }

    let elapsed = now - target.rctm.time;

    if !(0..=rule.period as i64).contains(&elapsed) {
        target.rctm.count = 1;
        target.rctm.time = now;

        if target.rctm.locked {
            target.rctm.locked = false;
            return AllFloodVerdict::Unlocked {
                notice: format!(
                    "Protocol command has been unlocked after stopped flood to user {} from all: RevConnectToMe",
                    target.nick
                ),
            };
        }

        return AllFloodVerdict::Pass;
    }

    target.rctm.count += 1;

    if target.rctm.count <= rule.limit {
        return AllFloodVerdict::Pass;
    }

    target.rctm.time = now;

    let notice = if target.rctm.locked {
        None
    } else {
        target.rctm.locked = true;
        Some(format!(
            "Protocol command has been locked due to detection of flood to user {} from all: RevConnectToMe",
            target.nick
        ))
    };

    AllFloodVerdict::Locked { notice }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FloodAction;

    fn config_with(kind_rule: FloodRule) -> FloodConfig {
        FloodConfig {
            chat: kind_rule,
            report: true,
            report_time: 60,
            ..Default::default()
        }
    }

    #[test]
    fn sixth_chat_in_window_is_dropped() {
        let config = config_with(FloodRule::new(10, 5, FloodAction::Drop));
        let mut track = FloodTrack::default();

        for i in 0..5 {
            assert_eq!(
                track.check(FloodKind::Chat, &config, 100 + i, false, false),
                FloodVerdict::Pass,
                "message {i} should pass"
            );
        }

        match track.check(FloodKind::Chat, &config, 105, false, false) {
            FloodVerdict::Drop { report } => {
                let report = report.unwrap();
                assert!(report.contains("Chat"));
                assert!(report.contains("[6:5:10]"));
            }
            other => panic!("expected drop, got {other:?}"),
        }

        // After a full period of quiet the counter resets.
        assert_eq!(
            track.check(FloodKind::Chat, &config, 120, false, false),
            FloodVerdict::Pass
        );
    }

    #[test]
    fn reports_are_rate_limited() {
        let config = config_with(FloodRule::new(10, 1, FloodAction::Drop));
        let mut track = FloodTrack::default();

        track.check(FloodKind::Chat, &config, 100, false, false);
        let first = track.check(FloodKind::Chat, &config, 101, false, false);
        let second = track.check(FloodKind::Chat, &config, 102, false, false);

        assert!(matches!(first, FloodVerdict::Drop { report: Some(_) }));
        assert!(matches!(second, FloodVerdict::Drop { report: None }));
    }

    #[test]
    fn exempt_class_passes() {
        let config = config_with(FloodRule::new(1, 1, FloodAction::Kick));
        let mut track = FloodTrack::default();

        for i in 0..10 {
            assert_eq!(
                track.check(FloodKind::Chat, &config, 100 + i, true, false),
                FloodVerdict::Pass
            );
        }
    }

    #[test]
    fn kick_action() {
        let config = config_with(FloodRule::new(10, 1, FloodAction::Kick));
        let mut track = FloodTrack::default();
        track.check(FloodKind::Chat, &config, 100, false, false);
        assert!(matches!(
            track.check(FloodKind::Chat, &config, 100, false, false),
            FloodVerdict::Kick { .. }
        ));
    }

    #[test]
    fn hub_wide_lock_and_release() {
        let config = HubFloodConfig {
            chat: FloodRule::new(5, 20, FloodAction::Drop),
            ..Default::default()
        };
        let flood = HubFlood::default();

        // 20 chats from anywhere pass.
        for i in 0..20 {
            assert_eq!(
                flood.check(AllFloodKind::Chat, &config, 100 + (i % 5), false),
                AllFloodVerdict::Pass,
                "chat {i}"
            );
        }

        // The 21st locks with a notice.
        match flood.check(AllFloodKind::Chat, &config, 104, false) {
            AllFloodVerdict::Locked { notice: Some(n) } => {
                assert!(n.contains("locked"));
                assert!(n.contains("Chat"));
            }
            other => panic!("expected lock, got {other:?}"),
        }

        // While flooding continues, drops stay silent.
        assert_eq!(
            flood.check(AllFloodKind::Chat, &config, 105, false),
            AllFloodVerdict::Locked { notice: None }
        );
        assert!(flood.is_locked(AllFloodKind::Chat));

        // A full quiet period releases the lock with a notice.
        match flood.check(AllFloodKind::Chat, &config, 120, false) {
            AllFloodVerdict::Unlocked { notice } => assert!(notice.contains("unlocked")),
            other => panic!("expected unlock, got {other:?}"),
        }
        assert!(!flood.is_locked(AllFloodKind::Chat));
    }

    #[test]
    fn rctm_lock_is_per_target() {
        let rule = FloodRule::new(5, 2, FloodAction::Drop);
        let mut victim = User::new("victim");
        let mut other = User::new("other");

        assert_eq!(check_rctm_to_user(&mut victim, rule, 100, false), AllFloodVerdict::Pass);
        assert_eq!(check_rctm_to_user(&mut victim, rule, 101, false), AllFloodVerdict::Pass);
        assert!(matches!(
            check_rctm_to_user(&mut victim, rule, 102, false),
            AllFloodVerdict::Locked { notice: Some(_) }
        ));

        // Unrelated target is unaffected.
        assert_eq!(check_rctm_to_user(&mut other, rule, 102, false), AllFloodVerdict::Pass);

        // Quiet period unlocks.
        match check_rctm_to_user(&mut victim, rule, 120, false) {
            AllFloodVerdict::Unlocked { notice } => assert!(notice.contains("victim")),
            other => panic!("expected unlock, got {other:?}"),
        }
    }
}
