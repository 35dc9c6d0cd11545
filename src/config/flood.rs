//! Flood-control configuration.
//!
//! Each inbound command kind carries a `(period, limit, action)` rule; a
//! zero period or limit disables the rule. Hub-wide rules share the shape
//! but have no action: crossing the limit locks the command for everyone
//! until a full quiet period passes.

use serde::Deserialize;

use super::defaults::{
    default_max_class_proto_flood, default_proto_flood_report_time,
    default_proto_flood_tban_time, default_true,
};

/// What to do when a per-connection flood rule trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FloodAction {
    /// Report to operators, let the command through.
    Notify,
    /// Drop the offending command, keep the connection.
    #[default]
    Drop,
    /// Disconnect and temp-ban.
    Kick,
}

/// One flood rule.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FloodRule {
    /// Window in seconds; 0 disables the rule.
    #[serde(default)]
    pub period: u64,
    /// Commands allowed inside the window; 0 disables the rule.
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub action: FloodAction,
}

impl FloodRule {
    pub const fn disabled() -> FloodRule {
        FloodRule {
            period: 0,
            limit: 0,
            action: FloodAction::Drop,
        }
    }

    pub const fn new(period: u64, limit: u32, action: FloodAction) -> FloodRule {
        FloodRule {
            period,
            limit,
            action,
        }
    }

    pub fn enabled(&self) -> bool {
        self.period > 0 && self.limit > 0
    }
}

impl Default for FloodRule {
    fn default() -> Self {
        Self::disabled()
    }
}

fn rule(period: u64, limit: u32) -> FloodRule {
    FloodRule::new(period, limit, FloodAction::Drop)
}

fn default_ctm() -> FloodRule {
    rule(5, 25)
}

fn default_rctm() -> FloodRule {
    rule(5, 25)
}

fn default_sr() -> FloodRule {
    rule(5, 100)
}

fn default_search() -> FloodRule {
    rule(10, 5)
}

fn default_myinfo() -> FloodRule {
    rule(60, 5)
}

fn default_extjson() -> FloodRule {
    rule(60, 5)
}

fn default_nicklist() -> FloodRule {
    rule(60, 2)
}

fn default_to() -> FloodRule {
    rule(5, 10)
}

fn default_chat() -> FloodRule {
    rule(5, 10)
}

fn default_getinfo() -> FloodRule {
    rule(60, 200)
}

fn default_mcto() -> FloodRule {
    rule(5, 10)
}

fn default_in() -> FloodRule {
    rule(60, 10)
}

fn default_ping() -> FloodRule {
    rule(30, 5)
}

fn default_unknown() -> FloodRule {
    rule(30, 5)
}

fn default_all_chat() -> FloodRule {
    rule(5, 120)
}

fn default_all_to() -> FloodRule {
    rule(5, 150)
}

fn default_all_mcto() -> FloodRule {
    rule(5, 120)
}

fn default_all_search() -> FloodRule {
    rule(5, 100)
}

fn default_all_rctm() -> FloodRule {
    rule(5, 25)
}

/// Per-connection flood rules, one per command kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    pub ctm: FloodRule,
    pub rctm: FloodRule,
    pub sr: FloodRule,
    pub search: FloodRule,
    pub myinfo: FloodRule,
    pub extjson: FloodRule,
    pub nicklist: FloodRule,
    pub to: FloodRule,
    pub chat: FloodRule,
    pub getinfo: FloodRule,
    pub mcto: FloodRule,
    pub in_cmd: FloodRule,
    pub ping: FloodRule,
    pub unknown: FloodRule,

    /// Users above this class are exempt.
    pub max_class: i32,
    /// Report detections to the operator chat.
    pub report: bool,
    /// Minimum seconds between reports for one connection and kind.
    pub report_time: u64,
    /// Keep reporting kinds that are currently hub-locked.
    pub report_locked: bool,
    /// Temp-ban length for the kick action.
    pub tban_time: u64,
}

impl Default for FloodConfig {
    fn default() -> Self {
        FloodConfig {
            ctm: default_ctm(),
            rctm: default_rctm(),
            sr: default_sr(),
            search: default_search(),
            myinfo: default_myinfo(),
            extjson: default_extjson(),
            nicklist: default_nicklist(),
            to: default_to(),
            chat: default_chat(),
            getinfo: default_getinfo(),
            mcto: default_mcto(),
            in_cmd: default_in(),
            ping: default_ping(),
            unknown: default_unknown(),
            max_class: default_max_class_proto_flood(),
            report: default_true(),
            report_time: default_proto_flood_report_time(),
            report_locked: false,
            tban_time: default_proto_flood_tban_time(),
        }
    }
}

/// Hub-wide flood rules. The action is implicit: lock the command kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubFloodConfig {
    pub chat: FloodRule,
    pub to: FloodRule,
    pub mcto: FloodRule,
    pub search: FloodRule,
    /// Counted per target user rather than globally.
    pub rctm: FloodRule,
}

impl Default for HubFloodConfig {
    fn default() -> Self {
        HubFloodConfig {
            chat: default_all_chat(),
            to: default_all_to(),
            mcto: default_all_mcto(),
            search: default_all_search(),
            rctm: default_all_rctm(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_rules() {
        assert!(!FloodRule::disabled().enabled());
        assert!(!rule(0, 5).enabled());
        assert!(!rule(5, 0).enabled());
        assert!(rule(5, 5).enabled());
    }

    #[test]
    fn deserializes_partial_tables() {
        let cfg: FloodConfig =
            toml::from_str("chat = { period = 10, limit = 5, action = \"kick\" }").unwrap();
        assert_eq!(cfg.chat.period, 10);
        assert_eq!(cfg.chat.action, FloodAction::Kick);
        // untouched kinds keep their defaults
        assert_eq!(cfg.search.period, default_search().period);
    }
}
