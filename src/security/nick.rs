//! Nick validation.
//!
//! Each failure carries the structured reply clients advertising
//! `NickRule` understand (`$BadNick <id> <par>`), alongside a human chat
//! explanation. Registered accounts skip the cosmetic rules; identity and
//! ban rules apply to everyone.

use crate::config::NickConfig;
use crate::db::RegData;
use crate::error::CloseReason;
use crate::security::bans::{BanKind, TempBans};
use crate::state::collection::UserCollection;

/// Protocol metacharacters never allowed in a nick.
pub const BAD_NICK_CHARS: &str = "$|<> ";

/// A structured nick rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NickRejection {
    /// Forbidden or out-of-set characters; carries the offenders.
    Chars(String),
    TooShort,
    TooLong,
    /// Hash collision with a connected user.
    InUse,
    /// Missing a required prefix.
    Prefix,
    /// `[OP]` prefix on an unregistered session.
    NotRegedOp,
    /// Temp-banned nick; carries the entry's reason and close reason.
    Banned {
        reason: String,
        close: CloseReason,
        seconds_left: i64,
    },
}

impl NickRejection {
    /// The `$BadNick` id and parameter, when the failure has one.
    pub fn bad_nick_reply(&self, config: &NickConfig) -> Option<(String, String)> {
        match self {
            NickRejection::Chars(bad) => Some(("Char".into(), byte_list(bad))),
            NickRejection::TooShort => Some(("Min".into(), config.min_len.min(255).to_string())),
            NickRejection::TooLong => Some(("Max".into(), config.max_len.to_string())),
            NickRejection::Prefix => Some(("Pref".into(), config.prefixes.join(" "))),
            NickRejection::NotRegedOp => Some(("Pref".into(), String::new())),
            NickRejection::InUse | NickRejection::Banned { .. } => None,
        }
    }

    /// Human explanation for the chat line.
    pub fn explain(&self, config: &NickConfig) -> String {
        match self {
            NickRejection::Chars(bad) => {
                if config.chars.is_empty() {
                    format!("Your nick contains forbidden characters: {}", byte_list(bad))
                } else {
                    format!(
                        "Your nick contains forbidden characters. Valid nick characters: {}",
                        config.chars
                    )
                }
            }
            NickRejection::TooShort => format!(
                "Your nick is too short, minimum allowed length is {} characters.",
                config.min_len
            ),
            NickRejection::TooLong => format!(
                "Your nick is too long, maximum allowed length is {} characters.",
                config.max_len
            ),
            NickRejection::InUse => "Your nick is already taken by another user.".to_string(),
            NickRejection::Prefix => format!(
                "Please use one of following nick prefixes: {}",
                config.prefixes.join(" ")
            ),
            NickRejection::NotRegedOp => {
                "Your nick contains operator prefix but you are not registered, please remove it."
                    .to_string()
            }
            NickRejection::Banned {
                reason,
                seconds_left,
                ..
            } => format!(
                "You're still temporarily prohibited from entering the hub for {}s because: {}",
                seconds_left, reason
            ),
        }
    }

    pub fn close_reason(&self) -> CloseReason {
        match self {
            NickRejection::Banned { close, .. } => *close,
            _ => CloseReason::BadNick,
        }
    }
}

/// Space-separated decimal byte values, the NickRule wire form for
/// character lists.
pub fn byte_list(chars: &str) -> String {
    let mut out = String::new();

    for b in chars.bytes() {
        if !out.is_empty() {
            out.push(' ');
        }

        out.push_str(&b.to_string());
    }

    out
}

/// Validate a candidate nick against rules, collisions and temp bans.
pub fn validate_nick(
    nick: &str,
    reg: Option<&RegData>,
    config: &NickConfig,
    users: &UserCollection,
    temp_bans: &TempBans,
    now: i64,
) -> Result<(), NickRejection> {
    let registered = reg.map(|r| r.enabled).unwrap_or(false);

    let mut bad = String::new();

    for c in BAD_NICK_CHARS.chars().chain(config.forbidden_chars.chars()) {
        if nick.contains(c) && !bad.contains(c) {
            bad.push(c);
        }
    }

    if !bad.is_empty() {
        return Err(NickRejection::Chars(bad));
    }

    if !registered {
        if nick.len() > config.max_len {
            return Err(NickRejection::TooLong);
        }

        if nick.len() < config.min_len {
            return Err(NickRejection::TooShort);
        }

        if !config.chars.is_empty() {
            let mut outside = String::new();

            for c in nick.chars() {
                if !config.chars.contains(c) && !outside.contains(c) {
                    outside.push(c);
                }
            }

            if !outside.is_empty() {
                return Err(NickRejection::Chars(outside));
            }
        }

        if !config.prefixes.is_empty() {
            let hit = config.prefixes.iter().any(|p| {
                if config.prefix_nocase {
                    nick.to_lowercase().starts_with(&p.to_lowercase())
                } else {
                    nick.starts_with(p.as_str())
                }
            });

            if !hit {
                return Err(NickRejection::Prefix);
            }
        }

        if nick.to_uppercase().starts_with("[OP]") {
            return Err(NickRejection::NotRegedOp);
        }
    }

    if users.get_by_nick(nick).is_some() {
        return Err(NickRejection::InUse);
    }

    if let Some(ban) = temp_bans.get_nick(nick, now) {
        return Err(NickRejection::Banned {
            reason: ban.reason.clone(),
            close: ban.kind.close_reason(),
            seconds_left: ban.until - now,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::user::UserEntry;
    use std::sync::Arc;

    fn setup() -> (NickConfig, UserCollection, TempBans) {
        (
            NickConfig::default(),
            UserCollection::new("users", "$NickList ", false, false, false),
            TempBans::default(),
        )
    }

    #[test]
    fn accepts_plain_nick() {
        let (config, users, bans) = setup();
        assert!(validate_nick("alice", None, &config, &users, &bans, 0).is_ok());
    }

    #[test]
    fn rejects_metacharacters() {
        let (config, users, bans) = setup();
        let err = validate_nick("a|ice", None, &config, &users, &bans, 0).unwrap_err();
        assert!(matches!(err, NickRejection::Chars(_)));
        let (id, par) = err.bad_nick_reply(&config).unwrap();
        assert_eq!(id, "Char");
        assert_eq!(par, "124");
    }

    #[test]
    fn rejects_length_for_unregistered_only() {
        let (config, users, bans) = setup();
        let err = validate_nick("ab", None, &config, &users, &bans, 0).unwrap_err();
        assert_eq!(err, NickRejection::TooShort);

        let reg = RegData {
            nick: "ab".into(),
            class: 2,
            pwd_hash: String::new(),
            pwd_plain: "x".into(),
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
        };
        assert!(validate_nick("ab", Some(&reg), &config, &users, &bans, 0).is_ok());
    }

    #[test]
    fn rejects_op_prefix_when_unregistered() {
        let (config, users, bans) = setup();
        let err = validate_nick("[OP]fake", None, &config, &users, &bans, 0).unwrap_err();
        assert_eq!(err, NickRejection::NotRegedOp);
    }

    #[test]
    fn rejects_collisions() {
        let (config, users, bans) = setup();
        users.add(Arc::new(UserEntry::new("Alice", None, 0)));
        let err = validate_nick("alice", None, &config, &users, &bans, 0).unwrap_err();
        assert_eq!(err, NickRejection::InUse);
    }

    #[test]
    fn rejects_banned_nick_with_kind_reason() {
        let (config, users, bans) = setup();
        bans.add_nick("eve2", 500, "Clone detected", BanKind::Clone);
        let err = validate_nick("eve2", None, &config, &users, &bans, 100).unwrap_err();

        match err {
            NickRejection::Banned {
                close,
                seconds_left,
                ..
            } => {
                assert_eq!(close, CloseReason::Clone);
                assert_eq!(seconds_left, 400);
            }
            other => panic!("expected ban, got {other:?}"),
        }
    }

    #[test]
    fn required_prefix() {
        let (mut config, users, bans) = setup();
        config.prefixes = vec!["[FUN]".to_string()];
        assert!(validate_nick("[fun]alice", None, &config, &users, &bans, 0).is_ok());
        let err = validate_nick("alice", None, &config, &users, &bans, 0).unwrap_err();
        assert_eq!(err, NickRejection::Prefix);

        config.prefix_nocase = false;
        assert!(validate_nick("[fun]alice", None, &config, &users, &bans, 0).is_err());
        assert!(validate_nick("[FUN]alice", None, &config, &users, &bans, 0).is_ok());
    }
}
