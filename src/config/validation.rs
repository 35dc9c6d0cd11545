//! Post-load configuration sanity checks.
//!
//! Load-time validation keeps broken settings from producing confusing
//! runtime behavior; every problem is reported, not just the first.

use super::types::Config;

/// Validate a parsed configuration. Returns all problems found.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.server.listen.is_empty() {
        errors.push("server.listen must name at least one endpoint".to_string());
    }

    if config.server.hub_name.is_empty() {
        errors.push("server.name must not be empty".to_string());
    }

    if config.nick.min_len == 0 {
        errors.push("nick.min_len must be at least 1".to_string());
    }

    if config.nick.min_len > config.nick.max_len {
        errors.push(format!(
            "nick.min_len ({}) exceeds nick.max_len ({})",
            config.nick.min_len, config.nick.max_len
        ));
    }

    for (name, share) in [
        ("guest", &config.limits.share_guest),
        ("reg", &config.limits.share_reg),
        ("vip", &config.limits.share_vip),
        ("op", &config.limits.share_op),
    ] {
        if share.max != 0 && share.min > share.max {
            errors.push(format!(
                "limits.share_{name}: min ({}) exceeds max ({})",
                share.min, share.max
            ));
        }
    }

    if config.limits.min_share_factor_passive < 0.0 {
        errors.push("limits.min_share_factor_passive must not be negative".to_string());
    }

    if config.server.max_frame_len < config.server.max_len_myinfo {
        errors.push("server.max_frame_len is smaller than server.max_len_myinfo".to_string());
    }

    for zone in &config.zones {
        if zone.cc.split(',').any(|cc| cc.trim().len() != 2) {
            errors.push(format!("zones: bad country code list {:?}", zone.cc));
        }
    }

    for reg in &config.registered {
        if reg.nick.is_empty() {
            errors.push("registered: empty nick".to_string());
        }

        if reg.class > 10 || reg.class < -1 {
            errors.push(format!(
                "registered {:?}: class {} out of range",
                reg.nick, reg.class
            ));
        }
    }

    let mut seen = std::collections::HashSet::new();

    for reg in &config.registered {
        if !seen.insert(reg.nick.to_lowercase()) {
            errors.push(format!("registered: duplicate nick {:?}", reg.nick));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegBlock;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_inverted_nick_lengths() {
        let mut config = Config::default();
        config.nick.min_len = 64;
        config.nick.max_len = 8;
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("nick.min_len")));
    }

    #[test]
    fn rejects_duplicate_registrations() {
        let mut config = Config::default();

        for nick in ["Admin", "admin"] {
            config.registered.push(RegBlock {
                nick: nick.to_string(),
                class: 7,
                password: String::new(),
                password_plain: "secret".to_string(),
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
            });
        }

        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate nick")));
    }
}
