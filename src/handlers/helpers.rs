//! Small shared handler utilities.

use std::net::IpAddr;

use crate::error::{CloseReason, HandlerError, HandlerResult};
use crate::network::connection::ConnState;
use crate::state::nick_hash;

/// Every from-nick field must carry the connection's own nick; a mismatch
/// is spoofing and ends the session.
pub fn check_own_nick(conn: &mut ConnState, claimed: &str) -> HandlerResult {
    let own = conn.entry.as_ref().map(|e| e.hash);

    if own == Some(nick_hash(claimed)) {
        return Ok(());
    }

    conn.close_with_msg(
        &format!("Your client sent a command carrying a nick that isn't yours: {claimed}"),
        1000,
        CloseReason::SyntaxError,
    );
    Err(HandlerError::Close(CloseReason::SyntaxError))
}

/// Structural parse failures close with a per-command syntax message.
pub fn syntax_close(conn: &mut ConnState, command: &str) -> HandlerError {
    conn.close_with_msg(
        &format!("Your client sent a malformed {command} command."),
        1000,
        CloseReason::SyntaxError,
    );
    HandlerError::Close(CloseReason::SyntaxError)
}

/// Whether an address is on a private or loopback network; used for the
/// LAN/WAN symmetry gates.
pub fn is_lan_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.to_ipv4_mapped()
                    .map(|v4| v4.is_private() || v4.is_loopback())
                    .unwrap_or(false)
        }
    }
}

/// `MinDelay`: true when at least `min_secs` passed since `last`, which
/// is then refreshed.
pub fn min_delay(last: &mut i64, now: i64, min_secs: u64) -> bool {
    if now - *last >= min_secs as i64 {
        *last = now;
        true
    } else {
        false
    }
}

/// Same-message hash used by the equal-as-last gates.
pub fn message_hash(raw: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;

    for b in raw.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }

    // Zero is the "no previous message" sentinel.
    hash.max(1)
}

/// Minimum share floor (bytes) below which search and download are off,
/// by class.
pub fn use_hub_share_floor(config: &crate::config::Config, class: i32) -> u64 {
    let mib = match class {
        0 | 1 => config.limits.min_share_use_hub,
        2 => config.limits.min_share_use_hub_reg,
        3 => config.limits.min_share_use_hub_vip,
        _ => 0,
    };

    mib.saturating_mul(1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lan_detection() {
        assert!(is_lan_ip("192.168.1.4".parse().unwrap()));
        assert!(is_lan_ip("10.0.0.1".parse().unwrap()));
        assert!(is_lan_ip("127.0.0.1".parse().unwrap()));
        assert!(!is_lan_ip("203.0.113.9".parse().unwrap()));
        assert!(is_lan_ip("::ffff:10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn min_delay_updates_only_on_pass() {
        let mut last = 100;
        assert!(!min_delay(&mut last, 105, 10));
        assert_eq!(last, 100);
        assert!(min_delay(&mut last, 110, 10));
        assert_eq!(last, 110);
    }

    #[test]
    fn message_hash_never_zero() {
        assert_ne!(message_hash(""), 0);
        assert_eq!(message_hash("abc"), message_hash("abc"));
        assert_ne!(message_hash("abc"), message_hash("abd"));
    }
}
