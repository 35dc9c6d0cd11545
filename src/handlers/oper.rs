//! Operator commands, each guarded by a configured minimum class.

use async_trait::async_trait;

use nmdc_proto::message::{BanArgs, OpForceMoveArgs};
use nmdc_proto::{frames, Message};

use crate::error::{CloseReason, HandlerError, HandlerResult};
use crate::handlers::registry::Handler;
use crate::network::connection::ConnState;
use crate::security::BanKind;
use crate::state::OutMsg;

/// A `$TempBan` with no better idea; `$Ban` entries use a horizon far
/// past any session.
const PERMANENT_SECS: i64 = 10 * 365 * 24 * 3600;

fn require_class(conn: &mut ConnState, min: i32) -> HandlerResult {
    if conn.class() >= min {
        Ok(())
    } else {
        conn.hub_chat("You have no rights to do this.");
        Err(HandlerError::Discard)
    }
}

/// Deliver a hub message to a target connection and ask it to close.
fn boot_user(
    conn: &mut ConnState,
    target: &crate::state::UserEntry,
    text: &str,
    reason: CloseReason,
) {
    let line = conn.hub.chat_line(text);
    target.send(OutMsg::immediate(bytes::Bytes::from(line)));
    target.request_close(reason, 1000);
}

pub struct KickHandler;

#[async_trait]
impl Handler for KickHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let config = conn.config();
        require_class(conn, config.limits.kick_class)?;

        let nick = msg.payload().trim();
        let Some(target) = conn.hub.users.get_by_nick(nick) else {
            return Err(HandlerError::Discard);
        };

        let my_class = conn.class();
        let (target_class, protect) = {
            let user = target.user.read();
            (user.class.value(), user.class_protect)
        };

        if target_class >= my_class || protect >= my_class {
            conn.hub_chat(&format!("You can't kick this user: {nick}"));
            return Err(HandlerError::Discard);
        }

        let kicker = conn.nick().unwrap_or_default();
        conn.hub
            .report_to_opchat(&format!("{kicker} kicked {nick}"));
        boot_user(conn, &target, "You are being kicked from the hub.", CloseReason::Kicked);
        Ok(())
    }
}

pub struct OpForceMoveHandler;

#[async_trait]
impl Handler for OpForceMoveHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let config = conn.config();
        require_class(conn, config.limits.kick_class)?;

        let args =
            OpForceMoveArgs::parse(&msg.raw).map_err(|_| HandlerError::Discard)?;

        let Some(target) = conn.hub.users.get_by_nick(&args.who) else {
            return Err(HandlerError::Discard);
        };

        if target.user.read().class.value() >= conn.class() {
            conn.hub_chat(&format!("You can't redirect this user: {}", args.who));
            return Err(HandlerError::Discard);
        }

        let line = conn.hub.chat_line(&format!(
            "You are being redirected to {} because: {}",
            args.along, args.reason
        ));
        target.send(OutMsg::immediate(bytes::Bytes::from(line)));

        let frame = frames::force_move(&args.along);
        target.send(OutMsg::immediate(bytes::Bytes::from(frame)));
        target.request_close(CloseReason::ForceMove, 1000);

        let mover = conn.nick().unwrap_or_default();
        conn.hub.report_to_opchat(&format!(
            "{mover} redirected {} to {} because: {}",
            args.who, args.along, args.reason
        ));
        Ok(())
    }
}

pub struct BanHandler;

#[async_trait]
impl Handler for BanHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let config = conn.config();
        require_class(conn, config.limits.ban_class)?;

        let args = BanArgs::parse(&msg.raw).map_err(|_| HandlerError::Discard)?;
        let now = conn.hub.now();
        let until = match args.minutes {
            Some(minutes) => now + (minutes as i64) * 60,
            None => now + PERMANENT_SECS,
        };

        let reason = if args.reason.is_empty() {
            "Banned by operator".to_string()
        } else {
            args.reason.clone()
        };

        conn.hub
            .temp_bans
            .add_nick(&args.nick, until, &reason, BanKind::FastReconnect);

        if let Some(target) = conn.hub.users.get_by_nick(&args.nick) {
            if target.user.read().class.value() >= conn.class() {
                conn.hub_chat(&format!("You can't ban this user: {}", args.nick));
                conn.hub.temp_bans.remove_nick(&args.nick);
                return Err(HandlerError::Discard);
            }

            // Ban the address the session actually uses.
            let ip = target.user.read().ip.clone();

            if let Ok(ip) = ip.parse() {
                conn.hub.temp_bans.add_ip(ip, until, &reason, BanKind::FastReconnect);
            }

            boot_user(
                conn,
                &target,
                &format!("You are banned from this hub: {reason}"),
                CloseReason::Kicked,
            );
        }

        let banner = conn.nick().unwrap_or_default();
        conn.hub.report_to_opchat(&format!(
            "{banner} banned {} until {}: {}",
            args.nick, until, reason
        ));
        Ok(())
    }
}

pub struct UnBanHandler;

#[async_trait]
impl Handler for UnBanHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let config = conn.config();
        require_class(conn, config.limits.ban_class)?;

        let what = msg.payload().trim();

        if what.is_empty() {
            return Err(HandlerError::Discard);
        }

        conn.hub.temp_bans.remove_nick(what);

        if let Ok(ip) = what.parse() {
            conn.hub.temp_bans.remove_ip(ip);
        }

        conn.hub_chat(&format!("Removed temporary bans matching: {what}"));
        Ok(())
    }
}

pub struct GetBanListHandler;

#[async_trait]
impl Handler for GetBanListHandler {
    async fn handle(&self, conn: &mut ConnState, _msg: &Message) -> HandlerResult {
        let config = conn.config();
        require_class(conn, config.limits.ban_class)?;

        let count = conn.hub.temp_bans.len();
        conn.hub_chat(&format!("Temporary ban entries: {count}"));
        Ok(())
    }
}

pub struct WhoIpHandler;

#[async_trait]
impl Handler for WhoIpHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let config = conn.config();
        require_class(conn, config.limits.who_ip_class)?;

        let wanted: Vec<&str> = msg.payload().split("$$").filter(|s| !s.is_empty()).collect();

        if wanted.is_empty() {
            return Err(HandlerError::Discard);
        }

        let mut lines = Vec::new();

        for entry in conn.hub.users.snapshot() {
            let user = entry.user.read();

            if wanted.iter().any(|ip| *ip == user.ip) {
                lines.push(format!("{} = {}", user.nick, user.ip));
            }
        }

        let text = if lines.is_empty() {
            "No users at the given addresses.".to_string()
        } else {
            format!("Users at the given addresses:\r\n{}", lines.join("\r\n"))
        };

        conn.hub_chat(&text);
        Ok(())
    }
}

pub struct GetTopicHandler;

#[async_trait]
impl Handler for GetTopicHandler {
    async fn handle(&self, conn: &mut ConnState, _msg: &Message) -> HandlerResult {
        let topic = conn.hub.topic.read().clone();

        if !topic.is_empty() {
            let frame = frames::hub_topic(&topic);
            conn.send(&frame, false);
        }

        Ok(())
    }
}

pub struct SetTopicHandler;

#[async_trait]
impl Handler for SetTopicHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let config = conn.config();
        require_class(conn, config.limits.topic_class)?;

        let topic = msg.payload().to_string();
        *conn.hub.topic.write() = topic.clone();

        let frame = frames::hub_topic(&topic);
        conn.hub.users.send_to_all(&frame, false);

        let setter = conn.nick().unwrap_or_default();
        tracing::info!(topic = %topic, setter = %setter, "hub topic changed");
        Ok(())
    }
}

pub struct UserIpHandler;

#[async_trait]
impl Handler for UserIpHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let config = conn.config();
        require_class(conn, config.limits.user_ip_class)?;

        if !conn.has_feature(crate::state::features::USERIP2) {
            return Err(HandlerError::Discard);
        }

        let mut list = String::new();

        for nick in msg.payload().split("$$").filter(|s| !s.is_empty()) {
            if let Some(entry) = conn.hub.users.get_by_nick(nick) {
                let user = entry.user.read();
                list.push_str(&user.nick);
                list.push(' ');
                list.push_str(&user.ip);
                list.push_str("$$");
            }
        }

        if list.is_empty() {
            return Err(HandlerError::Discard);
        }

        let frame = frames::user_ip_list(&list);
        conn.send(&frame, false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_horizon_is_far_out() {
        assert!(PERMANENT_SECS > 5 * 365 * 24 * 3600);
    }
}
