//! Login completion: the sequence that runs once every handshake stage
//! is in place.

use tracing::{debug, info};

use nmdc_proto::frames;

use crate::error::{CloseReason, HandlerError, HandlerResult};
use crate::handlers::nicklist;
use crate::metrics;
use crate::network::connection::{stage, ConnState, TimeoutKind};
use crate::security::BanKind;
use crate::state::features;
use crate::state::user::UserClass;

/// Promote the session's user into the list and present it to the hub.
pub async fn complete(conn: &mut ConnState) -> HandlerResult {
    if conn.stages & stage::LOGIN_DONE != stage::LOGIN_DONE {
        conn.close_now(CloseReason::LoginError);
        return Err(HandlerError::Close(CloseReason::LoginError));
    }

    let Some(entry) = conn.entry.clone() else {
        conn.close_now(CloseReason::LoginError);
        return Err(HandlerError::Close(CloseReason::LoginError));
    };

    let config = conn.config();
    let now = conn.hub.now();
    let (nick, class) = {
        let user = entry.user.read();
        (user.nick.clone(), user.class)
    };

    debug!(nick = %nick, "begin login");

    // Reconnect pacing: the nick is temp-banned for a moment so an
    // instant reconnect bounces.
    if config.bans.reconnect_ban > 0 && class.value() <= config.bans.max_class_reconnect {
        conn.hub.temp_bans.add_nick(
            &nick,
            now + config.bans.reconnect_ban as i64,
            "Reconnecting too fast",
            BanKind::FastReconnect,
        );
    }

    if !conn.hub.insert_user(&entry) {
        conn.close_now(CloseReason::LoginError);
        return Err(HandlerError::Close(CloseReason::LoginError));
    }

    if !conn.hub.hooks.on_user_login(&nick) {
        conn.close_now(CloseReason::HookVeto);
        return Err(HandlerError::Close(CloseReason::HookVeto));
    }

    metrics::USERS_ONLINE.set(conn.hub.users.len() as i64);
    metrics::TOTAL_SHARE.set(conn.hub.total_share() as i64);

    // Hub name with topic, then failover hosts for clients that track
    // them.
    {
        let topic = conn.hub.topic.read().clone();
        let frame = frames::hub_name(&config.server.hub_name, &topic);
        conn.send(&frame, false);
    }

    if conn.has_feature(features::FAILOVER) && !config.server.failover_hosts.is_empty() {
        let frame = frames::fail_over(&config.server.failover_hosts);
        conn.send(&frame, false);
    }

    conn.hub.show_user_to_all(&entry);

    if conn.send_nick_list {
        nicklist::send_nick_list(conn);
    }

    after_login(conn, &nick, class);

    conn.clear_timeout(TimeoutKind::Login);
    entry.user.write().t.login = now;
    info!(nick = %nick, class = class.value(), "entered the hub");
    Ok(())
}

/// Post-login extras: password-change prompt, topic, MOTD and the
/// welcome line.
fn after_login(conn: &mut ConnState, nick: &str, class: UserClass) {
    let config = conn.config();

    if conn.reg.as_ref().map(|r| r.pwd_change).unwrap_or(false) {
        if let Some(entry) = &conn.entry {
            entry.user.write().set_pass = true;
        }

        conn.hub_chat("You must set your password now using the password dialog.");
        let frame = frames::get_pass();
        conn.send(&frame, false);
        conn.set_timeout(TimeoutKind::SetPass, config.timeouts.setpass);
    }

    {
        let topic = conn.hub.topic.read().clone();

        if !topic.is_empty() {
            let frame = frames::hub_topic(&topic);
            conn.send(&frame, false);
        }
    }

    if !config.server.motd.is_empty() {
        let motd = config.server.motd.clone();
        conn.hub_chat(&motd);
    }

    if !config.server.welcome.is_empty() && class >= UserClass::Guest {
        let line = config.server.welcome.replace("%nick%", nick);
        let frame = conn.hub.chat_line(&line);
        conn.hub.users.send_to_all(&frame, config.chat.delayed);
    }
}
