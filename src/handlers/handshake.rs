//! Handshake command handlers: Key, Supports, ValidateNick, MyPass,
//! Version, MyHubURL, BotINFO and the stray client-to-client frames.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use nmdc_proto::{frames, lock, Message};

use crate::error::{CloseReason, HandlerError, HandlerResult};
use crate::handlers::helpers::{is_lan_ip, syntax_close};
use crate::handlers::login;
use crate::handlers::registry::Handler;
use crate::network::connection::{stage, ConnState, TimeoutKind};
use crate::security::nick::{byte_list, validate_nick, NickRejection, BAD_NICK_CHARS};
use crate::security::BanKind;
use crate::state::features;
use crate::state::user::{UserClass, UserEntry};

fn dup_step_close(conn: &mut ConnState, step: &str) -> HandlerError {
    conn.close_with_msg(
        &format!("Invalid login sequence, your client already sent {step}."),
        1000,
        CloseReason::LoginError,
    );
    HandlerError::Close(CloseReason::LoginError)
}

pub struct KeyHandler;

#[async_trait]
impl Handler for KeyHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        if conn.has_stage(stage::KEY) {
            return Err(dup_step_close(conn, "key"));
        }

        let config = conn.config();

        if config.server.drop_invalid_key
            && !lock::validate_key(&conn.lock, msg.payload().as_bytes())
        {
            conn.close_with_msg(
                "Your client provided invalid key in response to lock.",
                1000,
                CloseReason::InvalidKey,
            );
            return Err(HandlerError::Close(CloseReason::InvalidKey));
        }

        conn.set_stage(stage::KEY);
        conn.clear_timeout(TimeoutKind::Key);
        conn.set_timeout(TimeoutKind::ValNick, config.timeouts.valnick);
        conn.lock = Vec::new();
        Ok(())
    }
}

pub struct SupportsHandler;

#[async_trait]
impl Handler for SupportsHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        if conn.has_stage(stage::SUPPORTS) {
            return Err(dup_step_close(conn, "supports"));
        }

        let config = conn.config();
        let (bits, echo) = features::parse_supports(msg.payload(), false);
        conn.features |= bits;
        conn.supports_text = msg.payload().to_string();

        let frame = frames::supports(&echo);
        conn.send(&frame, false);

        if conn.has_feature(features::NICKRULE) {
            let mut rules = format!(
                "Min {}$$Max {}$$Char {}$$",
                config.nick.min_len.min(255),
                config.nick.max_len,
                byte_list(&format!("{}{}", BAD_NICK_CHARS, config.nick.forbidden_chars)),
            );

            if !config.nick.prefixes.is_empty() {
                rules.push_str(&format!("Pref {}$$", config.nick.prefixes.join(" ")));
            }

            let frame = frames::nick_rule(&rules);
            conn.send(&frame, false);
        }

        conn.set_stage(stage::SUPPORTS);
        Ok(())
    }
}

pub struct ValidateNickHandler;

#[async_trait]
impl Handler for ValidateNickHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        if conn.has_stage(stage::VALNICK) {
            return Err(dup_step_close(conn, "validate nick"));
        }

        let nick = msg.payload().trim();

        if nick.is_empty() {
            return Err(syntax_close(conn, "ValidateNick"));
        }

        debug!(nick, "login attempt");

        let config = conn.config();
        let now = conn.hub.now();

        // Load the registration snapshot first; it decides which rules
        // apply.
        if nick.len() < config.nick.max_len * 2 {
            conn.reg = conn.hub.reg_store.find(nick);
        }

        if let Err(rejection) = validate_nick(
            nick,
            conn.reg.as_ref(),
            &config.nick,
            &conn.hub.users,
            &conn.hub.temp_bans,
            now,
        ) {
            return Err(refuse_nick(conn, nick, rejection));
        }

        // Persistent bans, unless the class bypasses them.
        if conn.theoretical_class() < config.bans.bypass_class {
            let query = crate::db::BanQuery {
                nick,
                ip: Some(conn.ip),
                share: None,
                check_prefix: conn.reg.is_none(),
            };

            if let Some(hit) = conn.hub.ban_store.check(&query, now) {
                conn.close_with_msg(
                    &format!("You are banned from this hub: {}", hit.reason),
                    2000,
                    CloseReason::LoginError,
                );
                return Err(HandlerError::Close(CloseReason::LoginError));
            }
        }

        self.check_capacity(conn, nick)?;

        // Authorization IP pins an account to one address.
        if let Some(reg) = conn.reg.clone() {
            if !reg.auth_ip.is_empty() && reg.auth_ip != conn.ip.to_string() {
                let text = format!(
                    "Authorization IP for this account doesn't match your IP address: {}",
                    conn.ip
                );
                conn.hub.report_to_opchat(&format!(
                    "Authorization IP mismatch from {nick}"
                ));
                conn.hub.temp_bans.add_ip(
                    conn.ip,
                    now + conn.config().bans.pwd_tmpban as i64,
                    &text,
                    BanKind::BadPassword,
                );
                conn.close_with_msg(&text, 1000, CloseReason::LoginError);
                return Err(HandlerError::Close(CloseReason::LoginError));
            }
        }

        // Hub name without topic; the full form follows login.
        let frame = frames::hub_name(&conn.config().server.hub_name, "");
        conn.send(&frame, false);

        let needs_password = conn.reg.as_ref().map(|r| r.needs_password()).unwrap_or(false);

        if needs_password {
            let frame = frames::get_pass();
            conn.send(&frame, false);
            conn.set_timeout(TimeoutKind::Password, conn.config().timeouts.password);
        } else {
            let frame = frames::hello(nick);
            conn.send(&frame, false);
            conn.set_stage(stage::PASSWD);

            if conn.has_feature(features::HUBURL) {
                let frame = frames::get_hub_url();
                conn.send(&frame, false);
            }
        }

        // The user record exists from here on; it joins the list at
        // login done.
        let entry = Arc::new(UserEntry::new(nick, Some(conn.tx.clone()), conn.features));
        {
            let mut user = entry.user.write();
            user.ip = conn
                .reg
                .as_ref()
                .filter(|r| !r.fake_ip.is_empty())
                .map(|r| r.fake_ip.clone())
                .unwrap_or_else(|| conn.ip.to_string());
            user.country = conn.country.clone().unwrap_or_default();
            user.lan = is_lan_ip(conn.ip);

            if let Some(reg) = &conn.reg {
                if reg.enabled {
                    // The class floor applies after the password round for
                    // guarded accounts.
                    if !needs_password {
                        user.class = UserClass::from_value(reg.class);
                    }

                    user.hide_share = reg.hide_share;
                    user.hide_chat = reg.hide_chat;
                    user.hide_ctm_msg = reg.hide_ctm_msg;
                    user.hide_kick = reg.hide_kick;
                    user.hide_keys = reg.hide_keys;
                    user.show_keys = reg.show_keys;
                    user.class_protect = reg.class_protect;
                    user.class_hide_kick = reg.class_hide_kick;
                }
            }

            if user.class != UserClass::Pinger && conn.has_feature(features::BOTINFO) {
                user.class = UserClass::Pinger;
            }
        }
        conn.entry = Some(entry);

        conn.set_stage(stage::VALNICK | stage::NICKLST);
        conn.clear_timeout(TimeoutKind::ValNick);
        conn.set_timeout(TimeoutKind::MyInfo, conn.config().timeouts.myinfo);
        Ok(())
    }
}

impl ValidateNickHandler {
    /// The global, zone and per-IP capacity gates.
    fn check_capacity(&self, conn: &mut ConnState, nick: &str) -> HandlerResult {
        let config = conn.config();
        let class = conn.theoretical_class();

        let extra = match class {
            -1 => config.limits.max_extra_pings,
            2 => config.limits.max_extra_regs,
            3 => config.limits.max_extra_vips,
            4 => config.limits.max_extra_ops,
            5 | 6 => config.limits.max_extra_cheefs,
            7..=9 => config.limits.max_extra_admins,
            _ => 0,
        };

        let total = conn.hub.conn_count.load(std::sync::atomic::Ordering::Relaxed);
        let limit = config.limits.max_users_total + extra;
        let zone_count = conn.hub.zones.count(conn.zone);
        let zone_limit = conn.hub.zones.cap(conn.zone).saturating_add(extra);

        if class < UserClass::Op.value() && (total >= limit || zone_count >= zone_limit) {
            let text = if zone_count >= zone_limit && conn.zone != 0 {
                format!(
                    "User limit in {} exceeded at {}/{} online users.",
                    conn.hub.zones.describe(conn.zone),
                    zone_count,
                    total
                )
            } else {
                format!("User limit exceeded at {total} online users.")
            };

            info!(nick, total, zone = conn.zone, "hub is full");
            conn.hub_chat(&text);
            let frame = frames::hub_is_full();
            conn.send(&frame, false);
            conn.close_nice(1000, CloseReason::UserLimit);
            return Err(HandlerError::Close(CloseReason::UserLimit));
        }

        conn.counted = true;
        conn.set_stage(stage::ALLOWED);
        conn.hub
            .conn_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        conn.hub.zones.enter(conn.zone);

        // Session cap per source address.
        let per_ip = config.limits.max_users_from_ip;

        if per_ip > 0 && class < UserClass::Vip.value() {
            let ip = conn.ip.to_string();
            let same_ip = conn
                .hub
                .users
                .snapshot()
                .iter()
                .filter(|e| e.user.read().ip == ip)
                .count() as u32;

            if same_ip >= per_ip {
                conn.hub_chat(&format!(
                    "User limit from IP address {ip} exceeded at {per_ip} online users."
                ));
                let frame = frames::hub_is_full();
                conn.send(&frame, false);
                conn.close_nice(1000, CloseReason::UserLimit);
                return Err(HandlerError::Close(CloseReason::UserLimit));
            }
        }

        Ok(())
    }
}

fn refuse_nick(conn: &mut ConnState, nick: &str, rejection: NickRejection) -> HandlerError {
    let config = conn.config();
    let reason = rejection.close_reason();

    conn.hub_chat(&rejection.explain(&config.nick));

    if rejection == NickRejection::InUse {
        let frame = frames::validate_denide(nick);
        conn.send(&frame, false);
    } else if conn.has_feature(features::NICKRULE) {
        if let Some((id, par)) = rejection.bad_nick_reply(&config.nick) {
            let frame = frames::bad_nick(&id, &par);
            conn.send(&frame, false);
        }
    }

    debug!(nick, reason = %reason, "nick refused");
    conn.close_nice(2000, reason);
    HandlerError::Close(reason)
}

pub struct MyPassHandler;

#[async_trait]
impl Handler for MyPassHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let Some(entry) = conn.entry.clone() else {
            return Err(dup_step_close(conn, "password before validating a nick"));
        };

        let set_pass = entry.user.read().set_pass;

        if conn.has_stage(stage::PASSWD) && !set_pass {
            return Err(dup_step_close(conn, "password"));
        }

        let presented = msg.payload();
        let config = conn.config();

        if set_pass {
            // Password-change round requested after login. The backing
            // store is file based, so the new credential only lives for
            // this process; operators keep the files in sync.
            entry.user.write().set_pass = false;
            conn.clear_timeout(TimeoutKind::SetPass);

            if presented.len() < 6 {
                conn.hub_chat("Minimum password length is 6 characters. Please retry.");
                return Ok(());
            }

            info!("password change accepted for this session");
            conn.hub_chat("Password updated successfully.");
            return Ok(());
        }

        let Some(reg) = conn.reg.clone() else {
            debug!("password without registration");
            return Err(HandlerError::Discard);
        };

        if reg.check_password(presented) {
            conn.set_stage(stage::PASSWD);
            conn.clear_timeout(TimeoutKind::Password);

            let nick = {
                let mut user = entry.user.write();
                user.class = UserClass::from_value(reg.class);
                user.nick.clone()
            };

            let frame = frames::hello(&nick);
            conn.send(&frame, false);

            if conn.has_feature(features::HUBURL) {
                let frame = frames::get_hub_url();
                conn.send(&frame, false);
            }

            if UserClass::from_value(reg.class).is_op() {
                let frame = frames::loged_in(&nick);
                conn.send(&frame, false);
            }

            // MyINFO may already be in; the login completes now.
            if conn.stages & stage::LOGIN_DONE == stage::LOGIN_DONE
                && !entry.user.read().in_list
            {
                login::complete(conn).await?;
            }

            Ok(())
        } else {
            let nick = entry.user.read().nick.clone();
            info!(nick = %nick, "wrong password");
            conn.hub.report_to_opchat(&format!("Incorrect password from {nick}"));

            if conn.hub.hooks.on_bad_pass(&nick) {
                conn.hub.temp_bans.add_ip(
                    conn.ip,
                    conn.hub.now() + config.bans.pwd_tmpban as i64,
                    "Incorrect password",
                    BanKind::BadPassword,
                );
            }

            conn.hub_chat("You've been temporarily banned due to incorrect password.");
            let frame = frames::bad_pass();
            conn.send(&frame, false);
            conn.close_nice(1000, CloseReason::Password);
            Err(HandlerError::Close(CloseReason::Password))
        }
    }
}

pub struct VersionHandler;

#[async_trait]
impl Handler for VersionHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        if conn.has_stage(stage::VERSION) {
            return Err(dup_step_close(conn, "version"));
        }

        debug!(version = msg.payload(), "client version");
        conn.set_stage(stage::VERSION);
        Ok(())
    }
}

pub struct MyHubUrlHandler;

#[async_trait]
impl Handler for MyHubUrlHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        if conn.has_stage(stage::MYHUBURL) {
            return Err(dup_step_close(conn, "hub URL"));
        }

        if let Some(entry) = &conn.entry {
            entry.user.write().hub_url = msg.payload().to_string();
        }

        conn.set_stage(stage::MYHUBURL);
        Ok(())
    }
}

pub struct BotInfoHandler;

#[async_trait]
impl Handler for BotInfoHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let Some(entry) = conn.entry.clone() else {
            return Err(dup_step_close(conn, "pinger information before validating a nick"));
        };

        let is_pinger = entry.user.read().class == UserClass::Pinger;

        if !conn.has_feature(features::BOTINFO) && !is_pinger {
            conn.close_with_msg(
                "Invalid login sequence, you didn't identify yourself as pinger.",
                1000,
                CloseReason::LoginError,
            );
            return Err(HandlerError::Close(CloseReason::LoginError));
        }

        if conn.has_stage(stage::BOTINFO) {
            return Err(dup_step_close(conn, "pinger information"));
        }

        let config = conn.config();
        info!(info = msg.payload(), "pinger entered the hub");
        conn.hub
            .report_to_opchat(&format!("Pinger entered the hub: {}", msg.payload()));

        let min_share = config
            .limits
            .share_guest
            .min
            .max(config.limits.min_share_use_hub);

        let zone_cap = conn.hub.zones.cap(0).min(config.limits.max_users_total);

        let pars = format!(
            "{}${}${}${}${}${}${}${} {}${}${}${}",
            config.server.hub_name,
            config.server.hub_host,
            config.server.hub_desc,
            zone_cap,
            min_share.saturating_mul(1024 * 1024),
            0, // minimum slots of the default connection profile
            config.tag.max_hubs,
            config.server.hub_version_name,
            config.server.hub_version,
            config.server.hub_owner,
            config.server.hub_category,
            config.server.hub_encoding,
        );

        if !config.server.hub_icon_url.is_empty() {
            let frame = frames::set_icon(&config.server.hub_icon_url);
            conn.send(&frame, false);
        }

        if !config.server.hub_logo_url.is_empty() {
            let frame = frames::set_logo(&config.server.hub_logo_url);
            conn.send(&frame, false);
        }

        let frame = frames::hub_info(&pars);
        conn.send(&frame, false);
        conn.set_stage(stage::BOTINFO);
        Ok(())
    }
}

pub struct QuitHandler;

#[async_trait]
impl Handler for QuitHandler {
    async fn handle(&self, conn: &mut ConnState, _msg: &Message) -> HandlerResult {
        conn.hub_chat("See you.");
        conn.close_nice(1000, CloseReason::Quit);
        Ok(())
    }
}

/// `$MyNick` / `$Lock` mean a peer dialed the hub port with a
/// client-to-client handshake; there is nothing to talk about.
pub struct ClientHandshakeHandler;

#[async_trait]
impl Handler for ClientHandshakeHandler {
    async fn handle(&self, conn: &mut ConnState, _msg: &Message) -> HandlerResult {
        conn.close_with_msg(
            "This is a hub, connect to it with a hub address, not a client-to-client transfer.",
            1000,
            CloseReason::SyntaxError,
        );
        Err(HandlerError::Close(CloseReason::SyntaxError))
    }
}

/// `$MyIP` claims are recorded nowhere; the hub trusts the socket.
pub struct MyIpHandler;

#[async_trait]
impl Handler for MyIpHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        debug!(claimed = msg.payload(), real = %conn.ip, "client IP claim ignored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nick_rule_char_list_covers_metacharacters() {
        let chars = format!("{}{}", BAD_NICK_CHARS, "");
        let list = byte_list(&chars);
        assert!(list.split(' ').any(|b| b == "36")); // $
        assert!(list.split(' ').any(|b| b == "124")); // |
        assert!(list.split(' ').any(|b| b == "32")); // space
    }

    #[test]
    fn hash_matches_for_entry() {
        use crate::state::nick_hash;
        assert_eq!(nick_hash("Pinger"), nick_hash("pinger"));
    }
}
