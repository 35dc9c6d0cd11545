//! MyINFO processing and its satellites (ExtJSON, IN, GetINFO).
//!
//! MyINFO is the long pole of the login pipeline: tag policy, share
//! bounds, clone detection, the fake-MyINFO rewrite and the broadcast all
//! hang off it.

use async_trait::async_trait;
use tracing::{debug, info};

use nmdc_proto::message::{ExtJsonArgs, GetInfoArgs, MyInfoArgs};
use nmdc_proto::tag::{ClientMode, ClientTag};
use nmdc_proto::{frames, Message};

use crate::config::Config;
use crate::error::{CloseReason, HandlerError, HandlerResult};
use crate::handlers::helpers::{check_own_nick, min_delay, syntax_close, use_hub_share_floor};
use crate::handlers::login;
use crate::handlers::registry::{proto_flood, Handler};
use crate::metrics;
use crate::network::connection::{stage, ConnState, TimeoutKind};
use crate::security::clone::{find_clone, normalize_my_info};
use crate::security::flood::FloodKind;
use crate::security::BanKind;
use crate::state::features;
use crate::state::user::UserClass;
use crate::state::SysLoad;

pub struct MyInfoHandler;

#[async_trait]
impl Handler for MyInfoHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let Some(entry) = conn.entry.clone() else {
            conn.close_with_msg(
                "Invalid login sequence, your client sent info before validating a nick.",
                1000,
                CloseReason::LoginError,
            );
            return Err(HandlerError::Close(CloseReason::LoginError));
        };

        let args = MyInfoArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "MyINFO"))?;
        check_own_nick(conn, &args.nick)?;
        proto_flood(conn, FloodKind::MyInfo)?;

        let config = conn.config();
        let (class, was_passive, in_list, old_visible_share, hide_share) = {
            let user = entry.user.read();
            (
                user.class,
                user.passive,
                user.in_list,
                user.visible_share(),
                user.hide_share,
            )
        };

        let tag = ClientTag::parse(&args.desc);

        // Tag policy; high classes and pingers are exempt.
        if class.value() < config.tag.min_class_ignore && class != UserClass::Pinger {
            if tag.mode == ClientMode::NoTag && !config.tag.allow_none {
                conn.close_with_msg(
                    "Your client didn't specify a tag.",
                    1000,
                    CloseReason::TagNone,
                );
                return Err(HandlerError::Close(CloseReason::TagNone));
            }

            if tag.mode != ClientMode::NoTag {
                if let Err((text, reason)) = validate_tag(&tag, &config) {
                    debug!(reason = %reason, "invalid tag");
                    conn.close_with_msg(&text, 1000, reason);
                    return Err(HandlerError::Close(reason));
                }
            }
        }

        let passive = tag.mode != ClientMode::Active;
        let share = args.share_bytes();

        self.check_share_bounds(conn, class, passive, share)?;

        // Below the use-hub floors search and download switch off.
        let floor = use_hub_share_floor(&config, class.value());
        let floor = if passive {
            (floor as f64 * config.limits.min_share_factor_passive) as u64
        } else {
            floor
        };

        let use_hub_class = if passive {
            config.limits.min_class_use_hub_passive
        } else {
            config.limits.min_class_use_hub
        };

        {
            let mut user = entry.user.write();

            if class <= UserClass::Vip && floor > 0 && share < floor {
                user.rights.no_search_until = i64::MAX;
                user.rights.no_ctm_until = i64::MAX;
            }

            if class.value() < use_hub_class {
                user.rights.no_search_until = i64::MAX;
                user.rights.no_ctm_until = i64::MAX;
            }

            user.share = share;
            user.my_flag = args.status_byte();
            user.passive = passive;
        }

        if in_list && !hide_share {
            conn.hub.share_delta(old_visible_share, share);
            metrics::TOTAL_SHARE.set(conn.hub.total_share() as i64);
        }

        // Passive population cap.
        let passive_cap = config.limits.max_users_passive;

        if passive
            && class != UserClass::Pinger
            && class < UserClass::Op
            && passive_cap >= 0
            && conn.hub.passive.len() as i64 >= passive_cap
        {
            conn.hub_chat(&format!(
                "Passive user limit exceeded at {} users. Try again later or set up an active connection.",
                conn.hub.passive.len()
            ));
            let frame = frames::hub_is_full();
            conn.send(&frame, false);
            conn.close_nice(1000, CloseReason::UserLimit);
            return Err(HandlerError::Close(CloseReason::UserLimit));
        }

        if in_list && was_passive != passive {
            conn.hub.set_user_mode(&entry, passive);
        }

        let fake = build_fake_my_info(&args, &tag, hide_share, &config);

        if in_list {
            // Re-broadcast only when paced out and actually changed.
            let now = conn.hub.now();
            let changed = {
                let mut user = entry.user.write();
                let changed = user.my_info != msg.raw && min_delay(&mut user.t.info, now, config.myinfo.interval);

                if changed {
                    user.my_info = msg.raw.clone();
                    user.fake_my_info = fake.clone();
                }

                changed
            };

            if changed {
                conn.hub.users.invalidate();
                let is_tls = entry.user.read().has_flag(crate::state::user::my_flag::TLS);
                conn.hub
                    .broadcast_my_info(&fake, is_tls, config.myinfo.delayed);
            }
        } else {
            // First MyINFO of the session.
            if share > 0 && class <= UserClass::Reg {
                let query = crate::db::BanQuery {
                    nick: &args.nick,
                    ip: Some(conn.ip),
                    share: Some(share),
                    check_prefix: conn.reg.is_none(),
                };

                if let Some(hit) = conn.hub.ban_store.check(&query, conn.hub.now()) {
                    conn.close_with_msg(
                        &format!("You are banned from this hub: {}", hit.reason),
                        1000,
                        CloseReason::Kicked,
                    );
                    return Err(HandlerError::Close(CloseReason::Kicked));
                }
            }

            if !conn.hub.hooks.on_first_my_info(&args.nick) {
                conn.close_now(CloseReason::HookVeto);
                return Err(HandlerError::Close(CloseReason::HookVeto));
            }

            self.check_clones(conn, &entry, msg, &args, class)?;

            {
                let mut user = entry.user.write();
                user.my_info = msg.raw.clone();
                user.fake_my_info = fake;
            }

            conn.set_stage(stage::MYINFO);

            if conn.has_feature(features::SEARCHRULE) {
                let frame = frames::search_rule(&search_rule_pars(class, &config));
                conn.send(&frame, false);
            }

            if conn.stages & stage::LOGIN_DONE == stage::LOGIN_DONE {
                login::complete(conn).await?;
            }
        }

        conn.clear_timeout(TimeoutKind::MyInfo);
        Ok(())
    }
}

impl MyInfoHandler {
    fn check_share_bounds(
        &self,
        conn: &mut ConnState,
        class: UserClass,
        passive: bool,
        share: u64,
    ) -> HandlerResult {
        if class > UserClass::Op {
            return Ok(());
        }

        let config = conn.config();

        let limits = match class {
            UserClass::Pinger => return Ok(()),
            UserClass::Guest => config.limits.share_guest,
            UserClass::Reg => config.limits.share_reg,
            UserClass::Vip => config.limits.share_vip,
            _ => config.limits.share_op,
        };

        let min_active = limits.min.saturating_mul(1024 * 1024);
        let min_passive =
            (min_active as f64 * config.limits.min_share_factor_passive) as u64;
        let min = if passive { min_passive } else { min_active };
        let max = limits.max.saturating_mul(1024 * 1024);

        if share < min {
            conn.close_with_msg(
                &format!(
                    "You share {} B but minimum allowed is {} B ({} B for active users, {} B for passive users).",
                    share, min, min_active, min_passive
                ),
                4000,
                CloseReason::ShareLimit,
            );
            return Err(HandlerError::Close(CloseReason::ShareLimit));
        }

        if max > 0 && share > max {
            conn.close_with_msg(
                &format!("You share {} B but maximum allowed is {} B.", share, max),
                4000,
                CloseReason::ShareLimit,
            );
            return Err(HandlerError::Close(CloseReason::ShareLimit));
        }

        Ok(())
    }

    fn check_clones(
        &self,
        conn: &mut ConnState,
        entry: &std::sync::Arc<crate::state::UserEntry>,
        msg: &Message,
        args: &MyInfoArgs,
        class: UserClass,
    ) -> HandlerResult {
        let config = conn.config();
        let clone_cfg = &config.bans.clone;

        if clone_cfg.detect_count == 0 || class.value() > clone_cfg.max_class {
            return Ok(());
        }

        let Some(part) = normalize_my_info(&msg.raw, &args.nick) else {
            return Ok(());
        };

        let ip = entry.user.read().ip.clone();

        let Some(hit) = find_clone(
            &conn.hub.users,
            entry,
            &part,
            &ip,
            clone_cfg.max_class,
            clone_cfg.detect_count,
        ) else {
            return Ok(());
        };

        metrics::CLONES_DETECTED.inc();
        info!(
            nick = %args.nick,
            existing = %hit.existing_nick,
            "clone detected"
        );

        if clone_cfg.report {
            conn.hub.report_to_opchat(&format!(
                "Detected clone of user with share {}: {}",
                hit.existing_share, hit.existing_nick
            ));
        }

        let now = conn.hub.now();

        if clone_cfg.tban_time > 0 {
            conn.hub.temp_bans.add_nick(
                &args.nick,
                now + clone_cfg.tban_time as i64,
                "Clone detected",
                BanKind::Clone,
            );

            if clone_cfg.ip_tban_time > 0 {
                conn.hub.temp_bans.add_ip(
                    conn.ip,
                    now + clone_cfg.ip_tban_time as i64,
                    "Clone detected",
                    BanKind::Clone,
                );
            }
        }

        conn.close_with_msg(
            &format!(
                "You are already in the hub using another nick: {}",
                hit.existing_nick
            ),
            1000,
            CloseReason::Clone,
        );
        Err(HandlerError::Close(CloseReason::Clone))
    }
}

/// Tag rule checks beyond the bare parse.
fn validate_tag(tag: &ClientTag, config: &Config) -> Result<(), (String, CloseReason)> {
    let rules = &config.tag;

    if rules
        .banned_clients
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&tag.client))
    {
        return Err((
            format!("Your client is not allowed on this hub: {}", tag.client),
            CloseReason::TagBan,
        ));
    }

    if tag.mode == ClientMode::Sock5 && !rules.allow_sock5 {
        return Err((
            "Connections through proxy server are not allowed in this hub.".to_string(),
            CloseReason::TagInvalid,
        ));
    }

    if tag.mode == ClientMode::Passive && !rules.allow_passive {
        return Err((
            "Passive connections are restricted, consider changing to active.".to_string(),
            CloseReason::TagInvalid,
        ));
    }

    if tag.hubs_total < 0 || tag.slots < 0 {
        return Err((
            "Your client tag is reporting less than 0 hubs or less than 0 slots, looks like a bug in your client."
                .to_string(),
            CloseReason::TagInvalid,
        ));
    }

    if !rules.allow_unknown && tag.version.is_none() {
        return Err((
            "Unknown clients are not allowed in this hub.".to_string(),
            CloseReason::TagInvalid,
        ));
    }

    if rules.max_hubs > 0 && tag.hubs_total > rules.max_hubs {
        return Err((
            format!(
                "Too many open hubs, maximum is {} and you have {}.",
                rules.max_hubs, tag.hubs_total
            ),
            CloseReason::TagInvalid,
        ));
    }

    if rules.min_hubs > 0 && tag.hubs_total < rules.min_hubs {
        return Err((
            format!(
                "Too few open hubs, minimum is {} and you have {}.",
                rules.min_hubs, tag.hubs_total
            ),
            CloseReason::TagInvalid,
        ));
    }

    for (have, need, what) in [
        (tag.hubs_guest, rules.min_hubs_guest, "user"),
        (tag.hubs_reg, rules.min_hubs_reg, "registered user"),
        (tag.hubs_op, rules.min_hubs_op, "operator"),
    ] {
        if let Some(have) = have {
            if need > 0 && have < need {
                return Err((
                    format!("Too few open hubs as {what}, minimum is {need} and you have {have}."),
                    CloseReason::TagInvalid,
                ));
            }
        }
    }

    if rules.min_slots > 0 && tag.slots < rules.min_slots {
        return Err((
            format!(
                "Too few open slots, minimum is {} and you have {}.",
                rules.min_slots, tag.slots
            ),
            CloseReason::TagInvalid,
        ));
    }

    if rules.max_slots > 0 && tag.slots > rules.max_slots {
        return Err((
            format!(
                "Too many open slots, maximum is {} and you have {}.",
                rules.max_slots, tag.slots
            ),
            CloseReason::TagInvalid,
        ));
    }

    if tag.slots > 0 {
        let ratio = tag.hubs_total as f64 / tag.slots as f64;

        if rules.min_hub_slot_ratio > 0.0 && ratio < rules.min_hub_slot_ratio {
            return Err((
                "Your hub to slot ratio is too low.".to_string(),
                CloseReason::TagInvalid,
            ));
        }

        if rules.max_hub_slot_ratio > 0.0 && ratio > rules.max_hub_slot_ratio {
            return Err((
                "Your hub to slot ratio is too high.".to_string(),
                CloseReason::TagInvalid,
            ));
        }
    }

    Ok(())
}

/// The broadcast-safe MyINFO the rest of the hub sees.
fn build_fake_my_info(
    args: &MyInfoArgs,
    tag: &ClientTag,
    hide_share: bool,
    config: &Config,
) -> String {
    let tag_pos = ClientTag::position(&args.desc);
    let desc_end = tag_pos.unwrap_or(args.desc.len());

    let mut desc: String = if config.myinfo.desc_len >= 0 {
        args.desc[..desc_end]
            .chars()
            .take(config.myinfo.desc_len as usize)
            .collect()
    } else {
        args.desc[..desc_end].to_string()
    };

    if config.myinfo.desc_insert_mode {
        desc = format!("{}{}", tag.mode.marker(), desc);
    }

    if config.myinfo.show_tags {
        if let Some(pos) = tag_pos {
            desc.push_str(&args.desc[pos..]);
        }
    }

    let speed = if !config.myinfo.show_speed && args.speed.len() > 1 {
        // Keep only the status byte at the end of the speed chunk.
        args.speed
            .chars()
            .last()
            .map(String::from)
            .unwrap_or_default()
    } else {
        args.speed.clone()
    };

    let email = if config.myinfo.show_email {
        args.email.as_str()
    } else {
        ""
    };

    let share = if hide_share {
        "0".to_string()
    } else {
        args.share_bytes().to_string()
    };

    frames::my_info(&args.nick, &desc, &speed, email, &share)
}

/// The `$SearchRule` parameter block sent to clients that understand it.
fn search_rule_pars(class: UserClass, config: &Config) -> String {
    let interval: i64 = if class.value() >= config.limits.min_class_use_hub {
        match class {
            UserClass::Reg => config.search.int_reg as i64,
            UserClass::Vip => config.search.int_vip as i64,
            UserClass::Op | UserClass::Cheef | UserClass::Admin => config.search.int_op as i64,
            UserClass::Master => 0,
            _ => config.search.int_guest as i64,
        }
    } else {
        -1
    };

    let interval_passive: i64 = if class.value() >= config.limits.min_class_use_hub_passive {
        match class {
            UserClass::Reg => config.search.int_reg_passive as i64,
            UserClass::Vip => config.search.int_vip as i64,
            UserClass::Op | UserClass::Cheef | UserClass::Admin => config.search.int_op as i64,
            UserClass::Master => 0,
            _ => config.search.int_guest_passive as i64,
        }
    } else {
        -1
    };

    let mut pars = format!(
        "Min {}$$Max {}$$Num {}$$Int {}$$IntPas {}",
        config.search.min_chars,
        config.server.max_len_search,
        config.search.number,
        interval,
        interval_passive,
    );

    let floor = use_hub_share_floor(config, class.value());

    if floor > 0 {
        pars.push_str(&format!("$$Share {floor}"));
    }

    pars.push_str("$$");
    pars
}

pub struct ExtJsonHandler;

#[async_trait]
impl Handler for ExtJsonHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        proto_flood(conn, FloodKind::ExtJson)?;

        // Structured metadata is a luxury; shed it under load.
        if conn.hub.load.level() >= SysLoad::Capacity {
            return Err(HandlerError::Discard);
        }

        let args = ExtJsonArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "ExtJSON"))?;
        check_own_nick(conn, &args.nick)?;

        let entry = conn.entry.clone().ok_or(HandlerError::Discard)?;

        {
            let mut user = entry.user.write();

            if user.ext_json == msg.raw {
                return Err(HandlerError::Discard);
            }

            user.ext_json = msg.raw.clone();
        }

        conn.hub
            .users
            .send_to_all_with_feature(&msg.raw, features::EXTJSON2, true);
        Ok(())
    }
}

/// `$IN` is parsed for flood accounting but otherwise inert, like the
/// other leftovers of that extension family.
pub struct InHandler;

#[async_trait]
impl Handler for InHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        proto_flood(conn, FloodKind::In)?;
        let end = msg
            .raw
            .char_indices()
            .nth(48)
            .map(|(i, _)| i)
            .unwrap_or(msg.raw.len());
        debug!(frame = %&msg.raw[..end], "IN frame ignored");
        Ok(())
    }
}

pub struct GetInfoHandler;

#[async_trait]
impl Handler for GetInfoHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        proto_flood(conn, FloodKind::GetInfo)?;

        let args = GetInfoArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "GetINFO"))?;
        check_own_nick(conn, &args.me)?;

        // Clients announcing NoGetINFO should not ask; humor the ones
        // that do anyway by ignoring them.
        if conn.has_feature(features::NOGETINFO) {
            return Err(HandlerError::Discard);
        }

        if let Some(target) = conn.hub.users.get_by_nick(&args.target) {
            let fake = target.user.read().fake_my_info.clone();

            if !fake.is_empty() {
                conn.send(&fake, true);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(desc: &str, share: &str) -> MyInfoArgs {
        MyInfoArgs {
            nick: "alice".into(),
            desc: desc.into(),
            speed: "100\u{1}".into(),
            email: "a@b".into(),
            share: share.into(),
        }
    }

    #[test]
    fn fake_my_info_hides_share_and_email() {
        let mut config = Config::default();
        config.myinfo.show_email = false;

        let a = args("hello <++ V:1,M:A,H:1/0/0,S:2>", "1234");
        let tag = ClientTag::parse(&a.desc);
        let fake = build_fake_my_info(&a, &tag, true, &config);
        assert_eq!(
            fake,
            "$MyINFO $ALL alice hello <++ V:1,M:A,H:1/0/0,S:2>$ $100\u{1}$$0$"
        );
    }

    #[test]
    fn fake_my_info_trims_description() {
        let mut config = Config::default();
        config.myinfo.desc_len = 5;

        let a = args("a very long description <++ V:1,M:A,H:1/0/0,S:2>", "7");
        let tag = ClientTag::parse(&a.desc);
        let fake = build_fake_my_info(&a, &tag, false, &config);
        assert!(fake.starts_with("$MyINFO $ALL alice a ver<++"));
    }

    #[test]
    fn fake_my_info_can_drop_tags_and_speed() {
        let mut config = Config::default();
        config.myinfo.show_tags = false;
        config.myinfo.show_speed = false;

        let a = args("desc <++ V:1,M:P,H:1/0/0,S:2>", "7");
        let tag = ClientTag::parse(&a.desc);
        let fake = build_fake_my_info(&a, &tag, false, &config);
        assert_eq!(fake, "$MyINFO $ALL alice desc $ $\u{1}$a@b$7$");
    }

    #[test]
    fn mode_marker_insertion() {
        let mut config = Config::default();
        config.myinfo.desc_insert_mode = true;

        let a = args("desc <++ V:1,M:P,H:1/0/0,S:2>", "7");
        let tag = ClientTag::parse(&a.desc);
        let fake = build_fake_my_info(&a, &tag, false, &config);
        assert!(fake.contains("[P]desc"));
    }

    #[test]
    fn tag_rules() {
        let mut config = Config::default();
        config.tag.max_hubs = 10;
        config.tag.min_slots = 1;
        config.tag.banned_clients = vec!["EvilDC".to_string()];

        let ok = ClientTag::parse("<++ V:1,M:A,H:1/0/0,S:2>");
        assert!(validate_tag(&ok, &config).is_ok());

        let many = ClientTag::parse("<++ V:1,M:A,H:20/0/0,S:2>");
        let err = validate_tag(&many, &config).unwrap_err();
        assert_eq!(err.1, CloseReason::TagInvalid);

        let banned = ClientTag::parse("<EvilDC V:1,M:A,H:1/0/0,S:2>");
        let err = validate_tag(&banned, &config).unwrap_err();
        assert_eq!(err.1, CloseReason::TagBan);

        let slotless = ClientTag::parse("<++ V:1,M:A,H:1/0/0,S:0>");
        let err = validate_tag(&slotless, &config).unwrap_err();
        assert_eq!(err.1, CloseReason::TagInvalid);
    }
}
