//! Search processing and fan-out.
//!
//! The pipeline ordering matters: load gate, pacing, anti-flood, rights,
//! TTH normalization, hub-wide flood, hook veto, then delivery. Recipients
//! that understand the short TTHS frames get those; the saved bytes are
//! tallied.

use async_trait::async_trait;

use nmdc_proto::message::{SaArgs, SearchArgs, SearchOrigin, SpArgs};
use nmdc_proto::{frames, Message};

use crate::error::{HandlerError, HandlerResult};
use crate::handlers::chat::hub_flood_gate;
use crate::handlers::helpers::{check_own_nick, message_hash, syntax_close, use_hub_share_floor};
use crate::handlers::registry::{proto_flood, Handler};
use crate::metrics;
use crate::network::connection::ConnState;
use crate::security::flood::{AllFloodKind, FloodKind};
use crate::state::user::{my_flag, UserClass};
use crate::state::{features, OutMsg, SysLoad};

/// The common front half: load, pacing, same-message, rights.
///
/// Returns the sender's class; errors already carry any user notice.
fn search_gates(conn: &mut ConnState, raw: &str, passive: bool) -> Result<UserClass, HandlerError> {
    proto_flood(conn, FloodKind::Search)?;

    let config = conn.config();
    let entry = conn.entry.clone().ok_or(HandlerError::Discard)?;
    let class = entry.user.read().class;

    if class < UserClass::Op && conn.hub.load.level() >= SysLoad::Capacity {
        conn.hub_chat(
            "Sorry, hub load is too high to process your search request. Please try again later.",
        );
        return Err(HandlerError::Discard);
    }

    // Pacing by class and mode.
    let delay = match class {
        UserClass::Reg => {
            if passive {
                config.search.int_reg_passive
            } else {
                config.search.int_reg
            }
        }
        UserClass::Vip => config.search.int_vip,
        UserClass::Op | UserClass::Cheef | UserClass::Admin => config.search.int_op,
        UserClass::Master => 0,
        _ => {
            if passive {
                config.search.int_guest_passive
            } else {
                config.search.int_guest
            }
        }
    };

    let now = conn.hub.now();

    {
        let mut user = entry.user.write();

        if delay > 0 && now - user.t.search < delay as i64 {
            if config.search.number > 0 && user.search_number >= config.search.number {
                let number = config.search.number;
                drop(user);
                conn.hub_chat(&format!(
                    "Don't search too often. You can perform {number} searches in {delay}s."
                ));
                return Err(HandlerError::Discard);
            }
        } else {
            user.t.search = now;
            user.search_number = 0;
        }
    }

    // Repeating the same search is silently dropped; clients do it on
    // their own schedule.
    if class < UserClass::Op {
        let hash = message_hash(raw);
        let mut user = entry.user.write();

        if user.flood_hashes.search == hash {
            return Err(HandlerError::Discard);
        }

        user.flood_hashes.search = hash;
    }

    let use_hub_class = if passive {
        config.limits.min_class_use_hub_passive
    } else {
        config.limits.min_class_use_hub
    };

    if class.value() < use_hub_class {
        conn.hub_chat(&format!(
            "You can't search unless you are registered with class {use_hub_class}."
        ));
        return Err(HandlerError::Discard);
    }

    let (share, can_search) = {
        let user = entry.user.read();
        (user.share, user.rights.can_search(now))
    };

    let floor = use_hub_share_floor(&config, class.value());

    if share < floor {
        conn.hub_chat(&format!("You can't search unless you share {floor} B."));
        return Err(HandlerError::Discard);
    }

    if !can_search {
        conn.hub_chat("You're not allowed to search for anything.");
        return Err(HandlerError::Discard);
    }

    Ok(class)
}

/// Deliver one search to every eligible recipient.
fn fan_out(conn: &mut ConnState, long: &str, short: Option<&str>, passive: bool, tth: bool) {
    let config = conn.config();
    let delayed = config.search.delayed;
    let sender_hash = conn.entry.as_ref().map(|e| e.hash).unwrap_or(0);
    let (sender_nat, sender_lan) = conn
        .entry
        .as_ref()
        .map(|e| {
            let user = e.user.read();
            (user.has_flag(my_flag::NAT), user.lan)
        })
        .unwrap_or((false, false));

    let saved = short.map(|s| long.len().saturating_sub(s.len())).unwrap_or(0);
    let mut count = 0usize;

    for other in conn.hub.users.snapshot() {
        if other.is_bot() || other.hash == sender_hash {
            continue;
        }

        if tth && !other.has_feature(features::TTHSEARCH) {
            continue;
        }

        if other.has_feature(features::CHATONLY) {
            continue;
        }

        {
            let user = other.user.read();

            if !user.in_list
                || user.share == 0
                || user.hide_share
                || user.class < UserClass::Guest
            {
                continue;
            }

            // A passive request reaches passive users only when both ends
            // can traverse NAT.
            if passive && user.passive && !(sender_nat && user.has_flag(my_flag::NAT)) {
                continue;
            }

            if config.search.filter_lan && !passive && sender_lan != user.lan {
                continue;
            }
        }

        let frame = match short {
            Some(short) if tth && other.has_feature(features::TTHS) => {
                metrics::TTHS_SAVED.inc_by(saved as u64);
                short
            }
            _ => long,
        };

        let msg = if delayed {
            OutMsg::delayed(bytes::Bytes::copy_from_slice(frame.as_bytes()))
        } else {
            OutMsg::immediate(bytes::Bytes::copy_from_slice(frame.as_bytes()))
        };

        if other.send(msg) {
            count += 1;
        }
    }

    tracing::debug!(recipients = count, tth, passive, "search fanned out");
}

pub struct SearchHandler;

#[async_trait]
impl Handler for SearchHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let mut args = SearchArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "Search"))?;
        let config = conn.config();

        let passive = matches!(args.origin, SearchOrigin::Passive { .. });

        if passive {
            let nick = match &args.origin {
                SearchOrigin::Passive { nick } => nick.clone(),
                SearchOrigin::Active { .. } => unreachable!(),
            };
            check_own_nick(conn, &nick)?;
        } else if let SearchOrigin::Active { ip, .. } = &mut args.origin {
            // Searches go out with the socket's address, whatever the
            // client claims.
            let real_ip = conn.ip.to_string();

            if *ip != real_ip {
                let claimed = std::mem::replace(ip, real_ip.clone());
                tracing::debug!(%claimed, real = %real_ip, "fixed wrong IP in Search");

                if config.server.wrongip_notice {
                    conn.hub_chat(&format!(
                        "Replacing wrong IP address specified in your search request with real one: {} -> {}",
                        claimed, real_ip
                    ));
                }
            }
        }

        let class = search_gates(conn, &msg.raw, passive)?;

        // TTH requests with a malformed root fall back to byte search.
        let mut tth = args.wants_tth();

        if tth && args.tth().is_none() {
            args.rewrite_to_byte_search();
            tth = false;
        }

        if !tth && class < UserClass::Op && args.pattern.len() < config.search.min_chars {
            conn.hub_chat(&format!(
                "Minimum search length is {} characters.",
                config.search.min_chars
            ));
            return Err(HandlerError::Discard);
        }

        if passive {
            hub_flood_gate(conn, AllFloodKind::Search)?;
        }

        let nick = conn.nick().unwrap_or_default();

        if !conn.hub.hooks.on_search(&nick, &args.pattern) {
            return Err(HandlerError::Discard);
        }

        if let Some(entry) = &conn.entry {
            let mut user = entry.user.write();
            user.search_number += 1;

            if passive {
                user.sr_counter = 0;
            }
        }

        let long = args.to_frame();

        // The compact forms exist only for plain TTH roots.
        let short = if config.search.use_filter && tth && args.limits[3..8] == *"?0?9?" {
            args.tth().map(|root| match &args.origin {
                SearchOrigin::Active { ip, port } => frames::sa(root, &format!("{ip}:{port}")),
                SearchOrigin::Passive { nick } => frames::sp(root, nick),
            })
        } else {
            None
        };

        if config.search.use_filter {
            fan_out(conn, &long, short.as_deref(), passive, tth);
        } else if passive {
            conn.hub.active.send_to_all(&long, config.search.delayed);
        } else {
            conn.hub.users.send_to_all(&long, config.search.delayed);
        }

        Ok(())
    }
}

pub struct SaHandler;

#[async_trait]
impl Handler for SaHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let args = SaArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "SA"))?;
        let _class = search_gates(conn, &msg.raw, false)?;

        // Fix the address like the long form does.
        let real_ip = conn.ip.to_string();
        let addr = format!("{}:{}", real_ip, args.port);
        let short = frames::sa(&args.tth, &addr);
        let long = frames::search_tth(&addr, &args.tth, false);

        if let Some(entry) = &conn.entry {
            entry.user.write().search_number += 1;
        }

        fan_out(conn, &long, Some(&short), false, true);
        Ok(())
    }
}

pub struct SpHandler;

#[async_trait]
impl Handler for SpHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let args = SpArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "SP"))?;
        check_own_nick(conn, &args.nick)?;
        let _class = search_gates(conn, &msg.raw, true)?;

        hub_flood_gate(conn, AllFloodKind::Search)?;

        let short = frames::sp(&args.tth, &args.nick);
        let long = frames::search_tth(&args.nick, &args.tth, true);

        if let Some(entry) = &conn.entry {
            let mut user = entry.user.write();
            user.search_number += 1;
            user.sr_counter = 0;
        }

        fan_out(conn, &long, Some(&short), true, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_limit_window() {
        // The compact frame is only offered for the canonical TTH limits.
        let args = SearchArgs::parse(
            "$Search 1.2.3.4:412 F?T?0?9?TTH:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
        )
        .unwrap();
        assert_eq!(&args.limits[3..8], "?0?9?");
        assert!(args.wants_tth());
    }

    #[test]
    fn downgraded_long_form() {
        let tth = "A".repeat(39);
        let long = frames::search_tth("1.2.3.4:412", &tth, false);
        assert_eq!(long, format!("$Search 1.2.3.4:412 F?T?0?9?TTH:{tth}"));
    }
}
