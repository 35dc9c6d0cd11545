//! Peer routing: ConnectToMe, RevConnectToMe and search-result relay.

use async_trait::async_trait;
use std::sync::Arc;

use nmdc_proto::message::{CtmArgs, RctmArgs, SrArgs};
use nmdc_proto::{frames, Message};

use crate::error::{HandlerError, HandlerResult};
use crate::handlers::helpers::{check_own_nick, syntax_close, use_hub_share_floor};
use crate::handlers::registry::{proto_flood, Handler};
use crate::network::connection::ConnState;
use crate::security::flood::{check_rctm_to_user, AllFloodVerdict, FloodKind};
use crate::state::user::{my_flag, UserClass, UserEntry};
use crate::state::{features, OutMsg};

/// Everything both transfer-request directions check about the pair.
///
/// On refusal the sender gets the instructional line unless it opted out
/// of them; the request is swallowed either way.
fn download_gate(
    conn: &mut ConnState,
    target_nick: &str,
) -> Result<Arc<UserEntry>, HandlerError> {
    let config = conn.config();
    let entry = conn.entry.clone().ok_or(HandlerError::Discard)?;
    let (class, share, hide_msg, lan, can_ctm) = {
        let user = entry.user.read();
        (
            user.class,
            user.share,
            user.hide_ctm_msg,
            user.lan,
            user.rights.can_ctm(conn.hub.now()),
        )
    };

    let notice = |conn: &mut ConnState, text: &str| {
        if !hide_msg {
            conn.hub_chat(text);
        }
    };

    let Some(target) = conn.hub.users.get_by_nick(target_nick) else {
        return Err(HandlerError::Discard);
    };

    if !target.user.read().in_list {
        return Err(HandlerError::Discard);
    }

    if target.is_bot() {
        notice(conn, &format!("You're trying to connect to a bot: {target_nick}"));
        return Err(HandlerError::Discard);
    }

    if target.hash == entry.hash {
        notice(conn, "You're trying to connect to yourself.");
        return Err(HandlerError::Discard);
    }

    if class.value() < config.limits.min_class_use_hub {
        notice(
            conn,
            &format!(
                "You can't download unless you are registered with class {}.",
                config.limits.min_class_use_hub
            ),
        );
        return Err(HandlerError::Discard);
    }

    let floor = use_hub_share_floor(&config, class.value());

    if share < floor {
        notice(conn, &format!("You can't download unless you share {floor} B."));
        return Err(HandlerError::Discard);
    }

    if !can_ctm {
        notice(conn, "You're not allowed to download from anyone.");
        return Err(HandlerError::Discard);
    }

    {
        let other = target.user.read();

        if class.value() + config.limits.classdif_download < other.class.value()
            || (class < UserClass::Op && other.hide_share)
        {
            drop(other);
            notice(conn, &format!("You can't download from this user: {target_nick}"));
            return Err(HandlerError::Discard);
        }

        if config.search.filter_lan && lan != other.lan {
            drop(other);
            notice(
                conn,
                &format!(
                    "You can't download from this user because one of you is in a LAN: {target_nick}"
                ),
            );
            return Err(HandlerError::Discard);
        }
    }

    if target.has_feature(features::CHATONLY)
        && class.value() < config.limits.chatonly_bypass_class
    {
        notice(
            conn,
            &format!("You can't download from this user because he is in chat only mode: {target_nick}"),
        );
        return Err(HandlerError::Discard);
    }

    Ok(target)
}

/// Both ends must advertise TLS for a secured transfer to work.
fn tls_compatible(conn: &ConnState, target: &UserEntry) -> bool {
    conn.has_feature(features::TLS) && target.has_feature(features::TLS)
}

pub struct CtmHandler;

#[async_trait]
impl Handler for CtmHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let args = CtmArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "ConnectToMe"))?;
        proto_flood(conn, FloodKind::Ctm)?;

        let target = download_gate(conn, &args.nick)?;
        let config = conn.config();

        // Rebuild the flag suffix, dropping what the pair cannot do.
        let both_nat = {
            let entry = conn.entry.clone().ok_or(HandlerError::Discard)?;
            let me_nat = entry.user.read().has_flag(my_flag::NAT);
            me_nat && target.user.read().has_flag(my_flag::NAT)
        };

        let mut extra = String::new();

        if let Some(nat_nick) = &args.flags.nat_nick {
            check_own_nick(conn, nat_nick)?;

            if args.flags.nat && both_nat {
                if args.flags.tls {
                    if !tls_compatible(conn, &target) {
                        return Err(HandlerError::Discard);
                    }

                    extra = format!("NS {nat_nick}");
                } else {
                    extra = format!("N {nat_nick}");
                }
            }
        } else if args.flags.nat {
            if both_nat {
                if args.flags.tls {
                    if !tls_compatible(conn, &target) {
                        return Err(HandlerError::Discard);
                    }

                    extra = "RS".to_string();
                } else {
                    extra = "R".to_string();
                }
            }
        } else if args.flags.tls {
            if !tls_compatible(conn, &target) {
                return Err(HandlerError::Discard);
            }

            extra = "S".to_string();
        }

        // The claimed address must be the socket's; fix lies quietly.
        let real_ip = conn.ip.to_string();
        let ip = if args.ip == real_ip {
            args.ip.clone()
        } else {
            tracing::debug!(claimed = %args.ip, real = %real_ip, "fixed wrong IP in ConnectToMe");

            if config.server.wrongip_notice {
                conn.hub_chat(&format!(
                    "Replacing wrong IP address specified in your connection request with real one: {} -> {}",
                    args.ip, real_ip
                ));
            }

            real_ip
        };

        let frame = frames::connect_to_me(&args.nick, &ip, args.port, &extra);
        target.send(OutMsg::immediate(bytes::Bytes::from(frame)));
        Ok(())
    }
}

pub struct RctmHandler;

#[async_trait]
impl Handler for RctmHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let args = RctmArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "RevConnectToMe"))?;
        check_own_nick(conn, &args.from)?;
        proto_flood(conn, FloodKind::Rctm)?;

        let target = download_gate(conn, &args.to)?;
        let config = conn.config();
        let entry = conn.entry.clone().ok_or(HandlerError::Discard)?;

        // Passive-to-passive only works when both ends can do NAT
        // traversal.
        {
            let me = entry.user.read();
            let other = target.user.read();

            if me.passive
                && other.passive
                && !(me.has_flag(my_flag::NAT) && other.has_flag(my_flag::NAT))
            {
                let hide = me.hide_ctm_msg;
                let nick = other.nick.clone();
                drop(me);
                drop(other);

                if !hide {
                    conn.hub_chat(&format!(
                        "You can't download from this user because he is also in passive mode: {nick}"
                    ));
                }

                return Err(HandlerError::Discard);
            }
        }

        // Per-target hub-wide flood; the lock lives on the recipient.
        let exempt = conn.class() > config.flood.max_class;
        let verdict = {
            let mut other = target.user.write();
            check_rctm_to_user(&mut other, config.hub_flood.rctm, conn.hub.now(), exempt)
        };

        match verdict {
            AllFloodVerdict::Pass => {}
            AllFloodVerdict::Unlocked { notice } => {
                if config.flood.report {
                    conn.hub.report_to_opchat(&notice);
                }
            }
            AllFloodVerdict::Locked { notice } => {
                if let Some(notice) = notice {
                    crate::metrics::FLOOD_LOCKS
                        .with_label_values(&["RevConnectToMe"])
                        .inc();

                    if config.flood.report {
                        conn.hub.report_to_opchat(&notice);
                    }
                }

                return Err(HandlerError::Discard);
            }
        }

        target.send(OutMsg::immediate(bytes::Bytes::copy_from_slice(
            msg.raw.as_bytes(),
        )));
        Ok(())
    }
}

pub struct SrHandler;

#[async_trait]
impl Handler for SrHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let args = SrArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "SR"))?;
        check_own_nick(conn, &args.from)?;
        proto_flood(conn, FloodKind::Sr)?;

        let Some(to) = args.to else {
            // Without a routing suffix there is nobody to relay to.
            return Err(HandlerError::Discard);
        };

        let Some(target) = conn.hub.users.get_by_nick(&to) else {
            return Err(HandlerError::Discard);
        };

        let config = conn.config();

        // Each passive search buys the searcher a bounded number of
        // results; the rest are dropped at the hub.
        {
            let mut user = target.user.write();

            if user.sr_counter >= config.limits.max_sr_per_search {
                return Err(HandlerError::Discard);
            }

            user.sr_counter += 1;
        }

        target.send(OutMsg::immediate(bytes::Bytes::from(args.forward)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctm_frame_rebuild() {
        assert_eq!(
            frames::connect_to_me("bob", "1.2.3.4", 412, "NS carol"),
            "$ConnectToMe bob 1.2.3.4:412NS carol"
        );
    }
}
