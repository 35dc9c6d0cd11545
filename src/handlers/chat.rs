//! Chat delivery: main chat, private messages and private main chat.

use async_trait::async_trait;

use nmdc_proto::message::{ChatArgs, McToArgs, ToArgs};
use nmdc_proto::{frames, Message};

use crate::error::{HandlerError, HandlerResult};
use crate::handlers::helpers::{check_own_nick, message_hash, syntax_close};
use crate::handlers::registry::{proto_flood, Handler};
use crate::metrics;
use crate::network::connection::ConnState;
use crate::security::flood::{AllFloodKind, AllFloodVerdict, FloodKind};
use crate::state::features;
use crate::state::user::UserClass;

/// Count a command against a hub-wide bucket and deliver the lock and
/// unlock notices. Returns whether the command may proceed.
pub(crate) fn hub_flood_gate(conn: &mut ConnState, kind: AllFloodKind) -> HandlerResult {
    let config = conn.config();
    let exempt = conn.class() > config.flood.max_class;
    let now = conn.hub.now();

    match conn.hub.hub_flood.check(kind, &config.hub_flood, now, exempt) {
        AllFloodVerdict::Pass => Ok(()),
        AllFloodVerdict::Unlocked { notice } => {
            if config.flood.report {
                conn.hub.report_to_opchat(&notice);
            }

            Ok(())
        }
        AllFloodVerdict::Locked { notice } => {
            if let Some(notice) = notice {
                metrics::FLOOD_LOCKS.with_label_values(&[kind.name()]).inc();

                if config.flood.report {
                    conn.hub.report_to_opchat(&notice);
                }
            }

            Err(HandlerError::Discard)
        }
    }
}

/// Shared text gates: length, line count, equal-as-last.
fn check_text(conn: &mut ConnState, text: &str, last_hash_slot: fn(&mut crate::state::User) -> &mut u64) -> HandlerResult {
    let config = conn.config();

    if text.len() > config.chat.max_len {
        conn.hub_chat(&format!(
            "Your message wasn't sent because it contains more than {} characters.",
            config.chat.max_len
        ));
        return Err(HandlerError::Discard);
    }

    if config.chat.max_lines > 0 && text.matches('\n').count() >= config.chat.max_lines {
        conn.hub_chat(&format!(
            "Your message wasn't sent because it contains more than {} lines.",
            config.chat.max_lines
        ));
        return Err(HandlerError::Discard);
    }

    let entry = conn.entry.clone().ok_or(HandlerError::Discard)?;
    let class = entry.user.read().class;

    if class < UserClass::Op {
        let hash = message_hash(text);
        let repeated = {
            let mut user = entry.user.write();
            let slot = last_hash_slot(&mut user);

            if *slot == hash {
                true
            } else {
                *slot = hash;
                false
            }
        };

        if repeated {
            conn.hub_chat("Your message wasn't sent because it equals your previous message.");
            return Err(HandlerError::Discard);
        }
    }

    Ok(())
}

pub struct ChatHandler;

#[async_trait]
impl Handler for ChatHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let args = ChatArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "chat"))?;
        check_own_nick(conn, &args.nick)?;
        proto_flood(conn, FloodKind::Chat)?;

        let config = conn.config();
        let entry = conn.entry.clone().ok_or(HandlerError::Discard)?;
        let (class, can_chat) = {
            let user = entry.user.read();
            (user.class, user.rights.can_chat(conn.hub.now()))
        };

        if !can_chat {
            conn.hub_chat("You're not allowed to use main chat right now.");
            return Err(HandlerError::Discard);
        }

        if class.value() < config.chat.min_class {
            conn.hub_chat(
                "Main chat is currently disabled for users with your class, please consider registering on the hub or contact an operator.",
            );
            return Err(HandlerError::Discard);
        }

        check_text(conn, &args.text, |u| &mut u.flood_hashes.chat)?;

        // The `/me` action form.
        let frame = if let Some(action) = args.text.strip_prefix("/me ") {
            if !config.chat.allow_me {
                conn.hub_chat("The /me form is disabled on this hub.");
                return Err(HandlerError::Discard);
            }

            frames::chat_me(&args.nick, action)
        } else {
            msg.raw.clone()
        };

        hub_flood_gate(conn, AllFloodKind::Chat)?;

        conn.hub.chat.send_to_all(&frame, config.chat.delayed);
        Ok(())
    }
}

pub struct ToHandler;

#[async_trait]
impl Handler for ToHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let args = ToArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "To"))?;
        check_own_nick(conn, &args.from)?;
        check_own_nick(conn, &args.sign)?;
        proto_flood(conn, FloodKind::Priv)?;

        let config = conn.config();
        let entry = conn.entry.clone().ok_or(HandlerError::Discard)?;
        let (class, can_pm) = {
            let user = entry.user.read();
            (user.class, user.rights.can_pm(conn.hub.now()))
        };

        if !can_pm {
            conn.hub_chat("You're not allowed to send private messages right now.");
            return Err(HandlerError::Discard);
        }

        if class.value() < config.chat.min_class_pm {
            conn.hub_chat("Private messages are disabled for users with your class.");
            return Err(HandlerError::Discard);
        }

        let Some(target) = conn.hub.users.get_by_nick(&args.to) else {
            return Err(HandlerError::Discard);
        };

        // Don't let guests page the whole operator chain.
        let target_class = target.user.read().class.value();

        if target_class - class.value() > config.limits.classdif_pm {
            conn.hub_chat(&format!(
                "You can't send private messages to this user: {}",
                args.to
            ));
            return Err(HandlerError::Discard);
        }

        check_text(conn, &args.text, |u| &mut u.flood_hashes.pm)?;
        hub_flood_gate(conn, AllFloodKind::Priv)?;

        target.send(crate::state::OutMsg::immediate(bytes::Bytes::copy_from_slice(
            msg.raw.as_bytes(),
        )));
        Ok(())
    }
}

pub struct McToHandler;

#[async_trait]
impl Handler for McToHandler {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult {
        let args = McToArgs::parse(&msg.raw).map_err(|_| syntax_close(conn, "MCTo"))?;
        check_own_nick(conn, &args.from)?;
        proto_flood(conn, FloodKind::McTo)?;

        let entry = conn.entry.clone().ok_or(HandlerError::Discard)?;
        let can_pm = entry.user.read().rights.can_pm(conn.hub.now());

        if !can_pm {
            conn.hub_chat("You're not allowed to send private messages right now.");
            return Err(HandlerError::Discard);
        }

        let Some(target) = conn.hub.users.get_by_nick(&args.to) else {
            return Err(HandlerError::Discard);
        };

        check_text(conn, &args.text, |u| &mut u.flood_hashes.mcto)?;
        hub_flood_gate(conn, AllFloodKind::McTo)?;

        // Recipients without the MCTo feature get the chat form instead.
        let frame = if target.has_feature(features::MCTO) {
            msg.raw.clone()
        } else {
            frames::chat(&args.from, &args.text)
        };

        target.send(crate::state::OutMsg::immediate(bytes::Bytes::copy_from_slice(
            frame.as_bytes(),
        )));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn me_form_builds_action_frame() {
        assert_eq!(frames::chat_me("alice", "waves"), "** alice waves");
    }

    #[test]
    fn hash_gate_shape() {
        // Chat, PM and MCTo keep separate equal-as-last slots.
        let mut user = crate::state::User::new("x");
        user.flood_hashes.chat = 7;
        assert_eq!(user.flood_hashes.pm, 0);
    }
}
