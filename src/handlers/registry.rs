//! Command handler registry and dispatch.
//!
//! One table maps every command kind to its handler, its pre-parse length
//! cap and whether a listed user is required. Adding a command is one
//! entry here plus the handler itself.

use async_trait::async_trait;
use std::collections::HashMap;

use nmdc_proto::{Message, MsgKind};

use crate::config::ServerConfig;
use crate::error::{CloseReason, HandlerError, HandlerResult};
use crate::network::connection::ConnState;
use crate::security::flood::FloodKind;
use crate::telemetry::CommandTimer;

use super::{chat, handshake, myinfo, nicklist, oper, routing, search};

/// A command handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, conn: &mut ConnState, msg: &Message) -> HandlerResult;
}

type MaxLenFn = fn(&ServerConfig) -> usize;

struct Entry {
    handler: Box<dyn Handler>,
    /// Pre-parse frame length cap, when the command has one.
    max_len: Option<MaxLenFn>,
    /// Requires a listed user (past login-done).
    need_user: bool,
}

/// Registry of command handlers.
pub struct Registry {
    entries: HashMap<MsgKind, Entry>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry with every handler registered.
    pub fn new() -> Registry {
        let mut entries: HashMap<MsgKind, Entry> = HashMap::new();

        let mut add = |kind: MsgKind, handler: Box<dyn Handler>, max_len: Option<MaxLenFn>, need_user: bool| {
            entries.insert(
                kind,
                Entry {
                    handler,
                    max_len,
                    need_user,
                },
            );
        };

        // Handshake
        add(MsgKind::Key, Box::new(handshake::KeyHandler), Some(|s| s.max_len_handshake), false);
        add(
            MsgKind::Supports,
            Box::new(handshake::SupportsHandler),
            Some(|s| s.max_len_supports),
            false,
        );
        add(
            MsgKind::ValidateNick,
            Box::new(handshake::ValidateNickHandler),
            Some(|s| s.max_len_handshake),
            false,
        );
        add(MsgKind::MyPass, Box::new(handshake::MyPassHandler), None, false);
        add(
            MsgKind::Version,
            Box::new(handshake::VersionHandler),
            Some(|s| s.max_len_version),
            false,
        );
        add(
            MsgKind::MyHubUrl,
            Box::new(handshake::MyHubUrlHandler),
            Some(|s| s.max_len_myhuburl),
            false,
        );
        add(MsgKind::BotInfo, Box::new(handshake::BotInfoHandler), None, false);
        add(MsgKind::Quit, Box::new(handshake::QuitHandler), None, false);
        add(
            MsgKind::MyNick,
            Box::new(handshake::ClientHandshakeHandler),
            Some(|s| s.max_len_handshake),
            false,
        );
        add(
            MsgKind::Lock,
            Box::new(handshake::ClientHandshakeHandler),
            Some(|s| s.max_len_handshake),
            false,
        );
        add(MsgKind::MyIp, Box::new(handshake::MyIpHandler), None, false);

        // Identity and info
        add(
            MsgKind::MyInfo,
            Box::new(myinfo::MyInfoHandler),
            Some(|s| s.max_len_myinfo),
            false,
        );
        add(
            MsgKind::ExtJson,
            Box::new(myinfo::ExtJsonHandler),
            Some(|s| s.max_len_extjson),
            true,
        );
        add(
            MsgKind::In,
            Box::new(myinfo::InHandler),
            Some(|s| s.max_len_in),
            true,
        );
        add(MsgKind::GetInfo, Box::new(myinfo::GetInfoHandler), None, true);
        add(MsgKind::GetNickList, Box::new(nicklist::GetNickListHandler), None, false);

        // Chat
        add(MsgKind::Chat, Box::new(chat::ChatHandler), None, true);
        add(MsgKind::To, Box::new(chat::ToHandler), None, true);
        add(MsgKind::McTo, Box::new(chat::McToHandler), None, true);

        // Peer routing
        add(MsgKind::ConnectToMe, Box::new(routing::CtmHandler), None, true);
        add(MsgKind::MultiConnectToMe, Box::new(routing::CtmHandler), None, true);
        add(MsgKind::RevConnectToMe, Box::new(routing::RctmHandler), None, true);
        add(MsgKind::Sr, Box::new(routing::SrHandler), None, true);

        // Search
        for kind in [
            MsgKind::Search,
            MsgKind::SearchPassive,
            MsgKind::MultiSearch,
            MsgKind::MultiSearchPassive,
        ] {
            add(
                kind,
                Box::new(search::SearchHandler),
                Some(|s| s.max_len_search),
                true,
            );
        }

        add(MsgKind::Sa, Box::new(search::SaHandler), Some(|s| s.max_len_search), true);
        add(MsgKind::Sp, Box::new(search::SpHandler), Some(|s| s.max_len_search), true);

        // Operator commands
        add(MsgKind::Kick, Box::new(oper::KickHandler), None, true);
        add(MsgKind::OpForceMove, Box::new(oper::OpForceMoveHandler), None, true);
        add(MsgKind::Ban, Box::new(oper::BanHandler), None, true);
        add(MsgKind::TempBan, Box::new(oper::BanHandler), None, true);
        add(MsgKind::UnBan, Box::new(oper::UnBanHandler), None, true);
        add(MsgKind::GetBanList, Box::new(oper::GetBanListHandler), None, true);
        add(MsgKind::WhoIp, Box::new(oper::WhoIpHandler), None, true);
        add(MsgKind::GetTopic, Box::new(oper::GetTopicHandler), None, true);
        add(MsgKind::SetTopic, Box::new(oper::SetTopicHandler), None, true);
        add(MsgKind::UserIp, Box::new(oper::UserIpHandler), None, true);

        Registry { entries }
    }

    /// Run one classified frame through the engine perimeter.
    pub async fn dispatch(&self, conn: &mut ConnState, msg: &Message) {
        if conn.is_closing() {
            return;
        }

        // Heartbeats only feed the ping flood bucket.
        if msg.kind == MsgKind::Ping {
            let _ = proto_flood(conn, FloodKind::Ping);
            return;
        }

        let Some(entry) = self.entries.get(&msg.kind) else {
            let _ = proto_flood(conn, FloodKind::Unknown);
            tracing::debug!(frame = %preview(&msg.raw), "unknown command");
            return;
        };

        let config = conn.config();

        if let Some(max_len) = entry.max_len {
            let cap = max_len(&config.server);

            if cap > 0 && msg.raw.len() > cap {
                conn.close_with_msg(
                    &format!("Your client sent an oversized {} command.", msg.kind.name()),
                    1000,
                    CloseReason::SyntaxError,
                );
                return;
            }
        }

        // Hook veto: for logged-in users the frame is swallowed, for
        // handshake sessions the connection goes away.
        let nick = conn.nick();

        if !conn.hub.hooks.on_parsed_msg(nick.as_deref(), msg.kind) {
            if conn.entry.is_none() {
                conn.close_now(CloseReason::HookVeto);
            }

            return;
        }

        if entry.need_user && !check_user_login(conn) {
            return;
        }

        let _timer = CommandTimer::start(msg.kind.name());

        match entry.handler.handle(conn, msg).await {
            Ok(()) => {}
            Err(HandlerError::Close(reason)) => {
                if !conn.is_closing() {
                    conn.close_now(reason);
                }
            }
            Err(HandlerError::Discard) => {}
            Err(HandlerError::Send) => {
                if !conn.is_closing() {
                    conn.close_now(CloseReason::Default);
                }
            }
        }
    }
}

fn preview(raw: &str) -> &str {
    let end = raw
        .char_indices()
        .nth(64)
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    &raw[..end]
}

/// The "command before login" guard shared by every listed-only command.
fn check_user_login(conn: &mut ConnState) -> bool {
    let listed = conn
        .entry
        .as_ref()
        .map(|e| e.user.read().in_list)
        .unwrap_or(false);

    if !listed {
        conn.close_with_msg(
            "Invalid login sequence, this command requires a completed login.",
            1000,
            CloseReason::LoginError,
        );
    }

    listed
}

/// Count one command against its per-connection flood bucket and apply
/// the configured action.
pub(crate) fn proto_flood(conn: &mut ConnState, kind: FloodKind) -> HandlerResult {
    use crate::security::flood::FloodVerdict;
    use crate::state::features;

    let config = conn.config();
    let now = conn.hub.now();
    let exempt = conn.class() > config.flood.max_class
        // Old clients without NoGetINFO ask for every user; that is
        // normal, not a flood.
        || (kind == FloodKind::GetInfo
            && conn.features != 0
            && !conn.has_feature(features::NOGETINFO));

    let locked = matching_lock(conn, kind);

    let verdict = conn.flood.check(kind, &config.flood, now, exempt, locked);

    match verdict {
        FloodVerdict::Pass => Ok(()),
        FloodVerdict::Notify { report } => {
            deliver_report(conn, report);
            Ok(())
        }
        FloodVerdict::Drop { report } => {
            crate::metrics::FLOOD_HITS.with_label_values(&[kind.name()]).inc();
            deliver_report(conn, report);
            Err(HandlerError::Discard)
        }
        FloodVerdict::Kick { report } => {
            crate::metrics::FLOOD_HITS.with_label_values(&[kind.name()]).inc();
            deliver_report(conn, report);

            let until = now + config.flood.tban_time as i64;
            conn.hub.temp_bans.add_ip(
                conn.ip,
                until,
                &format!("Protocol flood detected: {}", kind.name()),
                crate::security::BanKind::ProtocolFlood,
            );
            conn.close_with_msg(
                &format!("Protocol flood detected: {}", kind.name()),
                1000,
                CloseReason::LoginError,
            );
            Err(HandlerError::Discard)
        }
    }
}

fn matching_lock(conn: &ConnState, kind: FloodKind) -> bool {
    use crate::security::AllFloodKind;

    let all = match kind {
        FloodKind::Chat => AllFloodKind::Chat,
        FloodKind::Priv => AllFloodKind::Priv,
        FloodKind::McTo => AllFloodKind::McTo,
        FloodKind::Search => AllFloodKind::Search,
        _ => return false,
    };

    conn.hub.hub_flood.is_locked(all)
}

fn deliver_report(conn: &mut ConnState, report: Option<String>) {
    if let Some(report) = report {
        let nick = conn.nick().unwrap_or_else(|| conn.ip.to_string());
        conn.hub
            .report_to_opchat(&format!("{} from {}", report, nick));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_routable_kind() {
        let registry = Registry::new();

        for kind in [
            MsgKind::Key,
            MsgKind::Supports,
            MsgKind::ValidateNick,
            MsgKind::MyPass,
            MsgKind::Version,
            MsgKind::MyInfo,
            MsgKind::Chat,
            MsgKind::To,
            MsgKind::McTo,
            MsgKind::ConnectToMe,
            MsgKind::RevConnectToMe,
            MsgKind::Search,
            MsgKind::SearchPassive,
            MsgKind::Sa,
            MsgKind::Sp,
            MsgKind::Sr,
            MsgKind::BotInfo,
            MsgKind::Kick,
            MsgKind::OpForceMove,
            MsgKind::SetTopic,
            MsgKind::UserIp,
        ] {
            assert!(registry.entries.contains_key(&kind), "missing {kind:?}");
        }
    }
}
