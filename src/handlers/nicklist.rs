//! Nicklist delivery.
//!
//! Before login the request just flags the session; the list goes out as
//! part of the login sequence. After login it is answered from the cached
//! collection forms. Which lists a client gets depends on its features:
//! NoHello clients take the MyINFO list instead of the nicklist,
//! NoGetINFO clients take both, and the info list honors the TLS filter
//! per recipient just like the live broadcast split.

use async_trait::async_trait;

use nmdc_proto::{frames, Message};

use crate::error::HandlerResult;
use crate::handlers::registry::{proto_flood, Handler};
use crate::network::connection::{stage, ConnState};
use crate::security::flood::FloodKind;
use crate::state::features;
use crate::state::user::my_flag;

pub struct GetNickListHandler;

#[async_trait]
impl Handler for GetNickListHandler {
    async fn handle(&self, conn: &mut ConnState, _msg: &Message) -> HandlerResult {
        let listed = conn
            .entry
            .as_ref()
            .map(|e| e.user.read().in_list)
            .unwrap_or(false);

        if !listed {
            // Asked during the handshake: remember and deliver at login.
            conn.send_nick_list = true;
            conn.set_stage(stage::NICKLST);
            return Ok(());
        }

        proto_flood(conn, FloodKind::NickList)?;
        send_nick_list(conn);

        if let Some(entry) = &conn.entry {
            entry.user.write().t.nicklist = conn.hub.now();
        }

        Ok(())
    }
}

/// The full list bundle: nicklist and/or MyINFO list by feature, op list,
/// bot list, the IP list (or the caller's own address) for UserIP2
/// clients, and the ExtJSON blobs.
pub fn send_nick_list(conn: &mut ConnState) {
    let config = conn.config();

    // The bulk info list honors the TLS filter per recipient, same as
    // the live broadcast split.
    let own_tls = conn
        .entry
        .as_ref()
        .map(|e| e.user.read().has_flag(my_flag::TLS))
        .unwrap_or(false);
    let strip_tls = config.myinfo.tls_filter && !own_tls;

    if conn.has_feature(features::NOHELLO) {
        let info_list = if strip_tls {
            conn.hub.users.info_list_without_tls()
        } else {
            conn.hub.users.info_list()
        };
        conn.send(&info_list, true);
    } else if conn.has_feature(features::NOGETINFO) {
        // These clients want the names first and the MyINFO bulk after.
        let nick_list = conn.hub.users.nick_list();
        conn.send(&nick_list, true);

        let info_list = if strip_tls {
            conn.hub.users.info_list_without_tls()
        } else {
            conn.hub.users.info_list()
        };
        conn.send(&info_list, true);
    } else {
        let nick_list = conn.hub.users.nick_list();
        conn.send(&nick_list, true);
    }

    if !conn.hub.ops.is_empty() {
        let op_list = conn.hub.ops.nick_list();
        conn.send(&op_list, true);
    }

    if conn.has_feature(features::BOTLIST) && !conn.hub.bots.is_empty() {
        let bot_list = conn.hub.bots.nick_list();
        conn.send(&bot_list, true);
    }

    if conn.has_feature(features::USERIP2) {
        if conn.class() >= config.limits.user_ip_class {
            let ip_list = conn.hub.users.ip_list();
            conn.send(&ip_list, true);
        } else if let Some(entry) = conn.entry.clone() {
            // Everyone else still learns their own address.
            let (nick, ip) = {
                let user = entry.user.read();
                (user.nick.clone(), user.ip.clone())
            };
            let frame = frames::user_ip(&nick, &ip);
            conn.send(&frame, true);
        }
    }

    if conn.has_feature(features::EXTJSON2) {
        let own_hash = conn.entry.as_ref().map(|e| e.hash).unwrap_or(0);
        let mut blob = String::new();

        for entry in conn.hub.users.snapshot() {
            if entry.hash == own_hash {
                continue;
            }

            let ext_json = entry.user.read().ext_json.clone();

            if !ext_json.is_empty() {
                blob.push_str(&ext_json);
                blob.push('|');
            }
        }

        if !blob.is_empty() {
            conn.send(&blob, true);
        }
    }
}
