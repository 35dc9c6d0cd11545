//! Per-connection session state and the unified event loop.
//!
//! Each accepted socket runs one task: it sends the lock challenge, then
//! selects over inbound frames, the outbound queue and a quarter-second
//! tick that drives timeouts, the ZPipe batch and the drain window of a
//! soft close. The login pipeline is a strict stage bitmask; handlers set
//! stages and the dispatcher enforces prerequisites.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, instrument, warn};

use nmdc_proto::transport::{FrameCodec, ZPipeBatch, ZPipeWriter};
use nmdc_proto::{frames, lock, Message};

use crate::config::Config;
use crate::error::CloseReason;
use crate::handlers::Registry;
use crate::metrics;
use crate::security::flood::FloodTrack;
use crate::state::user::{ConnTx, OutMsg, UserEntry};
use crate::state::{features, Hub, SysLoad};

/// Login-stage bits.
pub mod stage {
    pub const KEY: u32 = 1 << 0;
    pub const SUPPORTS: u32 = 1 << 1;
    pub const VALNICK: u32 = 1 << 2;
    pub const PASSWD: u32 = 1 << 3;
    pub const VERSION: u32 = 1 << 4;
    pub const MYINFO: u32 = 1 << 5;
    pub const NICKLST: u32 = 1 << 6;
    pub const MYHUBURL: u32 = 1 << 7;
    pub const ALLOWED: u32 = 1 << 8;
    pub const BOTINFO: u32 = 1 << 9;

    /// Every step a full login needs.
    pub const LOGIN_DONE: u32 = KEY | VALNICK | PASSWD | MYINFO | NICKLST | ALLOWED;
}

/// Per-stage timeout slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Key = 0,
    ValNick,
    Login,
    MyInfo,
    Password,
    SetPass,
}

const TIMEOUT_SLOTS: usize = 6;

impl TimeoutKind {
    pub fn label(&self) -> &'static str {
        match self {
            TimeoutKind::Key => "key",
            TimeoutKind::ValNick => "validate nick",
            TimeoutKind::Login => "login",
            TimeoutKind::MyInfo => "myinfo",
            TimeoutKind::Password => "password",
            TimeoutKind::SetPass => "set password",
        }
    }
}

/// A requested close: soft closes drain outbound for a window first.
#[derive(Debug, Clone, Copy)]
pub struct PendingClose {
    pub reason: CloseReason,
    pub deadline: Instant,
}

/// Mutable per-session state handed to every handler.
pub struct ConnState {
    pub hub: Arc<Hub>,
    pub addr: SocketAddr,
    /// Real peer address; `user.ip` may differ when a fake IP is set.
    pub ip: IpAddr,
    pub country: Option<String>,
    pub zone: usize,
    /// Session was counted against the capacity gates.
    pub counted: bool,
    /// The lock sent at accept; cleared once the key is checked.
    pub lock: Vec<u8>,
    pub features: u32,
    pub supports_text: String,
    pub stages: u32,
    deadlines: [Option<Instant>; TIMEOUT_SLOTS],
    pub flood: FloodTrack,
    pub reg: Option<crate::db::RegData>,
    /// Set at ValidateNick; promoted into the collections at login done.
    pub entry: Option<Arc<UserEntry>>,
    pub tx: ConnTx,
    pub close: Option<PendingClose>,
    /// Client asked for the nicklist before login completed.
    pub send_nick_list: bool,
    pub last_in: Instant,
    pub last_out_attempt: Instant,
    last_ping_probe: Instant,
}

impl ConnState {
    fn new(hub: Arc<Hub>, addr: SocketAddr, tx: ConnTx) -> ConnState {
        let ip = addr.ip();
        let country = hub.geo.country(ip);
        let zone = hub.zones.zone_of(country.as_deref());
        let now = Instant::now();

        ConnState {
            hub,
            addr,
            ip,
            country,
            zone,
            counted: false,
            lock: Vec::new(),
            features: 0,
            supports_text: String::new(),
            stages: 0,
            deadlines: [None; TIMEOUT_SLOTS],
            flood: FloodTrack::default(),
            reg: None,
            entry: None,
            tx,
            close: None,
            send_nick_list: false,
            last_in: now,
            last_out_attempt: now,
            last_ping_probe: now,
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.hub.config()
    }

    pub fn has_stage(&self, bit: u32) -> bool {
        self.stages & bit == bit
    }

    pub fn set_stage(&mut self, bit: u32) {
        self.stages |= bit;
    }

    pub fn has_feature(&self, bit: u32) -> bool {
        self.features & bit != 0
    }

    /// Effective class before the user record exists: the registered
    /// class, pinger for BotINFO clients, guest otherwise.
    pub fn theoretical_class(&self) -> i32 {
        match &self.reg {
            Some(reg) if reg.enabled => reg.class,
            _ => {
                if self.has_feature(features::BOTINFO) {
                    -1
                } else {
                    0
                }
            }
        }
    }

    /// Class of the live user when present, else the theoretical one.
    pub fn class(&self) -> i32 {
        match &self.entry {
            Some(entry) => entry.user.read().class.value(),
            None => self.theoretical_class(),
        }
    }

    pub fn nick(&self) -> Option<String> {
        self.entry.as_ref().map(|e| e.user.read().nick.clone())
    }

    /// Queue one frame to this connection.
    pub fn send(&mut self, frame: &str, delayed: bool) {
        let msg = if delayed {
            OutMsg::delayed(Bytes::copy_from_slice(frame.as_bytes()))
        } else {
            OutMsg::immediate(Bytes::copy_from_slice(frame.as_bytes()))
        };

        if self.tx.try_send(msg).is_err() {
            metrics::SLOW_CONSUMER_DROPS.inc();

            if self.close.is_none() {
                self.close_now(CloseReason::Default);
            }
        }
    }

    /// Hub-voiced chat line to this connection.
    pub fn hub_chat(&mut self, text: &str) {
        let frame = self.hub.chat_line(text);
        self.send(&frame, false);
    }

    /// Chat line followed by a soft close, the standard policy-refusal
    /// shape.
    pub fn close_with_msg(&mut self, text: &str, drain_ms: u64, reason: CloseReason) {
        self.hub_chat(text);
        self.close_nice(drain_ms, reason);
    }

    pub fn close_nice(&mut self, drain_ms: u64, reason: CloseReason) {
        if self.close.is_none() {
            // A redirect softens some policy closes.
            if reason.redirectable() {
                if let Some(target) = self.hub.next_redirect() {
                    let frame = frames::force_move(&target);
                    self.send(&frame, false);
                }
            }

            self.close = Some(PendingClose {
                reason,
                deadline: Instant::now() + Duration::from_millis(drain_ms),
            });
        }
    }

    pub fn close_now(&mut self, reason: CloseReason) {
        self.close = Some(PendingClose {
            reason,
            deadline: Instant::now(),
        });
    }

    pub fn is_closing(&self) -> bool {
        self.close.is_some()
    }

    pub fn set_timeout(&mut self, kind: TimeoutKind, seconds: u64) {
        if seconds > 0 {
            self.deadlines[kind as usize] = Some(Instant::now() + Duration::from_secs(seconds));
        }
    }

    pub fn clear_timeout(&mut self, kind: TimeoutKind) {
        self.deadlines[kind as usize] = None;
    }

    /// The expired stage, if any.
    fn expired_timeout(&self, now: Instant) -> Option<TimeoutKind> {
        const KINDS: [TimeoutKind; TIMEOUT_SLOTS] = [
            TimeoutKind::Key,
            TimeoutKind::ValNick,
            TimeoutKind::Login,
            TimeoutKind::MyInfo,
            TimeoutKind::Password,
            TimeoutKind::SetPass,
        ];

        for kind in KINDS {
            if let Some(deadline) = self.deadlines[kind as usize] {
                if now >= deadline {
                    return Some(kind);
                }
            }
        }

        None
    }
}

/// A client connection handler.
pub struct Connection {
    stream: Option<TcpStream>,
    addr: SocketAddr,
    hub: Arc<Hub>,
    registry: Arc<Registry>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<Hub>,
        registry: Arc<Registry>,
    ) -> Connection {
        Connection {
            stream: Some(stream),
            addr,
            hub,
            registry,
        }
    }

    /// Run the session lifecycle: lock challenge, event loop, teardown.
    #[instrument(skip(self), fields(addr = %self.addr), name = "connection")]
    pub async fn run(mut self) {
        let config = self.hub.config();
        let Some(stream) = self.stream.take() else {
            return;
        };
        let (read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::channel::<OutMsg>(512);
        let mut state = ConnState::new(Arc::clone(&self.hub), self.addr, tx);
        let mut writer = Writer::new(write_half, config.server.zlib_min_len, &self.hub);

        debug!("client connected");

        // The lock challenge is the first thing on the wire.
        {
            let digits: [u8; 4] = {
                let mut rng = rand::thread_rng();
                [
                    rng.gen_range(0..10),
                    rng.gen_range(0..10),
                    rng.gen_range(0..10),
                    rng.gen_range(0..10),
                ]
            };
            let challenge = lock::lock_challenge(config.server.tls_proxy, digits);
            state.lock = challenge.clone().into_bytes();

            let frame = frames::lock(
                &challenge,
                &config.server.hub_version_name,
                &config.server.hub_version,
            );

            if writer.write_plain(frame.as_bytes()).await.is_err() {
                return;
            }
        }

        // Refuse early when the hub is melting.
        if self.hub.load.level() >= SysLoad::Recovery {
            state.hub_chat(
                "Hub is currently unable to service your request, please try again in a few minutes.",
            );
            state.close_nice(1000, CloseReason::HubLoad);
        }

        state.set_timeout(TimeoutKind::Key, config.timeouts.key);
        state.set_timeout(TimeoutKind::Login, config.timeouts.login);

        let reason = self
            .event_loop(&mut state, read_half, rx, &mut writer)
            .await;

        metrics::CLOSES.with_label_values(&[reason.error_code()]).inc();
        self.teardown(&mut state, reason).await;
    }

    async fn event_loop(
        &self,
        state: &mut ConnState,
        read_half: OwnedReadHalf,
        mut rx: mpsc::Receiver<OutMsg>,
        writer: &mut Writer,
    ) -> CloseReason {
        let mut reader = FramedRead::new(
            read_half,
            FrameCodec::new(self.hub.config().server.max_frame_len),
        );
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if let Some(close) = state.close {
                // Drain window: flush what is queued, then go.
                let drained = self.drain(state, &mut rx, writer, close.deadline).await;

                if !drained {
                    debug!(reason = %close.reason, "drain window expired");
                }

                return close.reason;
            }

            tokio::select! {
                biased;

                msg = rx.recv() => {
                    match msg {
                        Some(OutMsg::Data { data, delayed }) => {
                            if writer.write(state, data, delayed).await.is_err() {
                                return CloseReason::Default;
                            }
                        }
                        Some(OutMsg::Close { reason, drain_ms }) => {
                            state.close_nice(drain_ms, reason);
                        }
                        None => return CloseReason::Default,
                    }
                }

                frame = reader.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            state.last_in = Instant::now();
                            metrics::BYTES_IN.inc_by(frame.len() as u64 + 1);
                            self.dispatch(state, frame).await;
                        }
                        Some(Err(e)) => {
                            debug!(error = %e, "read error");
                            state.hub_chat("Your client sent an oversized or malformed frame.");
                            state.close_now(CloseReason::SyntaxError);
                        }
                        None => return state
                            .close
                            .map(|c| c.reason)
                            .unwrap_or(CloseReason::Default),
                    }
                }

                _ = tick.tick() => {
                    self.on_tick(state, writer).await;
                }
            }
        }
    }

    /// Quarter-second housekeeping: stage timeouts, the inactivity
    /// watchdog, the frozen-peer probe and the ZPipe batch flush.
    async fn on_tick(&self, state: &mut ConnState, writer: &mut Writer) {
        let now = Instant::now();
        let config = state.config();

        if let Some(kind) = state.expired_timeout(now) {
            info!(stage = kind.label(), "operation timeout");
            state.close_with_msg(
                &format!("Operation timeout: {}", kind.label()),
                6000,
                CloseReason::Timeout,
            );
            return;
        }

        let idle = config.timeouts.inactivity;

        if idle > 0
            && state.last_in.elapsed() > Duration::from_secs(idle)
            && state.last_out_attempt.saturating_duration_since(state.last_in)
                > Duration::from_secs(idle)
        {
            info!("general inactivity timeout");
            state.close_with_msg("General timeout", 6000, CloseReason::InactivityTimeout);
            return;
        }

        // Empty-frame probe keeps frozen peers detectable.
        let probe = config.timeouts.delayed_ping;

        if probe > 0
            && state.has_stage(stage::LOGIN_DONE)
            && state.last_ping_probe.elapsed() > Duration::from_secs(probe)
        {
            state.last_ping_probe = now;
            let _ = writer.write_plain(b"").await;
        }

        let _ = writer.flush_batch(state).await;
    }

    /// Flush the queue until empty or the drain deadline passes. Returns
    /// whether everything was flushed in time.
    async fn drain(
        &self,
        state: &mut ConnState,
        rx: &mut mpsc::Receiver<OutMsg>,
        writer: &mut Writer,
        deadline: Instant,
    ) -> bool {
        loop {
            match rx.try_recv() {
                Ok(OutMsg::Data { data, delayed }) => {
                    if writer.write(state, data, delayed).await.is_err() {
                        return false;
                    }
                }
                Ok(OutMsg::Close { .. }) => {}
                Err(_) => break,
            }

            if Instant::now() >= deadline {
                return false;
            }
        }

        let _ = writer.flush_batch(state).await;

        let remaining = deadline.saturating_duration_since(Instant::now());

        if !remaining.is_zero() {
            tokio::time::sleep(remaining.min(Duration::from_millis(200))).await;
        }

        true
    }

    /// NUL policy, classification and registry dispatch for one frame.
    async fn dispatch(&self, state: &mut ConnState, frame: Bytes) {
        let config = state.config();
        let mut bytes = frame.to_vec();

        if bytes.contains(&0) {
            // The client-to-client lock echo legally carries NULs in some
            // legacy referers; strip them there, tolerate trailing NULs
            // elsewhere, close on anything embedded.
            if bytes.starts_with(b"$Lock ") {
                bytes.retain(|&b| b != 0);
            } else {
                while bytes.last() == Some(&0) {
                    bytes.pop();
                }

                if bytes.contains(&0) {
                    warn!("NUL character inside frame");

                    if config.server.nullchars_report {
                        let preview = String::from_utf8_lossy(&bytes).into_owned();
                        self.hub.report_to_opchat(&format!(
                            "Probably attempt of NULL character attack: {}",
                            nmdc_proto::escape(&preview)
                        ));
                    }

                    state.close_now(CloseReason::SyntaxError);
                    return;
                }
            }
        }

        let raw = String::from_utf8_lossy(&bytes).into_owned();
        let message = Message::new(raw);

        metrics::FRAMES_IN
            .with_label_values(&[message.kind.name()])
            .inc();

        self.registry.dispatch(state, &message).await;
    }

    /// Detach from the shared state and close the socket.
    async fn teardown(&self, state: &mut ConnState, reason: CloseReason) {
        if let Some(entry) = state.entry.take() {
            self.hub.remove_user(&entry);
            metrics::USERS_ONLINE.set(self.hub.users.len() as i64);
            metrics::TOTAL_SHARE.set(self.hub.total_share() as i64);
        }

        if state.counted {
            self.hub.conn_count.fetch_sub(1, Ordering::Relaxed);
            self.hub.zones.leave(state.zone);
        }

        info!(reason = %reason, "client disconnected");
    }
}

/// Owns the write half: plain writes, the ZPipe batch and byte accounting.
struct Writer {
    half: OwnedWriteHalf,
    zpipe: ZPipeWriter,
    hub: Arc<Hub>,
}

impl Writer {
    fn new(half: OwnedWriteHalf, zlib_min_len: usize, hub: &Arc<Hub>) -> Writer {
        Writer {
            half,
            zpipe: ZPipeWriter::new(zlib_min_len),
            hub: Arc::clone(hub),
        }
    }

    /// Write one queued frame, honoring the delayed/ZPipe contract:
    /// delayed frames batch for compression when the client negotiated
    /// ZPipe, immediate frames force the batch out first.
    async fn write(
        &mut self,
        state: &mut ConnState,
        data: Bytes,
        delayed: bool,
    ) -> std::io::Result<()> {
        state.last_out_attempt = Instant::now();

        if delayed && state.has_feature(features::ZLIB) {
            self.zpipe.push(&data);
            return Ok(());
        }

        self.flush_batch(state).await?;
        self.write_plain(&data).await
    }

    /// Drain the pending ZPipe batch.
    async fn flush_batch(&mut self, state: &mut ConnState) -> std::io::Result<()> {
        if self.zpipe.pending() == 0 {
            return Ok(());
        }

        state.last_out_attempt = Instant::now();

        match self.zpipe.take() {
            ZPipeBatch::Plain(bytes) => self.write_raw(&bytes).await,
            ZPipeBatch::Compressed { frame, saved } => {
                metrics::ZPIPE_SAVED.inc_by(saved as u64);
                self.write_raw(&frame).await
            }
        }
    }

    /// Write one frame, appending the terminator.
    async fn write_plain(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.extend_from_slice(data);

        if data.last() != Some(&nmdc_proto::PIPE) {
            buf.push(nmdc_proto::PIPE);
        }

        self.write_raw(&buf).await
    }

    async fn write_raw(&mut self, buf: &[u8]) -> std::io::Result<()> {
        metrics::BYTES_OUT.inc_by(buf.len() as u64);
        self.hub.load.add_upload(buf.len() as u64);
        self.half.write_all(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_done_needs_every_stage() {
        let done = stage::LOGIN_DONE;
        assert_eq!(done & stage::KEY, stage::KEY);
        assert_eq!(done & stage::VALNICK, stage::VALNICK);
        assert_eq!(done & stage::PASSWD, stage::PASSWD);
        assert_eq!(done & stage::MYINFO, stage::MYINFO);
        // Optional steps stay out of the requirement.
        assert_eq!(done & stage::VERSION, 0);
        assert_eq!(done & stage::MYHUBURL, 0);
        assert_eq!(done & stage::BOTINFO, 0);
    }

    #[test]
    fn timeout_labels() {
        assert_eq!(TimeoutKind::Key.label(), "key");
        assert_eq!(TimeoutKind::SetPass.label(), "set password");
    }
}
