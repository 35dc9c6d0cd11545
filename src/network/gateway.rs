//! Listener setup and the accept gate.
//!
//! Every accepted socket passes the hook veto, the per-IP connection rate
//! limiter and the IP temp-ban table before a session task is spawned.
//! Banned peers still get the explanation line the protocol owes them.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::CloseReason;
use crate::handlers::Registry;
use crate::metrics;
use crate::network::connection::Connection;
use crate::state::Hub;

/// Per-IP accept rate: one connection a second with a burst of twenty,
/// enough for a flaky client and far under a reconnect flood.
fn accept_quota() -> Quota {
    Quota::per_second(nonzero!(1u32)).allow_burst(nonzero!(20u32))
}

/// Accept-gate state shared by all listener loops.
pub struct AcceptGate {
    hub: Arc<Hub>,
    registry: Arc<Registry>,
    limiters: DashMap<IpAddr, DefaultDirectRateLimiter>,
}

impl AcceptGate {
    /// Whether this peer may proceed to a session task. Refusals that owe
    /// the peer an explanation write it before dropping the socket.
    async fn admit(&self, stream: &mut TcpStream, ip: IpAddr) -> bool {
        if !self.hub.hooks.on_new_conn(ip) {
            metrics::CLOSES
                .with_label_values(&[CloseReason::HookVeto.error_code()])
                .inc();
            return false;
        }

        if !self.check_accept_rate(ip) {
            debug!(%ip, "connection rate limit exceeded");
            return false;
        }

        let now = self.hub.now();

        if let Some(ban) = self.hub.temp_bans.get_ip(ip, now) {
            let reason = ban.kind.close_reason();
            let line = self.hub.chat_line(&format!(
                "You're still temporarily prohibited from entering the hub for {}s because: {}",
                ban.until - now,
                ban.reason
            ));

            let _ = stream.write_all(line.as_bytes()).await;
            let _ = stream.write_all(b"|").await;
            metrics::CLOSES.with_label_values(&[reason.error_code()]).inc();
            debug!(%ip, reason = %reason, "refused temp-banned peer");
            return false;
        }

        true
    }

    fn check_accept_rate(&self, ip: IpAddr) -> bool {
        let limiter = self
            .limiters
            .entry(ip)
            .or_insert_with(|| RateLimiter::direct(accept_quota()));

        limiter.check().is_ok()
    }

    /// Drop rate limiters when the table grows silly; called from the
    /// maintenance task.
    pub fn prune_limiters(&self) {
        const MAX_ENTRIES: usize = 10_000;

        if self.limiters.len() > MAX_ENTRIES {
            self.limiters.clear();
            debug!("cleared accept rate limiters");
        }
    }
}

/// The accept loop over all configured listeners.
pub struct Gateway {
    listeners: Vec<TcpListener>,
    gate: Arc<AcceptGate>,
}

impl Gateway {
    /// Bind every configured endpoint.
    pub async fn bind(
        addrs: &[SocketAddr],
        hub: Arc<Hub>,
        registry: Arc<Registry>,
    ) -> anyhow::Result<Gateway> {
        let mut listeners = Vec::with_capacity(addrs.len());

        for addr in addrs {
            let listener = TcpListener::bind(addr).await?;
            info!(%addr, "listening");
            listeners.push(listener);
        }

        Ok(Gateway {
            listeners,
            gate: Arc::new(AcceptGate {
                hub,
                registry,
                limiters: DashMap::new(),
            }),
        })
    }

    /// Local addresses actually bound, for tests on ephemeral ports.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    /// Shared accept gate, for the maintenance task.
    pub fn gate(&self) -> Arc<AcceptGate> {
        Arc::clone(&self.gate)
    }

    /// Run until the process stops.
    pub async fn run(self) {
        let mut tasks = Vec::new();

        for listener in self.listeners {
            let gate = Arc::clone(&self.gate);

            tasks.push(tokio::spawn(async move {
                accept_loop(gate, listener).await;
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn accept_loop(gate: Arc<AcceptGate>, listener: TcpListener) {
    let local = listener.local_addr().ok();

    loop {
        match listener.accept().await {
            Ok((mut stream, peer)) => {
                if !gate.admit(&mut stream, peer.ip()).await {
                    continue;
                }

                let connection = Connection::new(
                    stream,
                    peer,
                    Arc::clone(&gate.hub),
                    Arc::clone(&gate.registry),
                );

                tokio::spawn(connection.run());
            }
            Err(e) => {
                warn!(listener = ?local, error = %e, "accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
