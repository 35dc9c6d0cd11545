//! nmdcd - NMDC hub daemon.
//!
//! A tokio-based hub: one task per connection, shared state in the Hub
//! container, abuse control on every frame.

mod config;
mod db;
mod error;
mod handlers;
mod http;
mod metrics;
mod network;
mod security;
mod state;
mod telemetry;

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::Config;
use crate::db::{ConfigRegStore, FileBanStore, NoGeo, NoHooks};
use crate::handlers::Registry;
use crate::network::Gateway;
use crate::state::{Hub, SysLoad};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    // Canonicalize so the reload ticker does not depend on the working
    // directory.
    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so log_format applies).
    let config_path = resolve_config_path();

    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path).map_err(|e| {
            eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
            e
        })?
    } else {
        eprintln!("No config at {}, using built-in defaults", config_path);
        Config::default()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "configuration validation failed");
        }

        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        hub = %config.server.hub_name,
        listeners = config.server.listen.len(),
        "starting nmdcd"
    );

    // Lookup facades: accounts from config blocks, bans from the optional
    // bans.toml next to the config, geo and hooks as inert defaults.
    let reg_store = Arc::new(ConfigRegStore::new(&config.registered));
    let bans_path = Path::new(&config_path)
        .parent()
        .map(|d| d.join("bans.toml"))
        .unwrap_or_else(|| "bans.toml".into());
    let ban_store = Arc::new(FileBanStore::load(&bans_path)?);

    if !ban_store.is_empty() {
        info!(count = ban_store.len(), "loaded persistent bans");
    }

    let listen = config.server.listen.clone();
    let metrics_port = config.server.metrics_port;
    let reload_interval = config.server.reload_interval;

    let hub = Arc::new(Hub::new(
        config,
        config_path.clone(),
        reg_store,
        ban_store,
        Arc::new(NoGeo),
        Arc::new(NoHooks),
    ));
    info!("hub state initialized");

    // Graceful shutdown on the usual signals.
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT - shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM - shutting down"),
            }

            std::process::exit(0);
        });
    }

    // Load sampler: feeds the frequency meter four times a second.
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(crate::state::load::SAMPLE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

            loop {
                interval.tick().await;
                let config = hub.config();
                hub.load
                    .tick(std::time::Instant::now(), config.load.min_frequency, 0);
                metrics::SYS_LOAD.set(hub.load.level() as i64);
            }
        });
    }

    // Slow timer: temp-ban sweep and gauge refresh every 30 seconds.
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));

            loop {
                interval.tick().await;
                let removed = hub.temp_bans.sweep(hub.now());

                if removed > 0 {
                    info!(removed, "expired temp bans removed");
                }

                metrics::TEMP_BANS.set(hub.temp_bans.len() as i64);
                metrics::USERS_ONLINE.set(hub.users.len() as i64);
                metrics::TOTAL_SHARE.set(hub.total_share() as i64);
            }
        });
    }

    // Configuration reload ticker.
    if reload_interval > 0 {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(reload_interval));

            loop {
                interval.tick().await;

                match Config::load(&hub.config_path) {
                    Ok(new_config) => {
                        if let Err(errors) = config::validate(&new_config) {
                            for err in errors {
                                error!(error = %err, "reloaded config invalid, keeping current");
                            }
                        } else {
                            hub.set_config(new_config);
                            info!("configuration reloaded");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "config reload failed");
                    }
                }
            }
        });
    }

    // Prometheus metrics are optional; port 0 disables the endpoint.
    if metrics_port == 0 {
        info!("metrics disabled");
    } else {
        metrics::init();
        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "metrics HTTP server started");
    }

    let registry = Arc::new(Registry::new());
    let gateway = Gateway::bind(&listen, Arc::clone(&hub), registry).await?;

    // Accept-gate maintenance.
    {
        let gate = gateway.gate();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));

            loop {
                interval.tick().await;
                gate.prune_limiters();
            }
        });
    }

    // A parting hint for the logs when load climbs.
    {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            let mut last = SysLoad::Normal;

            loop {
                interval.tick().await;
                let level = hub.load.level();

                if level != last {
                    info!(from = last.label(), to = level.label(), "system load changed");
                    last = level;
                }
            }
        });
    }

    gateway.run().await;
    Ok(())
}
