//! Prometheus metrics collection for nmdcd.
//!
//! Tracks wire throughput per direction, compression savings, abuse-control
//! events, user statistics and the load level.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Inbound frames by command kind.
    pub static ref FRAMES_IN: IntCounterVec = IntCounterVec::new(
        Opts::new("nmdc_frames_in_total", "Inbound frames by kind"),
        &["kind"]
    ).unwrap();

    /// Inbound bytes including terminators.
    pub static ref BYTES_IN: IntCounter = IntCounter::new(
        "nmdc_bytes_in_total",
        "Inbound bytes"
    ).unwrap();

    /// Outbound bytes as written to sockets.
    pub static ref BYTES_OUT: IntCounter = IntCounter::new(
        "nmdc_bytes_out_total",
        "Outbound bytes"
    ).unwrap();

    /// Bytes saved by ZPipe compression.
    pub static ref ZPIPE_SAVED: IntCounter = IntCounter::new(
        "nmdc_zpipe_saved_bytes_total",
        "Bytes saved by ZPipe compression"
    ).unwrap();

    /// Bytes saved by sending the short TTHS search form.
    pub static ref TTHS_SAVED: IntCounter = IntCounter::new(
        "nmdc_tths_saved_bytes_total",
        "Bytes saved by short TTH search frames"
    ).unwrap();

    /// Per-connection flood rule hits.
    pub static ref FLOOD_HITS: IntCounterVec = IntCounterVec::new(
        Opts::new("nmdc_flood_hits_total", "Protocol flood detections by kind"),
        &["kind"]
    ).unwrap();

    /// Hub-wide flood locks.
    pub static ref FLOOD_LOCKS: IntCounterVec = IntCounterVec::new(
        Opts::new("nmdc_flood_locks_total", "Hub-wide flood locks by kind"),
        &["kind"]
    ).unwrap();

    /// Closed connections by reason.
    pub static ref CLOSES: IntCounterVec = IntCounterVec::new(
        Opts::new("nmdc_closes_total", "Connection closes by reason"),
        &["reason"]
    ).unwrap();

    /// Clone detections.
    pub static ref CLONES_DETECTED: IntCounter = IntCounter::new(
        "nmdc_clones_detected_total",
        "Clone detections"
    ).unwrap();

    /// Frames dropped because a consumer queue was full.
    pub static ref SLOW_CONSUMER_DROPS: IntCounter = IntCounter::new(
        "nmdc_slow_consumer_drops_total",
        "Frames dropped on full outbound queues"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Users currently in the list.
    pub static ref USERS_ONLINE: IntGauge = IntGauge::new(
        "nmdc_users_online",
        "Users currently listed"
    ).unwrap();

    /// Sum of visible shares, bytes.
    pub static ref TOTAL_SHARE: IntGauge = IntGauge::new(
        "nmdc_total_share_bytes",
        "Sum of visible user shares"
    ).unwrap();

    /// Current system-load level, 0 (normal) to 4 (system down).
    pub static ref SYS_LOAD: IntGauge = IntGauge::new(
        "nmdc_sys_load_level",
        "System load level"
    ).unwrap();

    /// Active temp bans across both tables.
    pub static ref TEMP_BANS: IntGauge = IntGauge::new(
        "nmdc_temp_bans",
        "Active temporary bans"
    ).unwrap();
}

/// Register every metric with the registry. Call once at startup.
pub fn init() {
    let registry = &*REGISTRY;
    registry.register(Box::new(FRAMES_IN.clone())).ok();
    registry.register(Box::new(BYTES_IN.clone())).ok();
    registry.register(Box::new(BYTES_OUT.clone())).ok();
    registry.register(Box::new(ZPIPE_SAVED.clone())).ok();
    registry.register(Box::new(TTHS_SAVED.clone())).ok();
    registry.register(Box::new(FLOOD_HITS.clone())).ok();
    registry.register(Box::new(FLOOD_LOCKS.clone())).ok();
    registry.register(Box::new(CLOSES.clone())).ok();
    registry.register(Box::new(CLONES_DETECTED.clone())).ok();
    registry.register(Box::new(SLOW_CONSUMER_DROPS.clone())).ok();
    registry.register(Box::new(USERS_ONLINE.clone())).ok();
    registry.register(Box::new(TOTAL_SHARE.clone())).ok();
    registry.register(Box::new(SYS_LOAD.clone())).ok();
    registry.register(Box::new(TEMP_BANS.clone())).ok();
}

/// Render the registry in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();

    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }

    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_gather() {
        init();
        FRAMES_IN.with_label_values(&["Chat"]).inc();
        USERS_ONLINE.set(3);
        let text = gather_metrics();
        assert!(text.contains("nmdc_users_online"));
        assert!(text.contains("nmdc_frames_in_total"));
    }
}
