//! System-load derivation.
//!
//! A sampler task ticks four times a second; the meter tracks how many of
//! the expected ticks actually landed inside a rolling window. A starved
//! scheduler misses ticks, the achieved frequency drops, and the load level
//! climbs through five states. A total-upload threshold can push the level
//! one step further when the hub saturates its uplink.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Sampler cadence.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Rolling window the frequency is computed over.
const WINDOW: Duration = Duration::from_secs(10);

/// Ideal sample frequency, normalized to 1.0.
const IDEAL_PER_SEC: f64 = 4.0;

/// Five-level load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SysLoad {
    Normal,
    Progressive,
    Capacity,
    Recovery,
    SystemDown,
}

impl SysLoad {
    pub fn label(&self) -> &'static str {
        match self {
            SysLoad::Normal => "normal",
            SysLoad::Progressive => "progressive",
            SysLoad::Capacity => "capacity",
            SysLoad::Recovery => "recovery",
            SysLoad::SystemDown => "system_down",
        }
    }

    fn bump(self) -> SysLoad {
        match self {
            SysLoad::Normal => SysLoad::Progressive,
            SysLoad::Progressive => SysLoad::Capacity,
            SysLoad::Capacity => SysLoad::Recovery,
            _ => SysLoad::SystemDown,
        }
    }
}

/// Load meter fed by the sampler task and the byte counters.
#[derive(Debug)]
pub struct LoadMeter {
    samples: Mutex<VecDeque<Instant>>,
    /// Upload bytes since the last rate computation.
    upload_bytes: AtomicU64,
    upload_rate: AtomicU64,
    level: Mutex<SysLoad>,
}

impl Default for LoadMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadMeter {
    pub fn new() -> LoadMeter {
        LoadMeter {
            samples: Mutex::new(VecDeque::new()),
            upload_bytes: AtomicU64::new(0),
            upload_rate: AtomicU64::new(0),
            level: Mutex::new(SysLoad::Normal),
        }
    }

    /// Record one sampler tick and recompute the level.
    ///
    /// `min_frequency` is the configured floor of the normalized achieved
    /// frequency; `max_upload_bps` of 0 disables the upload clause.
    pub fn tick(&self, now: Instant, min_frequency: f64, max_upload_bps: u64) {
        let frequency = {
            let mut samples = self.samples.lock();
            samples.push_back(now);

            while let Some(front) = samples.front() {
                if now.duration_since(*front) > WINDOW {
                    samples.pop_front();
                } else {
                    break;
                }
            }

            let elapsed = samples
                .front()
                .map(|f| now.duration_since(*f).as_secs_f64())
                .unwrap_or(0.0)
                .max(1.0);

            samples.len() as f64 / elapsed / IDEAL_PER_SEC
        };

        // Fold the byte counter into a rate once a second's worth of ticks
        // passed; cheap enough to do every tick at this cadence.
        let bytes = self.upload_bytes.swap(0, Ordering::Relaxed);
        let rate = (bytes as f64 * IDEAL_PER_SEC) as u64;
        self.upload_rate.store(rate, Ordering::Relaxed);

        let mut level = if frequency >= min_frequency {
            SysLoad::Normal
        } else if frequency >= min_frequency * 0.75 {
            SysLoad::Progressive
        } else if frequency >= min_frequency * 0.5 {
            SysLoad::Capacity
        } else if frequency >= min_frequency * 0.25 {
            SysLoad::Recovery
        } else {
            SysLoad::SystemDown
        };

        if max_upload_bps > 0 && rate > max_upload_bps {
            level = level.bump();
        }

        *self.level.lock() = level;
    }

    /// Account outbound bytes toward the upload clause.
    pub fn add_upload(&self, bytes: u64) {
        self.upload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn level(&self) -> SysLoad {
        *self.level.lock()
    }

    /// Test hook: force a level.
    #[cfg(test)]
    pub fn set_level(&self, level: SysLoad) {
        *self.level.lock() = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_sampling_is_normal() {
        let meter = LoadMeter::new();
        let start = Instant::now();

        for i in 0..40u64 {
            meter.tick(start + Duration::from_millis(250 * i), 0.4, 0);
        }

        assert_eq!(meter.level(), SysLoad::Normal);
    }

    #[test]
    fn starved_sampling_degrades() {
        let meter = LoadMeter::new();
        let start = Instant::now();

        // Ticks landing at a tenth of the expected cadence.
        for i in 0..8u64 {
            meter.tick(start + Duration::from_millis(2500 * i), 0.4, 0);
        }

        assert!(meter.level() > SysLoad::Normal);
    }

    #[test]
    fn upload_threshold_bumps_level() {
        let meter = LoadMeter::new();
        let start = Instant::now();

        for i in 0..40u64 {
            meter.tick(start + Duration::from_millis(250 * i), 0.4, 0);
        }
        assert_eq!(meter.level(), SysLoad::Normal);

        meter.add_upload(1_000_000);
        meter.tick(start + Duration::from_millis(250 * 41), 0.4, 1000);
        assert_eq!(meter.level(), SysLoad::Progressive);
    }

    #[test]
    fn levels_order() {
        assert!(SysLoad::SystemDown > SysLoad::Recovery);
        assert!(SysLoad::Capacity > SysLoad::Progressive);
        assert_eq!(SysLoad::Capacity.bump(), SysLoad::Recovery);
        assert_eq!(SysLoad::SystemDown.bump(), SysLoad::SystemDown);
    }
}
