//! Command-processing telemetry.
//!
//! A lightweight timer dropped around handler dispatch; logs slow commands
//! so misbehaving hooks or handlers show up without a profiler.

use std::time::Instant;

/// Handlers slower than this get logged.
const SLOW_COMMAND_MS: u128 = 50;

/// Times one command from construction to drop.
pub struct CommandTimer {
    kind: &'static str,
    started: Instant,
}

impl CommandTimer {
    pub fn start(kind: &'static str) -> CommandTimer {
        CommandTimer {
            kind,
            started: Instant::now(),
        }
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();

        if elapsed.as_millis() >= SLOW_COMMAND_MS {
            tracing::warn!(
                command = self.kind,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow command"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_is_droppable() {
        let timer = CommandTimer::start("Chat");
        drop(timer);
    }
}
