use std::time::{Duration, Instant};

/// Server tick clock: milliseconds since the server started, truncated to the
/// 32-bit timestamp field of outbound frames.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    started: Instant,
}

impl TickClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> u32 {
        wrap_millis(self.started.elapsed())
    }
}

// Wraps around every ~49.7 days
pub fn wrap_millis(elapsed: Duration) -> u32 {
    (elapsed.as_millis() % (u32::MAX as u128 + 1)) as u32
}

// Convert a tick rate in Hz to a tick period
pub fn tick_duration(tick_rate: u32) -> Duration {
    Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64)
}
