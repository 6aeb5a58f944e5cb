use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Engine clock. Snapshot timestamps are monotonic; the wall-clock value
/// is derived from one anchor taken at construction, so it never steps
/// backwards when the system clock is adjusted mid-run.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
    unix_anchor_us: u64,
}

impl TimeBase {
    pub fn new() -> Self {
        let unix_anchor_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Self {
            start: Instant::now(),
            unix_anchor_us,
        }
    }

    /// Microseconds since the engine was built.
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Unix time in microseconds matching [`now_us`](Self::now_us).
    pub fn unix_us(&self) -> u64 {
        self.to_unix_us(self.now_us())
    }

    /// Convert an engine timestamp to unix microseconds.
    pub fn to_unix_us(&self, engine_us: u64) -> u64 {
        self.unix_anchor_us.saturating_add(engine_us)
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}
