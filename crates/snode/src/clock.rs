//! Injected time source.
//!
//! Every component reads time through this trait so tests can fast-forward
//! it. `adjusted_now` carries the peer-median offset and is used for
//! signature timestamps only, never for protocol-critical ordering.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now(&self) -> i64;

    fn adjusted_now(&self) -> i64 {
        self.now()
    }
}

pub struct SystemClock {
    offset: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            offset: AtomicI64::new(0),
        }
    }

    /// Median offset reported by peers, fed in by the transport.
    pub fn set_peer_offset(&self, offset: i64) {
        self.offset.store(offset, Ordering::Relaxed);
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs() as i64)
            .unwrap_or(0)
    }

    fn adjusted_now(&self) -> i64 {
        self.now() + self.offset.load(Ordering::Relaxed)
    }
}
