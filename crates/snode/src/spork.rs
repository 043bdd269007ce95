//! Network-wide feature flags.
//!
//! Flags are flipped by signed messages handled in the spork layer of the
//! surrounding process; the coordination layer only consumes the current
//! values.

use std::sync::atomic::{AtomicBool, Ordering};

pub struct SporkSet {
    /// Spork 6: hash-based signature format for snode messages.
    new_sigs: AtomicBool,
    /// Spork 8: reject blocks that skip the elected snode payment.
    payment_enforcement: AtomicBool,
    /// Spork 9: governance superblocks may trigger.
    superblocks_enabled: AtomicBool,
    /// Spork 10: only current-protocol snodes are paid.
    pay_updated_nodes: AtomicBool,
}

impl SporkSet {
    pub fn new() -> Self {
        Self {
            new_sigs: AtomicBool::new(true),
            payment_enforcement: AtomicBool::new(true),
            superblocks_enabled: AtomicBool::new(true),
            pay_updated_nodes: AtomicBool::new(true),
        }
    }

    pub fn new_sigs(&self) -> bool {
        self.new_sigs.load(Ordering::Relaxed)
    }

    pub fn set_new_sigs(&self, active: bool) {
        self.new_sigs.store(active, Ordering::Relaxed);
    }

    pub fn payment_enforcement(&self) -> bool {
        self.payment_enforcement.load(Ordering::Relaxed)
    }

    pub fn set_payment_enforcement(&self, active: bool) {
        self.payment_enforcement.store(active, Ordering::Relaxed);
    }

    pub fn superblocks_enabled(&self) -> bool {
        self.superblocks_enabled.load(Ordering::Relaxed)
    }

    pub fn set_superblocks_enabled(&self, active: bool) {
        self.superblocks_enabled.store(active, Ordering::Relaxed);
    }

    pub fn pay_updated_nodes(&self) -> bool {
        self.pay_updated_nodes.load(Ordering::Relaxed)
    }

    pub fn set_pay_updated_nodes(&self, active: bool) {
        self.pay_updated_nodes.store(active, Ordering::Relaxed);
    }
}

impl Default for SporkSet {
    fn default() -> Self {
        Self::new()
    }
}
