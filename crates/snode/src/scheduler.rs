//! Periodic work driven by a dedicated scheduler thread.
//!
//! One second is the base cadence; slower jobs are derived from it. Each
//! callback checks the shutdown flag before doing anything expensive.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::tick;

use crate::sync::SYNC_TICK_SECONDS;
use crate::Core;

const MAINTENANCE_INTERVAL_SECONDS: u64 = 60;
const CACHE_FLUSH_INTERVAL_SECONDS: u64 = 60 * 60;

pub fn spawn(core: Arc<Core>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("snode-scheduler".to_string())
        .spawn(move || run(core))
        .expect("spawn snode scheduler")
}

fn run(core: Arc<Core>) {
    let ticker = tick(Duration::from_secs(1));
    let mut seconds: u64 = 0;
    while !core.shutdown_requested() {
        if ticker.recv().is_err() {
            break;
        }
        seconds += 1;

        core.drain_pending_requests();

        if seconds % SYNC_TICK_SECONDS as u64 == 0 {
            core.sync_tick();
        }
        if seconds % MAINTENANCE_INTERVAL_SECONDS == 0 {
            core.periodic_maintenance();
        }
        if seconds % CACHE_FLUSH_INTERVAL_SECONDS == 0 {
            if let Err(err) = core.flush_cache() {
                aurumd_log::log_warn!("cache flush failed: {err}");
            }
        }
    }
    // final flush on the way out
    if let Err(err) = core.flush_cache() {
        aurumd_log::log_warn!("cache flush failed: {err}");
    }
}
