//! Per-peer request bookkeeping.
//!
//! Remembers which request kinds an address has already served or been
//! served, so repeats inside the window can be refused or penalized.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

/// How long a fulfilled request stays on record.
pub const FULFILLED_REQUEST_EXPIRE_SECONDS: i64 = 60 * 60;

pub struct FulfilledRequests {
    map: Mutex<HashMap<(SocketAddr, &'static str), i64>>,
}

impl FulfilledRequests {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn has(&self, addr: SocketAddr, name: &'static str) -> bool {
        let map = self.map.lock().expect("fulfilled lock");
        map.contains_key(&(addr, name))
    }

    pub fn add(&self, addr: SocketAddr, name: &'static str, now: i64) {
        let mut map = self.map.lock().expect("fulfilled lock");
        map.insert((addr, name), now + FULFILLED_REQUEST_EXPIRE_SECONDS);
    }

    pub fn check_and_remove(&self, now: i64) {
        let mut map = self.map.lock().expect("fulfilled lock");
        map.retain(|_, expires_at| *expires_at > now);
    }

    pub fn clear(&self) {
        let mut map = self.map.lock().expect("fulfilled lock");
        map.clear();
    }
}

impl Default for FulfilledRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_expire() {
        let fulfilled = FulfilledRequests::new();
        let addr: SocketAddr = "203.0.113.5:7215".parse().expect("addr");
        fulfilled.add(addr, "list-sync", 1000);
        assert!(fulfilled.has(addr, "list-sync"));
        assert!(!fulfilled.has(addr, "payment-sync"));

        fulfilled.check_and_remove(1000 + FULFILLED_REQUEST_EXPIRE_SECONDS - 1);
        assert!(fulfilled.has(addr, "list-sync"));

        fulfilled.check_and_remove(1000 + FULFILLED_REQUEST_EXPIRE_SECONDS + 1);
        assert!(!fulfilled.has(addr, "list-sync"));
    }
}
