use super::packet::PacketId;
use std::sync::atomic::{AtomicU16, Ordering};

/// Packet identifier source shared by every producer of one client
///
/// Yields `1..=65535` and wraps around, skipping zero.
#[derive(Debug)]
pub struct Counter {
    last: AtomicU16,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            last: AtomicU16::new(0),
        }
    }

    pub fn next_id(&self) -> PacketId {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = match current.wrapping_add(1) {
                0 => 1,
                id => id,
            };
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}
