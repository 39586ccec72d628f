//! Re-entrancy guard for the periodic acquisition callback.
//!
//! The acquisition runs from a timer interrupt and blocks on the bus for the
//! whole drain. If the timer fires again before the previous run finished,
//! the new invocation must back off instead of interleaving bus transactions.

use core::sync::atomic::{AtomicBool, Ordering::{Acquire, Release}};

/// A flag marking an acquisition as in progress.
///
/// Intended to live in a `static` shared between the interrupt handler and the
/// rest of the firmware.
pub struct BusyFlag {
    busy: AtomicBool,
}

impl BusyFlag {
    /// Creates a released flag.
    pub const fn new() -> Self {
        Self { busy: AtomicBool::new(false) }
    }

    /// Claims the flag. Returns `None` if another invocation still holds it.
    pub fn try_enter(&self) -> Option<BusyGuard<'_>> {
        match self.busy.compare_exchange(false, true, Acquire, Acquire) {
            Ok(_) => Some(BusyGuard { flag: self }),
            Err(_) => {
                debug!("acquisition already running, skipping");
                None
            }
        }
    }

    /// Returns `true` while a [`BusyGuard`] is alive.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Acquire)
    }
}

impl Default for BusyFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a [`BusyFlag`] until dropped.
pub struct BusyGuard<'a> {
    flag: &'a BusyFlag,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.busy.store(false, Release);
    }
}
