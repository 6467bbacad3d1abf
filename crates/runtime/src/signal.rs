//! Asynchronous signal requests.
//!
//! The environment raises requests by setting bits in a process-wide
//! atomic mask; the evaluator polls between steps (never mid-step) and
//! maps each bit to its condition: recycle invokes the collection hook,
//! halt raises [`crate::RaiseError::Halted`], interrupt and event call
//! host hooks. Nothing runs in signal context here; an embedder's real
//! signal handler only needs the async-signal-safe [`request`].

use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sigmask: u32 {
        /// Ask the evaluator to run a garbage collection.
        const RECYCLE = 0x01;
        /// Unwind to the topmost handler.
        const HALT = 0x02;
        /// Host interrupt hook (debugger-style break).
        const INTERRUPT = 0x04;
        /// Host event-pump hook.
        const EVENT = 0x08;
    }
}

static SIGNAL_MASK: AtomicU32 = AtomicU32::new(0);

/// Merge bits into the pending mask. Async-signal-safe.
pub fn request(mask: Sigmask) {
    SIGNAL_MASK.fetch_or(mask.bits(), Ordering::SeqCst);
}

/// Take and clear all pending bits.
pub fn take() -> Sigmask {
    Sigmask::from_bits_truncate(SIGNAL_MASK.swap(0, Ordering::SeqCst))
}

/// Peek without clearing.
pub fn pending() -> Sigmask {
    Sigmask::from_bits_truncate(SIGNAL_MASK.load(Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_request_accumulates_and_take_clears() {
        take();
        request(Sigmask::RECYCLE);
        request(Sigmask::HALT);
        assert_eq!(pending(), Sigmask::RECYCLE | Sigmask::HALT);
        assert_eq!(take(), Sigmask::RECYCLE | Sigmask::HALT);
        assert_eq!(pending(), Sigmask::empty());
    }

    #[test]
    #[serial]
    fn test_take_on_idle_mask_is_empty() {
        take();
        assert_eq!(take(), Sigmask::empty());
    }
}
