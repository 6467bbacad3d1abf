//! The binder: scoped installation of slot indices onto symbols.
//!
//! A bind pass needs to ask "does this spelling live in the context I am
//! binding against?" once per word. Instead of a side hash table, each
//! canon symbol reserves two small integer slots; a binder claims one of
//! them for its scope, writes 1-based indices during setup, and must
//! remove everything it added before finishing. Index zero is reserved to
//! mean "absent".
//!
//! Two binders may run at once (one per slot). The claim is enforced with
//! process-wide flags; a third simultaneous binder is a programming error
//! and panics. Leaks are a fatal invariant violation: dropping a binder
//! that still has indices installed asserts in debug builds.

use mica_core::{Heap, SymbolId};
use std::sync::atomic::{AtomicBool, Ordering};

static CLAIM_LOW: AtomicBool = AtomicBool::new(false);
static CLAIM_HIGH: AtomicBool = AtomicBool::new(false);

/// Which of the two per-symbol slots a binder owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderSlot {
    Low,
    High,
}

pub struct Binder {
    high: bool,
    set_count: usize,
    finished: bool,
}

impl Binder {
    /// Claim a slot for this dynamic scope.
    ///
    /// # Panics
    ///
    /// Panics if the slot is already claimed by a live binder.
    pub fn new(slot: BinderSlot) -> Binder {
        let claim = match slot {
            BinderSlot::Low => &CLAIM_LOW,
            BinderSlot::High => &CLAIM_HIGH,
        };
        let taken = claim.swap(true, Ordering::SeqCst);
        assert!(!taken, "binder slot {:?} is already in use", slot);
        Binder {
            high: slot == BinderSlot::High,
            set_count: 0,
            finished: false,
        }
    }

    /// Claim whichever slot is free.
    pub fn new_any() -> Binder {
        if !CLAIM_LOW.swap(true, Ordering::SeqCst) {
            return Binder {
                high: false,
                set_count: 0,
                finished: false,
            };
        }
        Binder::new(BinderSlot::High)
    }

    /// Install `index` for `symbol` iff no index is installed yet.
    /// Returns whether the write happened. `index` must be nonzero.
    pub fn try_add(&mut self, heap: &mut Heap, symbol: SymbolId, index: u32) -> bool {
        debug_assert!(index != 0, "index zero is reserved for absent");
        let canon = heap.canon_of(symbol);
        if heap.bind_index(canon, self.high) != 0 {
            return false;
        }
        heap.set_bind_index(canon, self.high, index);
        self.set_count += 1;
        true
    }

    /// The installed index, or zero when absent.
    pub fn get_else_zero(&self, heap: &Heap, symbol: SymbolId) -> u32 {
        let canon = heap.canon_of(symbol);
        heap.bind_index(canon, self.high)
    }

    /// Remove and return the installed index (zero when absent).
    pub fn remove_else_zero(&mut self, heap: &mut Heap, symbol: SymbolId) -> u32 {
        let canon = heap.canon_of(symbol);
        let previous = heap.set_bind_index(canon, self.high, 0);
        if previous != 0 {
            self.set_count -= 1;
        }
        previous
    }

    /// Number of symbols currently carrying an index from this binder.
    pub fn set_count(&self) -> usize {
        self.set_count
    }

    /// Tear down in the same dynamic scope as `new`. Leaving indices
    /// installed would corrupt the next binder using this slot, so the
    /// leak check is an assertion rather than a silent cleanup.
    pub fn finish(mut self) {
        self.finished = true;
        self.release_claim();
        debug_assert_eq!(self.set_count, 0, "binder leaked {} indices", self.set_count);
    }

    fn release_claim(&self) {
        let claim = if self.high { &CLAIM_HIGH } else { &CLAIM_LOW };
        claim.store(false, Ordering::SeqCst);
    }
}

impl Drop for Binder {
    fn drop(&mut self) {
        if !self.finished {
            self.release_claim();
            debug_assert_eq!(
                self.set_count, 0,
                "binder dropped with {} indices still installed",
                self.set_count
            );
        }
    }
}
