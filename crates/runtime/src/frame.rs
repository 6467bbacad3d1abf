//! Evaluator frames.
//!
//! A frame is the per-step (and per-invocation) state: the feed it reads,
//! its output and spare cells, the action being invoked with its varlist,
//! cursors for argument fulfillment, and the resource lists that make
//! unwinding safe. Frames form a strict LIFO stack owned by the machine;
//! dropping a frame releases its series holds, frees its API handles, and
//! rebalances the data stack, whether the frame ended normally or an
//! error is propagating through it.

use bitflags::bitflags;
use mica_core::{ActionId, Cell, ContextId, SeriesId, SymbolId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u16 {
        /// This frame is gathering an argument for an enclosing action;
        /// deferred enfix waits instead of grabbing.
        const FULFILLING_ARG = 0x0001;
        /// Out-of-order refinements sent fulfillment into a pickups pass;
        /// the GC must mark every argument slot, not only those below the
        /// cursor.
        const DOING_PICKUPS = 0x0002;
        /// The invoked action runs as enfix (first argument from output).
        const RUNNING_ENFIX = 0x0004;
        /// Keep the frame's varlist alive and accessible after the
        /// invocation ends.
        const KEEP_VARLIST = 0x0008;
    }
}

/// Coarse evaluator state, numbered in the frame state-byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameState {
    /// Dispatch on a freshly fetched value.
    Initial = 8,
    /// Output holds a value; only the upcoming word needs examining.
    LookingAhead = 9,
    /// A value supplied out-of-band is treated as just fetched.
    Reevaluating = 10,
    /// Walking the paramlist, filling argument slots.
    FulfillingArgs = 11,
    /// The action's dispatcher is running.
    Dispatching = 12,
}

pub struct Frame {
    pub state: FrameState,
    pub flags: FrameFlags,
    /// Index of the feed this frame consumes (shared with subframes).
    pub feed: usize,
    pub out: Cell,
    pub spare: Cell,
    pub prior: Option<usize>,
    /// Data-stack height at push time; restored at drop.
    pub dsp_base: usize,
    /// The action being invoked, if this is an action frame.
    pub original: Option<ActionId>,
    /// The frame context variables are fulfilled into.
    pub varlist: Option<ContextId>,
    /// Cursor into the paramlist during fulfillment.
    pub param_index: usize,
    pub label: Option<SymbolId>,
    /// Singular handle series owned by this frame; freed at drop.
    pub api_handles: Vec<SeriesId>,
    /// Series holds taken by this frame; released at drop.
    pub holds: Vec<SeriesId>,
    /// No-lookahead state cached across one action, restored on exit only
    /// when the action turned out invisible.
    pub cache_no_lookahead: bool,
}

impl Frame {
    pub fn new(feed: usize, prior: Option<usize>, dsp_base: usize) -> Frame {
        Frame {
            state: FrameState::Initial,
            flags: FrameFlags::empty(),
            feed,
            out: Cell::fresh(),
            spare: Cell::fresh(),
            prior,
            dsp_base,
            original: None,
            varlist: None,
            param_index: 0,
            label: None,
            api_handles: Vec::new(),
            holds: Vec::new(),
            cache_no_lookahead: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_is_fresh() {
        let frame = Frame::new(0, None, 0);
        assert_eq!(frame.state, FrameState::Initial);
        assert!(frame.out.is_end());
        assert!(frame.api_handles.is_empty());
        assert!(frame.holds.is_empty());
    }

    #[test]
    fn test_state_bytes_are_in_range() {
        for state in [
            FrameState::Initial,
            FrameState::LookingAhead,
            FrameState::Reevaluating,
            FrameState::FulfillingArgs,
            FrameState::Dispatching,
        ] {
            let byte = state as u8;
            assert!((8..=15).contains(&byte));
        }
    }
}
