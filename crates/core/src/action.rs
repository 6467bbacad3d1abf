//! Action parameter descriptions and action-level flags.
//!
//! An action is a details array (slot 0 archetype, later slots dispatcher
//! state) paired with a paramlist keylist. The details node itself lives in
//! `series::DetailsContent`; this module defines the parameter classes the
//! evaluator's argument fulfillment dispatches on, and the per-action flags
//! that drive enfix and invisibility handling.

use crate::cell::Cell;
use crate::error::CoreError;
use crate::heap::Heap;
use crate::kind::Kind;
use crate::node::{ActionId, ArrayId, SeriesId, SymbolId};
use crate::series::DetailsContent;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActionFlags: u8 {
        /// Consumes its first argument from the evaluator's just-produced
        /// output instead of the feed.
        const ENFIX = 0x01;
        /// Defers to a completed left-hand expression (`then`/`else`
        /// style); inside argument fulfillment it waits for the outer
        /// expression instead of grabbing the pending argument.
        const DEFERS_LOOKBACK = 0x02;
        /// Produces no observable result; the evaluator preserves the
        /// output cell across the invocation.
        const INVISIBLE = 0x04;
        /// First parameter is quoted, so lookahead hands over the left
        /// value unevaluated.
        const QUOTES_FIRST = 0x08;
        /// Enfix that groups rightward: gathering its right argument does
        /// not suppress lookahead, so `a # b # c` runs `b # c` first.
        const RIGHT_ASSOCIATIVE = 0x10;
    }
}

/// How one parameter slot is fulfilled at a callsite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamClass {
    /// Evaluate one full expression from the feed.
    Normal,
    /// Take the next feed cell verbatim.
    HardQuote,
    /// Literal, except groups and get-words evaluate.
    SoftQuote,
    /// As soft-quote, but yields to enfix lookahead on its left.
    MediumQuote,
    /// Evaluate, then quote the result (isotopes become quoted plain
    /// values); the meta convention.
    Literal,
    /// Definitional return slot; not fulfilled from the callsite.
    Return,
    /// Output slot; not fulfilled from the callsite.
    Output,
    /// Local variable; not fulfilled from the callsite.
    Local,
}

impl ParamClass {
    /// True for slots the callsite never supplies.
    #[inline]
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            ParamClass::Return | ParamClass::Output | ParamClass::Local
        )
    }

    #[inline]
    pub fn is_quoting(self) -> bool {
        matches!(
            self,
            ParamClass::HardQuote | ParamClass::SoftQuote | ParamClass::MediumQuote
        )
    }
}

/// A set of hearts, one bit per kind byte (hearts fit in `0..64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeSet(u64);

impl TypeSet {
    pub const ANY: TypeSet = TypeSet(u64::MAX);

    pub fn of(kinds: &[Kind]) -> TypeSet {
        let mut bits = 0u64;
        for kind in kinds {
            bits |= 1 << (*kind as u8);
        }
        TypeSet(bits)
    }

    #[inline]
    pub fn accepts(self, kind: Kind) -> bool {
        self.0 & (1 << (kind as u8)) != 0
    }
}

/// One parameter of an action.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub symbol: SymbolId,
    pub class: ParamClass,
    /// Optional at the callsite; activated through a path refinement.
    pub refinement: bool,
    /// An enfix first parameter that declines when the left value's kind
    /// is not accepted, abandoning the lookahead.
    pub skippable: bool,
    pub accepts: TypeSet,
}

impl ParamSpec {
    pub fn new(symbol: SymbolId, class: ParamClass) -> ParamSpec {
        ParamSpec {
            symbol,
            class,
            refinement: false,
            skippable: false,
            accepts: TypeSet::ANY,
        }
    }

    pub fn refinement(symbol: SymbolId, class: ParamClass) -> ParamSpec {
        ParamSpec {
            symbol,
            class,
            refinement: true,
            skippable: false,
            accepts: TypeSet::ANY,
        }
    }
}

impl Heap {
    /// Create a base action: paramlist from the parameter symbols, details
    /// slot 0 the archetype, slot 1 the body (or blank for natives whose
    /// state lives entirely in the dispatcher).
    pub fn make_action(
        &mut self,
        params: Vec<ParamSpec>,
        dispatcher: u32,
        flags: ActionFlags,
        body: Option<ArrayId>,
    ) -> Result<ActionId, CoreError> {
        let keys: Vec<SymbolId> = params.iter().map(|p| p.symbol).collect();
        let paramlist = self.alloc_keylist(keys, None)?;
        let body_cell = match body {
            Some(array) => Cell::series(Kind::Block, array.series(), 0),
            None => Cell::blank(),
        };
        let content = DetailsContent {
            cells: vec![Cell::blank(), body_cell],
            paramlist,
            params,
            dispatcher,
            underlying: ActionId(SeriesId(u32::MAX)), // patched below
            flags,
        };
        let id = self.alloc_details(content)?;
        let details = self.series_mut(id.series()).as_details_mut();
        details.underlying = id;
        details.cells[0] = Cell::action(id);
        Ok(id)
    }

    /// Create an action reusing another's paramlist and body (the
    /// adapt/copy/hijack shape). Relative words bound to either action
    /// resolve in frames of the other, through the underlying relation.
    pub fn derive_action(
        &mut self,
        base: ActionId,
        dispatcher: u32,
        flags: ActionFlags,
    ) -> Result<ActionId, CoreError> {
        let source = self.details(base);
        let content = DetailsContent {
            cells: source.cells.clone(),
            paramlist: source.paramlist,
            params: source.params.clone(),
            dispatcher,
            underlying: base,
            flags,
        };
        let id = self.alloc_details(content)?;
        self.series_mut(id.series()).as_details_mut().cells[0] = Cell::action(id);
        Ok(id)
    }

    /// The body array stored in details slot 1, when the action has one.
    pub fn action_body(&self, id: ActionId) -> Option<ArrayId> {
        let cell = self.details(id).cells.get(1)?;
        let (series, _) = cell.series_parts()?;
        Some(ArrayId(series))
    }

    pub fn action_flags(&self, id: ActionId) -> ActionFlags {
        self.details(id).flags
    }
}
