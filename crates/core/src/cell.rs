//! The uniform fixed-size value cell.
//!
//! A cell is the single storage unit the whole core traffics in: array
//! elements, context variable slots, frame outputs, feed lookback. The
//! layout is fixed at 40 bytes (five machine words on a 64-bit target) and
//! asserted by test, because pools and frames size themselves around it.
//!
//! A cell carries:
//! - a header flag word (node-discipline bits in the low byte, per-cell
//!   attribute bits in the high byte),
//! - a kind byte, which folds up to three levels of quoting into the type
//!   (`64*q + heart`),
//! - a heart byte naming the type the payload actually realizes,
//! - a virtual-binding lookup cache,
//! - a two-slot payload,
//! - a binding reference (see [`Binding`]).
//!
//! Cells are born fresh (kind byte 0) and must be written before anything
//! reads them; `debug_assert_readable` enforces that in debug builds. A
//! fresh cell is also how feed exhaustion ("end") is represented, and an
//! end cell must never be stored into a user-visible array slot.

use crate::kind::{self, Kind, MAX_INLINE_QUOTE};
use crate::node::{ActionId, ContextId, PatchId, SeriesId, SymbolId};
use bitflags::bitflags;

bitflags! {
    /// Cell header flags.
    ///
    /// The low byte mirrors the node tag-byte layout so a cell header can be
    /// inspected with the same discipline as any node header. The high byte
    /// holds per-cell attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u16 {
        const NODE = 0x0080;
        const FREE = 0x0040;
        const MANAGED = 0x0020;
        /// GC mark bit. Output cells are never marked by the GC, so the
        /// evaluator aliases this bit as its "stale" marker.
        const MARKED = 0x0010;
        const CHILD_A = 0x0008;
        const CHILD_B = 0x0004;
        const ROOT = 0x0002;
        const CELL = 0x0001;

        /// Writes through a variable raise a protected error.
        const PROTECTED = 0x0100;
        /// Copies of this cell refuse mutation of the referenced series.
        const CONST = 0x0200;
        /// Molding emits a line break before this value.
        const NEWLINE_BEFORE = 0x0400;
        /// Value reached its position without evaluation.
        const UNEVALUATED = 0x0800;
        /// Isotope form (a "heavy" null); decays on variable assignment.
        const ISOTOPE = 0x1000;
        /// Cell opted out of const inheritance from frames and feeds.
        const EXPLICITLY_MUTABLE = 0x2000;
    }
}

impl CellFlags {
    /// Evaluator stale marker (see the alias note on `MARKED`).
    pub const STALE: CellFlags = CellFlags::MARKED;

    /// Header of a plain live cell.
    #[inline]
    pub fn fresh() -> CellFlags {
        CellFlags::NODE | CellFlags::CELL
    }
}

/// Where a cell's references resolve, per the binding algebra.
///
/// `Unbound` covers both "word with only a spelling" and "array with no
/// attached environment"; the spelling itself lives in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// No binding; words carry their spelling in the payload.
    Unbound,
    /// Resolved against a concrete context's varlist.
    Specific(ContextId),
    /// Slot in some future frame of this action; meaningful only when a
    /// specifier supplies the frame.
    Relative(ActionId),
    /// Head of a virtual-binding overlay chain.
    Virtual(PatchId),
}

/// Per-word cache of the last virtual-binding resolution.
///
/// Stores the chain head the word was last resolved under and the ordinal
/// of the patch that answered (or a miss marker). A stale chain head simply
/// causes a linear re-search; the cache is advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordCache {
    chain: u32,
    ordinal: u32,
}

const CACHE_NO_CHAIN: u32 = u32::MAX;
const CACHE_MISS: u32 = u32::MAX;

/// Outcome recorded by a cached virtual lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedLookup {
    /// The patch at this ordinal position in the chain answered.
    Hit(u32),
    /// The whole chain was searched without an answer.
    Miss,
}

impl WordCache {
    #[inline]
    pub fn empty() -> WordCache {
        WordCache {
            chain: CACHE_NO_CHAIN,
            ordinal: 0,
        }
    }

    #[inline]
    pub fn get(&self, chain: PatchId) -> Option<CachedLookup> {
        if self.chain != chain.series().0 {
            return None;
        }
        if self.ordinal == CACHE_MISS {
            Some(CachedLookup::Miss)
        } else {
            Some(CachedLookup::Hit(self.ordinal))
        }
    }

    #[inline]
    pub fn set(&mut self, chain: PatchId, result: CachedLookup) {
        self.chain = chain.series().0;
        self.ordinal = match result {
            CachedLookup::Hit(ordinal) => ordinal,
            CachedLookup::Miss => CACHE_MISS,
        };
    }
}

/// The two payload slots of a cell.
///
/// Variants with a node child are what the header's child-mark bits talk
/// about; the GC visits `Series`, `Word`, `Context`, `Action`, and `Quoted`
/// payloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    /// Null, void, blank, comma, end: no payload.
    None,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    /// Positioned reference into a series (texts, binaries, any-arrays).
    Series { id: SeriesId, index: u32 },
    /// A word: interned spelling plus the bound slot index (0 = none).
    Word { symbol: SymbolId, index: u32 },
    /// Contexts (object, frame, error, port, module archetypes and values).
    Context(ContextId),
    Action(ActionId),
    /// Quoting deeper than three levels: shared singular array holding the
    /// unquoted cell, plus the total quote depth.
    Quoted { cell: SeriesId, depth: u8 },
}

/// The uniform value cell. See the module docs for layout.
#[derive(Debug, Clone)]
pub struct Cell {
    flags: CellFlags,
    kind: u8,
    heart: u8,
    cache: WordCache,
    payload: Payload,
    binding: Binding,
}

/// Structural identity: kind, heart, payload, and binding. Flags and the
/// lookup cache are attributes, not identity, so they are ignored; in
/// particular a heavy null compares equal to a plain null.
impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.heart == other.heart
            && self.payload == other.payload
            && self.binding == other.binding
    }
}

impl Cell {
    // -------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------

    /// A fresh (trash) cell: kind byte 0, must be written before read.
    #[inline]
    pub fn fresh() -> Cell {
        Cell {
            flags: CellFlags::fresh(),
            kind: 0,
            heart: 0,
            cache: WordCache::empty(),
            payload: Payload::None,
            binding: Binding::Unbound,
        }
    }

    fn new(heart: Kind, payload: Payload, binding: Binding) -> Cell {
        debug_assert!(heart != Kind::End);
        Cell {
            flags: CellFlags::fresh(),
            kind: heart as u8,
            heart: heart as u8,
            cache: WordCache::empty(),
            payload,
            binding,
        }
    }

    #[inline]
    pub fn nulled() -> Cell {
        Cell::new(Kind::Null, Payload::None, Binding::Unbound)
    }

    /// A "heavy" null: the isotope a branch-taking construct returns so a
    /// downstream `else` does not retrigger.
    #[inline]
    pub fn heavy_null() -> Cell {
        let mut cell = Cell::nulled();
        cell.flags |= CellFlags::ISOTOPE;
        cell
    }

    #[inline]
    pub fn voided() -> Cell {
        Cell::new(Kind::Void, Payload::None, Binding::Unbound)
    }

    #[inline]
    pub fn blank() -> Cell {
        Cell::new(Kind::Blank, Payload::None, Binding::Unbound)
    }

    #[inline]
    pub fn comma() -> Cell {
        Cell::new(Kind::Comma, Payload::None, Binding::Unbound)
    }

    #[inline]
    pub fn logic(value: bool) -> Cell {
        Cell::new(Kind::Logic, Payload::Logic(value), Binding::Unbound)
    }

    #[inline]
    pub fn integer(value: i64) -> Cell {
        Cell::new(Kind::Integer, Payload::Integer(value), Binding::Unbound)
    }

    #[inline]
    pub fn decimal(value: f64) -> Cell {
        Cell::new(Kind::Decimal, Payload::Decimal(value), Binding::Unbound)
    }

    /// A positioned series value (text, binary, or any-array kind).
    #[inline]
    pub fn series(heart: Kind, id: SeriesId, index: u32) -> Cell {
        debug_assert!(heart.any_array() || matches!(heart, Kind::Text | Kind::Binary));
        Cell::new(heart, Payload::Series { id, index }, Binding::Unbound)
    }

    /// An unbound word of any word kind.
    #[inline]
    pub fn word(heart: Kind, symbol: SymbolId) -> Cell {
        debug_assert!(heart.any_word());
        Cell::new(heart, Payload::Word { symbol, index: 0 }, Binding::Unbound)
    }

    /// A word bound specifically into `context` at `index` (1-based).
    #[inline]
    pub fn bound_word(heart: Kind, symbol: SymbolId, context: ContextId, index: u32) -> Cell {
        debug_assert!(index >= 1);
        let mut cell = Cell::word(heart, symbol);
        cell.payload = Payload::Word { symbol, index };
        cell.binding = Binding::Specific(context);
        cell
    }

    /// A word bound relative to an action's parameter slot.
    #[inline]
    pub fn relative_word(heart: Kind, symbol: SymbolId, action: ActionId, index: u32) -> Cell {
        debug_assert!(index >= 1);
        let mut cell = Cell::word(heart, symbol);
        cell.payload = Payload::Word { symbol, index };
        cell.binding = Binding::Relative(action);
        cell
    }

    #[inline]
    pub fn context(heart: Kind, id: ContextId) -> Cell {
        debug_assert!(heart.any_context());
        Cell::new(heart, Payload::Context(id), Binding::Unbound)
    }

    #[inline]
    pub fn action(id: ActionId) -> Cell {
        Cell::new(Kind::Action, Payload::Action(id), Binding::Unbound)
    }

    // -------------------------------------------------------------------
    // Header reads
    // -------------------------------------------------------------------

    #[inline]
    pub fn kind_byte(&self) -> u8 {
        self.kind
    }

    #[inline]
    pub fn heart_byte(&self) -> u8 {
        self.heart
    }

    /// The heart: the type the payload realizes, quoting stripped.
    #[inline]
    pub fn heart(&self) -> Kind {
        Kind::try_from(self.heart).expect("heart byte out of range")
    }

    /// Total quote depth, including any deep indirection.
    #[inline]
    pub fn quote_depth(&self) -> u8 {
        if let Payload::Quoted { depth, .. } = self.payload {
            depth
        } else {
            kind::split_kind_byte(self.kind).1
        }
    }

    #[inline]
    pub fn is_quoted(&self) -> bool {
        self.quote_depth() > 0
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.kind == 0
    }

    /// The kind dispatch sees: `End` for fresh cells, the quoted pseudo-kind
    /// for any quoting, otherwise the heart.
    #[inline]
    pub fn kind(&self) -> Kind {
        if self.is_end() {
            Kind::End
        } else if self.is_quoted() {
            Kind::Quoted
        } else {
            self.heart()
        }
    }

    #[inline]
    pub fn debug_assert_readable(&self) {
        debug_assert!(!self.is_end(), "read of a fresh or end cell");
        debug_assert!(!self.flags.contains(CellFlags::FREE), "read of freed cell");
    }

    // -------------------------------------------------------------------
    // Flags
    // -------------------------------------------------------------------

    #[inline]
    pub fn flags(&self) -> CellFlags {
        self.flags
    }

    #[inline]
    pub fn set_flag(&mut self, flag: CellFlags) {
        self.flags |= flag;
    }

    #[inline]
    pub fn clear_flag(&mut self, flag: CellFlags) {
        self.flags &= !flag;
    }

    #[inline]
    pub fn has_flag(&self, flag: CellFlags) -> bool {
        self.flags.contains(flag)
    }

    #[inline]
    pub fn is_heavy_null(&self) -> bool {
        self.heart == Kind::Null as u8 && self.flags.contains(CellFlags::ISOTOPE)
    }

    #[inline]
    pub fn is_nulled(&self) -> bool {
        self.heart == Kind::Null as u8 && !self.is_quoted()
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        self.heart == Kind::Void as u8 && !self.is_quoted()
    }

    /// Variable assignment decays isotopes back to their plain form.
    #[inline]
    pub fn decay(&mut self) {
        self.flags &= !CellFlags::ISOTOPE;
    }

    // -------------------------------------------------------------------
    // Payload and binding
    // -------------------------------------------------------------------

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[inline]
    pub fn binding(&self) -> Binding {
        self.binding
    }

    #[inline]
    pub fn set_binding(&mut self, binding: Binding) {
        self.binding = binding;
    }

    /// Rewrite the payload; internal constructors and the heap use this.
    #[inline]
    pub(crate) fn set_payload(&mut self, payload: Payload) {
        self.payload = payload;
    }

    /// Rewrite the kind and heart bytes; the heap's deep-quoting machinery
    /// uses this when spilling depth out of the kind byte.
    #[inline]
    pub(crate) fn set_kind_bytes(&mut self, kind: u8, heart: u8) {
        self.kind = kind;
        self.heart = heart;
    }

    #[inline]
    pub fn cache(&self) -> &WordCache {
        &self.cache
    }

    #[inline]
    pub fn cache_mut(&mut self) -> &mut WordCache {
        &mut self.cache
    }

    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self.payload {
            Payload::Integer(n) if !self.is_quoted() => Some(n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_logic(&self) -> Option<bool> {
        match self.payload {
            Payload::Logic(b) if !self.is_quoted() => Some(b),
            _ => None,
        }
    }

    /// Spelling and bound index of a word cell.
    #[inline]
    pub fn word_parts(&self) -> Option<(SymbolId, u32)> {
        match self.payload {
            Payload::Word { symbol, index } => Some((symbol, index)),
            _ => None,
        }
    }

    #[inline]
    pub fn set_word_index(&mut self, index: u32) {
        if let Payload::Word { symbol, .. } = self.payload {
            self.payload = Payload::Word { symbol, index };
        } else {
            panic!("set_word_index on non-word cell");
        }
    }

    /// Series id and position of a positioned series cell.
    #[inline]
    pub fn series_parts(&self) -> Option<(SeriesId, u32)> {
        match self.payload {
            Payload::Series { id, index } => Some((id, index)),
            _ => None,
        }
    }

    #[inline]
    pub fn as_context(&self) -> Option<ContextId> {
        match self.payload {
            Payload::Context(id) => Some(id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_action(&self) -> Option<ActionId> {
        match self.payload {
            Payload::Action(id) => Some(id),
            _ => None,
        }
    }

    // -------------------------------------------------------------------
    // Quoting (the inline portion; deep indirection lives on the heap)
    // -------------------------------------------------------------------

    /// Add quoting levels if the result still fits in the kind byte.
    /// Returns false when the caller must fall back to deep indirection.
    #[must_use]
    pub fn try_quotify_inline(&mut self, levels: u8) -> bool {
        debug_assert!(!self.is_end());
        if matches!(self.payload, Payload::Quoted { .. }) {
            return false;
        }
        let (heart, depth) = kind::split_kind_byte(self.kind);
        let Some(new_depth) = depth.checked_add(levels) else {
            return false;
        };
        if new_depth > MAX_INLINE_QUOTE {
            return false;
        }
        self.kind = kind::kind_byte(Kind::try_from(heart).expect("heart in range"), new_depth);
        true
    }

    /// Remove one quoting level from an inline-quoted cell.
    ///
    /// Deep-quoted cells (payload indirection) are unquoted by the heap,
    /// which can reach the shared cell.
    pub fn unquotify_inline(&mut self) {
        debug_assert!(self.is_quoted());
        debug_assert!(!matches!(self.payload, Payload::Quoted { .. }));
        let (heart, depth) = kind::split_kind_byte(self.kind);
        debug_assert!(depth > 0);
        self.kind = kind::kind_byte(Kind::try_from(heart).expect("heart in range"), depth - 1);
    }
}
