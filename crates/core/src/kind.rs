//! The closed kind taxonomy and its category predicates.
//!
//! Every cell carries a kind byte. The byte space is shared with quoting:
//! bytes `1..=63` are the base kinds, and `64*q + k` encodes kind `k` quoted
//! `q` times (`q <= 3`). Deeper quoting uses the reserved [`Kind::Quoted`]
//! heart, which indirects to a shared cell (see `cell::Payload::Quoted`).
//!
//! The numeric ordering is load-bearing: the category predicates below are
//! range tests, so the declaration order groups `any-array`, `any-path`,
//! `any-word`, and `any-context` into contiguous runs. Reordering variants
//! breaks dispatch.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Number of distinct heart bytes (`0..=63`); quoting multiplies this space.
pub const KIND_MODULUS: u8 = 64;

/// Maximum quoting depth representable inside a kind byte.
pub const MAX_INLINE_QUOTE: u8 = 3;

/// Base datatype kinds, one per heart byte.
///
/// `End` is a pseudo-kind: it marks feed exhaustion and fresh frame output
/// slots, and must never be stored into a user-visible array slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Kind {
    End = 0,
    Null = 1,
    Void = 2,
    Blank = 3,
    /// Expression barrier (the comma token).
    Comma = 4,
    Logic = 5,
    Integer = 6,
    Decimal = 7,
    Text = 8,
    Binary = 9,

    // -- any-array range (Block..=GetPath); paths are arrays too
    Block = 10,
    Group = 11,
    // -- any-path range (Path..=GetPath)
    Path = 12,
    SetPath = 13,
    GetPath = 14,

    // -- any-word range (Word..=MetaWord)
    Word = 15,
    SetWord = 16,
    GetWord = 17,
    MetaWord = 18,

    Action = 19,

    // -- any-context range (Object..=Module)
    Object = 20,
    Frame = 21,
    Error = 22,
    Port = 23,
    Module = 24,

    /// Reserved heart for quoting deeper than [`MAX_INLINE_QUOTE`] levels.
    Quoted = 63,
}

impl Kind {
    /// True for kinds stored as a series payload of cells.
    #[inline]
    pub fn any_array(self) -> bool {
        (Kind::Block as u8..=Kind::GetPath as u8).contains(&(self as u8))
    }

    /// True for the path kinds (a subrange of the arrays).
    #[inline]
    pub fn any_path(self) -> bool {
        (Kind::Path as u8..=Kind::GetPath as u8).contains(&(self as u8))
    }

    /// True for the word kinds.
    #[inline]
    pub fn any_word(self) -> bool {
        (Kind::Word as u8..=Kind::MetaWord as u8).contains(&(self as u8))
    }

    /// True for kinds whose payload is a context.
    #[inline]
    pub fn any_context(self) -> bool {
        (Kind::Object as u8..=Kind::Module as u8).contains(&(self as u8))
    }

    /// True for kinds the evaluator copies to the output without dispatch.
    ///
    /// Blocks are inert: only groups evaluate their contents.
    #[inline]
    pub fn is_inert(self) -> bool {
        matches!(
            self,
            Kind::Blank
                | Kind::Logic
                | Kind::Integer
                | Kind::Decimal
                | Kind::Text
                | Kind::Binary
                | Kind::Block
        ) || self.any_context()
    }

    /// True for kinds with their own evaluator dispatch path.
    #[inline]
    pub fn is_evaluative(self) -> bool {
        matches!(self, Kind::Comma | Kind::Group | Kind::Action)
            || self.any_path()
            || self.any_word()
    }

    /// The set-word flavored twin of a word/path kind, if it has one.
    #[inline]
    pub fn is_set_form(self) -> bool {
        matches!(self, Kind::SetWord | Kind::SetPath)
    }
}

/// Compose a kind byte from a heart and an in-cell quoting depth.
///
/// Callers must keep `depth <= MAX_INLINE_QUOTE`; deeper quoting goes through
/// the `Quoted` indirection instead.
#[inline]
pub fn kind_byte(heart: Kind, depth: u8) -> u8 {
    debug_assert!(depth <= MAX_INLINE_QUOTE);
    debug_assert!(heart != Kind::End || depth == 0);
    KIND_MODULUS * depth + heart as u8
}

/// Split a kind byte into (heart byte, quoting depth).
#[inline]
pub fn split_kind_byte(byte: u8) -> (u8, u8) {
    (byte % KIND_MODULUS, byte / KIND_MODULUS)
}
