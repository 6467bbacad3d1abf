//! Series: the variable-length container behind every collection.
//!
//! A series node carries a flavor discriminating its subclass (array,
//! binary, string, symbol, keylist, varlist, details, patch, feed-splice,
//! API handle, bookmark), series-wide info bits, and a cooperative hold
//! count. Managed/marked/root state lives in the pool's node tag byte, not
//! here; this node holds only what is series-specific.
//!
//! Several flavors are "singular": their content is one embedded cell
//! (patches, API handles). Dynamic flavors carry {used, rest, bias}
//! accounting through their backing vector plus an explicit bias.

use crate::cell::{Binding, Cell};
use crate::node::{ActionId, ArrayId, ContextId, KeylistId, PatchId, SymbolId};
use bitflags::bitflags;

bitflags! {
    /// Series-specific info bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SeriesInfo: u16 {
        /// Element writes are refused (symbols, locked source).
        const READ_ONLY = 0x0001;
        /// Deep-frozen: this series and everything it reaches is immutable.
        const FROZEN_DEEP = 0x0002;
        /// A frame context whose invocation has ended; lookups fail.
        const INACCESSIBLE = 0x0004;
    }
}

/// Flavor byte values, one per series subclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flavor {
    Array = 1,
    Binary = 2,
    String = 3,
    Symbol = 4,
    Keylist = 5,
    Varlist = 6,
    Details = 7,
    Patch = 8,
    FeedSplice = 9,
    ApiHandle = 10,
    Bookmark = 11,
}

/// Cells plus explicit head bias (elements dropped from the front without
/// moving memory).
#[derive(Debug, Default)]
pub struct ArrayContent {
    pub cells: Vec<Cell>,
    pub bias: u32,
}

/// An interned spelling. Read-only except the two binder-index slots, which
/// a binder may use transiently, and only on the canon member of the ring.
#[derive(Debug)]
pub struct SymbolContent {
    pub spelling: Box<str>,
    /// Circular ring through the other casings of this spelling.
    pub ring_next: SymbolId,
    /// True on the casing that owns the binder-index slots.
    pub is_canon: bool,
    /// Transient binder slots; zero means "absent". See `mica-runtime`'s
    /// binder for the exclusivity rules.
    pub bind_low: u32,
    pub bind_high: u32,
}

/// Symbols keying a context's slots. The ancestor link points at the
/// keylist this one was derived from; a self-link terminates the chain.
#[derive(Debug)]
pub struct KeylistContent {
    pub keys: Vec<SymbolId>,
    pub ancestor: KeylistId,
}

/// A context's variables. Slot 0 is the archetype cell naming the context
/// kind; slot `i >= 1` is the value of key `i` in the keylist.
#[derive(Debug)]
pub struct VarlistContent {
    pub cells: Vec<Cell>,
    pub keylist: KeylistId,
    /// Most recently created virtual-binding patch over this context; the
    /// full variants ring is reachable from it.
    pub patches: Option<PatchId>,
    /// For frame contexts: the action being invoked.
    pub action: Option<ActionId>,
    /// For frame contexts: the binding captured from the invoking cell,
    /// consulted by derived-binding lookups.
    pub frame_binding: Binding,
}

/// An action's private state. Slot 0 is the archetype; later slots carry
/// dispatcher-owned cells (body, exemplar, partials).
#[derive(Debug)]
pub struct DetailsContent {
    pub cells: Vec<Cell>,
    pub paramlist: KeylistId,
    pub params: Vec<crate::action::ParamSpec>,
    /// Index into the machine's dispatcher table.
    pub dispatcher: u32,
    /// The action whose body cells this one reuses (self for base actions);
    /// relative binding accepts frames of any action along this relation.
    pub underlying: ActionId,
    pub flags: crate::action::ActionFlags,
}

/// What a patch's next-link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchNext {
    Patch(PatchId),
    /// Chain terminator: a frame varlist that resolves relative words.
    Frame(ContextId),
    None,
}

/// One virtual-binding overlay layer (a singular series).
///
/// The embedded cell is a word bound to the overlay context; its stored
/// index caches the context's length at patch-creation time so derived
/// lookups stay sound if the context later grows.
#[derive(Debug)]
pub struct PatchContent {
    pub cell: Cell,
    pub next: PatchNext,
    /// Circular ring threading every patch over the same context.
    pub variant_next: PatchId,
    /// Set when `make_or_reuse_patch` handed out an existing variant.
    pub reused: bool,
    /// Slot aliases an outer variable (enumeration constructs); lookup
    /// cache hits are not recorded against reuse-marked patches.
    pub bind_reuse: bool,
}

/// Array position a feed is consuming.
#[derive(Debug, Clone, Copy)]
pub struct SpliceContent {
    pub array: ArrayId,
    pub index: u32,
}

/// A singular array owning one API cell; linked into the allocating
/// frame's handle list so failure unwinding frees it.
#[derive(Debug)]
pub struct HandleContent {
    pub cell: Cell,
}

/// Cached index/offset pair for position lookups in strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookmarkContent {
    pub index: u32,
    pub offset: u32,
}

/// Flavor-discriminated series content.
#[derive(Debug)]
pub enum Flavored {
    Array(ArrayContent),
    Binary(Vec<u8>),
    String(String),
    Symbol(SymbolContent),
    Keylist(KeylistContent),
    Varlist(VarlistContent),
    Details(DetailsContent),
    Patch(PatchContent),
    FeedSplice(SpliceContent),
    ApiHandle(HandleContent),
    Bookmark(BookmarkContent),
}

/// A series node: info bits, hold count, flavored content.
#[derive(Debug)]
pub struct SeriesNode {
    pub info: SeriesInfo,
    /// Cooperative read locks taken by enumerating frames.
    pub holds: u16,
    pub content: Flavored,
}

impl SeriesNode {
    pub fn new(content: Flavored) -> SeriesNode {
        SeriesNode {
            info: SeriesInfo::empty(),
            holds: 0,
            content,
        }
    }

    #[inline]
    pub fn flavor(&self) -> Flavor {
        match self.content {
            Flavored::Array(_) => Flavor::Array,
            Flavored::Binary(_) => Flavor::Binary,
            Flavored::String(_) => Flavor::String,
            Flavored::Symbol(_) => Flavor::Symbol,
            Flavored::Keylist(_) => Flavor::Keylist,
            Flavored::Varlist(_) => Flavor::Varlist,
            Flavored::Details(_) => Flavor::Details,
            Flavored::Patch(_) => Flavor::Patch,
            Flavored::FeedSplice(_) => Flavor::FeedSplice,
            Flavored::ApiHandle(_) => Flavor::ApiHandle,
            Flavored::Bookmark(_) => Flavor::Bookmark,
        }
    }

    /// Mutation is refused while read-only, frozen, or held.
    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.holds == 0
            && !self
                .info
                .intersects(SeriesInfo::READ_ONLY | SeriesInfo::FROZEN_DEEP)
    }

    #[inline]
    pub fn take_hold(&mut self) {
        self.holds = self.holds.checked_add(1).expect("hold count overflow");
    }

    #[inline]
    pub fn release_hold(&mut self) {
        debug_assert!(self.holds > 0, "release of untaken hold");
        self.holds -= 1;
    }

    // -- flavor-checked accessors ---------------------------------------

    pub fn as_array(&self) -> &ArrayContent {
        match &self.content {
            Flavored::Array(a) => a,
            other => panic!("expected array flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_array_mut(&mut self) -> &mut ArrayContent {
        match &mut self.content {
            Flavored::Array(a) => a,
            other => panic!("expected array flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_symbol(&self) -> &SymbolContent {
        match &self.content {
            Flavored::Symbol(s) => s,
            other => panic!("expected symbol flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_symbol_mut(&mut self) -> &mut SymbolContent {
        match &mut self.content {
            Flavored::Symbol(s) => s,
            other => panic!("expected symbol flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_keylist(&self) -> &KeylistContent {
        match &self.content {
            Flavored::Keylist(k) => k,
            other => panic!("expected keylist flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_keylist_mut(&mut self) -> &mut KeylistContent {
        match &mut self.content {
            Flavored::Keylist(k) => k,
            other => panic!("expected keylist flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_varlist(&self) -> &VarlistContent {
        match &self.content {
            Flavored::Varlist(v) => v,
            other => panic!("expected varlist flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_varlist_mut(&mut self) -> &mut VarlistContent {
        match &mut self.content {
            Flavored::Varlist(v) => v,
            other => panic!("expected varlist flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_details(&self) -> &DetailsContent {
        match &self.content {
            Flavored::Details(d) => d,
            other => panic!("expected details flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_details_mut(&mut self) -> &mut DetailsContent {
        match &mut self.content {
            Flavored::Details(d) => d,
            other => panic!("expected details flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_patch(&self) -> &PatchContent {
        match &self.content {
            Flavored::Patch(p) => p,
            other => panic!("expected patch flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_patch_mut(&mut self) -> &mut PatchContent {
        match &mut self.content {
            Flavored::Patch(p) => p,
            other => panic!("expected patch flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_splice(&self) -> &SpliceContent {
        match &self.content {
            Flavored::FeedSplice(s) => s,
            other => panic!("expected feed-splice flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_splice_mut(&mut self) -> &mut SpliceContent {
        match &mut self.content {
            Flavored::FeedSplice(s) => s,
            other => panic!("expected feed-splice flavor, found {:?}", flavor_of(other)),
        }
    }

    pub fn as_handle(&self) -> &HandleContent {
        match &self.content {
            Flavored::ApiHandle(h) => h,
            other => panic!("expected api-handle flavor, found {:?}", flavor_of(other)),
        }
    }
}

fn flavor_of(content: &Flavored) -> Flavor {
    // Rebuild a node view just for the panic message.
    match content {
        Flavored::Array(_) => Flavor::Array,
        Flavored::Binary(_) => Flavor::Binary,
        Flavored::String(_) => Flavor::String,
        Flavored::Symbol(_) => Flavor::Symbol,
        Flavored::Keylist(_) => Flavor::Keylist,
        Flavored::Varlist(_) => Flavor::Varlist,
        Flavored::Details(_) => Flavor::Details,
        Flavored::Patch(_) => Flavor::Patch,
        Flavored::FeedSplice(_) => Flavor::FeedSplice,
        Flavored::ApiHandle(_) => Flavor::ApiHandle,
        Flavored::Bookmark(_) => Flavor::Bookmark,
    }
}

impl ArrayContent {
    #[inline]
    pub fn used(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn rest(&self) -> usize {
        self.cells.capacity() - self.cells.len()
    }
}
