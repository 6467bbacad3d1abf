//! Contexts: a varlist of value slots paired with a keylist of symbols.
//!
//! Slot 0 of the varlist is the archetype cell naming the context type;
//! the value of key `i` lives in slot `i` (1-based). Keylists chain to the
//! keylist they were derived from through an ancestor link, and that chain
//! (walked leaf to root) is the substrate derived binding is decided on.
//!
//! Frame contexts are ordinary contexts keyed by an action's paramlist.
//! When the invocation ends without the varlist being kept, the frame is
//! expired: the storage stays allocated but lookups refuse it.

use crate::cell::{Binding, Cell};
use crate::error::CoreError;
use crate::heap::Heap;
use crate::kind::Kind;
use crate::node::{ActionId, ContextId, KeylistId, NodeBits, PatchId, SymbolId};
use crate::series::{Flavored, SeriesInfo, SeriesNode, VarlistContent};

/// Which archetype a context carries in slot 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    Object,
    Frame,
    Error,
    Port,
    Module,
}

impl ContextType {
    #[inline]
    pub fn kind(self) -> Kind {
        match self {
            ContextType::Object => Kind::Object,
            ContextType::Frame => Kind::Frame,
            ContextType::Error => Kind::Error,
            ContextType::Port => Kind::Port,
            ContextType::Module => Kind::Module,
        }
    }

    pub fn from_kind(kind: Kind) -> Option<ContextType> {
        match kind {
            Kind::Object => Some(ContextType::Object),
            Kind::Frame => Some(ContextType::Frame),
            Kind::Error => Some(ContextType::Error),
            Kind::Port => Some(ContextType::Port),
            Kind::Module => Some(ContextType::Module),
            _ => None,
        }
    }
}

impl Heap {
    fn alloc_varlist(
        &mut self,
        ty: ContextType,
        keylist: KeylistId,
        slots: usize,
        action: Option<ActionId>,
        frame_binding: Binding,
    ) -> Result<ContextId, CoreError> {
        let mut cells = Vec::with_capacity(slots + 1);
        cells.push(Cell::blank()); // patched to the archetype below
        for _ in 0..slots {
            cells.push(Cell::voided());
        }
        let node = SeriesNode::new(Flavored::Varlist(VarlistContent {
            cells,
            keylist,
            patches: None,
            action,
            frame_binding,
        }));
        let id = ContextId(self.alloc_series_node(NodeBits::NODE, node)?);
        let archetype = Cell::context(ty.kind(), id);
        self.series_mut(id.series()).as_varlist_mut().cells[0] = archetype;
        Ok(id)
    }

    /// Create a context with the given keys, every slot initialized void.
    pub fn make_context(
        &mut self,
        ty: ContextType,
        keys: Vec<SymbolId>,
    ) -> Result<ContextId, CoreError> {
        let len = keys.len();
        let keylist = self.alloc_keylist(keys, None)?;
        self.alloc_varlist(ty, keylist, len, None, Binding::Unbound)
    }

    /// Derive a child context: same keys and copied values, with the child
    /// keylist ancestor-linked to the parent's (the derived-binding hook).
    pub fn make_context_derived(
        &mut self,
        ty: ContextType,
        parent: ContextId,
    ) -> Result<ContextId, CoreError> {
        let parent_keylist = self.context_keylist(parent);
        let keys = self.keylist(parent_keylist).keys.clone();
        let len = keys.len();
        let keylist = self.alloc_keylist(keys, Some(parent_keylist))?;
        let child = self.alloc_varlist(ty, keylist, len, None, Binding::Unbound)?;
        for index in 1..=len as u32 {
            let value = self.var(parent, index).clone();
            *self.var_mut(child, index) = value;
        }
        Ok(child)
    }

    /// Create a frame context for invoking `action`, keyed by its
    /// paramlist. `binding` is the invoking cell's binding, captured for
    /// derived-binding lookups.
    pub fn make_frame(
        &mut self,
        action: ActionId,
        binding: Binding,
    ) -> Result<ContextId, CoreError> {
        let paramlist = self.details(action).paramlist;
        let slots = self.keylist(paramlist).keys.len();
        self.alloc_varlist(ContextType::Frame, paramlist, slots, Some(action), binding)
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    pub fn context_type(&self, ctx: ContextId) -> ContextType {
        let archetype = &self.series(ctx.series()).as_varlist().cells[0];
        ContextType::from_kind(archetype.heart()).expect("archetype names a context kind")
    }

    #[inline]
    pub fn context_keylist(&self, ctx: ContextId) -> KeylistId {
        self.series(ctx.series()).as_varlist().keylist
    }

    /// Number of keys (the varlist holds one more cell, the archetype).
    pub fn context_len(&self, ctx: ContextId) -> usize {
        self.series(ctx.series()).as_varlist().cells.len() - 1
    }

    pub fn context_action(&self, ctx: ContextId) -> Option<ActionId> {
        self.series(ctx.series()).as_varlist().action
    }

    pub fn frame_binding(&self, ctx: ContextId) -> Binding {
        self.series(ctx.series()).as_varlist().frame_binding
    }

    pub fn context_is_accessible(&self, ctx: ContextId) -> bool {
        self.is_live(ctx.series())
            && !self
                .series(ctx.series())
                .info
                .contains(SeriesInfo::INACCESSIBLE)
    }

    /// Find a key by spelling (case-insensitive through the canon).
    /// Returns the 1-based slot index.
    pub fn find_index(&self, ctx: ContextId, symbol: SymbolId) -> Option<u32> {
        self.find_index_limited(ctx, symbol, self.context_len(ctx))
    }

    /// As `find_index`, but only consider the first `limit` keys; virtual
    /// binding uses this with the context length cached at patch time.
    pub fn find_index_limited(
        &self,
        ctx: ContextId,
        symbol: SymbolId,
        limit: usize,
    ) -> Option<u32> {
        let keylist = self.context_keylist(ctx);
        let count = limit.min(self.keylist(keylist).keys.len());
        for i in 0..count {
            let key = self.keylist(keylist).keys[i];
            if self.same_spelling(key, symbol) {
                return Some(i as u32 + 1);
            }
        }
        None
    }

    #[inline]
    pub fn var(&self, ctx: ContextId, index: u32) -> &Cell {
        debug_assert!(index >= 1, "slot 0 is the archetype");
        &self.series(ctx.series()).as_varlist().cells[index as usize]
    }

    #[inline]
    pub fn var_mut(&mut self, ctx: ContextId, index: u32) -> &mut Cell {
        debug_assert!(index >= 1, "slot 0 is the archetype");
        &mut self.series_mut(ctx.series()).as_varlist_mut().cells[index as usize]
    }

    // -------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------

    /// Append a key with a value, growing both keylist and varlist.
    /// Returns the new 1-based index.
    pub fn append_key(&mut self, ctx: ContextId, symbol: SymbolId, value: Cell) -> u32 {
        let keylist = self.context_keylist(ctx);
        self.series_mut(keylist.series())
            .as_keylist_mut()
            .keys
            .push(symbol);
        let varlist = self.series_mut(ctx.series()).as_varlist_mut();
        varlist.cells.push(value);
        (varlist.cells.len() - 1) as u32
    }

    /// Expire a frame whose invocation ended: storage remains, lookups
    /// refuse it.
    pub fn expire_frame(&mut self, ctx: ContextId) {
        self.series_mut(ctx.series()).info |= SeriesInfo::INACCESSIBLE;
    }

    // -------------------------------------------------------------------
    // Virtual-binding bookkeeping
    // -------------------------------------------------------------------

    /// Most recently created patch over this context (ring entry point).
    pub fn context_patches(&self, ctx: ContextId) -> Option<PatchId> {
        self.series(ctx.series()).as_varlist().patches
    }

    pub fn set_context_patches(&mut self, ctx: ContextId, patch: Option<PatchId>) {
        self.series_mut(ctx.series()).as_varlist_mut().patches = patch;
    }
}
