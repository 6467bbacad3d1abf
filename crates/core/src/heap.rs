//! The heap: owner of the series pool and the symbol population.
//!
//! All allocation goes through here. Ids handed out are typed by flavor
//! ([`ArrayId`], [`ContextId`], ...); the untyped [`SeriesId`] accessors
//! check liveness, and the flavored accessors check flavor.
//!
//! Lifecycle contract: series start unmanaged and are freed by the code
//! that allocated them unless a `manage` call reaches them first; managed
//! series may only be reclaimed by a mark-and-sweep pass (the collector
//! itself is an external collaborator, but the mark bits and child-visit
//! helpers it needs are maintained here). Patches and symbols are born
//! managed.

use crate::cell::{Binding, Cell, Payload};
use crate::error::CoreError;
use crate::kind::{Kind, MAX_INLINE_QUOTE};
use crate::node::{
    ActionId, ArrayId, KeylistId, NodeBits, PatchId, Pool, PoolStats, SeriesId, SymbolId,
};
use crate::series::{
    ArrayContent, DetailsContent, Flavored, HandleContent, KeylistContent, PatchContent,
    PatchNext, SeriesNode, SpliceContent,
};
use crate::symbol::{self, SymbolTable};

/// Pool sizing; the runtime layer populates this from its configuration.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Growth quantum for the series pool, in slots.
    pub segment: usize,
    /// Hard ceiling on live slots; exceeding it raises out-of-memory.
    pub limit: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            segment: 256,
            limit: 1 << 20,
        }
    }
}

pub struct Heap {
    pool: Pool<SeriesNode>,
    symbols: SymbolTable,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new(HeapConfig::default())
    }
}

impl Heap {
    pub fn new(config: HeapConfig) -> Heap {
        Heap {
            pool: Pool::new(config.segment, config.limit),
            symbols: SymbolTable::default(),
        }
    }

    pub fn stats(&self) -> &PoolStats {
        self.pool.stats()
    }

    // -------------------------------------------------------------------
    // Raw node access
    // -------------------------------------------------------------------

    #[inline]
    pub fn series(&self, id: SeriesId) -> &SeriesNode {
        self.pool.get(id.0)
    }

    #[inline]
    pub fn series_mut(&mut self, id: SeriesId) -> &mut SeriesNode {
        self.pool.get_mut(id.0)
    }

    #[inline]
    pub fn is_live(&self, id: SeriesId) -> bool {
        self.pool.is_live(id.0)
    }

    /// One-way transition to managed; the GC becomes the only reclaimer.
    pub fn manage(&mut self, id: SeriesId) {
        *self.pool.bits_mut(id.0) |= NodeBits::MANAGED;
    }

    #[inline]
    pub fn is_managed(&self, id: SeriesId) -> bool {
        self.pool.bits(id.0).contains(NodeBits::MANAGED)
    }

    /// Free an unmanaged series. Managed series belong to the GC.
    pub fn free_series(&mut self, id: SeriesId) {
        assert!(
            !self.is_managed(id),
            "free of managed series {:?}; only a sweep may reclaim it",
            id
        );
        self.pool.free(id.0);
    }

    /// API handles are managed so a collector can see them, but ownership
    /// sits with the frame that allocated them; dropping that frame
    /// returns the handle to the pool directly.
    pub fn free_api_handle(&mut self, id: SeriesId) {
        debug_assert_eq!(self.series(id).flavor(), crate::series::Flavor::ApiHandle);
        self.pool.free(id.0);
    }

    pub(crate) fn alloc_series_node(
        &mut self,
        bits: NodeBits,
        node: SeriesNode,
    ) -> Result<SeriesId, CoreError> {
        Ok(SeriesId(self.pool.try_alloc(bits, node)?))
    }

    // -------------------------------------------------------------------
    // Symbols
    // -------------------------------------------------------------------

    pub fn intern(&mut self, spelling: &str) -> Result<SymbolId, CoreError> {
        self.symbols.intern(&mut self.pool, spelling)
    }

    pub fn spelling_of(&self, symbol: SymbolId) -> &str {
        &self.series(symbol.series()).as_symbol().spelling
    }

    pub fn canon_of(&self, symbol: SymbolId) -> SymbolId {
        symbol::canon_of(&self.pool, symbol)
    }

    pub fn same_spelling(&self, a: SymbolId, b: SymbolId) -> bool {
        symbol::same_spelling(&self.pool, a, b)
    }

    /// Read a canon's binder-index slot (`high` selects which of the two).
    pub fn bind_index(&self, canon: SymbolId, high: bool) -> u32 {
        let content = self.series(canon.series()).as_symbol();
        debug_assert!(content.is_canon, "binder slots live on the canon");
        if high { content.bind_high } else { content.bind_low }
    }

    /// Write a canon's binder-index slot, returning the previous value.
    pub fn set_bind_index(&mut self, canon: SymbolId, high: bool, value: u32) -> u32 {
        let content = self.series_mut(canon.series()).as_symbol_mut();
        debug_assert!(content.is_canon, "binder slots live on the canon");
        let slot = if high {
            &mut content.bind_high
        } else {
            &mut content.bind_low
        };
        std::mem::replace(slot, value)
    }

    // -------------------------------------------------------------------
    // Arrays
    // -------------------------------------------------------------------

    pub fn alloc_array(&mut self, cells: Vec<Cell>) -> Result<ArrayId, CoreError> {
        let node = SeriesNode::new(Flavored::Array(ArrayContent { cells, bias: 0 }));
        Ok(ArrayId(self.alloc_series_node(NodeBits::NODE, node)?))
    }

    /// A one-cell array, the backing shape for patches, handles, and deep
    /// quote indirections.
    pub fn alloc_singular(&mut self, cell: Cell) -> Result<ArrayId, CoreError> {
        self.alloc_array(vec![cell])
    }

    pub fn alloc_text(&mut self, text: &str) -> Result<SeriesId, CoreError> {
        let node = SeriesNode::new(Flavored::String(text.to_string()));
        self.alloc_series_node(NodeBits::NODE, node)
    }

    pub fn alloc_binary(&mut self, bytes: Vec<u8>) -> Result<SeriesId, CoreError> {
        let node = SeriesNode::new(Flavored::Binary(bytes));
        self.alloc_series_node(NodeBits::NODE, node)
    }

    #[inline]
    pub fn array(&self, id: ArrayId) -> &ArrayContent {
        self.series(id.series()).as_array()
    }

    #[inline]
    pub fn array_mut(&mut self, id: ArrayId) -> &mut ArrayContent {
        self.series_mut(id.series()).as_array_mut()
    }

    pub fn array_len(&self, id: ArrayId) -> usize {
        self.array(id).used()
    }

    pub fn array_cell(&self, id: ArrayId, index: usize) -> Option<&Cell> {
        self.array(id).cells.get(index)
    }

    // -------------------------------------------------------------------
    // Keylists
    // -------------------------------------------------------------------

    /// `ancestor` of `None` makes the keylist its own terminator.
    pub fn alloc_keylist(
        &mut self,
        keys: Vec<SymbolId>,
        ancestor: Option<KeylistId>,
    ) -> Result<KeylistId, CoreError> {
        let node = SeriesNode::new(Flavored::Keylist(KeylistContent {
            keys,
            ancestor: KeylistId(SeriesId(u32::MAX)),
        }));
        let id = KeylistId(self.alloc_series_node(NodeBits::NODE, node)?);
        let resolved = ancestor.unwrap_or(id);
        self.series_mut(id.series()).as_keylist_mut().ancestor = resolved;
        Ok(id)
    }

    #[inline]
    pub fn keylist(&self, id: KeylistId) -> &KeylistContent {
        self.series(id.series()).as_keylist()
    }

    /// Walk `candidate`'s ancestor chain looking for `stored`. The chain
    /// ends at a self-link.
    pub fn keylist_derives_from(&self, candidate: KeylistId, stored: KeylistId) -> bool {
        let mut cursor = candidate;
        loop {
            if cursor == stored {
                return true;
            }
            let next = self.keylist(cursor).ancestor;
            if next == cursor {
                return false;
            }
            cursor = next;
        }
    }

    // -------------------------------------------------------------------
    // Patches, splices, handles
    // -------------------------------------------------------------------

    /// Patches are always managed. The variants ring starts self-linked;
    /// the creator splices it into the context's ring.
    pub fn alloc_patch(
        &mut self,
        cell: Cell,
        next: PatchNext,
        bind_reuse: bool,
    ) -> Result<PatchId, CoreError> {
        let node = SeriesNode::new(Flavored::Patch(PatchContent {
            cell,
            next,
            variant_next: PatchId(SeriesId(u32::MAX)),
            reused: false,
            bind_reuse,
        }));
        let id = PatchId(self.alloc_series_node(NodeBits::NODE | NodeBits::MANAGED, node)?);
        self.series_mut(id.series()).as_patch_mut().variant_next = id;
        Ok(id)
    }

    #[inline]
    pub fn patch(&self, id: PatchId) -> &PatchContent {
        self.series(id.series()).as_patch()
    }

    #[inline]
    pub fn patch_mut(&mut self, id: PatchId) -> &mut PatchContent {
        self.series_mut(id.series()).as_patch_mut()
    }

    pub fn alloc_splice(&mut self, array: ArrayId, index: u32) -> Result<SeriesId, CoreError> {
        let node = SeriesNode::new(Flavored::FeedSplice(SpliceContent { array, index }));
        self.alloc_series_node(NodeBits::NODE, node)
    }

    /// API handles are managed singular holders owned by a frame list.
    pub fn alloc_handle(&mut self, cell: Cell) -> Result<SeriesId, CoreError> {
        let node = SeriesNode::new(Flavored::ApiHandle(HandleContent { cell }));
        self.alloc_series_node(NodeBits::NODE | NodeBits::MANAGED, node)
    }

    // -------------------------------------------------------------------
    // Details (created via `make_action` in the action module)
    // -------------------------------------------------------------------

    pub(crate) fn alloc_details(&mut self, content: DetailsContent) -> Result<ActionId, CoreError> {
        let node = SeriesNode::new(Flavored::Details(content));
        Ok(ActionId(self.alloc_series_node(NodeBits::NODE | NodeBits::MANAGED, node)?))
    }

    #[inline]
    pub fn details(&self, id: ActionId) -> &DetailsContent {
        self.series(id.series()).as_details()
    }

    /// Follow the underlying-action relation to its fixpoint.
    pub fn underlying_action(&self, id: ActionId) -> ActionId {
        let mut cursor = id;
        loop {
            let under = self.details(cursor).underlying;
            if under == cursor {
                return cursor;
            }
            cursor = under;
        }
    }

    /// Two actions may share relatively-bound body cells when they bottom
    /// out at the same underlying action (adapt/copy/hijack reuse bodies).
    pub fn actions_compatible(&self, a: ActionId, b: ActionId) -> bool {
        a == b || self.underlying_action(a) == self.underlying_action(b)
    }

    // -------------------------------------------------------------------
    // Quoting beyond the kind byte
    // -------------------------------------------------------------------

    /// Add `levels` of quoting, spilling into a shared singular cell when
    /// the kind byte can no longer hold the depth.
    pub fn quotify(&mut self, cell: &mut Cell, levels: u8) -> Result<(), CoreError> {
        if levels == 0 || cell.try_quotify_inline(levels) {
            return Ok(());
        }
        let (base_id, old_depth) = match *cell.payload() {
            Payload::Quoted { cell: id, depth } => (id, depth),
            _ => {
                let mut plain = cell.clone();
                while plain.quote_depth() > 0 {
                    plain.unquotify_inline();
                }
                let depth = cell.quote_depth();
                (self.alloc_singular(plain)?.series(), depth)
            }
        };
        let depth = old_depth
            .checked_add(levels)
            .expect("quote depth exceeds 255");
        let heart = cell.heart();
        cell.set_payload(Payload::Quoted {
            cell: base_id,
            depth,
        });
        cell.set_kind_bytes(Kind::Quoted as u8, heart as u8);
        Ok(())
    }

    /// Remove one level of quoting, collapsing the indirection back into
    /// the kind byte when the depth allows it.
    pub fn unquotify(&mut self, cell: &mut Cell) {
        debug_assert!(cell.is_quoted());
        match *cell.payload() {
            Payload::Quoted { cell: id, depth } => {
                let new_depth = depth - 1;
                if new_depth > MAX_INLINE_QUOTE {
                    cell.set_payload(Payload::Quoted {
                        cell: id,
                        depth: new_depth,
                    });
                } else {
                    let mut base = self.array(ArrayId(id)).cells[0].clone();
                    let survived = base.try_quotify_inline(new_depth);
                    debug_assert!(survived);
                    base.set_flag(cell.flags() & !crate::cell::CellFlags::fresh());
                    *cell = base;
                }
            }
            _ => cell.unquotify_inline(),
        }
    }

    // -------------------------------------------------------------------
    // GC mark contract
    // -------------------------------------------------------------------

    /// Reset all mark bits ahead of a mark pass.
    pub fn clear_marks(&mut self) {
        let ids: Vec<u32> = self.pool.live_ids().collect();
        for id in ids {
            *self.pool.bits_mut(id) &= !NodeBits::MARKED;
        }
    }

    pub fn mark(&mut self, id: SeriesId) {
        *self.pool.bits_mut(id.0) |= NodeBits::MARKED;
    }

    pub fn is_marked(&self, id: SeriesId) -> bool {
        self.pool.bits(id.0).contains(NodeBits::MARKED)
    }

    /// Mark the nodes a cell's payload and binding directly reference; the
    /// child-needs-mark contract a tracing collector builds on.
    pub fn mark_cell_children(&mut self, cell: &Cell) {
        match *cell.payload() {
            Payload::Series { id, .. } | Payload::Quoted { cell: id, .. } => self.mark(id),
            Payload::Word { symbol, .. } => self.mark(symbol.series()),
            Payload::Context(id) => self.mark(id.series()),
            Payload::Action(id) => self.mark(id.series()),
            _ => {}
        }
        match cell.binding() {
            Binding::Specific(ctx) => self.mark(ctx.series()),
            Binding::Relative(act) => self.mark(act.series()),
            Binding::Virtual(patch) => self.mark(patch.series()),
            Binding::Unbound => {}
        }
    }

    /// Every reachable patch chain must end at a frame varlist or run out,
    /// and must never be circular; debug assertions and tests check this.
    pub fn patch_chain_is_wellformed(&self, head: PatchId) -> bool {
        let mut slow = PatchNext::Patch(head);
        let mut fast = PatchNext::Patch(head);
        loop {
            fast = match self.chain_step(fast) {
                Some(next) => next,
                None => return true,
            };
            fast = match self.chain_step(fast) {
                Some(next) => next,
                None => return true,
            };
            slow = self.chain_step(slow).expect("slow lags fast");
            if slow == fast {
                return false;
            }
        }
    }

    fn chain_step(&self, next: PatchNext) -> Option<PatchNext> {
        match next {
            PatchNext::Patch(id) => Some(self.patch(id).next),
            PatchNext::Frame(_) | PatchNext::None => None,
        }
    }
}
