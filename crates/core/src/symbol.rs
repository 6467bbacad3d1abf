//! Symbol interning and the synonym ring.
//!
//! Symbols are interned by UTF-8 content. The intern table maps the
//! case-folded spelling to the canon symbol; creating a new casing of an
//! existing spelling allocates a fresh symbol series and splices it into
//! the canon's circular synonym ring. Any ring member reaches the canon by
//! walking `ring_next` until `is_canon`.
//!
//! Symbols are born managed and read-only. The only mutable state on a
//! symbol is the pair of binder-index slots on the canon, which a binder
//! owns transiently (see `mica-runtime::binder`).

use crate::error::CoreError;
use crate::node::{NodeBits, Pool, SeriesId, SymbolId};
use crate::series::{Flavored, SeriesInfo, SeriesNode, SymbolContent};
use std::collections::HashMap;

/// Case-fold a spelling to its canonical key (ASCII fold, the language's
/// case-insensitivity rule for words).
pub fn fold_spelling(spelling: &str) -> String {
    spelling.to_ascii_lowercase()
}

/// The process-wide symbol population, owned by the heap and threaded
/// explicitly rather than held in a global.
#[derive(Default)]
pub struct SymbolTable {
    canons: HashMap<String, SymbolId>,
}

impl SymbolTable {
    /// Intern `spelling`, returning an existing symbol when this exact
    /// casing was seen before, and otherwise allocating one (splicing it
    /// into the canon's synonym ring if another casing exists).
    pub fn intern(
        &mut self,
        pool: &mut Pool<SeriesNode>,
        spelling: &str,
    ) -> Result<SymbolId, CoreError> {
        let folded = fold_spelling(spelling);

        if let Some(&canon) = self.canons.get(&folded) {
            // Walk the ring for this exact casing.
            let mut cursor = canon;
            loop {
                let content = pool.get(cursor.series().0).as_symbol();
                if &*content.spelling == spelling {
                    return Ok(cursor);
                }
                let next = content.ring_next;
                if next == canon {
                    break;
                }
                cursor = next;
            }
            // New casing: allocate and splice after the canon.
            let id = alloc_symbol(pool, spelling, false)?;
            let canon_next = pool.get(canon.series().0).as_symbol().ring_next;
            pool.get_mut(id.series().0).as_symbol_mut().ring_next = canon_next;
            pool.get_mut(canon.series().0).as_symbol_mut().ring_next = id;
            return Ok(id);
        }

        let id = alloc_symbol(pool, spelling, true)?;
        self.canons.insert(folded, id);
        Ok(id)
    }

    /// Number of distinct folded spellings interned.
    pub fn canon_count(&self) -> usize {
        self.canons.len()
    }
}

fn alloc_symbol(
    pool: &mut Pool<SeriesNode>,
    spelling: &str,
    is_canon: bool,
) -> Result<SymbolId, CoreError> {
    let mut node = SeriesNode::new(Flavored::Symbol(SymbolContent {
        spelling: spelling.into(),
        // Self-link until spliced into a ring.
        ring_next: SymbolId(SeriesId(u32::MAX)),
        is_canon,
        bind_low: 0,
        bind_high: 0,
    }));
    node.info |= SeriesInfo::READ_ONLY;
    // Symbols are born managed and never freed while referenced.
    let raw = pool.try_alloc(NodeBits::NODE | NodeBits::MANAGED, node)?;
    let id = SymbolId(SeriesId(raw));
    pool.get_mut(raw).as_symbol_mut().ring_next = id;
    Ok(id)
}

/// Walk the synonym ring to the canon member.
pub fn canon_of(pool: &Pool<SeriesNode>, symbol: SymbolId) -> SymbolId {
    let mut cursor = symbol;
    loop {
        let content = pool.get(cursor.series().0).as_symbol();
        if content.is_canon {
            return cursor;
        }
        cursor = content.ring_next;
        debug_assert_ne!(cursor, symbol, "synonym ring without a canon");
    }
}

/// Case-insensitive spelling equality through the canon.
pub fn same_spelling(pool: &Pool<SeriesNode>, a: SymbolId, b: SymbolId) -> bool {
    a == b || canon_of(pool, a) == canon_of(pool, b)
}
