//! Word resolution and variable access.
//!
//! `get_word_context` is the single resolution algorithm everything else
//! layers on. The order is fixed:
//!
//! 1. a virtual cache hit against the specifier's patch chain,
//! 2. a linear search of the chain (recording hit or miss in the cache),
//! 3. the word's own specific binding, possibly overridden at a derived
//!    context supplied by the frame in effect,
//! 4. relative binding through a frame of the word's action (or a
//!    descendant through the underlying-action relation).
//!
//! `derelativize` copies a cell out of its array into a fully specific
//! form: relative words acquire their frame, virtually-reachable words are
//! resolved eagerly so patch references do not spread, and array cells get
//! the derived specifier attached as their binding.

use crate::RaiseError;
use crate::specifier::{
    Specifier, chain_terminator, derive_specifier, is_overriding_context,
};
use mica_core::{
    Binding, CachedLookup, Cell, CellFlags, ContextId, Heap, Kind, PatchId, PatchNext, SeriesInfo,
    SymbolId, WordCache,
};

/// Outcome of a virtual-chain search.
enum ChainAnswer {
    Found(ContextId, u32),
    /// No patch overrides; resolution continues at the terminator.
    Fell(PatchNext),
}

/// A set-word patch overrides only set-word references; a word patch
/// overrides everything.
fn patch_overrides(patch_kind: Kind, word_heart: Kind) -> bool {
    match patch_kind {
        Kind::SetWord => word_heart == Kind::SetWord,
        _ => true,
    }
}

fn search_chain(
    heap: &Heap,
    symbol: SymbolId,
    word_heart: Kind,
    head: PatchId,
    mut cache: Option<&mut WordCache>,
) -> ChainAnswer {
    // Cache probe: only trusted when it names this very chain.
    if let Some(cache) = cache.as_deref_mut()
        && let Some(cached) = cache.get(head)
    {
        match cached {
            CachedLookup::Miss => {
                return ChainAnswer::Fell(chain_terminator(heap, head));
            }
            CachedLookup::Hit(ordinal) => {
                if let Some(answer) = verify_cached_hit(heap, symbol, word_heart, head, ordinal) {
                    return answer;
                }
                // Stale hit: fall through to the linear search.
            }
        }
    }

    let mut cursor = PatchNext::Patch(head);
    let mut ordinal = 0u32;
    loop {
        let id = match cursor {
            PatchNext::Patch(id) => id,
            other => {
                if let Some(cache) = cache.as_deref_mut() {
                    cache.set(head, CachedLookup::Miss);
                }
                return ChainAnswer::Fell(other);
            }
        };
        let patch = heap.patch(id);
        // Reuse-marked overlays alias outer variables; resolution passes
        // through them so the outer slot wins, and no hit is cached.
        if !patch.bind_reuse && patch_overrides(patch.cell.heart(), word_heart) {
            let Binding::Specific(context) = patch.cell.binding() else {
                panic!("patch cell must be bound to its overlay context");
            };
            let (_, limit) = patch.cell.word_parts().expect("patch cell is a word");
            if let Some(index) = heap.find_index_limited(context, symbol, limit as usize) {
                if let Some(cache) = cache.as_deref_mut() {
                    cache.set(head, CachedLookup::Hit(ordinal));
                }
                return ChainAnswer::Found(context, index);
            }
        }
        cursor = patch.next;
        ordinal += 1;
    }
}

fn verify_cached_hit(
    heap: &Heap,
    symbol: SymbolId,
    word_heart: Kind,
    head: PatchId,
    ordinal: u32,
) -> Option<ChainAnswer> {
    let mut cursor = head;
    for _ in 0..ordinal {
        match heap.patch(cursor).next {
            PatchNext::Patch(next) => cursor = next,
            _ => return None,
        }
    }
    let patch = heap.patch(cursor);
    if patch.bind_reuse || !patch_overrides(patch.cell.heart(), word_heart) {
        return None;
    }
    let Binding::Specific(context) = patch.cell.binding() else {
        return None;
    };
    let (_, limit) = patch.cell.word_parts()?;
    let index = heap.find_index_limited(context, symbol, limit as usize)?;
    Some(ChainAnswer::Found(context, index))
}

fn resolve(
    heap: &Heap,
    word: &Cell,
    mut cache: Option<&mut WordCache>,
    specifier: Specifier,
) -> Result<Option<(ContextId, u32)>, RaiseError> {
    let (symbol, stored_index) = word.word_parts().expect("resolution needs a word cell");
    let heart = word.heart();

    // Step 1-2: virtual overlays from the ambient specifier.
    let mut frame_ctx = None;
    match specifier {
        Specifier::Patches(head) => {
            match search_chain(heap, symbol, heart, head, cache.take()) {
                ChainAnswer::Found(context, index) => return Ok(Some((context, index))),
                ChainAnswer::Fell(PatchNext::Frame(ctx)) => frame_ctx = Some(ctx),
                ChainAnswer::Fell(_) => {}
            }
        }
        Specifier::Frame(ctx) => frame_ctx = Some(ctx),
        Specifier::Specified => {}
    }

    match word.binding() {
        // A word can carry its own overlay chain; it resolves like an
        // ambient one, then falls out unbound.
        Binding::Virtual(own) => match search_chain(heap, symbol, heart, own, cache) {
            ChainAnswer::Found(context, index) => Ok(Some((context, index))),
            ChainAnswer::Fell(PatchNext::Frame(ctx)) => {
                Ok(heap.find_index(ctx, symbol).map(|index| (ctx, index)))
            }
            ChainAnswer::Fell(_) => Ok(None),
        },

        // Step 3: specific, with the derived-binding override.
        Binding::Specific(context) => {
            if !heap.context_is_accessible(context) {
                return Err(RaiseError::NoRelative {
                    spelling: heap.spelling_of(symbol).to_string(),
                });
            }
            let mut target = context;
            if let Some(frame) = frame_ctx
                && heap.context_is_accessible(frame)
                && let Binding::Specific(candidate) = heap.frame_binding(frame)
                && is_overriding_context(heap, context, candidate)
            {
                target = candidate;
            }
            let index = if stored_index >= 1 {
                stored_index
            } else {
                match heap.find_index(target, symbol) {
                    Some(index) => index,
                    None => return Ok(None),
                }
            };
            Ok(Some((target, index)))
        }

        // Step 4: relative through a compatible frame.
        Binding::Relative(action) => {
            let Some(frame) = frame_ctx else {
                return Err(RaiseError::NoRelative {
                    spelling: heap.spelling_of(symbol).to_string(),
                });
            };
            if !heap.context_is_accessible(frame) {
                return Err(RaiseError::NoRelative {
                    spelling: heap.spelling_of(symbol).to_string(),
                });
            }
            match heap.context_action(frame) {
                Some(invoked) if heap.actions_compatible(invoked, action) => {
                    Ok(Some((frame, stored_index)))
                }
                _ => Err(RaiseError::NoRelative {
                    spelling: heap.spelling_of(symbol).to_string(),
                }),
            }
        }

        Binding::Unbound => Ok(None),
    }
}

/// Resolve a word to its context and slot index; `Ok(None)` means unbound.
pub fn get_word_context(
    heap: &Heap,
    word: &Cell,
    specifier: Specifier,
) -> Result<Option<(ContextId, u32)>, RaiseError> {
    resolve(heap, word, None, specifier)
}

/// As [`get_word_context`], updating the word's lookup cache in place.
pub fn get_word_context_cached(
    heap: &Heap,
    word: &mut Cell,
    specifier: Specifier,
) -> Result<Option<(ContextId, u32)>, RaiseError> {
    let mut cache = *word.cache();
    let answer = resolve(heap, word, Some(&mut cache), specifier);
    *word.cache_mut() = cache;
    answer
}

fn unbound_error(heap: &Heap, word: &Cell) -> RaiseError {
    let (symbol, _) = word.word_parts().expect("word cell");
    RaiseError::UnboundWord {
        spelling: heap.spelling_of(symbol).to_string(),
    }
}

/// Read a variable; unbound words and inaccessible contexts fail.
pub fn lookup_word(heap: &Heap, word: &Cell, specifier: Specifier) -> Result<Cell, RaiseError> {
    match get_word_context(heap, word, specifier)? {
        Some((context, index)) => Ok(heap.var(context, index).clone()),
        None => Err(unbound_error(heap, word)),
    }
}

/// Resolve for writing; additionally refuses read-only series and
/// protected cells.
pub fn lookup_word_mut(
    heap: &Heap,
    word: &Cell,
    specifier: Specifier,
) -> Result<(ContextId, u32), RaiseError> {
    let (symbol, _) = word.word_parts().expect("word cell");
    let Some((context, index)) = get_word_context(heap, word, specifier)? else {
        return Err(unbound_error(heap, word));
    };
    let series = heap.series(context.series());
    if series
        .info
        .intersects(SeriesInfo::READ_ONLY | SeriesInfo::FROZEN_DEEP)
        || heap.var(context, index).has_flag(CellFlags::PROTECTED)
    {
        return Err(RaiseError::Protected {
            spelling: heap.spelling_of(symbol).to_string(),
        });
    }
    Ok((context, index))
}

/// Read a variable and insist on a value: void raises.
pub fn get_word(heap: &Heap, word: &Cell, specifier: Specifier) -> Result<Cell, RaiseError> {
    let value = lookup_word(heap, word, specifier)?;
    if value.is_void() {
        let (symbol, _) = word.word_parts().expect("word cell");
        return Err(RaiseError::NeedNonVoid {
            spelling: heap.spelling_of(symbol).to_string(),
        });
    }
    Ok(value)
}

/// Assign through a word. Isotopes decay as they land in the variable;
/// the undecayed value is returned as the expression's result.
pub fn set_word(
    heap: &mut Heap,
    word: &Cell,
    specifier: Specifier,
    value: Cell,
) -> Result<Cell, RaiseError> {
    let (context, index) = lookup_word_mut(heap, word, specifier)?;
    let mut stored = value.clone();
    stored.decay();
    *heap.var_mut(context, index) = stored;
    Ok(value)
}

/// Copy a cell into fully specific form under `specifier`.
pub fn derelativize(
    heap: &mut Heap,
    cell: &Cell,
    specifier: Specifier,
) -> Result<Cell, RaiseError> {
    let mut out = cell.clone();
    let heart = out.heart();
    // Deep-quoted cells indirect their payload; the binding they carry is
    // resolved when the quotes come off.
    if heart.any_word() && out.word_parts().is_some() {
        if let Some((context, index)) = get_word_context_cached(heap, &mut out, specifier)? {
            out.set_binding(Binding::Specific(context));
            out.set_word_index(index);
        }
    } else if heart.any_array() && out.series_parts().is_some() {
        let derived = derive_specifier(heap, specifier, &out)?;
        out.set_binding(derived.to_binding());
    }
    Ok(out)
}

/// Ambient const (from a const feed or frame) infects copies unless the
/// cell opted out.
pub fn inherit_const(cell: &mut Cell, ambient_const: bool) {
    if ambient_const && !cell.has_flag(CellFlags::EXPLICITLY_MUTABLE) {
        cell.set_flag(CellFlags::CONST);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::make_patch;
    use mica_core::ContextType;

    fn object(heap: &mut Heap, pairs: &[(&str, i64)]) -> ContextId {
        let keys = pairs
            .iter()
            .map(|(n, _)| heap.intern(n).unwrap())
            .collect::<Vec<_>>();
        let ctx = heap.make_context(ContextType::Object, keys).unwrap();
        for (slot, (_, value)) in pairs.iter().enumerate() {
            *heap.var_mut(ctx, slot as u32 + 1) = Cell::integer(*value);
        }
        ctx
    }

    fn overlay(heap: &mut Heap, ctx: ContextId) -> PatchId {
        let limit = heap.context_len(ctx) as u32;
        match make_patch(heap, ctx, limit, PatchNext::None, Kind::Word, false).unwrap() {
            PatchNext::Patch(id) => id,
            other => panic!("expected patch, got {:?}", other),
        }
    }

    #[test]
    fn test_specific_binding_resolves_directly() {
        let mut heap = Heap::default();
        let ctx = object(&mut heap, &[("a", 10)]);
        let a = heap.intern("a").unwrap();
        let word = Cell::bound_word(Kind::Word, a, ctx, 1);

        let value = lookup_word(&heap, &word, Specifier::Specified).unwrap();
        assert_eq!(value.as_integer(), Some(10));
    }

    #[test]
    fn test_virtual_overlay_wins_over_specific() {
        let mut heap = Heap::default();
        let base = object(&mut heap, &[("a", 10)]);
        let over = object(&mut heap, &[("a", 20)]);
        let chain = overlay(&mut heap, over);
        let a = heap.intern("a").unwrap();
        let word = Cell::bound_word(Kind::Word, a, base, 1);

        let value = lookup_word(&heap, &word, Specifier::Patches(chain)).unwrap();
        assert_eq!(value.as_integer(), Some(20));
    }

    #[test]
    fn test_set_word_patch_ignores_plain_references() {
        let mut heap = Heap::default();
        let base = object(&mut heap, &[("a", 10)]);
        let over = object(&mut heap, &[("a", 20)]);
        let limit = heap.context_len(over) as u32;
        let chain =
            match make_patch(&mut heap, over, limit, PatchNext::None, Kind::SetWord, false)
                .unwrap()
            {
                PatchNext::Patch(id) => id,
                other => panic!("expected patch, got {:?}", other),
            };
        let a = heap.intern("a").unwrap();

        let plain = Cell::bound_word(Kind::Word, a, base, 1);
        let value = lookup_word(&heap, &plain, Specifier::Patches(chain)).unwrap();
        assert_eq!(value.as_integer(), Some(10));

        let setter = Cell::bound_word(Kind::SetWord, a, base, 1);
        let (ctx, index) = lookup_word_mut(&heap, &setter, Specifier::Patches(chain)).unwrap();
        assert_eq!((ctx, index), (over, 1));
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let mut heap = Heap::default();
        let base = object(&mut heap, &[("a", 10)]);
        let over = object(&mut heap, &[("a", 20)]);
        let chain = overlay(&mut heap, over);
        let a = heap.intern("a").unwrap();
        let mut word = Cell::bound_word(Kind::Word, a, base, 1);

        let first =
            get_word_context_cached(&heap, &mut word, Specifier::Patches(chain)).unwrap();
        assert_eq!(first, Some((over, 1)));
        assert_eq!(word.cache().get(chain), Some(CachedLookup::Hit(0)));

        // The cached answer is verified, not blindly trusted.
        let second =
            get_word_context_cached(&heap, &mut word, Specifier::Patches(chain)).unwrap();
        assert_eq!(second, Some((over, 1)));

        // A different chain ignores this cache entry.
        let other = object(&mut heap, &[("b", 1)]);
        let other_chain = overlay(&mut heap, other);
        let third =
            get_word_context_cached(&heap, &mut word, Specifier::Patches(other_chain)).unwrap();
        assert_eq!(third, Some((base, 1)));
        assert_eq!(word.cache().get(other_chain), Some(CachedLookup::Miss));
    }

    #[test]
    fn test_reuse_marked_overlay_is_transparent() {
        let mut heap = Heap::default();
        let base = object(&mut heap, &[("a", 10)]);
        let loop_ctx = object(&mut heap, &[("a", 99)]);
        let limit = heap.context_len(loop_ctx) as u32;
        let chain =
            match make_patch(&mut heap, loop_ctx, limit, PatchNext::None, Kind::Word, true)
                .unwrap()
            {
                PatchNext::Patch(id) => id,
                other => panic!("expected patch, got {:?}", other),
            };
        let a = heap.intern("a").unwrap();
        let mut word = Cell::bound_word(Kind::Word, a, base, 1);

        // The aliasing overlay passes the reference through to the outer
        // variable, and never records a hit for itself.
        let answer =
            get_word_context_cached(&heap, &mut word, Specifier::Patches(chain)).unwrap();
        assert_eq!(answer, Some((base, 1)));
        assert_eq!(word.cache().get(chain), Some(CachedLookup::Miss));
    }

    #[test]
    fn test_derived_binding_overrides_at_instance() {
        let mut heap = Heap::default();
        let base = object(&mut heap, &[("x", 1)]);
        let child = heap
            .make_context_derived(ContextType::Object, base)
            .unwrap();
        *heap.var_mut(child, 1) = Cell::integer(2);

        // A method body literally bound at the base...
        let x = heap.intern("x").unwrap();
        let word = Cell::bound_word(Kind::Word, x, base, 1);

        // ...invoked through a frame whose captured binding is the child.
        let action = heap
            .make_action(vec![], 0, mica_core::ActionFlags::empty(), None)
            .unwrap();
        let frame = heap.make_frame(action, Binding::Specific(child)).unwrap();

        let value = lookup_word(&heap, &word, Specifier::Frame(frame)).unwrap();
        assert_eq!(value.as_integer(), Some(2));

        // Without the frame, the literal binding stands.
        let value = lookup_word(&heap, &word, Specifier::Specified).unwrap();
        assert_eq!(value.as_integer(), Some(1));
    }

    #[test]
    fn test_relative_needs_compatible_frame() {
        let mut heap = Heap::default();
        let n = heap.intern("n").unwrap();
        let action = heap
            .make_action(
                vec![mica_core::ParamSpec::new(n, mica_core::ParamClass::Normal)],
                0,
                mica_core::ActionFlags::empty(),
                None,
            )
            .unwrap();
        let word = Cell::relative_word(Kind::Word, n, action, 1);

        // No frame: refuse.
        assert!(matches!(
            lookup_word(&heap, &word, Specifier::Specified),
            Err(RaiseError::NoRelative { .. })
        ));

        // Frame of the action: resolve to its slot.
        let frame = heap.make_frame(action, Binding::Unbound).unwrap();
        *heap.var_mut(frame, 1) = Cell::integer(7);
        let value = lookup_word(&heap, &word, Specifier::Frame(frame)).unwrap();
        assert_eq!(value.as_integer(), Some(7));

        // Frame of an unrelated action: refuse.
        let other = heap
            .make_action(vec![], 0, mica_core::ActionFlags::empty(), None)
            .unwrap();
        let wrong = heap.make_frame(other, Binding::Unbound).unwrap();
        assert!(matches!(
            lookup_word(&heap, &word, Specifier::Frame(wrong)),
            Err(RaiseError::NoRelative { .. })
        ));

        // Frame of a derived action sharing the body: resolve.
        let adapted = heap
            .derive_action(action, 0, mica_core::ActionFlags::empty())
            .unwrap();
        let derived_frame = heap.make_frame(adapted, Binding::Unbound).unwrap();
        *heap.var_mut(derived_frame, 1) = Cell::integer(9);
        let value = lookup_word(&heap, &word, Specifier::Frame(derived_frame)).unwrap();
        assert_eq!(value.as_integer(), Some(9));
    }

    #[test]
    fn test_expired_frame_refuses_lookup() {
        let mut heap = Heap::default();
        let n = heap.intern("n").unwrap();
        let action = heap
            .make_action(
                vec![mica_core::ParamSpec::new(n, mica_core::ParamClass::Normal)],
                0,
                mica_core::ActionFlags::empty(),
                None,
            )
            .unwrap();
        let word = Cell::relative_word(Kind::Word, n, action, 1);
        let frame = heap.make_frame(action, Binding::Unbound).unwrap();
        heap.expire_frame(frame);
        assert!(matches!(
            lookup_word(&heap, &word, Specifier::Frame(frame)),
            Err(RaiseError::NoRelative { .. })
        ));
    }

    #[test]
    fn test_protected_cell_refuses_write() {
        let mut heap = Heap::default();
        let ctx = object(&mut heap, &[("a", 1)]);
        heap.var_mut(ctx, 1).set_flag(CellFlags::PROTECTED);
        let a = heap.intern("a").unwrap();
        let word = Cell::bound_word(Kind::SetWord, a, ctx, 1);
        assert!(matches!(
            lookup_word_mut(&heap, &word, Specifier::Specified),
            Err(RaiseError::Protected { .. })
        ));
    }

    #[test]
    fn test_void_read_requires_value() {
        let mut heap = Heap::default();
        let a = heap.intern("a").unwrap();
        let ctx = heap.make_context(ContextType::Object, vec![a]).unwrap();
        let word = Cell::bound_word(Kind::Word, a, ctx, 1);
        assert!(matches!(
            get_word(&heap, &word, Specifier::Specified),
            Err(RaiseError::NeedNonVoid { .. })
        ));
    }

    #[test]
    fn test_assignment_decays_isotopes() {
        let mut heap = Heap::default();
        let ctx = object(&mut heap, &[("a", 1)]);
        let a = heap.intern("a").unwrap();
        let word = Cell::bound_word(Kind::SetWord, a, ctx, 1);

        let result = set_word(&mut heap, &word, Specifier::Specified, Cell::heavy_null())
            .unwrap();
        // The expression result keeps the isotope; the variable does not.
        assert!(result.is_heavy_null());
        assert!(heap.var(ctx, 1).is_nulled());
        assert!(!heap.var(ctx, 1).is_heavy_null());
    }

    #[test]
    fn test_derelativize_resolves_relative_words() {
        let mut heap = Heap::default();
        let n = heap.intern("n").unwrap();
        let action = heap
            .make_action(
                vec![mica_core::ParamSpec::new(n, mica_core::ParamClass::Normal)],
                0,
                mica_core::ActionFlags::empty(),
                None,
            )
            .unwrap();
        let frame = heap.make_frame(action, Binding::Unbound).unwrap();
        let word = Cell::relative_word(Kind::Word, n, action, 1);

        let specific = derelativize(&mut heap, &word, Specifier::Frame(frame)).unwrap();
        assert_eq!(specific.binding(), Binding::Specific(frame));

        // Composition: derelativizing twice equals deriving once.
        let again = derelativize(&mut heap, &specific, Specifier::Specified).unwrap();
        assert_eq!(again, specific);
    }

    #[test]
    fn test_derelativize_attaches_chain_to_arrays() {
        let mut heap = Heap::default();
        let over = object(&mut heap, &[("a", 20)]);
        let chain = overlay(&mut heap, over);
        let inner = heap.alloc_array(vec![]).unwrap();
        let block = Cell::series(Kind::Block, inner.series(), 0);

        let out = derelativize(&mut heap, &block, Specifier::Patches(chain)).unwrap();
        assert_eq!(out.binding(), Binding::Virtual(chain));
    }

    #[test]
    fn test_inherit_const_respects_mutability_opt_out() {
        let mut plain = Cell::integer(1);
        inherit_const(&mut plain, true);
        assert!(plain.has_flag(CellFlags::CONST));

        let mut mutable = Cell::integer(1);
        mutable.set_flag(CellFlags::EXPLICITLY_MUTABLE);
        inherit_const(&mut mutable, true);
        assert!(!mutable.has_flag(CellFlags::CONST));
    }
}
