//! Virtual-binding patch construction.
//!
//! A patch is one overlay layer: a singular series whose cell is a word
//! bound into the overlay context, with the context's length captured at
//! creation time so later growth cannot leak new keys into old overlays.
//! Patches over the same context thread a circular variants ring, which
//! `make_patch` searches before allocating so that chains differing only
//! in construction order share identity.
//!
//! A patch whose cell kind is a set-word overrides only set-word
//! references; a plain word patch overrides every reference.

use crate::RaiseError;
use mica_core::{Binding, Cell, ContextId, Heap, Kind, PatchNext};

/// Create (or reuse) a patch layering `context` over `next`.
///
/// `limit` is the number of context keys visible through this overlay,
/// normally the context's current length; zero-key overlays are no-ops and
/// return `next` unchanged. `kind` is `Word` or `SetWord`. `bind_reuse`
/// marks overlays whose slots alias outer variables (enumeration
/// constructs); lookup skips them so the aliased variable resolves
/// outward.
pub fn make_patch(
    heap: &mut Heap,
    context: ContextId,
    limit: u32,
    next: PatchNext,
    kind: Kind,
    bind_reuse: bool,
) -> Result<PatchNext, RaiseError> {
    debug_assert!(matches!(kind, Kind::Word | Kind::SetWord));
    debug_assert!(limit as usize <= heap.context_len(context));
    if limit == 0 {
        return Ok(next);
    }

    // Reuse an existing variant when one matches exactly.
    if let Some(start) = heap.context_patches(context) {
        let mut cursor = start;
        loop {
            let (matches, next_variant) = {
                let patch = heap.patch(cursor);
                let (_, index) = patch.cell.word_parts().expect("patch cell is a word");
                let matches = patch.next == next
                    && patch.cell.binding() == Binding::Specific(context)
                    && index == limit
                    && patch.cell.heart() == kind
                    && patch.bind_reuse == bind_reuse;
                (matches, patch.variant_next)
            };
            if matches {
                heap.patch_mut(cursor).reused = true;
                return Ok(PatchNext::Patch(cursor));
            }
            if next_variant == start {
                break;
            }
            cursor = next_variant;
        }
    }

    // The patch cell is a word bound at the limit index; its spelling is
    // the last key visible through the overlay.
    let keylist = heap.context_keylist(context);
    let symbol = heap.keylist(keylist).keys[limit as usize - 1];
    let cell = Cell::bound_word(kind, symbol, context, limit);
    let id = heap.alloc_patch(cell, next, bind_reuse)?;

    // Splice into the variants ring and cache as most recent.
    if let Some(recent) = heap.context_patches(context) {
        let after = heap.patch(recent).variant_next;
        heap.patch_mut(id).variant_next = after;
        heap.patch_mut(recent).variant_next = id;
    }
    heap.set_context_patches(context, Some(id));

    Ok(PatchNext::Patch(id))
}

/// The datatype-module entry point: [`make_patch`] without slot aliasing.
pub fn make_or_reuse_patch(
    heap: &mut Heap,
    context: ContextId,
    limit: u32,
    next: PatchNext,
    kind: Kind,
) -> Result<PatchNext, RaiseError> {
    make_patch(heap, context, limit, next, kind, false)
}

/// Attach an overlay to an array cell in place: the cell's intrinsic
/// binding becomes the tail of a chain headed by a fresh (or reused)
/// patch over `context`.
pub fn virtual_bind_patchify(
    heap: &mut Heap,
    cell: &mut Cell,
    context: ContextId,
    kind: Kind,
) -> Result<(), RaiseError> {
    debug_assert!(cell.heart().any_array());
    let next = match cell.binding() {
        Binding::Virtual(patch) => PatchNext::Patch(patch),
        Binding::Specific(ctx) => PatchNext::Frame(ctx),
        Binding::Unbound => PatchNext::None,
        Binding::Relative(_) => {
            debug_assert!(false, "cannot patchify a relative array");
            PatchNext::None
        }
    };
    let limit = heap.context_len(context) as u32;
    match make_patch(heap, context, limit, next, kind, false)? {
        PatchNext::Patch(patch) => cell.set_binding(Binding::Virtual(patch)),
        PatchNext::Frame(ctx) => cell.set_binding(Binding::Specific(ctx)),
        PatchNext::None => cell.set_binding(Binding::Unbound),
    }
    Ok(())
}
