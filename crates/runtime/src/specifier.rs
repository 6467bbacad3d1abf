//! Specifiers: the ambient value that turns relative and virtual bindings
//! into concrete contexts.
//!
//! A specifier is one of: fully specified (nothing to resolve), a frame
//! varlist (resolves relative words and feeds derived binding), or the
//! head of a virtual-binding patch chain whose terminator may itself be a
//! frame. `derive_specifier` computes the specifier an array's contents
//! should be read under, given the ambient specifier the array cell
//! arrived with; `merge_patches_reused` concatenates two chains while
//! reusing identical layers through the variants rings.
//!
//! Invariant: every chain reachable from a specifier ends at a frame
//! varlist or at nothing, and is never circular.

use crate::RaiseError;
use crate::patch::make_patch;
use mica_core::{Binding, Cell, ContextId, ContextType, Heap, PatchId, PatchNext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specifier {
    /// Nothing left to resolve.
    Specified,
    /// A varlist: resolves relative words, candidates derived binding.
    Frame(ContextId),
    /// A virtual-binding overlay chain.
    Patches(PatchId),
}

impl Specifier {
    /// The binding to store on a cell that should carry this specifier.
    pub fn to_binding(self) -> Binding {
        match self {
            Specifier::Specified => Binding::Unbound,
            Specifier::Frame(ctx) => Binding::Specific(ctx),
            Specifier::Patches(patch) => Binding::Virtual(patch),
        }
    }

    fn from_next(next: PatchNext) -> Specifier {
        match next {
            PatchNext::Patch(patch) => Specifier::Patches(patch),
            PatchNext::Frame(ctx) => Specifier::Frame(ctx),
            PatchNext::None => Specifier::Specified,
        }
    }
}

/// The frame a specifier resolves relative words with, if any: either the
/// specifier itself or its chain's terminator.
pub fn specifier_frame(heap: &Heap, specifier: Specifier) -> Option<ContextId> {
    match specifier {
        Specifier::Specified => None,
        Specifier::Frame(ctx) => Some(ctx),
        Specifier::Patches(head) => match chain_terminator(heap, head) {
            PatchNext::Frame(ctx) => Some(ctx),
            _ => None,
        },
    }
}

/// Walk a chain's next-links to its terminator.
pub fn chain_terminator(heap: &Heap, head: PatchId) -> PatchNext {
    let mut cursor = head;
    loop {
        match heap.patch(cursor).next {
            PatchNext::Patch(next) => cursor = next,
            other => return other,
        }
    }
}

/// Is `target` reachable from `head` through next-links (the head itself
/// included)?
pub fn chain_contains(heap: &Heap, head: PatchId, target: PatchNext) -> bool {
    let mut cursor = PatchNext::Patch(head);
    loop {
        if cursor == target {
            return true;
        }
        match cursor {
            PatchNext::Patch(id) => cursor = heap.patch(id).next,
            _ => return false,
        }
    }
}

/// Does `candidate` override `stored` for derived binding? True when the
/// candidate's keylist derives from the stored context's keylist (walked
/// leaf to root). Frame keylists are paramlists and do not participate.
pub fn is_overriding_context(heap: &Heap, stored: ContextId, candidate: ContextId) -> bool {
    if stored == candidate {
        return false;
    }
    if heap.context_type(stored) == ContextType::Frame
        || heap.context_type(candidate) == ContextType::Frame
    {
        return false;
    }
    heap.keylist_derives_from(heap.context_keylist(candidate), heap.context_keylist(stored))
}

/// Concatenate `child` onto `parent`, reusing every layer that already
/// exists. If `child` is already reachable from `parent`, the parent chain
/// is returned as-is. A vacant terminator accepts the child; two distinct
/// frame terminators cannot merge.
pub fn merge_patches_reused(
    heap: &mut Heap,
    parent: PatchNext,
    child: PatchNext,
) -> Result<PatchNext, RaiseError> {
    match parent {
        PatchNext::None => Ok(child),
        PatchNext::Frame(frame) => match child {
            PatchNext::None => Ok(parent),
            PatchNext::Frame(other) if other == frame => Ok(parent),
            PatchNext::Frame(_) => Err(RaiseError::IncompatiblePatches),
            PatchNext::Patch(head) => {
                // The parent ends in a frame; keep it by attaching it at
                // the child's terminator if that slot is vacant.
                match chain_terminator(heap, head) {
                    PatchNext::None => merge_patches_reused(heap, child, PatchNext::Frame(frame)),
                    PatchNext::Frame(other) if other == frame => Ok(child),
                    _ => Err(RaiseError::IncompatiblePatches),
                }
            }
        },
        PatchNext::Patch(head) => {
            if parent == child {
                return Ok(child);
            }
            if chain_contains(heap, head, child) {
                return Ok(parent);
            }
            let old_tail = heap.patch(head).next;
            let tail = merge_patches_reused(heap, old_tail, child)?;
            if tail == old_tail {
                return Ok(parent);
            }
            // Copy this layer with the merged tail; the variants ring
            // dedups against an existing identical copy.
            let patch = heap.patch(head);
            let Binding::Specific(context) = patch.cell.binding() else {
                panic!("patch cell must be bound to its overlay context");
            };
            let (_, limit) = patch.cell.word_parts().expect("patch cell is a word");
            let kind = patch.cell.heart();
            let bind_reuse = patch.bind_reuse;
            make_patch(heap, context, limit, tail, kind, bind_reuse)
        }
    }
}

/// Compute the specifier under which `cell`'s contents should be read,
/// given the ambient `parent` specifier from the outer evaluation.
pub fn derive_specifier(
    heap: &mut Heap,
    parent: Specifier,
    cell: &Cell,
) -> Result<Specifier, RaiseError> {
    match cell.binding() {
        // No intrinsic binding: the ambient specifier propagates.
        Binding::Unbound => Ok(parent),

        // Relative arrays lean on the frame the specifier carries; the
        // frame (or its absence) surfaces at word resolution.
        Binding::Relative(_) => Ok(parent),

        Binding::Specific(ctx) => match parent {
            Specifier::Specified => Ok(Specifier::Frame(ctx)),
            Specifier::Frame(_) => Ok(Specifier::Frame(ctx)),
            Specifier::Patches(head) => {
                if specifier_frame(heap, parent) == Some(ctx) {
                    return Ok(parent);
                }
                let merged =
                    merge_patches_reused(heap, PatchNext::Patch(head), PatchNext::Frame(ctx))?;
                Ok(Specifier::from_next(merged))
            }
        },

        Binding::Virtual(head) => match parent {
            Specifier::Specified => Ok(Specifier::Patches(head)),
            Specifier::Frame(frame) => {
                let merged =
                    merge_patches_reused(heap, PatchNext::Patch(head), PatchNext::Frame(frame))?;
                Ok(Specifier::from_next(merged))
            }
            Specifier::Patches(parent_head) => {
                if parent_head == head {
                    return Ok(parent);
                }
                let merged = merge_patches_reused(
                    heap,
                    PatchNext::Patch(parent_head),
                    PatchNext::Patch(head),
                )?;
                Ok(Specifier::from_next(merged))
            }
        },
    }
}
