//! Traditional mutative binding: walk a range of cells and point matching
//! words at a context's slots.
//!
//! The walk installs the context's keys on a binder (O(1) membership per
//! word), rewrites matching word cells in place, optionally collects
//! set-words into the context as new keys, and recurses into nested
//! arrays under `DEEP`. The binder is torn down before returning, leak
//! checked, whatever happened mid-walk.

use crate::RaiseError;
use crate::binder::Binder;
use bitflags::bitflags;
use mica_core::{ArrayId, Binding, Cell, ContextId, Heap, Kind, SeriesInfo, TypeSet};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BindFlags: u8 {
        /// Recurse into nested arrays.
        const DEEP = 0x01;
        /// Append unmatched set-words to the context as new keys.
        const COLLECT_SET_WORDS = 0x02;
        /// Append every unmatched word to the context as a new key.
        const COLLECT_ANY_WORD = 0x04;
    }
}

/// Bind the cells of `array` against `context`. `accept` selects which
/// word hearts participate.
pub fn bind_values_core(
    heap: &mut Heap,
    array: ArrayId,
    context: ContextId,
    accept: TypeSet,
    flags: BindFlags,
    depth_limit: usize,
) -> Result<(), RaiseError> {
    let mut binder = Binder::new_any();
    let keylist = heap.context_keylist(context);
    let keys = heap.keylist(keylist).keys.clone();
    for (i, key) in keys.iter().enumerate() {
        binder.try_add(heap, *key, i as u32 + 1);
    }

    let result = bind_array(heap, &mut binder, array, context, accept, flags, depth_limit);

    // Teardown covers keys appended by collection too.
    let keylist = heap.context_keylist(context);
    let all_keys = heap.keylist(keylist).keys.clone();
    for key in all_keys {
        binder.remove_else_zero(heap, key);
    }
    binder.finish();
    result
}

fn bind_array(
    heap: &mut Heap,
    binder: &mut Binder,
    array: ArrayId,
    context: ContextId,
    accept: TypeSet,
    flags: BindFlags,
    depth: usize,
) -> Result<(), RaiseError> {
    if depth == 0 {
        return Err(RaiseError::StackOverflow { depth: 0 });
    }
    if heap
        .series(array.series())
        .info
        .intersects(SeriesInfo::READ_ONLY | SeriesInfo::FROZEN_DEEP)
    {
        return Err(RaiseError::Protected {
            spelling: "bind target".to_string(),
        });
    }

    for i in 0..heap.array_len(array) {
        let cell = heap.array(array).cells[i].clone();
        let heart = cell.heart();

        if heart.any_word() {
            if !accept.accepts(heart) {
                continue;
            }
            let Some((symbol, _)) = cell.word_parts() else {
                continue; // deep-quoted word, payload is shared
            };
            let mut index = binder.get_else_zero(heap, symbol);
            if index == 0 {
                let collect = flags.contains(BindFlags::COLLECT_ANY_WORD)
                    || (heart == Kind::SetWord && flags.contains(BindFlags::COLLECT_SET_WORDS));
                if !collect {
                    continue;
                }
                index = heap.append_key(context, symbol, Cell::voided());
                binder.try_add(heap, symbol, index);
            }
            let mut bound = cell;
            bound.set_binding(Binding::Specific(context));
            bound.set_word_index(index);
            heap.array_mut(array).cells[i] = bound;
        } else if flags.contains(BindFlags::DEEP)
            && heart.any_array()
            && let Some((series, _)) = cell.series_parts()
        {
            bind_array(
                heap,
                binder,
                ArrayId::from_series(series),
                context,
                accept,
                flags,
                depth - 1,
            )?;
        }
    }
    Ok(())
}

/// The word hearts a plain bind accepts.
pub fn any_word_types() -> TypeSet {
    TypeSet::of(&[Kind::Word, Kind::SetWord, Kind::GetWord, Kind::MetaWord])
}
