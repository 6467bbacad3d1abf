//! Path evaluation.
//!
//! A path walk threads an intermediate value through a sequence of
//! pickers, calling a kind-specific hook at each step. The hooks are the
//! boundary to the datatype modules; the engine ships hooks for contexts
//! (field picking) and arrays (positional picking) since those are made of
//! the core's own types.
//!
//! Rules: groups inside a path are evaluated exactly once per walk and
//! their products reused, so a set-path that reads and then writes does
//! not re-run side effects. For a set-path, the set-value is delivered
//! only at the last step. If the walk lands on an action before the path
//! is exhausted, the remaining elements must be refinement words; the
//! caller partially specializes the invocation with them.

use crate::RaiseError;
use crate::eval;
use crate::lookup::{self};
use crate::machine::Machine;
use crate::specifier::{Specifier, derive_specifier};
use mica_core::{
    ActionId, ArrayId, Binding, Cell, CellFlags, Kind, SeriesInfo, SymbolId,
};

/// State threaded through one path step.
pub struct PathState {
    /// The value being picked through (the walk's output slot).
    pub out: Cell,
    /// The current picker.
    pub picker: Cell,
    /// Present only at the last step of a set-path.
    pub setval: Option<Cell>,
    /// Specifier of the walk, for derelativizing picked elements.
    pub specifier: Specifier,
}

pub enum PathOutcome {
    /// Picking produced the next intermediate value.
    Picked(Cell),
    /// The set-value was stored.
    Poked,
}

/// Per-kind picking/poking callback.
pub type PathHook = fn(&mut Machine, &mut PathState) -> Result<PathOutcome, RaiseError>;

/// What a finished path walk amounts to.
#[derive(Debug)]
pub enum PathEval {
    Value(Cell),
    /// The head picked to an action with these refinements remaining; a
    /// plain path invokes it, a get-path reifies it.
    Invoke {
        action: ActionId,
        binding: Binding,
        refinements: Vec<SymbolId>,
        label: Option<SymbolId>,
    },
    /// A set-path stored its value.
    Poked,
}

/// Walk a path cell. `setval` makes this a set-path walk.
pub fn eval_path(
    m: &mut Machine,
    path: &Cell,
    parent: Specifier,
    mut setval: Option<Cell>,
) -> Result<PathEval, RaiseError> {
    debug_assert!(path.heart().any_path());
    let (series, start) = path.series_parts().expect("path cell has an array");
    let spec = derive_specifier(&mut m.heap, parent, path)?;
    let elements: Vec<Cell> =
        m.heap.array(ArrayId::from_series(series)).cells[start as usize..].to_vec();

    if elements.is_empty() {
        return Err(RaiseError::BadPick { kind: Kind::Blank });
    }

    // Head: the only element that resolves as a variable.
    let head = &elements[0];
    let label = head.word_parts().map(|(symbol, _)| symbol);
    let mut value = resolve_element(m, head, spec)?;

    let mut index = 1;
    while index < elements.len() {
        if value.kind() == Kind::Action {
            // Remaining elements select refinements.
            let mut refinements = Vec::new();
            for element in &elements[index..] {
                match element.heart() {
                    Kind::Blank => {}
                    kind if kind.any_word() => {
                        let (symbol, _) = element.word_parts().expect("word cell");
                        refinements.push(symbol);
                    }
                    kind => return Err(RaiseError::BadPick { kind }),
                }
            }
            let action = value.as_action().expect("action cell");
            return Ok(PathEval::Invoke {
                action,
                binding: value.binding(),
                refinements,
                label,
            });
        }

        let element = &elements[index];
        let is_last = index == elements.len() - 1;
        let picker = if element.heart() == Kind::Group {
            // Evaluated once; the product is what the hook sees.
            resolve_element(m, element, spec)?
        } else {
            element.clone()
        };

        let hook = m
            .path_hook(value.heart())
            .ok_or(RaiseError::BadPick { kind: value.heart() })?;
        let mut state = PathState {
            out: value,
            picker,
            setval: if is_last { setval.take() } else { None },
            specifier: spec,
        };
        match hook(m, &mut state)? {
            PathOutcome::Picked(next) => value = next,
            PathOutcome::Poked => {
                debug_assert!(is_last, "poke before the final picker");
                return Ok(PathEval::Poked);
            }
        }
        index += 1;
    }

    if let Some(setval) = setval {
        // Single-element set-path degenerates to a set-word.
        let (symbol, _) = head.word_parts().ok_or(RaiseError::BadPick {
            kind: head.heart(),
        })?;
        let mut word = Cell::word(Kind::SetWord, symbol);
        word.set_binding(head.binding());
        if let Some((_, stored)) = head.word_parts() {
            word.set_word_index(stored);
        }
        lookup::set_word(&mut m.heap, &word, spec, setval)?;
        return Ok(PathEval::Poked);
    }

    Ok(PathEval::Value(value))
}

fn resolve_element(m: &mut Machine, element: &Cell, spec: Specifier) -> Result<Cell, RaiseError> {
    match element.heart() {
        kind if kind.any_word() => lookup::get_word(&m.heap, element, spec),
        Kind::Group => {
            let (series, index) = element.series_parts().expect("group cell has an array");
            let derived = derive_specifier(&mut m.heap, spec, element)?;
            eval::eval_array_from(m, ArrayId::from_series(series), index, derived)
        }
        _ => Ok(element.clone()),
    }
}

// -----------------------------------------------------------------------
// Built-in hooks for the core's own kinds
// -----------------------------------------------------------------------

pub fn register_builtin_hooks(m: &mut Machine) {
    for kind in [
        Kind::Object,
        Kind::Frame,
        Kind::Error,
        Kind::Port,
        Kind::Module,
    ] {
        m.register_path_hook(kind, context_hook);
    }
    m.register_path_hook(Kind::Block, block_hook);
    m.register_path_hook(Kind::Group, block_hook);
}

/// Field access on contexts: picker is a word naming a key.
fn context_hook(m: &mut Machine, state: &mut PathState) -> Result<PathOutcome, RaiseError> {
    let context = state.out.as_context().expect("context cell");
    let Some((symbol, _)) = state.picker.word_parts() else {
        return Err(RaiseError::BadPick {
            kind: state.picker.heart(),
        });
    };
    let spelling = m.heap.spelling_of(symbol).to_string();
    if !m.heap.context_is_accessible(context) {
        return Err(RaiseError::NoRelative { spelling });
    }
    let index = m
        .heap
        .find_index(context, symbol)
        .ok_or(RaiseError::UnboundWord {
            spelling: spelling.clone(),
        })?;

    match state.setval.take() {
        Some(value) => {
            let series = m.heap.series(context.series());
            if series
                .info
                .intersects(SeriesInfo::READ_ONLY | SeriesInfo::FROZEN_DEEP)
                || m.heap.var(context, index).has_flag(CellFlags::PROTECTED)
            {
                return Err(RaiseError::Protected { spelling });
            }
            let mut stored = value;
            stored.decay();
            *m.heap.var_mut(context, index) = stored;
            Ok(PathOutcome::Poked)
        }
        None => Ok(PathOutcome::Picked(m.heap.var(context, index).clone())),
    }
}

/// Positional access on arrays: picker is a 1-based integer.
fn block_hook(m: &mut Machine, state: &mut PathState) -> Result<PathOutcome, RaiseError> {
    let (series, start) = state.out.series_parts().expect("array cell");
    let Some(picker) = state.picker.as_integer() else {
        return Err(RaiseError::BadPick {
            kind: state.picker.heart(),
        });
    };
    let array = ArrayId::from_series(series);
    let offset = start as i64 + picker - 1;
    if offset < 0 {
        return Err(RaiseError::BadPick { kind: Kind::Integer });
    }
    let offset = offset as usize;

    match state.setval.take() {
        Some(value) => {
            if !m.heap.series(series).is_mutable() || state.out.has_flag(CellFlags::CONST) {
                return Err(RaiseError::Protected {
                    spelling: format!("pick {}", picker),
                });
            }
            if offset >= m.heap.array_len(array) {
                return Err(RaiseError::BadPick { kind: Kind::Integer });
            }
            let mut stored = value;
            stored.decay();
            m.heap.array_mut(array).cells[offset] = stored;
            Ok(PathOutcome::Poked)
        }
        None => match m.heap.array_cell(array, offset) {
            Some(cell) => {
                let cell = cell.clone();
                let derived = derive_specifier(&mut m.heap, state.specifier, &state.out)?;
                let picked = lookup::derelativize(&mut m.heap, &cell, derived)?;
                Ok(PathOutcome::Picked(picked))
            }
            None => Ok(PathOutcome::Picked(Cell::nulled())),
        },
    }
}
