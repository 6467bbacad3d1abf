//! The evaluator: one prefetch step at a time.
//!
//! A step fetches the feed's current cell (keeping it as lookback),
//! dispatches on its kind, and then runs the lookahead loop that gives
//! enfix operators their left-hand value. The coarse states a frame moves
//! through map onto this control flow: dispatch on a fresh value
//! (`Initial`), examining the upcoming word while the output already holds
//! a result (`LookingAhead`), treating an out-of-band value as just
//! fetched (`Reevaluating`, see [`reeval`]), and for action frames the
//! fulfillment and dispatch states.
//!
//! The rules that make the semantics:
//!
//! - **Output staleness.** Each step marks the output stale and clears the
//!   mark when it writes a result. A step that returns with the mark still
//!   set was invisible: the output keeps its prior value bit for bit.
//! - **Enfix.** After a value is produced, the upcoming word is examined.
//!   An enfix action consumes the output as its first argument. Enfix
//!   binds tighter than the left-to-right fetch for its left operand, but
//!   looser than a pending argument fulfillment: while an enfix action
//!   gathers its right argument the feed carries no-lookahead, so a
//!   following operator waits for the outer expression instead.
//! - **Deferral.** `then`/`else`-style operators mark the feed as
//!   deferring when they appear while an argument is being fulfilled; the
//!   finished outer expression picks them up. Deferring while earlier
//!   arguments are still owed is an error.
//! - **Invisibility.** An invisible action restores the feed's
//!   no-lookahead state from the cache kept on its frame, so invisible
//!   material does not break an enfix pattern apart.
//! - **Barriers.** Commas and empty groups put the feed into barrier-hit
//!   state; argument gathering that runs into it reports a clean missing
//!   argument.

use crate::RaiseError;
use crate::feed::FeedFlags;
use crate::frame::{FrameFlags, FrameState};
use crate::lookup;
use crate::machine::Machine;
use crate::path::{self, PathEval};
use crate::specifier::{Specifier, derive_specifier};
use mica_core::{
    ActionFlags, ActionId, ArrayId, Binding, Cell, CellFlags, Kind, ParamClass, ParamSpec,
    SymbolId,
};

/// Evaluate a whole array left to right; the last produced value falls
/// out (void when nothing was produced).
pub fn eval_array(m: &mut Machine, array: ArrayId, specifier: Specifier) -> Result<Cell, RaiseError> {
    eval_array_from(m, array, 0, specifier)
}

pub fn eval_array_from(
    m: &mut Machine,
    array: ArrayId,
    index: u32,
    specifier: Specifier,
) -> Result<Cell, RaiseError> {
    let feed = m.push_array_feed(array, index, specifier)?;
    let result = eval_feed(m, feed);
    m.pop_feed(feed);
    result
}

/// Run a feed to exhaustion.
pub fn eval_feed(m: &mut Machine, feed: usize) -> Result<Cell, RaiseError> {
    Ok(eval_feed_core(m, feed)?.unwrap_or_else(Cell::voided))
}

/// As [`eval_feed`], but reports "nothing was produced" (an all-invisible
/// run) instead of substituting void; groups need the distinction.
fn eval_feed_core(m: &mut Machine, feed: usize) -> Result<Option<Cell>, RaiseError> {
    let mut out = Cell::voided();
    out.set_flag(CellFlags::STALE);
    while !m.feed(feed).is_at_end() {
        m.feed_mut(feed).flags.remove(FeedFlags::BARRIER_HIT);
        eval_step(m, feed, &mut out, false)?;
    }
    if out.has_flag(CellFlags::STALE) {
        Ok(None)
    } else {
        out.clear_flag(CellFlags::STALE);
        Ok(Some(out))
    }
}

/// One evaluation step: fetch, dispatch, look ahead.
fn eval_step(
    m: &mut Machine,
    feed: usize,
    out: &mut Cell,
    fulfilling: bool,
) -> Result<(), RaiseError> {
    m.bump_tick()?;
    let current = m.fetch_next(feed, true)?;
    eval_core(m, feed, current, out, fulfilling)
}

/// Treat `value` as if it had just been fetched from the feed: the
/// re-evaluating state, for hosts injecting one out-of-band cell.
pub fn reeval(
    m: &mut Machine,
    feed: usize,
    value: &Cell,
    out: &mut Cell,
) -> Result<(), RaiseError> {
    m.bump_tick()?;
    eval_core(m, feed, value.clone(), out, false)
}

/// Evaluate one full expression (stepping over invisibles). Returns
/// whether a value was produced; `false` means the feed ended or hit a
/// barrier with only invisible material seen.
pub fn eval_expression(
    m: &mut Machine,
    feed: usize,
    out: &mut Cell,
    fulfilling: bool,
) -> Result<bool, RaiseError> {
    let prior = out.clone();
    loop {
        if m.feed(feed).is_at_end() {
            *out = prior;
            return Ok(false);
        }
        eval_step(m, feed, out, fulfilling)?;
        if !out.has_flag(CellFlags::STALE) {
            return Ok(true);
        }
        if m.feed(feed).flags.contains(FeedFlags::BARRIER_HIT) {
            *out = prior;
            return Ok(false);
        }
    }
}

#[inline]
fn write_out(out: &mut Cell, value: Cell) {
    *out = value;
    out.clear_flag(CellFlags::STALE);
}

fn eval_core(
    m: &mut Machine,
    feed: usize,
    current: Cell,
    out: &mut Cell,
    fulfilling: bool,
) -> Result<(), RaiseError> {
    let prior = out.clone();
    out.set_flag(CellFlags::STALE);
    let spec = m.feed(feed).specifier();
    let ambient_const = m.feed(feed).flags.contains(FeedFlags::CONST);

    match current.kind() {
        Kind::End => {}

        // A quoted value evaluates to itself, one quote lighter.
        Kind::Quoted => {
            let mut value = current.clone();
            m.heap.unquotify(&mut value);
            let mut value = lookup::derelativize(&mut m.heap, &value, spec)?;
            lookup::inherit_const(&mut value, ambient_const);
            write_out(out, value);
        }

        // Barrier; invisible.
        Kind::Comma => {
            m.feed_mut(feed).flags.insert(FeedFlags::BARRIER_HIT);
        }

        Kind::Word => {
            let value = lookup::get_word(&m.heap, &current, spec)?;
            if value.kind() == Kind::Action {
                let action = value.as_action().expect("action cell");
                let label = current.word_parts().map(|(symbol, _)| symbol);
                if m.heap.action_flags(action).contains(ActionFlags::ENFIX) {
                    // An enfix operator heading an expression has no left.
                    return Err(missing_argument(m, action, label, 0));
                }
                match invoke_action(m, feed, action, value.binding(), None, label, Vec::new())? {
                    Some(result) => write_out(out, result),
                    None => *out = restore_invisible(prior.clone()),
                }
            } else {
                write_out(out, value);
            }
        }

        Kind::GetWord => {
            let value = lookup::lookup_word(&m.heap, &current, spec)?;
            write_out(out, value);
        }

        // Meta access: the variable's value, made visible one quote up
        // (isotopes decay into their plain quoted form).
        Kind::MetaWord => {
            let mut value = lookup::lookup_word(&m.heap, &current, spec)?;
            value.decay();
            m.heap.quotify(&mut value, 1)?;
            write_out(out, value);
        }

        Kind::SetWord => {
            let mut right = Cell::voided();
            if !eval_expression(m, feed, &mut right, true)? {
                let (symbol, _) = current.word_parts().expect("word cell");
                return Err(RaiseError::NeedNonVoid {
                    spelling: m.heap.spelling_of(symbol).to_string(),
                });
            }
            let result = lookup::set_word(&mut m.heap, &current, spec, right)?;
            write_out(out, result);
        }

        Kind::Group => {
            let (series, index) = current.series_parts().expect("group cell has an array");
            let array = ArrayId::from_series(series);
            if m.heap.array_len(array) <= index as usize {
                // An empty group is a barrier; invisible.
                m.feed_mut(feed).flags.insert(FeedFlags::BARRIER_HIT);
            } else {
                let derived = derive_specifier(&mut m.heap, spec, &current)?;
                let group_feed = m.push_array_feed(array, index, derived)?;
                let result = eval_feed_core(m, group_feed);
                m.pop_feed(group_feed);
                match result? {
                    Some(mut value) => {
                        lookup::inherit_const(&mut value, ambient_const);
                        write_out(out, value);
                    }
                    // A group of only invisibles is itself invisible.
                    None => *out = restore_invisible(prior.clone()),
                }
            }
        }

        Kind::Path => match path::eval_path(m, &current, spec, None)? {
            PathEval::Value(value) => write_out(out, value),
            PathEval::Invoke {
                action,
                binding,
                refinements,
                label,
            } => {
                if m.heap.action_flags(action).contains(ActionFlags::ENFIX) {
                    return Err(missing_argument(m, action, label, 0));
                }
                match invoke_action(m, feed, action, binding, None, label, refinements)? {
                    Some(result) => write_out(out, result),
                    None => *out = restore_invisible(prior.clone()),
                }
            }
            PathEval::Poked => unreachable!("get walk cannot poke"),
        },

        Kind::SetPath => {
            let mut right = Cell::voided();
            if !eval_expression(m, feed, &mut right, true)? {
                return Err(RaiseError::NeedNonVoid {
                    spelling: "set-path".to_string(),
                });
            }
            match path::eval_path(m, &current, spec, Some(right.clone()))? {
                PathEval::Poked => write_out(out, right),
                PathEval::Value(_) | PathEval::Invoke { .. } => {
                    return Err(RaiseError::BadPick {
                        kind: Kind::SetPath,
                    });
                }
            }
        }

        Kind::GetPath => match path::eval_path(m, &current, spec, None)? {
            PathEval::Value(value) => write_out(out, value),
            PathEval::Invoke {
                action, binding, ..
            } => {
                let mut cell = Cell::action(action);
                cell.set_binding(binding);
                write_out(out, cell);
            }
            PathEval::Poked => unreachable!("get walk cannot poke"),
        },

        Kind::Action => {
            let action = current.as_action().expect("action cell");
            match invoke_action(m, feed, action, current.binding(), None, None, Vec::new())? {
                Some(result) => write_out(out, result),
                None => *out = restore_invisible(prior.clone()),
            }
        }

        // Everything else is inert: copied derelatively to the output.
        _ => {
            let mut value = lookup::derelativize(&mut m.heap, &current, spec)?;
            lookup::inherit_const(&mut value, ambient_const);
            write_out(out, value);
        }
    }

    lookahead(m, feed, out, fulfilling)
}

/// Restore the pre-step output after an invisible step, keeping the stale
/// mark so callers can see that nothing was produced.
fn restore_invisible(mut prior: Cell) -> Cell {
    prior.set_flag(CellFlags::STALE);
    prior
}

/// The lookahead loop: give enfix operators their chance at the output.
fn lookahead(
    m: &mut Machine,
    feed: usize,
    out: &mut Cell,
    fulfilling: bool,
) -> Result<(), RaiseError> {
    loop {
        // Invisible runs leave lookahead to the step that produces.
        if out.has_flag(CellFlags::STALE) {
            return Ok(());
        }
        let next = m.feed(feed).current().clone();
        if next.is_end() || next.kind() != Kind::Word {
            return Ok(());
        }

        // Pre-resolve the upcoming word through the gotten cache.
        let cached = m.feed(feed).gotten.clone();
        let gotten = match cached {
            Some(value) => value,
            None => {
                let spec = m.feed(feed).specifier();
                match lookup::get_word_context(&m.heap, &next, spec)? {
                    Some((context, index)) => {
                        let value = m.heap.var(context, index).clone();
                        m.feed_mut(feed).gotten = Some(value.clone());
                        value
                    }
                    // Unbound: not ours to report; stepping it will.
                    None => return Ok(()),
                }
            }
        };
        if gotten.kind() != Kind::Action {
            return Ok(());
        }
        let action = gotten.as_action().expect("action cell");
        let aflags = m.heap.action_flags(action);
        if !aflags.contains(ActionFlags::ENFIX) {
            return Ok(());
        }

        // One-shot suppression (set while an enfix gathers its right
        // argument, and preserved across invisibles).
        if m.feed(feed).flags.contains(FeedFlags::NO_LOOKAHEAD) {
            m.feed_mut(feed).flags.remove(FeedFlags::NO_LOOKAHEAD);
            return Ok(());
        }

        // Deferred operators wait for the finished outer expression.
        if aflags.contains(ActionFlags::DEFERS_LOOKBACK) && fulfilling {
            m.feed_mut(feed).flags.insert(FeedFlags::DEFERRING_ENFIX);
            return Ok(());
        }

        // A left-quoting operator with a skippable first parameter may
        // decline based on the type of the held output.
        if aflags.contains(ActionFlags::QUOTES_FIRST)
            && let Some(first) = first_external_param(m, action)
            && first.skippable
            && !first.accepts.accepts(out.heart())
        {
            return Ok(());
        }

        // Commit: consume the operator and hand over the output.
        m.feed_mut(feed).flags.remove(FeedFlags::DEFERRING_ENFIX);
        let operator = m.fetch_next(feed, true)?;
        let label = operator.word_parts().map(|(symbol, _)| symbol);
        m.feed_mut(feed).flags.insert(FeedFlags::NEXT_ARG_FROM_OUT);
        let left = out.clone();
        match invoke_action(m, feed, action, gotten.binding(), Some(left), label, Vec::new())? {
            Some(result) => write_out(out, result),
            None => {}
        }
        // Another operator may be waiting on this result.
    }
}

fn first_external_param(m: &Machine, action: ActionId) -> Option<ParamSpec> {
    m.heap
        .details(action)
        .params
        .iter()
        .find(|p| !p.class.is_internal() && !p.refinement)
        .cloned()
}

fn missing_argument(
    m: &Machine,
    action: ActionId,
    label: Option<SymbolId>,
    param_index: usize,
) -> RaiseError {
    let param = m
        .heap
        .details(action)
        .params
        .get(param_index)
        .map(|p| m.heap.spelling_of(p.symbol).to_string())
        .unwrap_or_else(|| "argument".to_string());
    RaiseError::MissingArgument {
        label: label.map(|symbol| m.heap.spelling_of(symbol).to_string()),
        param,
    }
}

/// Invoke an action against the feed. `left` supplies the first argument
/// for enfix invocations (the just-produced output). `refinements` is the
/// callsite's refinement request list, in path order. Returns the result,
/// or `None` when the action is invisible.
pub fn invoke_action(
    m: &mut Machine,
    feed: usize,
    action: ActionId,
    binding: Binding,
    left: Option<Cell>,
    label: Option<SymbolId>,
    refinements: Vec<SymbolId>,
) -> Result<Option<Cell>, RaiseError> {
    let aflags = m.heap.action_flags(action);
    let fi = m.push_frame(feed)?;
    m.frame_mut(fi).original = Some(action);
    m.frame_mut(fi).label = label;
    m.frame_mut(fi).state = FrameState::FulfillingArgs;
    if left.is_some() {
        m.frame_mut(fi).flags.insert(FrameFlags::RUNNING_ENFIX);
    }

    // The no-lookahead state is cached for the duration of one action and
    // restored on exit only if the action was invisible.
    let cached_no_lookahead = m.feed(feed).flags.contains(FeedFlags::NO_LOOKAHEAD);
    m.frame_mut(fi).cache_no_lookahead = cached_no_lookahead;
    m.feed_mut(feed)
        .flags
        .remove(FeedFlags::NO_LOOKAHEAD | FeedFlags::NEXT_ARG_FROM_OUT);

    let result = fulfill_and_dispatch(m, fi, feed, action, binding, left, refinements);

    let outcome = if result.is_ok() {
        Some(m.frame(fi).out.clone())
    } else {
        None
    };

    // Invocation invalidates the feed's pre-resolution cache.
    m.feed_mut(feed).gotten = None;
    if aflags.contains(ActionFlags::INVISIBLE) && cached_no_lookahead {
        m.feed_mut(feed).flags.insert(FeedFlags::NO_LOOKAHEAD);
    }
    m.drop_frame(fi);
    result?;

    if aflags.contains(ActionFlags::INVISIBLE) {
        Ok(None)
    } else {
        let mut out = outcome.expect("dispatch succeeded");
        out.clear_flag(CellFlags::STALE);
        Ok(Some(out))
    }
}

fn fulfill_and_dispatch(
    m: &mut Machine,
    fi: usize,
    feed: usize,
    action: ActionId,
    binding: Binding,
    mut left: Option<Cell>,
    refinements: Vec<SymbolId>,
) -> Result<(), RaiseError> {
    let varlist = m.heap.make_frame(action, binding)?;
    m.frame_mut(fi).varlist = Some(varlist);
    let params = m.heap.details(action).params.clone();
    let label = m.frame(fi).label;

    // Every requested refinement must name a parameter.
    for requested in &refinements {
        if !params
            .iter()
            .any(|p| p.refinement && m.heap.same_spelling(p.symbol, *requested))
        {
            return Err(RaiseError::UnboundWord {
                spelling: m.heap.spelling_of(*requested).to_string(),
            });
        }
    }

    let mut next_request = 0usize;
    let mut pickups: Vec<(usize, usize)> = Vec::new();

    for (i, param) in params.iter().enumerate() {
        m.frame_mut(fi).param_index = i;
        let slot = (i + 1) as u32;

        // Refinements are checked first: a bare-switch refinement uses the
        // local class but is still callsite-visible.
        if param.refinement {
            let position = refinements
                .iter()
                .position(|s| m.heap.same_spelling(*s, param.symbol));
            match position {
                None => *m.heap.var_mut(varlist, slot) = Cell::nulled(),
                Some(position) if position == next_request => {
                    next_request += 1;
                    let value = fulfill_refinement(m, fi, feed, label, param)?;
                    *m.heap.var_mut(varlist, slot) = value;
                }
                Some(position) => {
                    // Out of declaration order: revisit in callsite order.
                    pickups.push((position, i));
                }
            }
            continue;
        }

        if param.class.is_internal() {
            *m.heap.var_mut(varlist, slot) = match param.class {
                ParamClass::Local => Cell::voided(),
                _ => Cell::nulled(),
            };
            continue;
        }

        let value = match left.take() {
            Some(value) => value,
            None => fulfill_from_feed(m, fi, feed, label, param)?,
        };
        *m.heap.var_mut(varlist, slot) = value;

        // A deferred enfix only attaches when this was the final argument.
        if m.feed(feed).flags.contains(FeedFlags::DEFERRING_ENFIX)
            && params[i + 1..].iter().any(|p| !p.class.is_internal())
        {
            return Err(RaiseError::DeferredEnfix);
        }
    }

    if !pickups.is_empty() {
        // During pickups the GC must consider every argument slot live,
        // not only those below the cursor.
        m.frame_mut(fi).flags.insert(FrameFlags::DOING_PICKUPS);
        pickups.sort_by_key(|(position, _)| *position);
        for (_, i) in pickups {
            m.frame_mut(fi).param_index = i;
            let param = &params[i];
            let value = fulfill_refinement(m, fi, feed, label, param)?;
            *m.heap.var_mut(varlist, (i + 1) as u32) = value;
        }
        m.frame_mut(fi).flags.remove(FrameFlags::DOING_PICKUPS);
    }

    m.frame_mut(fi).state = FrameState::Dispatching;
    let dispatcher = m.dispatcher(m.heap.details(action).dispatcher);
    dispatcher(m, fi)
}

/// A requested refinement: flag-only refinements (local class) record
/// plain truth; argument-bearing refinements gather from the feed.
fn fulfill_refinement(
    m: &mut Machine,
    fi: usize,
    feed: usize,
    label: Option<SymbolId>,
    param: &ParamSpec,
) -> Result<Cell, RaiseError> {
    if param.class == ParamClass::Local {
        return Ok(Cell::logic(true));
    }
    fulfill_from_feed(m, fi, feed, label, param)
}

fn fulfill_from_feed(
    m: &mut Machine,
    fi: usize,
    feed: usize,
    label: Option<SymbolId>,
    param: &ParamSpec,
) -> Result<Cell, RaiseError> {
    let missing = |m: &Machine| RaiseError::MissingArgument {
        label: label.map(|symbol| m.heap.spelling_of(symbol).to_string()),
        param: m.heap.spelling_of(param.symbol).to_string(),
    };
    let blocked = |m: &Machine| {
        m.feed(feed).is_at_end() || m.feed(feed).flags.contains(FeedFlags::BARRIER_HIT)
    };

    match param.class {
        ParamClass::Normal | ParamClass::Literal => {
            if blocked(m) {
                return Err(missing(m));
            }
            // While an enfix action gathers its right argument, a
            // following operator must wait for the outer expression.
            // Right-associative operators skip the suppression, so the
            // rightward chain completes first.
            if m.frame(fi).flags.contains(FrameFlags::RUNNING_ENFIX) {
                let right_assoc = m
                    .frame(fi)
                    .original
                    .is_some_and(|a| {
                        m.heap
                            .action_flags(a)
                            .contains(ActionFlags::RIGHT_ASSOCIATIVE)
                    });
                if !right_assoc {
                    m.feed_mut(feed).flags.insert(FeedFlags::NO_LOOKAHEAD);
                }
            }
            let mut arg = Cell::voided();
            if !eval_expression(m, feed, &mut arg, true)? {
                return Err(missing(m));
            }
            if param.class == ParamClass::Literal {
                arg.decay();
                m.heap.quotify(&mut arg, 1)?;
            }
            Ok(arg)
        }

        ParamClass::HardQuote => {
            if blocked(m) || m.feed(feed).current().kind() == Kind::Comma {
                return Err(missing(m));
            }
            let spec = m.feed(feed).specifier();
            let cell = m.fetch_next(feed, true)?;
            let mut arg = lookup::derelativize(&mut m.heap, &cell, spec)?;
            arg.set_flag(CellFlags::UNEVALUATED);
            Ok(arg)
        }

        ParamClass::SoftQuote | ParamClass::MediumQuote => {
            if blocked(m) || m.feed(feed).current().kind() == Kind::Comma {
                return Err(missing(m));
            }
            let spec = m.feed(feed).specifier();
            let cell = m.fetch_next(feed, true)?;
            match cell.kind() {
                // Escapable forms evaluate; everything else is literal.
                Kind::Group => {
                    let (series, index) = cell.series_parts().expect("group cell");
                    let derived = derive_specifier(&mut m.heap, spec, &cell)?;
                    eval_array_from(m, ArrayId::from_series(series), index, derived)
                }
                Kind::GetWord => lookup::lookup_word(&m.heap, &cell, spec),
                Kind::GetPath => match path::eval_path(m, &cell, spec, None)? {
                    PathEval::Value(value) => Ok(value),
                    PathEval::Invoke {
                        action, binding, ..
                    } => {
                        let mut value = Cell::action(action);
                        value.set_binding(binding);
                        Ok(value)
                    }
                    PathEval::Poked => unreachable!("get walk cannot poke"),
                },
                _ => {
                    let mut arg = lookup::derelativize(&mut m.heap, &cell, spec)?;
                    arg.set_flag(CellFlags::UNEVALUATED);
                    Ok(arg)
                }
            }
        }

        ParamClass::Return | ParamClass::Output | ParamClass::Local => {
            unreachable!("internal classes are not fulfilled from the feed")
        }
    }
}

/// Strict variadic application: fulfill and run `action` against the
/// feed, then insist the feed is exhausted.
pub fn apply_action(
    m: &mut Machine,
    feed: usize,
    action: ActionId,
    binding: Binding,
    label: Option<SymbolId>,
) -> Result<Cell, RaiseError> {
    let result = invoke_action(m, feed, action, binding, None, label, Vec::new())?;
    if !m.feed(feed).is_at_end() {
        return Err(RaiseError::ApplyTooMany);
    }
    Ok(result.unwrap_or_else(Cell::voided))
}
