//! Mica Runtime: binding and evaluation for the Mica language
//!
//! This crate is the engine over the `mica-core` data model: it resolves
//! word references through layered, late-bound lookup (specific, relative,
//! virtual, derived), and drives a prefetch evaluator over heterogeneous
//! feeds with enfix, invisibility, and quoting semantics.
//!
//! # Modules
//!
//! - `error`: evaluation errors, reifiable as first-class error contexts
//! - `config`: pool sizing, tick interval, recursion ceilings (TOML)
//! - `signal`: the process-wide signal mask polled between steps
//! - `binder`: scoped two-slot index installation on symbols
//! - `bind`: traditional mutative bind of cell ranges against a context
//! - `patch`: virtual-binding overlay construction with variant reuse
//! - `specifier`: specifier derivation and patch-chain merging
//! - `lookup`: word resolution, variable access, derelativization
//! - `feed`: array/variadic cell sources with one-cell lookback
//! - `frame`: per-invocation state and resource cleanup
//! - `machine`: the owner of heap, frames, feeds, and dispatch tables
//! - `eval`: the evaluator step, enfix and invisibility discipline
//! - `path`: path walking and the picking/poking hook boundary
//! - `scan`: the scanner callback the feed hands raw text to

pub mod bind;
pub mod binder;
pub mod config;
pub mod error;
pub mod eval;
pub mod feed;
pub mod frame;
pub mod lookup;
pub mod machine;
pub mod patch;
pub mod path;
pub mod scan;
pub mod signal;
pub mod specifier;

pub use bind::{BindFlags, any_word_types, bind_values_core};
pub use binder::{Binder, BinderSlot};
pub use config::RuntimeConfig;
pub use error::RaiseError;
pub use eval::{
    apply_action, eval_array, eval_array_from, eval_expression, eval_feed, invoke_action, reeval,
};
pub use feed::{Feed, FeedComponent, FeedFlags};
pub use frame::{Frame, FrameFlags, FrameState};
pub use lookup::{
    derelativize, get_word, get_word_context, get_word_context_cached, inherit_const, lookup_word,
    lookup_word_mut, set_word,
};
pub use machine::{Dispatcher, Machine};
pub use patch::{make_or_reuse_patch, make_patch, virtual_bind_patchify};
pub use path::{PathEval, PathHook, PathOutcome, PathState, eval_path};
pub use scan::Scanner;
pub use signal::Sigmask;
pub use specifier::{
    Specifier, chain_contains, chain_terminator, derive_specifier, is_overriding_context,
    merge_patches_reused, specifier_frame,
};
