//! Mica Core: the data model of the Mica binding/evaluation engine
//!
//! This crate owns the uniform value representation and the storage it
//! lives in. Nothing here evaluates; the evaluator, binder, and virtual
//! binding machinery live in `mica-runtime` and are built entirely on the
//! types exported from this crate.
//!
//! Key design principles:
//! - Cell: one fixed-size tagged slot for every value the language touches
//! - Series: one variable-length container for every collection, with a
//!   flavor byte discriminating subclasses (array, symbol, varlist, ...)
//! - Ids, not pointers: pools hand out `u32` ids so cyclic structures
//!   (synonym rings, patch variant rings) are walked without unsafe code
//!
//! # Modules
//!
//! - `kind`: the closed kind taxonomy and its range-based predicates
//! - `node`: pool allocation, node tag-byte discipline, typed ids
//! - `cell`: the 40-byte cell (header, kind/heart bytes, payload, binding)
//! - `series`: flavored series nodes and their content variants
//! - `symbol`: interning, synonym rings, binder-index slots
//! - `context`: varlist/keylist pairs, derivation, frame contexts
//! - `action`: parameter classes, action flags, details construction
//! - `heap`: the pool owner; allocation, quoting, GC mark contracts
//! - `error`: the core error type (pool exhaustion)

pub mod action;
pub mod cell;
pub mod context;
pub mod error;
pub mod heap;
pub mod kind;
pub mod node;
pub mod series;
pub mod symbol;

pub use action::{ActionFlags, ParamClass, ParamSpec, TypeSet};
pub use cell::{Binding, CachedLookup, Cell, CellFlags, Payload, WordCache};
pub use context::ContextType;
pub use error::CoreError;
pub use heap::{Heap, HeapConfig};
pub use kind::{Kind, kind_byte, split_kind_byte};
pub use node::{
    ActionId, ArrayId, ContextId, KeylistId, NodeBits, PatchId, Pool, PoolStats, SeriesId,
    SymbolId, END_TAG_BYTE, FREE_TAG_BYTE,
};
pub use series::{
    ArrayContent, DetailsContent, Flavor, Flavored, KeylistContent, PatchContent, PatchNext,
    SeriesInfo, SeriesNode, SpliceContent, SymbolContent, VarlistContent,
};
pub use symbol::{SymbolTable, fold_spelling};
