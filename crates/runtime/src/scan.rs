//! The scanner boundary.
//!
//! Tokenization is not this engine's business: a host supplies an
//! implementation of [`Scanner`] and the feed calls it when a variadic
//! component turns out to be raw source text. Scanning always runs to
//! completion for its source (no incremental scanning of partial text),
//! and the feed manages the resulting array so it survives later
//! allocation.
//!
//! When the feed carries a lexical context for the text, it lends the
//! scanner a binder preloaded with that context's keys, so the scanner can
//! bind words as it produces them.

use crate::RaiseError;
use crate::binder::Binder;
use mica_core::{Cell, ContextId, Heap};

pub trait Scanner {
    /// Scan `text` into cells. `binder`/`context` are present when the
    /// feed wants scanned words bound into a lexical context; the binder
    /// arrives preloaded with the context's keys (1-based indices).
    fn scan(
        &mut self,
        heap: &mut Heap,
        text: &str,
        binder: Option<(&mut Binder, ContextId)>,
    ) -> Result<Vec<Cell>, RaiseError>;
}
