//! The feed: the sole source of cells for an evaluator frame.
//!
//! A feed yields cells one at a time with exactly one unit of lookback
//! (enfix needs to re-examine the left-hand value after discovering that
//! the next word is a left-biased operator). It is fed from exactly one
//! of: an array splice, or a list of host variadic components that are
//! classified one by one, the way a tag byte classifies raw pointers:
//! text is scanned and spliced, cells are adopted (quoted up by the feed's
//! quoting byte), splice instructions adjust quoting and may release their
//! array on exhaustion, and an end component exhausts the feed.
//!
//! The feed also owns the "gotten" cache: the evaluator's pre-resolution
//! of the current word, invalidated by any fetch, action invocation, or
//! context growth that could move variable storage.

use crate::RaiseError;
use crate::binder::Binder;
use crate::scan::Scanner;
use crate::specifier::Specifier;
use bitflags::bitflags;
use mica_core::{ArrayId, Cell, Heap, SeriesId};
use std::collections::VecDeque;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeedFlags: u8 {
        /// A barrier (comma, empty group) was crossed; argument gathering
        /// reports a clean missing-argument until the next expression.
        const BARRIER_HIT = 0x01;
        /// Suppress enfix lookahead for the current step.
        const NO_LOOKAHEAD = 0x02;
        /// A deferred enfix operator is waiting on the completed
        /// expression to the left.
        const DEFERRING_ENFIX = 0x04;
        /// The next invocation takes its first argument from the frame's
        /// output cell instead of the feed.
        const NEXT_ARG_FROM_OUT = 0x08;
        /// Values read from this feed inherit const.
        const CONST = 0x10;
    }
}

/// One host-supplied variadic component, after classification.
#[derive(Debug)]
pub enum FeedComponent {
    /// Raw source text: scanned at fetch time, result spliced in.
    Text(String),
    /// A finished cell, adopted as-is (plus the feed's quoting).
    Cell(Cell),
    /// An array splice instruction: quote-adjust, release-on-use.
    Splice {
        array: ArrayId,
        quote_adjust: u8,
        release: bool,
    },
    /// Explicit terminator: exhausts the feed, dropping what follows.
    End,
}

pub struct Feed {
    pub flags: FeedFlags,
    current: Cell,
    lookback: Cell,
    /// Active splice position (a feed-splice series node).
    splice: Option<SeriesId>,
    splice_quote: u8,
    splice_release: bool,
    pending: VecDeque<FeedComponent>,
    specifier: Specifier,
    /// Extra quoting applied to adopted variadic cells.
    quoting: u8,
    /// Lexical context for scanned text, if any.
    scan_context: Option<mica_core::ContextId>,
    /// Cached resolution of the current word.
    pub gotten: Option<Cell>,
}

impl Feed {
    /// Feed over an array's cells starting at `index`.
    pub fn new_array(
        heap: &mut Heap,
        array: ArrayId,
        index: u32,
        specifier: Specifier,
    ) -> Result<Feed, RaiseError> {
        let splice = heap.alloc_splice(array, index)?;
        let mut feed = Feed {
            flags: FeedFlags::empty(),
            current: Cell::fresh(),
            lookback: Cell::fresh(),
            splice: Some(splice),
            splice_quote: 0,
            splice_release: false,
            pending: VecDeque::new(),
            specifier,
            quoting: 0,
            scan_context: None,
            gotten: None,
        };
        feed.current = feed.pull(heap, None)?;
        Ok(feed)
    }

    /// Feed over host variadic components.
    pub fn new_variadic(
        heap: &mut Heap,
        scanner: Option<&mut (dyn Scanner + 'static)>,
        components: Vec<FeedComponent>,
        specifier: Specifier,
        quoting: u8,
        scan_context: Option<mica_core::ContextId>,
    ) -> Result<Feed, RaiseError> {
        let mut feed = Feed {
            flags: FeedFlags::empty(),
            current: Cell::fresh(),
            lookback: Cell::fresh(),
            splice: None,
            splice_quote: 0,
            splice_release: false,
            pending: components.into(),
            specifier,
            quoting,
            scan_context,
            gotten: None,
        };
        feed.current = feed.pull(heap, scanner)?;
        Ok(feed)
    }

    #[inline]
    pub fn current(&self) -> &Cell {
        &self.current
    }

    #[inline]
    pub fn lookback(&self) -> &Cell {
        &self.lookback
    }

    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.current.is_end()
    }

    #[inline]
    pub fn specifier(&self) -> Specifier {
        self.specifier
    }

    /// Advance one cell. The old head is returned (and kept as lookback
    /// when `preserve` asks for it; otherwise the lookback is dropped so
    /// the old head cannot be observed again).
    pub fn fetch_next(
        &mut self,
        heap: &mut Heap,
        scanner: Option<&mut (dyn Scanner + 'static)>,
        preserve: bool,
    ) -> Result<Cell, RaiseError> {
        let next = self.pull(heap, scanner)?;
        let old = std::mem::replace(&mut self.current, next);
        self.lookback = if preserve { old.clone() } else { Cell::fresh() };
        self.gotten = None;
        Ok(old)
    }

    /// Release the splice bookkeeping node (called when the feed's frame
    /// is dropped; the pool slot is unmanaged and would otherwise linger).
    pub fn abandon(&mut self, heap: &mut Heap) {
        if let Some(splice) = self.splice.take() {
            heap.free_series(splice);
        }
        self.pending.clear();
        self.current = Cell::fresh();
        self.gotten = None;
    }

    fn pull(
        &mut self,
        heap: &mut Heap,
        mut scanner: Option<&mut (dyn Scanner + 'static)>,
    ) -> Result<Cell, RaiseError> {
        loop {
            if let Some(splice_id) = self.splice {
                let (array, index) = {
                    let splice = heap.series(splice_id).as_splice();
                    (splice.array, splice.index)
                };
                if let Some(cell) = heap.array_cell(array, index as usize) {
                    let mut cell = cell.clone();
                    cell.debug_assert_readable();
                    heap.series_mut(splice_id).as_splice_mut().index = index + 1;
                    if self.splice_quote > 0 {
                        heap.quotify(&mut cell, self.splice_quote)?;
                    }
                    return Ok(cell);
                }
                // Splice exhausted.
                self.splice = None;
                heap.free_series(splice_id);
                if self.splice_release && !heap.is_managed(array.series()) {
                    heap.free_series(array.series());
                }
                self.splice_quote = 0;
                self.splice_release = false;
            }

            match self.pending.pop_front() {
                None => return Ok(Cell::fresh()),
                Some(FeedComponent::End) => {
                    self.pending.clear();
                    return Ok(Cell::fresh());
                }
                Some(FeedComponent::Cell(mut cell)) => {
                    cell.debug_assert_readable();
                    if self.quoting > 0 {
                        heap.quotify(&mut cell, self.quoting)?;
                    }
                    return Ok(cell);
                }
                Some(FeedComponent::Text(text)) => {
                    let scanner = scanner
                        .as_deref_mut()
                        .expect("feed received text but no scanner is installed");
                    let cells = match self.scan_context {
                        Some(context) => {
                            let mut binder = Binder::new_any();
                            let keylist = heap.context_keylist(context);
                            let keys = heap.keylist(keylist).keys.clone();
                            for (i, key) in keys.iter().enumerate() {
                                binder.try_add(heap, *key, i as u32 + 1);
                            }
                            let result =
                                scanner.scan(heap, &text, Some((&mut binder, context)));
                            for key in &keys {
                                binder.remove_else_zero(heap, *key);
                            }
                            binder.finish();
                            result?
                        }
                        None => scanner.scan(heap, &text, None)?,
                    };
                    let array = heap.alloc_array(cells)?;
                    // Scanned results are managed so they survive any
                    // allocation between here and their consumption.
                    heap.manage(array.series());
                    self.splice = Some(heap.alloc_splice(array, 0)?);
                    self.splice_quote = 0;
                    self.splice_release = false;
                }
                Some(FeedComponent::Splice {
                    array,
                    quote_adjust,
                    release,
                }) => {
                    self.splice = Some(heap.alloc_splice(array, 0)?);
                    self.splice_quote = quote_adjust;
                    self.splice_release = release;
                }
            }
        }
    }
}
