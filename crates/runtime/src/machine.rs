//! The machine: owner of the heap, the frame stack, the feeds, the data
//! stack, and the dispatch tables.
//!
//! Everything that evaluates threads a `&mut Machine`. Dispatchers and
//! path hooks are plain function pointers registered by the host (datatype
//! modules are external collaborators); actions store an index into the
//! dispatcher table rather than a pointer, so details arrays stay plain
//! data.
//!
//! The machine also counts evaluation ticks and polls the signal mask at
//! the configured interval: recycle is noted for the collection hook,
//! interrupt and event call host hooks, halt raises.

use crate::RaiseError;
use crate::config::RuntimeConfig;
use crate::feed::{Feed, FeedComponent};
use crate::frame::{Frame, FrameFlags};
use crate::path::PathHook;
use crate::scan::Scanner;
use crate::signal::{self, Sigmask};
use crate::specifier::Specifier;
use mica_core::{ArrayId, Cell, ContextId, Heap, Kind, SeriesId};

/// An action's implementation: reads arguments out of the frame at the
/// given index, writes the result into that frame's output cell.
pub type Dispatcher = fn(&mut Machine, usize) -> Result<(), RaiseError>;

pub struct Machine {
    pub heap: Heap,
    pub config: RuntimeConfig,
    dispatchers: Vec<Dispatcher>,
    path_hooks: Vec<Option<PathHook>>,
    pub(crate) feeds: Vec<Feed>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) data_stack: Vec<Cell>,
    pub scanner: Option<Box<dyn Scanner>>,
    pub interrupt_hook: Option<fn(&mut Machine)>,
    pub event_hook: Option<fn(&mut Machine)>,
    tick: u64,
    recycle_requests: u64,
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new(RuntimeConfig::default())
    }
}

impl Machine {
    pub fn new(config: RuntimeConfig) -> Machine {
        let heap = Heap::new(config.heap_config());
        let mut machine = Machine {
            heap,
            config,
            dispatchers: Vec::new(),
            path_hooks: vec![None; 64],
            feeds: Vec::new(),
            frames: Vec::new(),
            data_stack: Vec::new(),
            scanner: None,
            interrupt_hook: None,
            event_hook: None,
            tick: 0,
            recycle_requests: 0,
        };
        crate::path::register_builtin_hooks(&mut machine);
        machine
    }

    // -------------------------------------------------------------------
    // Dispatch tables
    // -------------------------------------------------------------------

    pub fn register_dispatcher(&mut self, dispatcher: Dispatcher) -> u32 {
        self.dispatchers.push(dispatcher);
        (self.dispatchers.len() - 1) as u32
    }

    pub fn dispatcher(&self, index: u32) -> Dispatcher {
        self.dispatchers[index as usize]
    }

    pub fn register_path_hook(&mut self, kind: Kind, hook: PathHook) {
        self.path_hooks[kind as usize] = Some(hook);
    }

    pub fn path_hook(&self, kind: Kind) -> Option<PathHook> {
        self.path_hooks[kind as usize]
    }

    // -------------------------------------------------------------------
    // Feeds
    // -------------------------------------------------------------------

    pub fn push_array_feed(
        &mut self,
        array: ArrayId,
        index: u32,
        specifier: Specifier,
    ) -> Result<usize, RaiseError> {
        let feed = Feed::new_array(&mut self.heap, array, index, specifier)?;
        self.feeds.push(feed);
        Ok(self.feeds.len() - 1)
    }

    pub fn push_variadic_feed(
        &mut self,
        components: Vec<FeedComponent>,
        specifier: Specifier,
        quoting: u8,
        scan_context: Option<ContextId>,
    ) -> Result<usize, RaiseError> {
        let heap = &mut self.heap;
        let scanner = &mut self.scanner;
        let feed = Feed::new_variadic(
            heap,
            scanner.as_deref_mut(),
            components,
            specifier,
            quoting,
            scan_context,
        )?;
        self.feeds.push(feed);
        Ok(self.feeds.len() - 1)
    }

    /// Feeds pop in LIFO order; the splice bookkeeping node is released.
    pub fn pop_feed(&mut self, index: usize) {
        assert_eq!(index, self.feeds.len() - 1, "feeds pop in LIFO order");
        let mut feed = self.feeds.pop().expect("feed stack underflow");
        feed.abandon(&mut self.heap);
    }

    #[inline]
    pub fn feed(&self, index: usize) -> &Feed {
        &self.feeds[index]
    }

    #[inline]
    pub fn feed_mut(&mut self, index: usize) -> &mut Feed {
        &mut self.feeds[index]
    }

    pub fn fetch_next(&mut self, feed: usize, preserve: bool) -> Result<Cell, RaiseError> {
        let heap = &mut self.heap;
        let scanner = &mut self.scanner;
        let feeds = &mut self.feeds;
        feeds[feed].fetch_next(heap, scanner.as_deref_mut(), preserve)
    }

    // -------------------------------------------------------------------
    // Frames
    // -------------------------------------------------------------------

    pub fn push_frame(&mut self, feed: usize) -> Result<usize, RaiseError> {
        if self.frames.len() >= self.config.eval_depth_limit {
            return Err(RaiseError::StackOverflow {
                depth: self.frames.len(),
            });
        }
        let prior = self.frames.len().checked_sub(1);
        self.frames
            .push(Frame::new(feed, prior, self.data_stack.len()));
        Ok(self.frames.len() - 1)
    }

    /// Drop the topmost frame, releasing everything it acquired. Runs on
    /// both the success path and error unwinding.
    pub fn drop_frame(&mut self, index: usize) {
        assert_eq!(index, self.frames.len() - 1, "frames drop in LIFO order");
        let frame = self.frames.pop().expect("frame stack underflow");
        for hold in frame.holds {
            self.heap.series_mut(hold).release_hold();
        }
        for handle in frame.api_handles {
            self.heap.free_api_handle(handle);
        }
        self.data_stack.truncate(frame.dsp_base);
        if let Some(varlist) = frame.varlist {
            // The frame context outlives the call only when kept
            // explicitly or already managed (reified by user code).
            let keep = frame.flags.contains(FrameFlags::KEEP_VARLIST)
                || self.heap.is_managed(varlist.series());
            if !keep {
                self.heap.expire_frame(varlist);
            }
        }
    }

    #[inline]
    pub fn frame(&self, index: usize) -> &Frame {
        &self.frames[index]
    }

    #[inline]
    pub fn frame_mut(&mut self, index: usize) -> &mut Frame {
        &mut self.frames[index]
    }

    /// Take a cooperative read lock on a series, recorded on the frame so
    /// the drop releases it even through error unwinding.
    pub fn take_hold(&mut self, frame: usize, series: SeriesId) {
        self.heap.series_mut(series).take_hold();
        self.frames[frame].holds.push(series);
    }

    /// Allocate an API handle owned by `frame`.
    pub fn alloc_api_handle(&mut self, frame: usize, cell: Cell) -> Result<SeriesId, RaiseError> {
        let handle = self.heap.alloc_handle(cell)?;
        self.frames[frame].api_handles.push(handle);
        Ok(handle)
    }

    /// Read an argument slot of an action frame (1-based, paramlist
    /// order). Dispatchers use this.
    pub fn frame_arg(&self, frame: usize, index: u32) -> &Cell {
        let varlist = self.frames[frame]
            .varlist
            .expect("frame_arg needs an action frame");
        self.heap.var(varlist, index)
    }

    // -------------------------------------------------------------------
    // Data stack
    // -------------------------------------------------------------------

    pub fn ds_push(&mut self, cell: Cell) {
        self.data_stack.push(cell);
    }

    pub fn ds_pop(&mut self) -> Cell {
        self.data_stack.pop().expect("data stack underflow")
    }

    pub fn ds_len(&self) -> usize {
        self.data_stack.len()
    }

    // -------------------------------------------------------------------
    // Ticks and signals
    // -------------------------------------------------------------------

    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn recycle_requests(&self) -> u64 {
        self.recycle_requests
    }

    /// Called once per evaluator step; polls the signal mask every
    /// configured interval.
    pub fn bump_tick(&mut self) -> Result<(), RaiseError> {
        self.tick += 1;
        if self.tick % self.config.tick_interval == 0 {
            self.poll_signals()?;
        }
        Ok(())
    }

    pub fn poll_signals(&mut self) -> Result<(), RaiseError> {
        let signals = signal::take();
        if signals.is_empty() {
            return Ok(());
        }
        if signals.contains(Sigmask::RECYCLE) {
            self.recycle_requests += 1;
            tracing::debug!(tick = self.tick, "recycle requested");
            self.heap.clear_marks();
        }
        if signals.contains(Sigmask::INTERRUPT)
            && let Some(hook) = self.interrupt_hook
        {
            hook(self);
        }
        if signals.contains(Sigmask::EVENT)
            && let Some(hook) = self.event_hook
        {
            hook(self);
        }
        if signals.contains(Sigmask::HALT) {
            tracing::debug!(tick = self.tick, "halt requested");
            return Err(RaiseError::Halted);
        }
        Ok(())
    }
}
