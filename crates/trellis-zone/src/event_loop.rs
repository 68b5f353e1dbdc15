//! Zone-propagating event loop
//!
//! A deterministic single-threaded event loop with a virtual clock. Every
//! callback, animation frame and future continuation captures the zone that
//! was current when it was scheduled and runs inside that zone, so work that
//! is started from a component is attributed back to that component when it
//! eventually fires.
//!
//! Nothing runs on its own: the host drives the loop with
//! [`EventLoop::run_microtasks`], [`EventLoop::tick`], [`EventLoop::advance`]
//! or [`EventLoop::run_until_idle`].

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use rustc_hash::FxHashSet;
use tracing::{error, trace, warn};

use crate::error::{UncaughtError, ZoneError, ZoneResult};
use crate::zone::{ExecutionZone, InteractionSource};

/// Default virtual duration of one animation frame
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;

/// Upper bound of macrotasks a single drive call runs before giving up
const IDLE_TASK_LIMIT: usize = 100_000;

thread_local! {
    static LOOP: LoopState = LoopState::new();
}

/// Handle of a scheduled timer, interval or animation frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

// ============================================================================
// Tasks
// ============================================================================

/// One-shot callback bound to the zone it was scheduled in
struct ZoneTask {
    zone: ExecutionZone,
    source: InteractionSource,
    callback: Box<dyn FnOnce()>,
}

impl ZoneTask {
    fn capture<F>(callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        let source = InteractionSource::of(&callback);
        Self::with_source(source, callback)
    }

    fn with_source<F>(source: InteractionSource, callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            zone: ExecutionZone::current(),
            source,
            callback: Box::new(callback),
        }
    }

    fn run(self) {
        let ZoneTask { zone, source, callback } = self;
        trace!(zone = zone.name(), source = source.name(), "running task");
        zone.execute_in_zone_as(source, callback);
    }
}

/// Repeating callback bound to the zone it was scheduled in
#[derive(Clone)]
struct RepeatingTask {
    zone: ExecutionZone,
    source: InteractionSource,
    callback: Rc<RefCell<dyn FnMut()>>,
}

impl RepeatingTask {
    fn run(&self) {
        let callback = Rc::clone(&self.callback);
        trace!(zone = self.zone.name(), source = self.source.name(), "running interval");
        self.zone
            .execute_in_zone_as(self.source, move || (&mut *callback.borrow_mut())());
    }
}

enum TimerJob {
    Once(ZoneTask),
    Repeat { period: u64, task: RepeatingTask },
}

/// Entry in the timer heap
struct TimerEntry {
    /// Virtual time the timer is due
    due: u64,
    /// Scheduling order, breaks ties between equal due times
    seq: u64,
    handle: TaskHandle,
    job: TimerJob,
}

// Reverse ordering for min-heap (earliest due time first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

struct FrameCallback {
    handle: TaskHandle,
    task: ZoneTask,
}

enum Macrotask {
    Timer(TimerEntry),
    Frame(Vec<FrameCallback>),
}

/// Future bound to the zone it was spawned in
///
/// Every poll runs inside the captured zone.
struct ZoneBound<F> {
    zone: ExecutionZone,
    source: InteractionSource,
    future: Pin<Box<F>>,
}

impl<F: Future> ZoneBound<F> {
    fn capture(future: F) -> Self {
        Self {
            zone: ExecutionZone::current(),
            source: InteractionSource::of(&future),
            future: Box::pin(future),
        }
    }
}

impl<F: Future> Future for ZoneBound<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let future = &mut this.future;
        this.zone
            .execute_in_zone_as(this.source, || future.as_mut().poll(cx))
    }
}

// ============================================================================
// Loop state
// ============================================================================

struct LoopState {
    now: Cell<u64>,
    next_handle: Cell<u64>,
    next_seq: Cell<u64>,
    frame_interval: Cell<u64>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    /// Timers, intervals and frames that have neither fired nor been cancelled
    live: RefCell<FxHashSet<TaskHandle>>,
    frames: RefCell<Vec<FrameCallback>>,
    frame_due: Cell<Option<u64>>,
    microtasks: RefCell<VecDeque<ZoneTask>>,
    pool: RefCell<LocalPool>,
    spawner: RefCell<LocalSpawner>,
    uncaught: RefCell<Vec<UncaughtError>>,
}

impl LoopState {
    fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            now: Cell::new(0),
            next_handle: Cell::new(1),
            next_seq: Cell::new(0),
            frame_interval: Cell::new(DEFAULT_FRAME_INTERVAL_MS),
            timers: RefCell::new(BinaryHeap::new()),
            live: RefCell::new(FxHashSet::default()),
            frames: RefCell::new(Vec::new()),
            frame_due: Cell::new(None),
            microtasks: RefCell::new(VecDeque::new()),
            pool: RefCell::new(pool),
            spawner: RefCell::new(spawner),
            uncaught: RefCell::new(Vec::new()),
        }
    }

    fn allocate_handle(&self) -> TaskHandle {
        let handle = TaskHandle(self.next_handle.get());
        self.next_handle.set(handle.0 + 1);
        self.live.borrow_mut().insert(handle);
        handle
    }

    fn push_timer(&self, delay: u64, handle: TaskHandle, job: TimerJob) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.timers.borrow_mut().push(TimerEntry {
            due: self.now.get().saturating_add(delay),
            seq,
            handle,
            job,
        });
    }

    /// Pop the earliest macrotask due at or before `limit`, moving the clock
    /// forward to its due time.
    fn next_macrotask(&self, limit: Option<u64>) -> Option<Macrotask> {
        let mut timers = self.timers.borrow_mut();
        {
            let live = self.live.borrow();
            while let Some(top) = timers.peek() {
                if live.contains(&top.handle) {
                    break;
                }
                timers.pop();
            }
        }

        let timer_due = timers.peek().map(|entry| entry.due);
        let (due, is_timer) = match (timer_due, self.frame_due.get()) {
            (Some(timer), Some(frame)) if timer <= frame => (timer, true),
            (_, Some(frame)) => (frame, false),
            (Some(timer), None) => (timer, true),
            (None, None) => return None,
        };

        if limit.is_some_and(|limit| due > limit) {
            return None;
        }
        if due > self.now.get() {
            self.now.set(due);
        }

        if is_timer {
            let entry = timers.pop()?;
            if let TimerJob::Once(_) = entry.job {
                self.live.borrow_mut().remove(&entry.handle);
            }
            Some(Macrotask::Timer(entry))
        } else {
            self.frame_due.set(None);
            let batch = std::mem::take(&mut *self.frames.borrow_mut());
            Some(Macrotask::Frame(batch))
        }
    }

    fn is_live(&self, handle: TaskHandle) -> bool {
        self.live.borrow().contains(&handle)
    }
}

// ============================================================================
// Event loop facade
// ============================================================================

/// Thread-local event loop
///
/// All scheduling functions capture [`ExecutionZone::current`] and run the
/// callback inside that zone.
pub struct EventLoop;

impl EventLoop {
    /// Current virtual time in milliseconds
    pub fn now() -> u64 {
        LOOP.with(|state| state.now.get())
    }

    /// Virtual duration of one animation frame
    pub fn frame_interval() -> u64 {
        LOOP.with(|state| state.frame_interval.get())
    }

    /// Set the virtual duration of one animation frame (at least 1 ms)
    pub fn set_frame_interval(interval_ms: u64) {
        LOOP.with(|state| state.frame_interval.set(interval_ms.max(1)));
    }

    /// Run `callback` once after `delay_ms` virtual milliseconds
    pub fn set_timeout<F>(delay_ms: u64, callback: F) -> TaskHandle
    where
        F: FnOnce() + 'static,
    {
        Self::schedule_timeout(delay_ms, ZoneTask::capture(callback))
    }

    /// Like [`EventLoop::set_timeout`], recording a returned error as uncaught
    pub fn try_set_timeout<F, E>(delay_ms: u64, callback: F) -> TaskHandle
    where
        F: FnOnce() -> Result<(), E> + 'static,
        E: fmt::Display,
    {
        let source = InteractionSource::of(&callback);
        Self::schedule_timeout(
            delay_ms,
            ZoneTask::with_source(source, move || {
                if let Err(error) = callback() {
                    Self::report_uncaught(&error);
                }
            }),
        )
    }

    fn schedule_timeout(delay_ms: u64, task: ZoneTask) -> TaskHandle {
        LOOP.with(|state| {
            let handle = state.allocate_handle();
            trace!(?handle, delay_ms, "set timeout");
            state.push_timer(delay_ms, handle, TimerJob::Once(task));
            handle
        })
    }

    /// Cancel a pending timeout. Returns false if it already fired or was
    /// cancelled.
    pub fn clear_timeout(handle: TaskHandle) -> bool {
        LOOP.with(|state| state.live.borrow_mut().remove(&handle))
    }

    /// Run `callback` every `period_ms` virtual milliseconds (at least 1 ms)
    pub fn set_interval<F>(period_ms: u64, callback: F) -> TaskHandle
    where
        F: FnMut() + 'static,
    {
        let period = period_ms.max(1);
        let task = RepeatingTask {
            zone: ExecutionZone::current(),
            source: InteractionSource::of(&callback),
            callback: Rc::new(RefCell::new(callback)),
        };

        LOOP.with(|state| {
            let handle = state.allocate_handle();
            trace!(?handle, period, "set interval");
            state.push_timer(period, handle, TimerJob::Repeat { period, task });
            handle
        })
    }

    /// Cancel an interval. Returns false if it was already cancelled.
    pub fn clear_interval(handle: TaskHandle) -> bool {
        Self::clear_timeout(handle)
    }

    /// Run `callback` on the next animation frame
    pub fn request_animation_frame<F>(callback: F) -> TaskHandle
    where
        F: FnOnce() + 'static,
    {
        let task = ZoneTask::capture(callback);
        LOOP.with(|state| {
            let handle = state.allocate_handle();
            state.frames.borrow_mut().push(FrameCallback { handle, task });

            if state.frame_due.get().is_none() {
                let interval = state.frame_interval.get();
                let next_frame = (state.now.get() / interval + 1) * interval;
                state.frame_due.set(Some(next_frame));
            }

            trace!(?handle, "request animation frame");
            handle
        })
    }

    /// Cancel a pending animation frame callback
    pub fn cancel_animation_frame(handle: TaskHandle) -> bool {
        Self::clear_timeout(handle)
    }

    /// Queue `callback` to run at the next microtask checkpoint
    pub fn queue_microtask<F>(callback: F)
    where
        F: FnOnce() + 'static,
    {
        let task = ZoneTask::capture(callback);
        LOOP.with(|state| state.microtasks.borrow_mut().push_back(task));
    }

    /// Like [`EventLoop::queue_microtask`], recording a returned error as
    /// uncaught
    pub fn try_queue_microtask<F, E>(callback: F)
    where
        F: FnOnce() -> Result<(), E> + 'static,
        E: fmt::Display,
    {
        let source = InteractionSource::of(&callback);
        let task = ZoneTask::with_source(source, move || {
            if let Err(error) = callback() {
                Self::report_uncaught(&error);
            }
        });
        LOOP.with(|state| state.microtasks.borrow_mut().push_back(task));
    }

    /// Spawn a future whose every poll runs in the current zone
    pub fn spawn_local<F>(future: F) -> ZoneResult<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task = ZoneBound::capture(future);
        LOOP.with(|state| state.spawner.borrow().spawn_local(task))
            .map_err(|error| ZoneError::Spawn {
                message: error.to_string(),
            })
    }

    // ========================================================================
    // Uncaught errors
    // ========================================================================

    /// Record an error raised by a scheduled callback
    pub fn report_uncaught(error: &dyn fmt::Display) {
        let uncaught = UncaughtError {
            zone: ExecutionZone::current().name().to_string(),
            message: error.to_string(),
        };
        error!(zone = %uncaught.zone, "{}", uncaught.message);
        LOOP.with(|state| state.uncaught.borrow_mut().push(uncaught));
    }

    /// Take every uncaught error recorded so far
    pub fn take_uncaught_errors() -> Vec<UncaughtError> {
        LOOP.with(|state| std::mem::take(&mut *state.uncaught.borrow_mut()))
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// Run queued microtasks and ready futures until both are exhausted.
    ///
    /// Returns the number of microtasks run.
    pub fn run_microtasks() -> usize {
        let mut executed = 0;
        loop {
            while let Some(task) = LOOP.with(|state| state.microtasks.borrow_mut().pop_front()) {
                task.run();
                executed += 1;
            }

            Self::poll_futures();

            if LOOP.with(|state| state.microtasks.borrow().is_empty()) {
                return executed;
            }
        }
    }

    fn poll_futures() {
        LOOP.with(|state| {
            // A future driving the loop from inside a poll cannot re-enter the pool.
            if let Ok(mut pool) = state.pool.try_borrow_mut() {
                pool.run_until_stalled();
            }
        });
    }

    /// Run one macrotask (the earliest timer or animation frame) followed by
    /// a microtask checkpoint.
    ///
    /// Returns false when no macrotask is pending.
    pub fn tick() -> bool {
        Self::run_microtasks();
        match LOOP.with(|state| state.next_macrotask(None)) {
            Some(task) => {
                Self::run_macrotask(task);
                Self::run_microtasks();
                true
            }
            None => false,
        }
    }

    /// Move the clock forward by `ms`, running every macrotask that becomes
    /// due on the way. Returns the number of macrotasks run.
    pub fn advance(ms: u64) -> usize {
        let target = Self::now().saturating_add(ms);
        let mut executed = 0;

        Self::run_microtasks();
        while let Some(task) = LOOP.with(|state| state.next_macrotask(Some(target))) {
            Self::run_macrotask(task);
            Self::run_microtasks();
            executed += 1;
        }

        LOOP.with(|state| state.now.set(state.now.get().max(target)));
        executed
    }

    /// Tick until nothing is pending. Returns the number of macrotasks run.
    ///
    /// Stops with a warning after a fixed number of macrotasks, so a live
    /// interval cannot hang the caller.
    pub fn run_until_idle() -> usize {
        let mut executed = 0;
        while Self::tick() {
            executed += 1;
            if executed >= IDLE_TASK_LIMIT {
                warn!(executed, "event loop did not go idle");
                break;
            }
        }
        executed
    }

    /// Drive the loop until `future` completes.
    ///
    /// Fails with [`ZoneError::Stalled`] if the loop goes idle first.
    pub fn block_on<F>(future: F) -> ZoneResult<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let slot: Rc<RefCell<Option<F::Output>>> = Rc::new(RefCell::new(None));
        let output = Rc::clone(&slot);
        Self::spawn_local(async move {
            let value = future.await;
            *output.borrow_mut() = Some(value);
        })?;

        let mut executed = 0;
        loop {
            Self::run_microtasks();
            if let Some(value) = slot.borrow_mut().take() {
                return Ok(value);
            }
            if !Self::tick() || executed >= IDLE_TASK_LIMIT {
                break;
            }
            executed += 1;
        }

        let value = slot.borrow_mut().take();
        value.ok_or(ZoneError::Stalled)
    }

    /// Check if a timer, interval or frame is still scheduled
    pub fn is_pending(handle: TaskHandle) -> bool {
        LOOP.with(|state| state.is_live(handle))
    }

    /// Check if any microtask, timer, interval or frame is pending
    pub fn has_pending_tasks() -> bool {
        LOOP.with(|state| {
            !state.microtasks.borrow().is_empty() || !state.live.borrow().is_empty()
        })
    }

    /// Drop every pending task and future and rewind the clock
    pub fn reset() {
        LOOP.with(|state| {
            // Dropped tasks may schedule again from their destructors.
            let timers = std::mem::take(&mut *state.timers.borrow_mut());
            let frames = std::mem::take(&mut *state.frames.borrow_mut());
            let microtasks = std::mem::take(&mut *state.microtasks.borrow_mut());
            state.live.borrow_mut().clear();
            state.frame_due.set(None);
            state.now.set(0);

            let pool = LocalPool::new();
            *state.spawner.borrow_mut() = pool.spawner();
            let previous = state.pool.replace(pool);

            state.uncaught.borrow_mut().clear();
            drop((timers, frames, microtasks, previous));
        });
    }

    fn run_macrotask(task: Macrotask) {
        match task {
            Macrotask::Timer(TimerEntry { handle, job, .. }) => match job {
                TimerJob::Once(task) => task.run(),
                TimerJob::Repeat { period, task } => {
                    task.run();
                    LOOP.with(|state| {
                        if state.is_live(handle) {
                            state.push_timer(period, handle, TimerJob::Repeat { period, task });
                        }
                    });
                }
            },
            Macrotask::Frame(batch) => {
                trace!(callbacks = batch.len(), now = Self::now(), "animation frame");
                for frame in batch {
                    let live = LOOP.with(|state| state.live.borrow_mut().remove(&frame.handle));
                    if live {
                        frame.task.run();
                    }
                }
            }
        }
    }
}
