//! Loop detection for asynchronous update cycles
//!
//! Calls are deferred to the next animation frame. Calls made before that
//! frame coalesce: the latest function wins and the frame counts once. Each
//! frame that schedules a follow-up extends the chain; a frame that does not
//! ends it. A chain longer than the limit fails with
//! [`UpdateError::LoopDetected`] instead of running again.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, error};
use trellis_zone::{ChangeDetection, ChangeReason, EventLoop, TaskHandle};

use crate::error::UpdateError;

type ErrorCallback = Rc<dyn Fn(&UpdateError)>;

/// Bounded deferral of self-retriggering calls
#[derive(Clone)]
pub struct LoopDetectionHandler {
    inner: Rc<LoopInner>,
}

struct LoopInner {
    limit: usize,
    /// Reasons of the consecutive frames so far
    chain: RefCell<Vec<ChangeReason>>,
    pending: RefCell<Option<PendingCall>>,
    /// Frame requested for the pending call
    frame: Cell<Option<TaskHandle>>,
    frames_run: Cell<usize>,
    on_error: RefCell<Option<ErrorCallback>>,
}

struct PendingCall {
    function: Box<dyn FnOnce()>,
    reason: ChangeReason,
}

impl LoopDetectionHandler {
    /// Create a handler allowing `limit` consecutive frames
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                limit,
                chain: RefCell::new(Vec::new()),
                pending: RefCell::new(None),
                frame: Cell::new(None),
                frames_run: Cell::new(0),
                on_error: RefCell::new(None),
            }),
        }
    }

    /// Configured limit
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Called with the error when a loop is detected
    pub fn set_on_error<F>(&self, callback: F)
    where
        F: Fn(&UpdateError) + 'static,
    {
        *self.inner.on_error.borrow_mut() = Some(Rc::new(callback));
    }

    /// Run `function` on the next animation frame.
    ///
    /// The frame is requested silently from the nearest non-silent change
    /// detection, so scheduling never reports a change.
    pub fn call_asynchron<F>(&self, function: F, reason: ChangeReason)
    where
        F: FnOnce() + 'static,
    {
        let previous = self.inner.pending.borrow_mut().replace(PendingCall {
            function: Box::new(function),
            reason,
        });
        let frame_queued = self.inner.frame.get().is_some_and(EventLoop::is_pending);
        if previous.is_some() && frame_queued {
            return;
        }

        let weak = Rc::downgrade(&self.inner);
        let request = move || EventLoop::request_animation_frame(move || run_frame(&weak));

        let handle = match ChangeDetection::current_none_silent() {
            Some(detection) => detection.silent_execution(request),
            None => request(),
        };
        self.inner.frame.set(Some(handle));
    }

    /// Check if a call waits for the next frame
    pub fn is_pending(&self) -> bool {
        self.inner.pending.borrow().is_some()
    }

    /// Length of the current chain of consecutive frames
    pub fn chain_length(&self) -> usize {
        self.inner.chain.borrow().len()
    }

    /// Number of frames that ran their function
    pub fn frames_run(&self) -> usize {
        self.inner.frames_run.get()
    }
}

fn run_frame(inner: &Weak<LoopInner>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    inner.frame.set(None);
    let Some(call) = inner.pending.borrow_mut().take() else {
        return;
    };

    let length = {
        let mut chain = inner.chain.borrow_mut();
        chain.push(call.reason);
        chain.len()
    };

    if length > inner.limit {
        let chain = std::mem::take(&mut *inner.chain.borrow_mut());
        let failure = UpdateError::LoopDetected {
            limit: inner.limit,
            chain: chain.iter().map(ToString::to_string).collect(),
        };
        error!(limit = inner.limit, "{}", failure);

        let callback = inner.on_error.borrow().clone();
        if let Some(callback) = callback {
            callback(&failure);
        }
        EventLoop::report_uncaught(&failure);
        return;
    }

    (call.function)();
    inner.frames_run.set(inner.frames_run.get() + 1);

    // No follow-up: the chain is broken.
    if inner.pending.borrow().is_none() {
        debug!(length, "update chain settled");
        inner.chain.borrow_mut().clear();
    }
}
