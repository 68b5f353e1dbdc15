//! Trellis execution zones and change detection
//!
//! This crate attributes work to the code region that started it:
//!
//! - **Zones**: named synchronous execution contexts with strict LIFO
//!   save/restore of the current zone
//! - **Event loop**: timers, animation frames, microtasks and futures that
//!   run inside the zone they were scheduled in
//! - **Change detection**: listeners notified about interactions and about
//!   mutations of observed objects
//!
//! Everything is single-threaded; all ambient state is thread-local.

#![warn(missing_docs)]

mod change_detection;
mod error;
mod event_loop;
mod event_target;
mod listener;
mod observed;
mod zone;

pub use change_detection::{ChangeDetection, ChangeKind, ChangeReason};
pub use error::{UncaughtError, ZoneError, ZoneResult};
pub use event_loop::{EventLoop, TaskHandle, DEFAULT_FRAME_INTERVAL_MS};
pub use event_target::{Event, EventTarget};
pub use listener::{ListenerId, ListenerList};
pub use observed::Observed;
pub use zone::{ExecutionZone, InteractionCallback, InteractionSource, ZoneId, DEFAULT_ZONE_NAME};
