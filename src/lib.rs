//! High speed function calls on a dedicated worker thread.
//!
//! [`CallQueue`] is a single-consumer command queue: any number of
//! producer threads enqueue callables and one worker thread executes
//! them sequentially, in arrival order. It is built for bursts of
//! lightweight work (draw calls, log records, packet fanout, event
//! posting) where per-dispatch cost matters more than anything else.
//!
//! The core pieces:
//! - a lock-free **double-buffer exchange**: two byte arenas traded
//!   between producers and the worker through two atomic slots, so an
//!   enqueue is an atomic swap, a record append, and a CAS;
//! - **packed variable-length records**: each enqueue writes a handler
//!   pointer, a length, and the callable plus its arguments straight
//!   into the arena, with no per-call allocation and no boxing;
//! - a **branch-free dispatch walk**: the worker executes an entire
//!   arena by chasing length slots, a few instructions per call;
//! - a **join fence**: [`CallQueue::join`] returns once everything the
//!   calling thread enqueued has run.
//!
//! Arenas grow (and never shrink) to the burst high-water mark, so
//! steady-state enqueueing allocates nothing.

mod arena;
mod exchange;
mod record;

pub mod marshal;
pub mod queue;

pub use marshal::{ArgTuple, Packable, QueueFn};
pub use queue::{CallQueue, DEFAULT_CAPACITY};
pub use record::RawHandler;
