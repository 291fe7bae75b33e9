//! The call queue: producer enqueue API, the worker thread, the join
//! fence, and shutdown.
//!
//! One dedicated worker thread per queue executes enqueued callables
//! strictly in arrival order. Producers never block: they spin for the
//! write arena (a window of a few instructions), append one packed
//! record, hand the arena back, and raise the dispatch signal. The
//! worker drains whole arenas at a time with a branch-free walk and
//! sleeps only when both arenas are empty.

use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::arena::Arena;
use crate::exchange::Exchanger;
use crate::marshal::{call_stub, return_stub, ArgTuple, QueueFn};
use crate::record::{self, RawHandler};

/// Initial per-arena capacity in bytes for [`CallQueue::new`].
pub const DEFAULT_CAPACITY: usize = 256;

/// Locks without propagating poisoning: the queue's own critical
/// sections never panic, and a dead worker must not wedge producers.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wakes the worker when a producer has parked work.
struct DispatchSignal {
    raised: Mutex<bool>,
    cv: Condvar,
}

impl DispatchSignal {
    fn new() -> Self {
        Self {
            raised: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn raise(&self) {
        *lock(&self.raised) = true;
        self.cv.notify_one();
    }

    /// Blocks until a raise lands or shutdown is requested. A raise that
    /// arrived between the caller's last empty-check and this wait is
    /// observed through the flag, so no wakeup is ever lost.
    fn wait(&self, shutdown: &AtomicBool) {
        let mut raised = lock(&self.raised);
        while !*raised && !shutdown.load(Ordering::Acquire) {
            raised = self.cv.wait(raised).unwrap_or_else(PoisonError::into_inner);
        }
        *raised = false;
    }
}

/// Condvar the join sentinels fire; every in-flight `join` waits on it
/// for its own flag.
struct JoinSignal {
    mx: Mutex<()>,
    cv: Condvar,
}

/// State shared between the queue handle and the worker thread.
struct Shared {
    slots: Exchanger,
    /// Stable pointers to the two arenas, for the diagnostics report
    /// only; ownership flows exclusively through `slots`.
    arenas: [*const Arena; 2],
    dispatch: DispatchSignal,
    join: JoinSignal,
    shutdown: AtomicBool,
}

// Safety: the raw arena pointers are only dereferenced for their atomic
// diagnostic fields; arena *contents* are only touched by whichever
// party holds the arena via the exchanger protocol. Everything else in
// Shared is Sync.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

/// A single-consumer command queue: callables enqueued from any thread
/// execute sequentially on one dedicated worker thread.
///
/// ```
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use thread_call::CallQueue;
///
/// static HITS: AtomicU64 = AtomicU64::new(0);
/// fn bump(n: u64) {
///     HITS.fetch_add(n, Ordering::Relaxed);
/// }
///
/// let q = CallQueue::new();
/// q.call(bump, (2,)).call(bump, (3,));
/// q.join();
/// assert_eq!(HITS.load(Ordering::Relaxed), 5);
/// ```
///
/// Dropping the queue blocks until every enqueued record has executed
/// and the worker has exited. Enqueueing concurrently with the drop is
/// a programmer error and such records are not guaranteed to run.
pub struct CallQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl CallQueue {
    /// Creates a queue with [`DEFAULT_CAPACITY`]-byte arenas.
    ///
    /// Arena sizing is a soft hint: arenas double whenever a record
    /// would overflow and never shrink, so the default converges to the
    /// workload's burst high-water mark after a brief warm-up.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a queue whose two arenas start at `capacity` bytes each.
    pub fn with_capacity(capacity: usize) -> Self {
        let a = Box::into_raw(Box::new(Arena::with_capacity(capacity)));
        let b = Box::into_raw(Box::new(Arena::with_capacity(capacity)));
        let shared = Arc::new(Shared {
            slots: Exchanger::new(a, b),
            arenas: [a, b],
            dispatch: DispatchSignal::new(),
            join: JoinSignal {
                mx: Mutex::new(()),
                cv: Condvar::new(),
            },
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || worker_loop(&worker_shared));

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Acquires the write arena, appends one record via `write`, hands
    /// the arena back and raises the dispatch signal.
    ///
    /// The signal is raised on both release paths: the worker may be
    /// asleep even when the arena goes straight back into the primary
    /// slot.
    #[inline]
    fn append<W: FnOnce(&Arena)>(&self, write: W) {
        let arena = self.shared.slots.acquire();
        // Safety: acquire grants exclusive ownership until release.
        write(unsafe { &*arena });
        self.shared.slots.release(arena);
        self.shared.dispatch.raise();
    }

    /// Enqueues `f(args...)` for execution on the worker thread.
    ///
    /// The callable and its arguments are copied into the queue's byte
    /// arena; nothing is boxed. Returns `&self` so calls chain:
    /// `q.call(a, ()).call(b, ())` executes `a` before `b`.
    #[inline]
    pub fn call<F, A>(&self, f: F, args: A) -> &Self
    where
        F: QueueFn<A>,
        A: ArgTuple + Send + 'static,
    {
        self.append(|arena| {
            let payload = record::push(arena, call_stub::<F, A>, size_of::<F>() + A::BYTES);
            // Safety: the payload region is size_of::<F>() + A::BYTES
            // bytes, laid out exactly as call_stub reads it back.
            unsafe {
                payload.cast::<F>().write_unaligned(f);
                args.pack(payload.add(size_of::<F>()));
            }
        });
        self
    }

    /// Enqueues `f(args...)` and writes its return value through `out`
    /// on the worker thread.
    ///
    /// The previous contents of `*out` are overwritten without being
    /// dropped, so `out` is best a `Copy` location or a
    /// `MaybeUninit` slot.
    ///
    /// # Safety
    /// `out` must be valid for a write of `F::Output` until a
    /// subsequent [`join`](Self::join) (or the queue drop) returns, and
    /// must not be read before then.
    #[inline]
    pub unsafe fn call_with_return<F, A>(&self, f: F, out: *mut F::Output, args: A) -> &Self
    where
        F: QueueFn<A>,
        A: ArgTuple,
    {
        self.append(|arena| {
            let payload = record::push(
                arena,
                return_stub::<F, A>,
                size_of::<F>() + size_of::<*mut F::Output>() + A::BYTES,
            );
            // Safety: the payload region is sized for exactly this
            // layout, which return_stub reads back.
            unsafe {
                payload.cast::<F>().write_unaligned(f);
                payload
                    .add(size_of::<F>())
                    .cast::<*mut F::Output>()
                    .write_unaligned(out);
                args.pack(payload.add(size_of::<F>() + size_of::<*mut F::Output>()));
            }
        });
        self
    }

    /// Enqueues a caller-supplied dispatcher with `args` packed as the
    /// payload. No unpacking is performed by the queue: `handler`
    /// receives the payload pointer and interprets the bytes itself.
    ///
    /// # Safety
    /// `handler` must read the payload as the packed layout of `A`,
    /// must be sound to run on the worker thread, and must not unwind.
    /// Packed pointers must stay valid until the record executes.
    #[inline]
    pub unsafe fn raw_call<A: ArgTuple>(&self, handler: RawHandler, args: A) -> &Self {
        self.append(|arena| {
            let payload = record::push(arena, handler, A::BYTES);
            // Safety: the payload region is A::BYTES long.
            unsafe { args.pack(payload) };
        });
        self
    }

    /// Enqueues a caller-supplied dispatcher with a byte-for-byte copy
    /// of `bytes` as the payload, e.g. a raw network packet handed to a
    /// parser running on the worker.
    ///
    /// # Safety
    /// Same contract as [`raw_call`](Self::raw_call): the handler alone
    /// gives the bytes meaning.
    #[inline]
    pub unsafe fn raw_copy(&self, handler: RawHandler, bytes: &[u8]) -> &Self {
        self.append(|arena| {
            let payload = record::push(arena, handler, bytes.len());
            // Safety: the payload region is bytes.len() long.
            unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), payload, bytes.len()) };
        });
        self
    }

    /// Blocks until every record this thread enqueued before the call
    /// has executed.
    ///
    /// Works by enqueueing a sentinel record behind the caller's prior
    /// records; FIFO execution means the sentinel firing proves they
    /// have all run. Records other producers interleaved before the
    /// sentinel will also have executed; that is inherent to a FIFO
    /// queue with concurrent producers, not a defect. Concurrent joins
    /// each wait for their own sentinel.
    pub fn join(&self) {
        let done = AtomicBool::new(false);

        unsafe fn sentinel(data: *mut u8) {
            let (signal, done) = <(*const JoinSignal, *const AtomicBool)>::unpack(data);
            (*done).store(true, Ordering::Release);
            // Taking the join mutex orders this wakeup after the
            // waiter's flag check, closing the notify/wait race.
            drop(lock(&(*signal).mx));
            (*signal).cv.notify_all();
        }

        // Safety: both pointers outlive the sentinel because this
        // function does not return until the sentinel has fired.
        unsafe {
            self.raw_call(
                sentinel,
                (
                    &self.shared.join as *const JoinSignal,
                    &done as *const AtomicBool,
                ),
            );
        }

        let mut guard = lock(&self.shared.join.mx);
        while !done.load(Ordering::Acquire) {
            guard = self
                .shared
                .join
                .cv
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Current capacity of each arena in bytes, for diagnostics.
    pub fn buffer_capacities(&self) -> [usize; 2] {
        // Safety: the pointers live until drop; capacity() only touches
        // the arena's atomic fields.
        self.shared.arenas.map(|a| unsafe { (*a).capacity() })
    }

    /// Bytes currently queued in each arena, for diagnostics. Racy by
    /// nature: a snapshot, not a synchronisation point.
    pub fn buffer_used(&self) -> [usize; 2] {
        // Safety: as buffer_capacities.
        self.shared.arenas.map(|a| unsafe { (*a).used() })
    }
}

impl Default for CallQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallQueue {
    /// Signals shutdown, waits for the worker to drain every pending
    /// record and exit, then reclaims the arenas. A panic that escaped a
    /// callable and killed the worker is resumed here on the owner
    /// thread.
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.dispatch.raise();
        if let Some(worker) = self.worker.take() {
            let result = worker.join();
            let (p, s) = self.shared.slots.take_both();
            // Safety: the worker has exited, so the slots are the only
            // owners left; non-null pointers are the construction-time
            // boxes. (A worker killed mid-walk leaks the arena it held.)
            unsafe {
                if !p.is_null() {
                    drop(Box::from_raw(p));
                }
                if !s.is_null() {
                    drop(Box::from_raw(s));
                }
            }
            if let Err(panic) = result {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

/// The worker: executes arenas until shutdown, sleeping only when both
/// are empty.
///
/// The worker always holds exactly one (empty) arena. Swapping it into
/// the primary slot either takes a filled arena to execute, or installs
/// the empty one while a producer is mid-write, in which case the
/// producer's release finds primary occupied, parks its filled arena in
/// secondary, and the inner loop below picks it up. Shutdown is only
/// honoured once an acquired arena comes up empty, which is what drains
/// the queue before exit.
fn worker_loop(shared: &Shared) {
    let mut held = shared.slots.take_secondary();
    loop {
        held = shared.slots.swap_primary(held);
        while held.is_null() {
            std::hint::spin_loop();
            held = shared.slots.take_secondary();
        }
        // Safety: a non-null swap result is exclusively ours until we
        // hand it back through a slot.
        let arena = unsafe { &*held };
        let used = arena.used();
        if used > 0 {
            // Safety: arena bytes [0..used] are records published by
            // producer releases; we own the arena for the walk.
            unsafe { record::walk(arena.base(), used) };
            arena.reset();
        } else if shared.shutdown.load(Ordering::Acquire) {
            shared.slots.park_secondary(held);
            break;
        } else {
            shared.dispatch.wait(&shared.shutdown);
        }
    }
}
