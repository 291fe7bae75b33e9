//! The primary/secondary double-buffer exchanger.
//!
//! Two atomic slots trade ownership of the two arenas between any number
//! of producers and the single worker. A null slot means some party has
//! swapped the arena out and not yet returned it; at rest both slots are
//! non-null and together hold both arenas, one each.
//!
//! The protocol:
//! - A producer claims the write arena by swapping `primary` to null,
//!   spinning while it is already null (another producer or the worker
//!   has it). Contention windows are a few instructions wide, so
//!   spinning beats parking.
//! - On release the producer tries to CAS the arena back into `primary`.
//!   If `primary` is occupied again, the worker must have installed its
//!   empty arena there in the meantime, so the producer parks the filled
//!   arena in `secondary` instead. That store is what the worker's inner
//!   wait loop is watching.
//! - The worker always holds exactly one (empty) arena and swaps it into
//!   `primary`, taking whatever was there: a filled arena to execute, or
//!   null, in which case its empty arena is now in `primary` and the
//!   releasing producer is forced onto the `secondary` path.
//!
//! The worker therefore never loses a hand-off and never holds both
//! arenas, and the only state in which it may sleep is "both arenas
//! empty". Both slots carry release/acquire ordering: a producer's
//! record bytes are published by the release half of its return, and
//! read after the acquire half of the worker's take.

use std::ops::Deref;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::arena::Arena;

/// Cache-line padded wrapper keeping the two slots off each other's line.
#[repr(C, align(64))]
pub(crate) struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub(crate) fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// The pair of ownership slots.
pub(crate) struct Exchanger {
    primary: CachePadded<AtomicPtr<Arena>>,
    secondary: CachePadded<AtomicPtr<Arena>>,
}

impl Exchanger {
    /// Installs the two arenas at rest: `a` writable, `b` on deck for
    /// the worker.
    pub(crate) fn new(a: *mut Arena, b: *mut Arena) -> Self {
        Self {
            primary: CachePadded::new(AtomicPtr::new(a)),
            secondary: CachePadded::new(AtomicPtr::new(b)),
        }
    }

    /// Producer side: claim exclusive write ownership of an arena.
    #[inline]
    pub(crate) fn acquire(&self) -> *mut Arena {
        loop {
            let arena = self.primary.swap(ptr::null_mut(), Ordering::AcqRel);
            if !arena.is_null() {
                return arena;
            }
            std::hint::spin_loop();
        }
    }

    /// Producer side: hand the arena back after writing one record.
    ///
    /// Returns true if the arena went to `secondary` (the handshake path
    /// the worker's inner wait loop observes).
    #[inline]
    pub(crate) fn release(&self, arena: *mut Arena) -> bool {
        if self
            .primary
            .compare_exchange(ptr::null_mut(), arena, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return false;
        }
        // Primary is occupied by the worker's empty arena; park ours in
        // secondary where the worker is waiting for it.
        self.secondary.store(arena, Ordering::Release);
        true
    }

    /// Worker side: install the held (empty) arena into `primary` and
    /// take whatever was there. Null means a producer is mid-write.
    #[inline]
    pub(crate) fn swap_primary(&self, held: *mut Arena) -> *mut Arena {
        self.primary.swap(held, Ordering::AcqRel)
    }

    /// Worker side: take whatever is parked in `secondary`.
    #[inline]
    pub(crate) fn take_secondary(&self) -> *mut Arena {
        self.secondary.swap(ptr::null_mut(), Ordering::AcqRel)
    }

    /// Worker side, shutdown only: return the held arena to `secondary`
    /// so both arenas are reachable from the slots again.
    pub(crate) fn park_secondary(&self, held: *mut Arena) {
        self.secondary.store(held, Ordering::Release);
    }

    /// Empties both slots. Only meaningful once the worker has exited.
    pub(crate) fn take_both(&self) -> (*mut Arena, *mut Arena) {
        (
            self.primary.swap(ptr::null_mut(), Ordering::AcqRel),
            self.secondary.swap(ptr::null_mut(), Ordering::AcqRel),
        )
    }

    #[cfg(test)]
    fn peek(&self) -> (*mut Arena, *mut Arena) {
        (
            self.primary.load(Ordering::SeqCst),
            self.secondary.load(Ordering::SeqCst),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walks the handshake as a single-threaded state machine, checking
    /// after every transition that the multiset {primary, secondary,
    /// producer-held, worker-held} contains exactly the two arenas.
    struct Harness {
        a: *mut Arena,
        b: *mut Arena,
        slots: Exchanger,
    }

    impl Harness {
        fn new() -> Self {
            let a = Box::into_raw(Box::new(Arena::with_capacity(64)));
            let b = Box::into_raw(Box::new(Arena::with_capacity(64)));
            Self {
                a,
                b,
                slots: Exchanger::new(a, b),
            }
        }

        fn assert_conserved(&self, producer: *mut Arena, worker: *mut Arena) {
            let (p, s) = self.slots.peek();
            let mut seen: Vec<*mut Arena> =
                [p, s, producer, worker].into_iter().filter(|x| !x.is_null()).collect();
            seen.sort();
            let mut expect = vec![self.a, self.b];
            expect.sort();
            assert_eq!(seen, expect, "an arena was lost or duplicated");
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            // Safety: tests return both arenas to the slots before the
            // harness drops.
            unsafe {
                let (p, s) = self.slots.take_both();
                drop(Box::from_raw(p));
                drop(Box::from_raw(s));
            }
        }
    }

    #[test]
    fn producer_roundtrip_idle_worker() {
        let h = Harness::new();
        let null = std::ptr::null_mut();

        let arena = h.slots.acquire();
        assert_eq!(arena, h.a);
        h.assert_conserved(arena, null);

        // Worker idle: primary is free again, CAS path succeeds.
        assert!(!h.slots.release(arena));
        h.assert_conserved(null, null);
        assert_eq!(h.slots.peek(), (h.a, h.b));
    }

    #[test]
    fn worker_takes_filled_arena_through_primary() {
        let h = Harness::new();
        let null = std::ptr::null_mut();

        // Producer fills a and returns it.
        let arena = h.slots.acquire();
        h.slots.release(arena);

        // Worker starts by taking secondary, then swaps into primary.
        let held = h.slots.take_secondary();
        assert_eq!(held, h.b);
        h.assert_conserved(null, held);

        let taken = h.slots.swap_primary(held);
        assert_eq!(taken, h.a);
        h.assert_conserved(null, taken);
        // Worker's empty arena is now the writable one.
        assert_eq!(h.slots.peek(), (h.b, null));

        // Put it back to restore rest state for the harness drop.
        h.slots.park_secondary(taken);
    }

    #[test]
    fn release_diverts_to_secondary_when_primary_occupied() {
        let h = Harness::new();
        let null = std::ptr::null_mut();

        // Producer takes the write arena...
        let producer_held = h.slots.acquire();
        assert_eq!(producer_held, h.a);

        // ...and while the producer is writing, the worker swaps its
        // empty arena into the now-null primary and comes up empty.
        let worker_held = h.slots.take_secondary();
        let taken = h.slots.swap_primary(worker_held);
        assert!(taken.is_null());
        h.assert_conserved(producer_held, null);

        // The producer's CAS must fail and divert to secondary.
        assert!(h.slots.release(producer_held));
        h.assert_conserved(null, null);

        // The worker's inner wait loop now finds the filled arena.
        let found = h.slots.take_secondary();
        assert_eq!(found, h.a);
        h.assert_conserved(null, found);

        h.slots.park_secondary(found);
    }

    #[test]
    fn shutdown_parks_held_arena() {
        let h = Harness::new();

        let held = h.slots.take_secondary();
        h.slots.park_secondary(held);
        assert_eq!(h.slots.peek(), (h.a, h.b));
    }

    #[test]
    fn acquire_sees_arena_parked_in_primary_only() {
        let h = Harness::new();

        // Two producers in sequence each get exclusive ownership.
        let first = h.slots.acquire();
        h.slots.release(first);
        let second = h.slots.acquire();
        assert_eq!(first, second);
        h.slots.release(second);
    }
}
