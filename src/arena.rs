//! Growable byte arena backing one side of the double buffer.
//!
//! An arena is a contiguous heap region with an append-only write cursor.
//! `bytes[0..used]` is always a concatenation of well-formed command
//! records. The arena never shrinks: after a burst it converges to the
//! high-water mark of that burst and stays there, so steady-state
//! enqueueing performs no allocation at all.
//!
//! Ownership is a protocol, not a type: at any moment exactly one party
//! (a producer that swapped the arena out of a slot, or the worker) may
//! call `reserve`/`reset`. The fields are relaxed atomics only so that
//! the diagnostics reader (`capacity`/`used`) is race-free against the
//! owner growing the arena; no cross-thread ordering is derived from
//! them. Publication of record bytes happens through the release/acquire
//! pairs on the exchanger slots.

use std::alloc::{alloc, dealloc, handle_alloc_error, realloc, Layout};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::record::RECORD_ALIGN;

/// One half of the double buffer.
pub(crate) struct Arena {
    /// Start of the heap region. Moves on reallocation.
    base: AtomicPtr<u8>,
    /// Bytes allocated.
    cap: AtomicUsize,
    /// Bytes written. Always a multiple of `RECORD_ALIGN`.
    used: AtomicUsize,
}

impl Arena {
    /// Allocates an arena of `cap` bytes.
    pub(crate) fn with_capacity(cap: usize) -> Self {
        assert!(cap > 0, "arena capacity must be greater than 0");
        let layout = Self::layout(cap);
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            handle_alloc_error(layout);
        }
        Self {
            base: AtomicPtr::new(base),
            cap: AtomicUsize::new(cap),
            used: AtomicUsize::new(0),
        }
    }

    /// Reserves `n` bytes, growing the region if needed, and returns a
    /// pointer to the reserved range.
    ///
    /// The pointer is valid only until the next `reserve` on this arena
    /// (growth may move the region); the caller must finish writing and
    /// hand the arena back before anyone else can reserve.
    #[inline]
    pub(crate) fn reserve(&self, n: usize) -> *mut u8 {
        let used = self.used.load(Ordering::Relaxed);
        let needed = used + n;
        if needed > self.cap.load(Ordering::Relaxed) {
            self.grow(needed);
        }
        self.used.store(needed, Ordering::Relaxed);
        // Safety: `used + n <= cap` holds after the growth check, so the
        // range [used, used + n) lies inside the allocation.
        unsafe { self.base.load(Ordering::Relaxed).add(used) }
    }

    /// Doubles the capacity until `needed` fits, reallocating in place
    /// where the allocator allows. Existing record bytes are preserved.
    #[cold]
    fn grow(&self, needed: usize) {
        let old_cap = self.cap.load(Ordering::Relaxed);
        let mut cap = old_cap;
        while needed > cap {
            let Some(doubled) = cap.checked_mul(2) else {
                panic!("arena capacity overflow: need {needed} bytes");
            };
            cap = doubled;
        }
        let old = self.base.load(Ordering::Relaxed);
        // Safety: `old` was allocated with `layout(old_cap)` and `cap`
        // is a valid larger size for the same alignment.
        let new = unsafe { realloc(old, Self::layout(old_cap), cap) };
        if new.is_null() {
            handle_alloc_error(Self::layout(cap));
        }
        self.base.store(new, Ordering::Relaxed);
        self.cap.store(cap, Ordering::Relaxed);
    }

    /// Rewinds the write cursor. Capacity is retained.
    #[inline]
    pub(crate) fn reset(&self) {
        self.used.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.base.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.cap.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    fn layout(cap: usize) -> Layout {
        // Records are laid out at RECORD_ALIGN boundaries, so the region
        // itself must start on one.
        match Layout::from_size_align(cap, RECORD_ALIGN) {
            Ok(layout) => layout,
            Err(_) => panic!("arena capacity {cap} exceeds the address space"),
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let cap = self.cap.load(Ordering::Relaxed);
        // Safety: base was allocated with layout(cap) by with_capacity/grow.
        unsafe { dealloc(self.base.load(Ordering::Relaxed), Self::layout(cap)) };
    }
}
