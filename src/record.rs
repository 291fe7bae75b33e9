//! Packed command-record layout and the worker's arena walk.
//!
//! Each record is a variable-length byte sequence: a handler slot (one
//! function pointer), a length slot (`u32` total record size), then an
//! opaque payload the handler alone knows how to read. No tags, no
//! schema: the handler embodies the schema for its payload.
//!
//! Records start at pointer-aligned offsets and the length slot stores
//! the size rounded up to the next pointer boundary, so the walk reads
//! both header slots with plain aligned loads. Payload fields are packed
//! with no inter-field padding and read back unaligned by the dispatch
//! stubs.

use crate::arena::Arena;

/// The dispatcher signature shared by every record.
///
/// The worker invokes the handler with a pointer to the record's payload
/// (the bytes past the two header slots).
///
/// # Safety
/// The handler must read the payload exactly as the enqueueing side laid
/// it out, and must not unwind.
pub type RawHandler = unsafe fn(*mut u8);

pub(crate) const HANDLER_BYTES: usize = std::mem::size_of::<RawHandler>();
pub(crate) const LEN_BYTES: usize = std::mem::size_of::<u32>();
/// Bytes of header before the payload.
pub(crate) const HEADER_BYTES: usize = HANDLER_BYTES + LEN_BYTES;
/// Every record begins on this boundary.
pub(crate) const RECORD_ALIGN: usize = std::mem::align_of::<usize>();

/// Appends a record header to `arena` and returns the payload pointer.
///
/// One `reserve` covers the header and the payload; the caller writes
/// `payload_len` bytes through the returned pointer before releasing the
/// arena.
#[inline]
pub(crate) fn push(arena: &Arena, handler: RawHandler, payload_len: usize) -> *mut u8 {
    let total = (HEADER_BYTES + payload_len + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1);
    debug_assert!(total <= u32::MAX as usize, "record of {payload_len} payload bytes");
    let cmd = arena.reserve(total);
    // Safety: `cmd` points at `total` reserved bytes; records always
    // start RECORD_ALIGN-aligned (the arena base is aligned and every
    // record length is a multiple of RECORD_ALIGN), so the handler slot
    // and the length slot are written with aligned stores.
    unsafe {
        cmd.cast::<RawHandler>().write(handler);
        cmd.add(HANDLER_BYTES).cast::<u32>().write(total as u32);
        cmd.add(HEADER_BYTES)
    }
}

/// The worker's inner loop: execute every record in `bytes[0..used]`.
///
/// Steps the cursor record by record, calling each handler with its
/// payload pointer and advancing by the length slot. The length slot
/// points at the next record by construction, so the walk is a single
/// pointer chase per call.
///
/// # Safety
/// `base..base + used` must be a concatenation of well-formed records
/// written through [`push`], and the caller must own the arena
/// exclusively for the duration of the walk.
#[inline]
pub(crate) unsafe fn walk(base: *mut u8, used: usize) {
    let mut cur = base;
    let end = base.add(used);
    while cur < end {
        let handler = cur.cast::<RawHandler>().read();
        let len = cur.add(HANDLER_BYTES).cast::<u32>().read();
        handler(cur.add(HEADER_BYTES));
        cur = cur.add(len as usize);
    }
}
