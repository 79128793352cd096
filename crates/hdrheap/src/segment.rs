//! Contiguous backing buffers and raw spans.
//!
//! A [`Segment`] is one allocation from the system allocator with a bump
//! cursor. Bytes below the cursor have been handed out; bytes above it are
//! free. The buffer never moves or shrinks while the segment is alive, which
//! is what gives heap strings their pointer stability.
//!
//! Segments are zero-filled on creation so every handed-out range is
//! initialised memory even before the caller writes to it.
//!
//! # Safety
//!
//! - The buffer is deallocated only in `Drop`
//! - Shared access (`&Segment`) only ever reads below the cursor
//! - Writes require `&mut Segment`, so a segment shared through an `Arc`
//!   cannot be written until it is uniquely owned again

use crate::error::{Error, Result};
use std::alloc::{self, Layout};
use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

/// Alignment of every segment's first byte.
pub(crate) const SEGMENT_ALIGNMENT: usize = 8;

/// Process-wide identity of a segment.
///
/// Ids are never reused, so a string reference that names a segment which
/// has since been released can be detected rather than misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub(crate) u64);

impl SegmentId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SegmentId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg#{}", self.0)
    }
}

/// A raw pointer and length into arena memory.
///
/// `MemSpan` does not borrow the arena it came from. It stays valid for as
/// long as the owning arena keeps the backing segment (see the arena's
/// documentation for when that ends).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemSpan {
    ptr: NonNull<u8>,
    len: usize,
}

impl MemSpan {
    pub(crate) const fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// First byte of the span.
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-length span.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address range `[start, start + len)`.
    #[must_use]
    pub fn addr_range(&self) -> Range<usize> {
        let start = self.ptr.as_ptr().addr();
        start..start + self.len
    }

    /// Returns `true` if the two spans share at least one byte.
    #[must_use]
    pub fn overlaps(&self, other: &MemSpan) -> bool {
        let a = self.addr_range();
        let b = other.addr_range();
        a.start < b.end && b.start < a.end
    }

    /// Views the span as a byte slice.
    ///
    /// # Safety
    ///
    /// The backing segment must still be alive and no `&mut` view of these
    /// bytes may exist for `'a`.
    #[must_use]
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        // SAFETY: the caller guarantees the segment outlives 'a; ptr/len
        // were produced by a bounds-checked segment allocation.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Views the span as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The backing segment must still be alive and no other view of these
    /// bytes may exist for `'a`.
    #[must_use]
    pub unsafe fn as_mut_slice<'a>(&mut self) -> &'a mut [u8] {
        // SAFETY: as for `as_slice`, plus exclusivity from the caller.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// One backing allocation with a bump cursor.
pub struct Segment {
    id: SegmentId,
    /// Start of the buffer.
    start: NonNull<u8>,
    /// Total capacity in bytes.
    capacity: usize,
    /// Bytes handed out so far.
    used: usize,
}

// SAFETY: the segment exclusively owns its buffer. Shared references only
// read bytes below the cursor, which are never written through `&Segment`.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Allocates a zero-filled segment of `capacity` bytes (at least one).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the layout is invalid or the
    /// system allocator returns null.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = capacity.max(1);
        let layout = Layout::from_size_align(capacity, SEGMENT_ALIGNMENT)
            .map_err(|_| Error::AllocationFailure { size: capacity })?;

        // SAFETY: layout has a non-zero size.
        let start = unsafe { alloc::alloc_zeroed(layout) };
        let start = NonNull::new(start).ok_or(Error::AllocationFailure { size: capacity })?;

        let segment = Segment {
            id: SegmentId::next(),
            start,
            capacity,
            used: 0,
        };
        hdrheap_log::trace!("created {} with {} bytes", segment.id, capacity);
        Ok(segment)
    }

    /// Allocates a segment or aborts the process.
    pub(crate) fn new_or_abort(capacity: usize) -> Self {
        Self::new(capacity).unwrap_or_else(|err| crate::error::fatal(err))
    }

    /// The segment's id.
    #[must_use]
    pub const fn id(&self) -> SegmentId {
        self.id
    }

    /// Total capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Bytes still available.
    #[must_use]
    pub const fn free(&self) -> usize {
        self.capacity - self.used
    }

    /// Address of the first byte.
    #[must_use]
    pub fn start_addr(&self) -> usize {
        self.start.as_ptr().addr()
    }

    /// Reserves `len` bytes and returns their offset, or `None` if the
    /// request does not fit.
    pub fn allocate(&mut self, len: usize) -> Option<usize> {
        if len > self.free() {
            return None;
        }
        let offset = self.used;
        self.used += len;
        Some(offset)
    }

    /// Reserves `len` bytes after rounding the cursor up to `align`.
    pub fn allocate_aligned(&mut self, len: usize, align: usize) -> Option<usize> {
        debug_assert!(align.is_power_of_two());
        let addr = self.start_addr() + self.used;
        let padding = addr.next_multiple_of(align) - addr;
        if padding.checked_add(len)? > self.free() {
            return None;
        }
        let offset = self.used + padding;
        self.used = offset + len;
        Some(offset)
    }

    /// Rewinds the cursor so the whole buffer can be handed out again.
    /// Spans from before the reset no longer read back.
    pub(crate) fn reset(&mut self) {
        self.used = 0;
    }

    /// Grows the allocation at `offset` from `old_len` to `new_len` bytes in
    /// place. Only the most recent allocation can grow.
    pub fn expand(&mut self, offset: usize, old_len: usize, new_len: usize) -> bool {
        if new_len < old_len || offset + old_len != self.used {
            return false;
        }
        self.allocate(new_len - old_len).is_some()
    }

    /// Reads `len` bytes at `offset` if they lie below the cursor.
    #[must_use]
    pub fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes_within(offset, len, self.used)
    }

    /// Reads `len` bytes at `offset` if they lie below `limit` (itself
    /// clamped to the cursor). Read-only views of a shared segment pass the
    /// length recorded when they were attached.
    #[must_use]
    pub fn bytes_within(&self, offset: usize, len: usize, limit: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        if end > limit.min(self.used) {
            return None;
        }
        // SAFETY: [offset, end) is inside the buffer and below the cursor.
        Some(unsafe { std::slice::from_raw_parts(self.start.as_ptr().add(offset), len) })
    }

    /// Mutable view of `len` handed-out bytes at `offset`.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)?;
        if end > self.used {
            return None;
        }
        // SAFETY: in bounds, and `&mut self` guarantees exclusivity.
        Some(unsafe { std::slice::from_raw_parts_mut(self.start.as_ptr().add(offset), len) })
    }

    /// Raw span for `len` bytes at `offset`. Bounds are not checked against
    /// the cursor; callers pass ranges they allocated.
    pub(crate) fn span(&self, offset: usize, len: usize) -> MemSpan {
        debug_assert!(offset + len <= self.capacity);
        // SAFETY: offset is within the buffer, so the pointer is non-null.
        let ptr = unsafe { NonNull::new_unchecked(self.start.as_ptr().add(offset)) };
        MemSpan::new(ptr, len)
    }

    /// Returns `true` if `addr` lies in `[start, start + limit]`. The end is
    /// inclusive so one-past-the-end probes of the last string still match.
    #[must_use]
    pub fn contains_addr(&self, addr: usize, limit: usize) -> bool {
        let start = self.start_addr();
        addr >= start && addr <= start + limit.min(self.capacity)
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("start", &format_args!("{:#x}", self.start_addr()))
            .field("capacity", &self.capacity)
            .field("used", &self.used)
            .finish()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: same size and alignment as in `new`, which succeeded.
        let layout =
            unsafe { Layout::from_size_align_unchecked(self.capacity, SEGMENT_ALIGNMENT) };

        unsafe {
            alloc::dealloc(self.start.as_ptr(), layout);
        }
    }
}
