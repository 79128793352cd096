//! One link of a heap's string storage.
//!
//! A link owns at most one read-write segment plus [`RONLY_HEAPS`] read-only
//! slots. Filled read-write segments are demoted into a free slot; once the
//! slots run out the owning heap either chains another link or coalesces.
//!
//! Segments are reference counted so another heap can inherit them as
//! read-only storage. A read-write segment that has been shared is never
//! written again: [`StrHeap::allocate`] treats it as full, which forces a
//! demotion on the owner's side.

use crate::segment::{Segment, SegmentId};
use std::sync::Arc;

/// Number of read-only segment slots per link.
pub const RONLY_HEAPS: usize = 3;

/// A demoted (or inherited) segment and the prefix of it that is valid.
#[derive(Debug, Clone)]
pub(crate) struct ReadOnlySlot {
    pub(crate) segment: Arc<Segment>,
    pub(crate) len: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StrHeap {
    pub(crate) read_write: Option<Arc<Segment>>,
    pub(crate) read_only: [Option<ReadOnlySlot>; RONLY_HEAPS],
    /// Index of the next link in the owning heap's chain.
    pub(crate) next: Option<usize>,
}

impl StrHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_segment(segment: Segment) -> Self {
        Self {
            read_write: Some(Arc::new(segment)),
            ..Self::default()
        }
    }

    /// Carves `len` bytes from the read-write segment.
    ///
    /// Returns `None` when there is no read-write segment, it is full, or it
    /// is shared with another heap.
    pub(crate) fn allocate(&mut self, len: usize) -> Option<(SegmentId, usize)> {
        let segment = Arc::get_mut(self.read_write.as_mut()?)?;
        let offset = segment.allocate(len)?;
        Some((segment.id(), offset))
    }

    /// Capacity of the read-write segment, 0 without one.
    pub(crate) fn rw_capacity(&self) -> usize {
        self.read_write.as_ref().map_or(0, |s| s.capacity())
    }

    /// Moves the read-write segment into the first free read-only slot.
    ///
    /// Returns `false` (leaving the segment in place) when every slot is
    /// taken.
    pub(crate) fn demote_rw(&mut self) -> bool {
        let Some(slot) = self.read_only.iter_mut().find(|s| s.is_none()) else {
            return false;
        };
        if let Some(segment) = self.read_write.take() {
            let len = segment.used();
            hdrheap_log::debug!(
                "demoted {} ({} of {} bytes used) to read-only",
                segment.id(),
                len,
                segment.capacity()
            );
            *slot = Some(ReadOnlySlot { segment, len });
        }
        true
    }

    pub(crate) fn free_slots(&self) -> usize {
        self.read_only.iter().filter(|s| s.is_none()).count()
    }

    pub(crate) fn holds(&self, id: SegmentId) -> bool {
        self.segments().any(|(segment, _)| segment.id() == id)
    }

    /// Attaches a foreign segment as read-only. A segment that is already
    /// read-only here only has its valid length extended; the link's own
    /// read-write segment is left as it is.
    pub(crate) fn attach(&mut self, segment: Arc<Segment>, len: usize) -> bool {
        if let Some(existing) = self
            .read_only
            .iter_mut()
            .flatten()
            .find(|s| s.segment.id() == segment.id())
        {
            existing.len = existing.len.max(len);
            return true;
        }
        if self.holds(segment.id()) {
            return true;
        }
        match self.read_only.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(ReadOnlySlot { segment, len });
                true
            }
            None => false,
        }
    }

    /// Every segment of the link with the length of its valid prefix.
    pub(crate) fn segments(&self) -> impl Iterator<Item = (&Arc<Segment>, usize)> {
        self.read_write
            .iter()
            .map(|s| (s, s.used()))
            .chain(self.read_only.iter().flatten().map(|s| (&s.segment, s.len)))
    }

    /// Finds the segment `id` and its valid length.
    pub(crate) fn lookup(&self, id: SegmentId) -> Option<(&Segment, usize)> {
        self.segments()
            .find(|(segment, _)| segment.id() == id)
            .map(|(segment, len)| (&**segment, len))
    }

    /// Unique mutable access to the read-write segment if it is `id`.
    pub(crate) fn rw_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        let segment = self.read_write.as_mut()?;
        if segment.id() != id {
            return None;
        }
        Arc::get_mut(segment)
    }

    /// Containment over the read-write segment's whole buffer and the valid
    /// prefix of each read-only slot (inclusive of one past the end).
    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.read_write
            .as_ref()
            .is_some_and(|s| s.contains_addr(addr, s.capacity()))
            || self
                .read_only
                .iter()
                .flatten()
                .any(|s| s.segment.contains_addr(addr, s.len))
    }

    pub(crate) fn used(&self) -> usize {
        self.segments().map(|(_, len)| len).sum()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.segments().map(|(s, _)| s.capacity()).sum()
    }

    pub(crate) fn ronly_used(&self) -> usize {
        RONLY_HEAPS - self.free_slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_with(capacity: usize) -> StrHeap {
        StrHeap::with_segment(Segment::new(capacity).unwrap())
    }

    #[test]
    fn test_allocate_until_full() {
        let mut link = link_with(16);

        assert!(link.allocate(10).is_some());
        assert!(link.allocate(6).is_some());
        assert!(link.allocate(1).is_none());
        assert_eq!(link.used(), 16);
    }

    #[test]
    fn test_empty_link_cannot_allocate() {
        let mut link = StrHeap::new();
        assert!(link.allocate(1).is_none());
        assert_eq!(link.rw_capacity(), 0);
    }

    #[test]
    fn test_demote_fills_slots_in_order() {
        let mut link = StrHeap::new();

        for round in 0..RONLY_HEAPS {
            link.read_write = Some(Arc::new(Segment::new(8).unwrap()));
            link.allocate(8).unwrap();
            assert!(link.demote_rw());
            assert!(link.read_write.is_none());
            assert_eq!(link.ronly_used(), round + 1);
        }

        link.read_write = Some(Arc::new(Segment::new(8).unwrap()));
        assert!(!link.demote_rw());
        assert!(link.read_write.is_some());
    }

    #[test]
    fn test_shared_rw_segment_is_not_written() {
        let mut link = link_with(64);
        link.allocate(4).unwrap();

        let shared = Arc::clone(link.read_write.as_ref().unwrap());
        assert!(link.allocate(4).is_none());

        drop(shared);
        assert!(link.allocate(4).is_some());
    }

    #[test]
    fn test_attach_dedupes_by_id() {
        let mut link = StrHeap::new();
        let segment = Arc::new(Segment::new(32).unwrap());

        assert!(link.attach(Arc::clone(&segment), 4));
        assert!(link.attach(Arc::clone(&segment), 12));
        assert_eq!(link.ronly_used(), 1);
        assert_eq!(link.lookup(segment.id()).map(|(_, len)| len), Some(12));
    }

    #[test]
    fn test_contains_read_only_prefix() {
        let mut link = link_with(32);
        link.allocate(8).unwrap();
        let start = link.read_write.as_ref().unwrap().start_addr();
        assert!(link.demote_rw());

        assert!(link.contains(start));
        assert!(link.contains(start + 8));
        assert!(!link.contains(start + 9));
    }
}
