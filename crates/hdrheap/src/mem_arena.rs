//! Bump arena with a freeze/thaw checkpoint.
//!
//! [`MemArena`] hands out raw [`MemSpan`]s from a list of blocks. Blocks
//! double in size as they fill and are never moved, so spans stay valid
//! until the arena is cleared or their generation is thawed. Released
//! blocks are kept as spares and reused, so the arena's extent only shrinks
//! on [`clear`](MemArena::clear).
//!
//! [`freeze`](MemArena::freeze) turns everything allocated so far into the
//! frozen generation. Allocation continues in fresh blocks; the frozen
//! memory stays readable until [`thaw`](MemArena::thaw) drops it. The usual
//! pattern is rebuilding a structure: freeze, copy what is still needed into
//! the new generation, thaw.
//!
//! ```
//! use hdrheap::MemArena;
//!
//! let mut arena = MemArena::new(64);
//! let old = arena.alloc_copy(b"stale config");
//!
//! arena.freeze(0);
//! assert_eq!(arena.size(), 0);
//! let new = arena.alloc_copy(b"fresh config");
//! assert!(arena.contains(old.as_ptr()));
//!
//! arena.thaw();
//! assert!(!arena.contains(old.as_ptr()));
//! assert_eq!(arena.get(&new), Some(&b"fresh config"[..]));
//! ```

use crate::segment::{MemSpan, Segment};
use std::fmt;

/// Capacity of the first block when none is given.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Growable bump arena with one frozen generation.
///
/// Sizes reported by the arena:
///
/// - [`size`](Self::size): bytes allocated in the active generation.
/// - [`allocated_size`](Self::allocated_size): active plus frozen bytes.
/// - [`extent`](Self::extent): capacity of every block held, spares
///   included.
pub struct MemArena {
    /// Active generation; the last block is the one allocated from.
    active: Vec<Segment>,
    frozen: Vec<Segment>,
    /// Released blocks, rewound and waiting for reuse.
    spare: Vec<Segment>,
    initial_size: usize,
    active_allocated: usize,
    frozen_allocated: usize,
    /// Floor for the first block created after a freeze.
    reserve: usize,
}

impl Default for MemArena {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl MemArena {
    /// Creates an empty arena whose first block holds `initial_size` bytes.
    ///
    /// No memory is reserved until the first allocation.
    #[must_use]
    pub fn new(initial_size: usize) -> Self {
        Self {
            active: Vec::new(),
            frozen: Vec::new(),
            spare: Vec::new(),
            initial_size: initial_size.max(1),
            active_allocated: 0,
            frozen_allocated: 0,
            reserve: 0,
        }
    }

    /// Allocates `n` bytes with no alignment requirement.
    ///
    /// Aborts the process if a new block cannot be obtained.
    pub fn alloc(&mut self, n: usize) -> MemSpan {
        self.alloc_aligned(n, 1)
    }

    /// Allocates `n` bytes starting at a multiple of `align`.
    ///
    /// `align` must be a power of two.
    pub fn alloc_aligned(&mut self, n: usize, align: usize) -> MemSpan {
        loop {
            if let Some(block) = self.active.last_mut()
                && let Some(offset) = block.allocate_aligned(n, align)
            {
                self.active_allocated += n;
                return block.span(offset, n);
            }
            self.push_block(n.saturating_add(align - 1));
        }
    }

    /// Allocates a copy of `bytes`.
    pub fn alloc_copy(&mut self, bytes: &[u8]) -> MemSpan {
        let span = self.alloc(bytes.len());
        if let Some(block) = self.active.last_mut() {
            let offset = span.as_ptr().addr() - block.start_addr();
            if let Some(dst) = block.bytes_mut(offset, bytes.len()) {
                dst.copy_from_slice(bytes);
            }
        }
        span
    }

    /// Makes sure the next `n` bytes can be allocated from the current
    /// block, starting a new one if needed.
    pub fn require(&mut self, n: usize) -> &mut Self {
        if self.remaining() < n {
            self.push_block(n);
        }
        self
    }

    fn push_block(&mut self, n: usize) {
        let needed = n.max(std::mem::take(&mut self.reserve));
        if let Some(index) = self.spare.iter().position(|b| b.capacity() >= needed) {
            let block = self.spare.swap_remove(index);
            hdrheap_log::trace!("mem arena: reusing block of {} bytes", block.capacity());
            self.active.push(block);
            return;
        }
        let last = self.active.last().map_or(0, Segment::capacity);
        let base = if last == 0 {
            self.initial_size
        } else {
            last.saturating_mul(2)
        };
        let size = base.max(needed);
        hdrheap_log::trace!("mem arena: new block of {} bytes", size);
        self.active.push(Segment::new_or_abort(size));
    }

    fn retire_frozen(&mut self) {
        for mut block in self.frozen.drain(..) {
            block.reset();
            self.spare.push(block);
        }
        self.frozen_allocated = 0;
    }

    /// Free bytes in the current block.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.active.last().map_or(0, Segment::free)
    }

    /// Bytes allocated since the last freeze.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.active_allocated
    }

    /// Bytes allocated in the active and frozen generations.
    #[must_use]
    pub const fn allocated_size(&self) -> usize {
        self.active_allocated + self.frozen_allocated
    }

    /// Capacity of every block the arena holds, spares included.
    #[must_use]
    pub fn extent(&self) -> usize {
        self.blocks().chain(&self.spare).map(Segment::capacity).sum()
    }

    /// Capacity of the frozen generation's blocks.
    #[must_use]
    pub fn frozen_extent(&self) -> usize {
        self.frozen.iter().map(Segment::capacity).sum()
    }

    /// Returns `true` while a frozen generation exists.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        !self.frozen.is_empty()
    }

    fn blocks(&self) -> impl Iterator<Item = &Segment> {
        self.active.iter().chain(&self.frozen)
    }

    /// Returns `true` if `ptr` lies in memory allocated from a live
    /// generation (one past the end of a block's used bytes included).
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr.addr();
        self.blocks().any(|b| b.contains_addr(addr, b.used()))
    }

    fn block_of(&self, span: &MemSpan) -> Option<(&Segment, usize)> {
        let addr = span.as_ptr().addr();
        self.blocks()
            .find(|b| b.contains_addr(addr, b.used()))
            .map(|b| (b, addr - b.start_addr()))
    }

    /// Bytes of `span`, or `None` if it is not live memory of this arena.
    #[must_use]
    pub fn get(&self, span: &MemSpan) -> Option<&[u8]> {
        let (block, offset) = self.block_of(span)?;
        block.bytes(offset, span.len())
    }

    /// Mutable bytes of `span`, or `None` if it is not live memory of this
    /// arena.
    pub fn get_mut(&mut self, span: &MemSpan) -> Option<&mut [u8]> {
        let addr = span.as_ptr().addr();
        self.active
            .iter_mut()
            .chain(&mut self.frozen)
            .find(|b| b.contains_addr(addr, b.used()))
            .and_then(|b| {
                let offset = addr - b.start_addr();
                b.bytes_mut(offset, span.len())
            })
    }

    /// Starts a new generation.
    ///
    /// Everything allocated so far becomes frozen: still valid, but no
    /// longer counted by [`size`](Self::size). A previous frozen generation
    /// is released to the spares. The next block is at least `reserve_hint`
    /// bytes and at least as large as the frozen generation.
    pub fn freeze(&mut self, reserve_hint: usize) -> &mut Self {
        self.retire_frozen();
        self.frozen = std::mem::take(&mut self.active);
        self.frozen_allocated = std::mem::replace(&mut self.active_allocated, 0);
        self.reserve = reserve_hint.max(self.frozen_extent());
        hdrheap_log::debug!(
            "mem arena: froze {} bytes in {} blocks",
            self.frozen_allocated,
            self.frozen.len()
        );
        self
    }

    /// Releases the frozen generation. Its blocks are rewound and kept for
    /// later allocations.
    ///
    /// If nothing was allocated since [`freeze`](Self::freeze) the freeze
    /// is undone instead and the frozen memory becomes active again.
    pub fn thaw(&mut self) -> &mut Self {
        if self.frozen.is_empty() {
            return self;
        }
        if self.active_allocated == 0 {
            let reserved = std::mem::take(&mut self.active);
            self.active = std::mem::take(&mut self.frozen);
            self.active.extend(reserved);
            self.active_allocated = std::mem::replace(&mut self.frozen_allocated, 0);
            self.reserve = 0;
            hdrheap_log::debug!("mem arena: thaw with no new allocations, freeze undone");
            return self;
        }
        let released = self.frozen_extent();
        self.retire_frozen();
        hdrheap_log::debug!("mem arena: thawed, released {} bytes", released);
        self
    }

    /// Releases every block, spares included.
    pub fn clear(&mut self) {
        self.active.clear();
        self.frozen.clear();
        self.spare.clear();
        self.active_allocated = 0;
        self.frozen_allocated = 0;
        self.reserve = 0;
    }
}

impl fmt::Debug for MemArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemArena")
            .field("size", &self.size())
            .field("allocated_size", &self.allocated_size())
            .field("extent", &self.extent())
            .field("active_blocks", &self.active.len())
            .field("frozen_blocks", &self.frozen.len())
            .field("spare_blocks", &self.spare.len())
            .finish()
    }
}
