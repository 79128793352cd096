//! The header heap.
//!
//! An [`HdrHeap`] holds the objects that make up one HTTP header (URLs, MIME
//! headers, caller-defined objects) together with the string bytes they
//! copy. Strings are bump-allocated from a read-write segment. When it
//! fills, the segment is demoted to a read-only slot and a segment twice as
//! large takes its place, so earlier strings never move. When the
//! read-only slots are exhausted the heap either chains another link or
//! coalesces: every live copied string is evacuated into one fresh segment
//! and all old segments are released.
//!
//! # Example
//!
//! ```
//! use hdrheap::{HdrHeap, StrRef, StrValue};
//! use bytes::Bytes;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Cookie {
//!     name: StrRef,
//!     value: StrRef,
//! }
//!
//! impl hdrheap::Relocatable for Cookie {
//!     fn visit_strs(&self, f: &mut dyn FnMut(&StrRef)) {
//!         f(&self.name);
//!         f(&self.value);
//!     }
//!     fn visit_strs_mut(&mut self, f: &mut dyn FnMut(&mut StrRef)) {
//!         f(&mut self.name);
//!         f(&mut self.value);
//!     }
//! }
//! hdrheap::impl_heap_object!(Cookie);
//!
//! let mut heap = HdrHeap::new();
//! let cookie = heap.allocate_obj(Cookie::default());
//!
//! heap.set_str(cookie, |c: &mut Cookie| &mut c.name, StrValue::from("session"))?;
//! heap.set_str(cookie, |c: &mut Cookie| &mut c.value, Bytes::from_static(b"abc123").into())?;
//!
//! let name = heap.get(cookie)?.name.clone();
//! assert_eq!(heap.resolve(&name), Some(&b"session"[..]));
//!
//! heap.coalesce()?;
//! heap.sanity_check_strs()?;
//! # Ok::<(), hdrheap::Error>(())
//! ```

use crate::config::{HeapConfig, OverflowPolicy};
use crate::error::{Error, Result, Violation, fatal};
use crate::obj::{HeapObject, HeapStr, ObjHandle, Relocatable, StrRef, StrValue};
use crate::segment::{MemSpan, Segment, SegmentId};
use crate::str_heap::{RONLY_HEAPS, StrHeap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest single string the heap accepts.
pub const MAX_STR_LEN: usize = u32::MAX as usize;

fn next_heap_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Capacity of the next string segment: the configured size for the first
/// one, then double the previous, never less than the request itself.
fn check_str_len(len: usize) -> Result<()> {
    if len > MAX_STR_LEN {
        return Err(Violation::TooLarge {
            requested: len,
            max: MAX_STR_LEN,
        }
        .into());
    }
    Ok(())
}

/// String offsets are stored as `u32`, so nothing past the first 4 GiB of a
/// segment can be referenced.
fn str_offset(offset: usize, len: usize) -> Result<u32> {
    u32::try_from(offset).map_err(|_| {
        Violation::TooLarge {
            requested: offset.saturating_add(len),
            max: MAX_STR_LEN,
        }
        .into()
    })
}

fn next_segment_size(initial: usize, last: usize, request: usize) -> usize {
    let base = if last == 0 { initial } else { last.saturating_mul(2) };
    base.max(request).max(1)
}

struct ObjSlot {
    generation: u32,
    obj: Option<Box<dyn HeapObject>>,
}

/// Counters of maintenance events since the heap was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    demotions: usize,
    coalesces: usize,
    chained: usize,
}

/// Snapshot of a heap's memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Live objects.
    pub objects: usize,
    /// String segments across every link.
    pub str_segments: usize,
    /// Occupied read-only slots across every link.
    pub ronly_slots_used: usize,
    /// Links in the chain (at least one).
    pub chain_len: usize,
    /// Bytes handed out from string segments.
    pub str_used: usize,
    /// Total capacity of string segments.
    pub str_capacity: usize,
    /// Bytes of copied strings still referenced by objects.
    pub live_str_bytes: usize,
    /// Bytes of aliased strings referenced by objects.
    pub aliased_str_bytes: usize,
    /// Abandoned copied-string bytes.
    pub lost_string_space: usize,
    /// Read-write segments demoted so far.
    pub demotions: usize,
    /// Coalesce passes so far.
    pub coalesces: usize,
    /// Links chained so far.
    pub chained: usize,
}

/// Arena for one header's objects and strings.
///
/// The heap is not synchronised. Mutation needs `&mut HdrHeap`; a finished
/// heap can be shared between threads behind an `Arc` for reading, and a
/// writer that needs its own copy uses [`HdrHeap::clone_for_write`].
pub struct HdrHeap {
    id: u64,
    config: HeapConfig,
    slots: Vec<ObjSlot>,
    free_slots: Vec<u32>,
    /// String storage; index 0 is the head, each link names its successor.
    links: Vec<StrHeap>,
    lost_string_space: usize,
    writeable: bool,
    counters: Counters,
}

impl Default for HdrHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl HdrHeap {
    /// Creates an empty heap with the default configuration.
    ///
    /// No string segment is allocated until the first copied string.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Creates an empty heap with `config`.
    #[must_use]
    pub fn with_config(config: HeapConfig) -> Self {
        Self {
            id: next_heap_id(),
            config,
            slots: Vec::new(),
            free_slots: Vec::new(),
            links: vec![StrHeap::new()],
            lost_string_space: 0,
            writeable: true,
            counters: Counters::default(),
        }
    }

    /// Identity checked against object handles.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The heap's configuration.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Returns `false` once [`make_read_only`](Self::make_read_only) ran.
    #[must_use]
    pub const fn is_writeable(&self) -> bool {
        self.writeable
    }

    /// Abandoned copied-string bytes since the last coalesce.
    #[must_use]
    pub const fn lost_string_space(&self) -> usize {
        self.lost_string_space
    }

    fn check_writeable(&self) -> Result<()> {
        if self.writeable {
            Ok(())
        } else {
            Err(Violation::ReadOnlyHeap.into())
        }
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Stores `obj` and returns a typed handle to it.
    pub fn allocate_obj<T: HeapObject>(&mut self, obj: T) -> ObjHandle<T> {
        let obj: Box<dyn HeapObject> = Box::new(obj);
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.obj = Some(obj);
            return ObjHandle::new(self.id, index, slot.generation);
        }
        let index = u32::try_from(self.slots.len())
            .unwrap_or_else(|_| fatal(Error::AllocationFailure { size: self.slots.len() }));
        self.slots.push(ObjSlot {
            generation: 0,
            obj: Some(obj),
        });
        ObjHandle::new(self.id, index, 0)
    }

    /// Removes the object behind `handle`. Its copied strings become lost
    /// space and the handle (and every copy of it) goes stale.
    ///
    /// # Errors
    ///
    /// Fails for a foreign or stale handle, or on a read-only heap.
    pub fn deallocate_obj<T: HeapObject>(&mut self, handle: ObjHandle<T>) -> Result<()> {
        self.check_writeable()?;
        self.get::<T>(handle)?;
        let slot = &mut self.slots[handle.index as usize];
        if let Some(obj) = slot.obj.take() {
            self.lost_string_space += obj.owned_strings_length();
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(handle.index);
        Ok(())
    }

    fn slot_obj<T>(&self, handle: ObjHandle<T>) -> Result<&dyn HeapObject> {
        if handle.heap != self.id {
            return Err(Violation::ForeignHandle {
                heap: self.id,
                handle_heap: handle.heap,
            }
            .into());
        }
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.obj.as_deref())
            .ok_or_else(|| Violation::StaleHandle { index: handle.index }.into())
    }

    /// Borrows the object behind `handle`.
    ///
    /// # Errors
    ///
    /// Fails for a foreign or stale handle.
    pub fn get<T: HeapObject>(&self, handle: ObjHandle<T>) -> Result<&T> {
        self.slot_obj(handle)?
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| wrong_kind::<T>(handle.index))
    }

    /// Mutably borrows the object behind `handle`.
    ///
    /// Edits made here bypass string accounting: replacing a copied string
    /// directly does not count the old bytes as lost space. Prefer
    /// [`set_str`](Self::set_str).
    ///
    /// # Errors
    ///
    /// Fails for a foreign or stale handle, or on a read-only heap.
    pub fn get_mut<T: HeapObject>(&mut self, handle: ObjHandle<T>) -> Result<&mut T> {
        self.check_writeable()?;
        self.slot_obj(handle)?;
        self.slots[handle.index as usize]
            .obj
            .as_deref_mut()
            .and_then(|obj| obj.as_any_mut().downcast_mut::<T>())
            .ok_or_else(|| wrong_kind::<T>(handle.index))
    }

    /// Every live object, in slot order.
    pub fn objects(&self) -> impl Iterator<Item = &(dyn HeapObject + 'static)> {
        self.slots.iter().filter_map(|slot| slot.obj.as_deref())
    }

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    // ------------------------------------------------------------------
    // String allocation
    // ------------------------------------------------------------------

    /// Reserves `len` zeroed bytes for a string and returns its reference.
    ///
    /// The heap keeps no per-string metadata; the caller (normally an
    /// object field) is the only record of the string. Allocation may demote
    /// the read-write segment, chain a link or coalesce, depending on the
    /// configured [`OverflowPolicy`]. Failure to obtain memory aborts.
    ///
    /// # Errors
    ///
    /// Fails on a read-only heap or if `len` exceeds [`MAX_STR_LEN`].
    pub fn allocate_str(&mut self, len: usize) -> Result<HeapStr> {
        self.check_writeable()?;
        check_str_len(len)?;

        if self.lost_string_space > self.config.max_lost_string_space {
            hdrheap_log::debug!(
                "heap {}: {} lost string bytes, forcing coalesce",
                self.id,
                self.lost_string_space
            );
            self.coalesce_str_heaps(len, &[]);
        }

        let mut last_size = 0;
        loop {
            let config = self.config;
            let tail = self.tail();
            let link = &mut self.links[tail];

            if link.read_write.is_none() {
                let size = next_segment_size(config.str_heap_size, last_size, len);
                link.read_write = Some(Arc::new(Segment::new_or_abort(size)));
            }

            if let Some((segment, offset)) = link.allocate(len) {
                return Ok(HeapStr {
                    segment,
                    offset: str_offset(offset, len)?,
                    len: len as u32,
                });
            }

            last_size = link.rw_capacity();
            if link.demote_rw() {
                self.counters.demotions += 1;
                continue;
            }

            match config.overflow_policy {
                OverflowPolicy::Coalesce => self.coalesce_str_heaps(len, &[]),
                OverflowPolicy::Chain => self.chain_link(),
            }
        }
    }

    fn tail(&self) -> usize {
        let mut index = 0;
        while let Some(next) = self.links[index].next {
            index = next;
        }
        index
    }

    fn chain_link(&mut self) {
        let tail = self.tail();
        let index = self.links.len();
        self.links.push(StrHeap::new());
        self.links[tail].next = Some(index);
        self.counters.chained += 1;
        hdrheap_log::debug!("heap {}: read-only slots full, chained link {}", self.id, index);
    }

    /// Copies `bytes` into the heap.
    ///
    /// # Errors
    ///
    /// As for [`allocate_str`](Self::allocate_str).
    pub fn duplicate_str(&mut self, bytes: &[u8]) -> Result<HeapStr> {
        let s = self.allocate_str(bytes.len())?;
        if let Some(dst) = self.str_bytes_mut(&s) {
            dst.copy_from_slice(bytes);
        }
        Ok(s)
    }

    /// Grows `s` in place to `new_len` bytes.
    ///
    /// Only succeeds for the most recent allocation of the current
    /// read-write segment when the segment has room; otherwise returns
    /// `None` and the caller must allocate and copy.
    pub fn expand_str(&mut self, s: &HeapStr, new_len: usize) -> Option<HeapStr> {
        if !self.writeable || new_len > MAX_STR_LEN {
            return None;
        }
        let tail = self.tail();
        let segment = self.links[tail].rw_mut(s.segment)?;
        segment.expand(s.offset(), s.len(), new_len).then_some(HeapStr {
            len: new_len as u32,
            ..*s
        })
    }

    /// Records that `s` is no longer referenced. Copied bytes still held by
    /// this heap count toward the lost-space threshold.
    pub fn free_string(&mut self, s: &StrRef) {
        if let StrRef::Owned(heap_str) = s
            && self.str_bytes(heap_str).is_some()
        {
            self.lost_string_space += heap_str.len();
        }
    }

    /// Copies whatever `src` refers to into the heap.
    ///
    /// Aliased and copied sources alike end up as a fresh copied string.
    ///
    /// # Errors
    ///
    /// Fails for a copied source this heap cannot resolve, and as for
    /// [`allocate_str`](Self::allocate_str).
    pub fn copy_str(&mut self, src: &StrRef) -> Result<StrRef> {
        let bytes = match src {
            StrRef::Empty => return Ok(StrRef::Empty),
            StrRef::Borrowed(b) => b.to_vec(),
            StrRef::Owned(s) => self.str_bytes(s).map(<[u8]>::to_vec).ok_or_else(|| dangling(s))?,
        };
        Ok(StrRef::Owned(self.duplicate_str(&bytes)?))
    }

    /// Replaces a string field of the object behind `handle`.
    ///
    /// The old value is released first, then `value` is either copied into
    /// the heap or stored as an alias. An empty value clears the field.
    /// Copying may coalesce the heap; the target field is empty while that
    /// happens, and every other field is relocated as usual.
    ///
    /// # Errors
    ///
    /// Fails for a foreign or stale handle, on a read-only heap, or if a
    /// copied value exceeds [`MAX_STR_LEN`]. The field is unchanged on
    /// failure.
    pub fn set_str<T, F>(&mut self, handle: ObjHandle<T>, field: F, value: StrValue<'_>) -> Result<()>
    where
        T: HeapObject,
        F: Fn(&mut T) -> &mut StrRef,
    {
        if let StrValue::Copy(bytes) = &value {
            check_str_len(bytes.len())?;
        }
        let old = std::mem::take(field(self.get_mut(handle)?));
        self.free_string(&old);

        let new = match value {
            StrValue::Copy(bytes) if bytes.is_empty() => StrRef::Empty,
            StrValue::Copy(bytes) => StrRef::Owned(self.duplicate_str(bytes)?),
            StrValue::Alias(bytes) if bytes.is_empty() => StrRef::Empty,
            StrValue::Alias(bytes) => StrRef::Borrowed(bytes),
        };
        *field(self.get_mut(handle)?) = new;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reading strings
    // ------------------------------------------------------------------

    fn lookup(&self, id: SegmentId) -> Option<(&Segment, usize)> {
        self.links.iter().find_map(|link| link.lookup(id))
    }

    /// Bytes of a copied string, or `None` if it is not in this heap (for
    /// example a stale copy of a reference relocated by a coalesce).
    #[must_use]
    pub fn str_bytes(&self, s: &HeapStr) -> Option<&[u8]> {
        let (segment, limit) = self.lookup(s.segment)?;
        segment.bytes_within(s.offset(), s.len(), limit)
    }

    /// Mutable bytes of a copied string in a read-write segment this heap
    /// owns exclusively. Demoted and shared segments are immutable.
    pub fn str_bytes_mut(&mut self, s: &HeapStr) -> Option<&mut [u8]> {
        if !self.writeable {
            return None;
        }
        self.links
            .iter_mut()
            .find_map(|link| link.rw_mut(s.segment))?
            .bytes_mut(s.offset(), s.len())
    }

    /// Raw pointer and length of a copied string.
    #[must_use]
    pub fn str_span(&self, s: &HeapStr) -> Option<MemSpan> {
        let (segment, limit) = self.lookup(s.segment)?;
        (s.offset() + s.len() <= limit).then(|| segment.span(s.offset(), s.len()))
    }

    /// Bytes of any string reference.
    #[must_use]
    pub fn resolve<'a>(&'a self, s: &'a StrRef) -> Option<&'a [u8]> {
        match s {
            StrRef::Empty => Some(&[]),
            StrRef::Owned(heap_str) => self.str_bytes(heap_str),
            StrRef::Borrowed(bytes) => Some(&bytes[..]),
        }
    }

    /// Like [`resolve`](Self::resolve), reporting a dangling copied string
    /// as an error.
    ///
    /// # Errors
    ///
    /// Fails if `s` is a copied string this heap does not hold.
    pub fn resolve_checked<'a>(&'a self, s: &'a StrRef) -> Result<&'a [u8]> {
        match s {
            StrRef::Owned(heap_str) => self.str_bytes(heap_str).ok_or_else(|| dangling(heap_str)),
            other => Ok(self.resolve(other).unwrap_or_default()),
        }
    }

    /// Returns `true` if `ptr` points into memory held by this heap: the
    /// current read-write segment, the valid prefix of any read-only segment
    /// (one past the end included) or any chained link.
    ///
    /// Callers use this to decide whether a string must be copied in or can
    /// be aliased because the heap already keeps it alive.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr.addr();
        self.links.iter().any(|link| link.contains(addr))
    }

    // ------------------------------------------------------------------
    // Coalesce and evacuate
    // ------------------------------------------------------------------

    /// Bytes of copied strings referenced by live objects.
    ///
    /// Aliased strings are excluded: they occupy no segment and are not
    /// moved by evacuation.
    #[must_use]
    pub fn required_space_for_evacuation(&self) -> usize {
        self.objects().map(Relocatable::owned_strings_length).sum()
    }

    /// Bytes of aliased strings referenced by live objects.
    #[must_use]
    pub fn aliased_space(&self) -> usize {
        self.objects().map(Relocatable::borrowed_strings_length).sum()
    }

    /// Compacts every live copied string into a single segment now.
    ///
    /// # Errors
    ///
    /// Fails on a read-only heap.
    pub fn coalesce(&mut self) -> Result<()> {
        self.check_writeable()?;
        self.coalesce_str_heaps(0, &[]);
        Ok(())
    }

    fn holds_segment(&self, id: SegmentId) -> bool {
        self.links.iter().any(|link| link.holds(id))
    }

    fn source_segments(&self) -> Vec<(Arc<Segment>, usize)> {
        self.links
            .iter()
            .flat_map(StrHeap::segments)
            .map(|(segment, len)| (Arc::clone(segment), len))
            .collect()
    }

    /// Evacuates live strings into a fresh segment with room for
    /// `incoming` more bytes, then drops every old segment.
    fn coalesce_str_heaps(&mut self, incoming: usize, extra: &[(Arc<Segment>, usize)]) {
        let live = self.required_space_for_evacuation();
        let size = self
            .config
            .str_heap_size
            .max(live.saturating_mul(2))
            .max(live.saturating_add(incoming));

        let mut sources = self.source_segments();
        sources.extend(extra.iter().cloned());

        let mut fresh = Segment::new_or_abort(size);
        let mut moved = 0usize;
        let mut unresolved = 0usize;

        for obj in self.slots.iter_mut().filter_map(|slot| slot.obj.as_deref_mut()) {
            obj.visit_strs_mut(&mut |s| {
                let StrRef::Owned(heap_str) = s else {
                    return;
                };
                let Some(bytes) = find_bytes(&sources, heap_str) else {
                    unresolved += 1;
                    return;
                };
                let Some(offset) = fresh.allocate(bytes.len()) else {
                    fatal(
                        Violation::EvacuationOverflow {
                            required: live,
                            capacity: size,
                        }
                        .into(),
                    );
                };
                if let Some(dst) = fresh.bytes_mut(offset, bytes.len()) {
                    dst.copy_from_slice(bytes);
                }
                let offset = str_offset(offset, bytes.len()).unwrap_or_else(|err| fatal(err));
                *heap_str = HeapStr {
                    segment: fresh.id(),
                    offset,
                    len: heap_str.len,
                };
                moved += bytes.len();
            });
        }

        if unresolved > 0 {
            hdrheap_log::warn!(
                "heap {}: {} copied strings could not be resolved during evacuation",
                self.id,
                unresolved
            );
        }
        hdrheap_log::debug!(
            "heap {}: coalesced {} segments into {} ({} live bytes, {} incoming, {} lost reclaimed)",
            self.id,
            sources.len(),
            fresh.id(),
            moved,
            incoming,
            self.lost_string_space
        );

        self.links = vec![StrHeap::with_segment(fresh)];
        self.lost_string_space = 0;
        self.counters.coalesces += 1;
    }

    // ------------------------------------------------------------------
    // Sharing
    // ------------------------------------------------------------------

    /// Attaches every string segment of `from` to this heap as read-only
    /// storage, so objects copied out of `from` keep resolving.
    ///
    /// Objects referencing `from`'s strings must be stored before calling
    /// this: if there are not enough free read-only slots (or the combined
    /// lost space is too large) the heap coalesces instead, and only
    /// objects already present are evacuated.
    ///
    /// # Errors
    ///
    /// Fails on a read-only heap.
    pub fn inherit_string_heaps(&mut self, from: &HdrHeap) -> Result<()> {
        self.check_writeable()?;
        let incoming = from.source_segments();
        let tail = self.tail();
        let needed = incoming
            .iter()
            .filter(|(segment, _)| !self.holds_segment(segment.id()))
            .count();
        let inherit_size: usize = incoming.iter().map(|(_, len)| len).sum();
        let lost = self.lost_string_space + from.lost_string_space;

        if needed > self.links[tail].free_slots() || lost > self.config.max_lost_string_space {
            hdrheap_log::debug!(
                "heap {}: inheriting {} segments from heap {} needs a coalesce",
                self.id,
                incoming.len(),
                from.id
            );
            self.coalesce_str_heaps(inherit_size, &incoming);
            return Ok(());
        }

        for (segment, len) in incoming {
            let held_elsewhere = self
                .links
                .iter()
                .enumerate()
                .any(|(index, link)| index != tail && link.holds(segment.id()));
            if held_elsewhere {
                continue;
            }
            let attached = self.links[tail].attach(segment, len);
            debug_assert!(attached, "free slots were counted before attaching");
        }
        self.lost_string_space = lost;
        Ok(())
    }

    /// Copies the object behind `handle` out of `from` into this heap and
    /// inherits `from`'s string segments so its copied strings stay valid.
    ///
    /// # Errors
    ///
    /// Fails for a handle `from` cannot resolve, or on a read-only heap.
    pub fn copy_obj_from<T>(&mut self, from: &HdrHeap, handle: ObjHandle<T>) -> Result<ObjHandle<T>>
    where
        T: HeapObject + Clone,
    {
        self.check_writeable()?;
        let obj = from.get(handle)?.clone();
        let copy = self.allocate_obj(obj);
        self.inherit_string_heaps(from)?;
        Ok(copy)
    }

    /// Returns a writeable copy of this heap for clone-then-mutate.
    ///
    /// The copy keeps the heap's identity, so existing handles address the
    /// copy's objects too. String segments are shared read-only until the
    /// copy (or this heap) coalesces.
    #[must_use]
    pub fn clone_for_write(&self) -> HdrHeap {
        let mut copy = HdrHeap {
            id: self.id,
            config: self.config,
            slots: self
                .slots
                .iter()
                .map(|slot| ObjSlot {
                    generation: slot.generation,
                    obj: slot.obj.as_ref().map(|obj| obj.clone_boxed()),
                })
                .collect(),
            free_slots: self.free_slots.clone(),
            links: vec![StrHeap::new()],
            lost_string_space: 0,
            writeable: true,
            counters: Counters::default(),
        };

        let sources = self.source_segments();
        let fits = sources.len() <= RONLY_HEAPS
            && self.lost_string_space <= copy.config.max_lost_string_space;
        if fits {
            for (segment, len) in sources {
                copy.links[0].attach(segment, len);
            }
            copy.lost_string_space = self.lost_string_space;
        } else {
            copy.coalesce_str_heaps(0, &sources);
        }
        copy
    }

    /// Demotes every read-write segment and rejects further mutation.
    ///
    /// A read-only heap can be shared behind an `Arc` and read from any
    /// number of threads.
    pub fn make_read_only(&mut self) {
        for link in &mut self.links {
            if link.read_write.is_some() && link.demote_rw() {
                self.counters.demotions += 1;
            }
        }
        self.writeable = false;
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Checks that every copied string of every live object resolves to
    /// memory this heap holds.
    ///
    /// # Errors
    ///
    /// Returns the first dangling string found.
    pub fn sanity_check_strs(&self) -> Result<()> {
        for obj in self.objects() {
            let mut bad = None;
            obj.visit_strs(&mut |s| {
                if let StrRef::Owned(heap_str) = s
                    && bad.is_none()
                    && self.str_bytes(heap_str).is_none()
                {
                    bad = Some(*heap_str);
                }
            });
            if let Some(heap_str) = bad {
                return Err(dangling(&heap_str));
            }
        }
        Ok(())
    }

    /// Bytes handed out from every string segment.
    #[must_use]
    pub fn total_used_size(&self) -> usize {
        self.links.iter().map(StrHeap::used).sum()
    }

    /// Memory usage snapshot.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            objects: self.object_count(),
            str_segments: self.links.iter().map(|l| l.segments().count()).sum(),
            ronly_slots_used: self.links.iter().map(StrHeap::ronly_used).sum(),
            chain_len: self.links.len(),
            str_used: self.total_used_size(),
            str_capacity: self.links.iter().map(StrHeap::capacity).sum(),
            live_str_bytes: self.required_space_for_evacuation(),
            aliased_str_bytes: self.aliased_space(),
            lost_string_space: self.lost_string_space,
            demotions: self.counters.demotions,
            coalesces: self.counters.coalesces,
            chained: self.counters.chained,
        }
    }

    /// Logs the heap's segments and objects at debug level.
    pub fn dump(&self) {
        hdrheap_log::debug!("heap {} ({} objects)", self.id, self.object_count());
        for (index, link) in self.links.iter().enumerate() {
            for (segment, len) in link.segments() {
                hdrheap_log::debug!("  link {index}: {:?} valid {len}", segment);
            }
        }
        for obj in self.objects() {
            hdrheap_log::debug!("  {} {:?}", obj.kind(), obj);
        }
    }

    /// Capacity of the current read-write segment, 0 before the first
    /// string or right after a demotion.
    #[must_use]
    pub fn read_write_capacity(&self) -> usize {
        self.links[self.tail()].rw_capacity()
    }

    /// Free bytes left in the current read-write segment.
    #[must_use]
    pub fn read_write_free(&self) -> Option<usize> {
        self.links[self.tail()].read_write.as_ref().map(|s| s.free())
    }

    /// Capacity of each read-only slot of the current link.
    #[must_use]
    pub fn read_only_capacities(&self) -> [Option<usize>; RONLY_HEAPS] {
        let link = &self.links[self.tail()];
        std::array::from_fn(|i| link.read_only[i].as_ref().map(|s| s.segment.capacity()))
    }
}

fn find_bytes<'a>(sources: &'a [(Arc<Segment>, usize)], s: &HeapStr) -> Option<&'a [u8]> {
    sources
        .iter()
        .find(|(segment, _)| segment.id() == s.segment)
        .and_then(|(segment, limit)| segment.bytes_within(s.offset(), s.len(), *limit))
}

fn dangling(s: &HeapStr) -> Error {
    Violation::DanglingString {
        segment: s.segment.as_u64(),
        offset: s.offset,
        len: s.len,
    }
    .into()
}

fn wrong_kind<T>(index: u32) -> Error {
    Violation::WrongKind {
        index,
        expected: std::any::type_name::<T>(),
    }
    .into()
}

impl fmt::Debug for HdrHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdrHeap")
            .field("id", &self.id)
            .field("objects", &self.object_count())
            .field("links", &self.links)
            .field("lost_string_space", &self.lost_string_space)
            .field("writeable", &self.writeable)
            .finish()
    }
}
