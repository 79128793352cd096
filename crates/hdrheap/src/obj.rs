//! Objects stored in a heap and the string references they hold.
//!
//! Every header object keeps its strings as [`StrRef`]s. A copied string is
//! a [`HeapStr`] naming a segment of the heap; an aliased string is a
//! [`Bytes`] buffer owned elsewhere. Evacuation walks objects through
//! [`Relocatable`] and rewrites only the `Owned` variants, so aliased bytes
//! are never touched.

use crate::segment::SegmentId;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// A copied string living in one of the heap's segments.
///
/// `HeapStr` is a plain value: copying it does not keep the bytes alive.
/// After a coalesce the heap rewrites the copies held by its objects; any
/// other copy goes stale and no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapStr {
    pub(crate) segment: SegmentId,
    pub(crate) offset: u32,
    pub(crate) len: u32,
}

impl HeapStr {
    /// Segment holding the bytes.
    #[must_use]
    pub const fn segment(&self) -> SegmentId {
        self.segment
    }

    /// Offset of the first byte inside the segment.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` for a zero-length string.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A string field of a header object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StrRef {
    /// No value.
    #[default]
    Empty,
    /// Bytes copied into the heap; relocatable.
    Owned(HeapStr),
    /// Bytes owned by someone else; never copied or moved by the heap.
    Borrowed(Bytes),
}

impl StrRef {
    /// Length of the referenced bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            StrRef::Empty => 0,
            StrRef::Owned(s) => s.len(),
            StrRef::Borrowed(b) => b.len(),
        }
    }

    /// Returns `true` if there are no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` for a copied string.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self, StrRef::Owned(_))
    }

    /// Returns `true` for an aliased string.
    #[must_use]
    pub const fn is_borrowed(&self) -> bool {
        matches!(self, StrRef::Borrowed(_))
    }

    /// Bytes this reference occupies inside the heap (aliases occupy none).
    #[must_use]
    pub const fn owned_len(&self) -> usize {
        match self {
            StrRef::Owned(s) => s.len(),
            _ => 0,
        }
    }

    /// The heap string, if this is a copied string.
    #[must_use]
    pub const fn as_heap_str(&self) -> Option<&HeapStr> {
        match self {
            StrRef::Owned(s) => Some(s),
            _ => None,
        }
    }

    /// Address of the first byte of an aliased string.
    #[must_use]
    pub fn borrowed_ptr(&self) -> Option<*const u8> {
        match self {
            StrRef::Borrowed(b) => Some(b.as_ptr()),
            _ => None,
        }
    }
}

/// A value to store into a string field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrValue<'a> {
    /// Copy these bytes into the heap.
    Copy(&'a [u8]),
    /// Keep a reference to this shared buffer without copying.
    Alias(Bytes),
}

impl StrValue<'_> {
    /// Length of the value.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            StrValue::Copy(b) => b.len(),
            StrValue::Alias(b) => b.len(),
        }
    }

    /// Returns `true` for an empty value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<&'a [u8]> for StrValue<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        StrValue::Copy(bytes)
    }
}

impl<'a> From<&'a str> for StrValue<'a> {
    fn from(s: &'a str) -> Self {
        StrValue::Copy(s.as_bytes())
    }
}

impl From<Bytes> for StrValue<'_> {
    fn from(bytes: Bytes) -> Self {
        StrValue::Alias(bytes)
    }
}

/// Enumerates the string fields of an object.
///
/// This is the one contract the heap needs from the objects it stores:
/// coalescing sizes the new segment with [`visit_strs`](Self::visit_strs)
/// and rewrites references with [`visit_strs_mut`](Self::visit_strs_mut).
/// Both must visit exactly the same fields.
pub trait Relocatable {
    /// Calls `visitor` with every string field.
    fn visit_strs(&self, visitor: &mut dyn FnMut(&StrRef));

    /// Calls `visitor` with every string field, allowing it to be rewritten.
    fn visit_strs_mut(&mut self, visitor: &mut dyn FnMut(&mut StrRef));

    /// Total bytes of copied strings this object keeps alive.
    fn owned_strings_length(&self) -> usize {
        let mut total = 0;
        self.visit_strs(&mut |s| total += s.owned_len());
        total
    }

    /// Total bytes of aliased strings this object refers to.
    fn borrowed_strings_length(&self) -> usize {
        let mut total = 0;
        self.visit_strs(&mut |s| {
            if s.is_borrowed() {
                total += s.len();
            }
        });
        total
    }
}

/// Kind tag of a stored object, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjKind {
    /// A URL.
    Url,
    /// A MIME header with its fields.
    MimeHeader,
    /// Any caller-defined object.
    Raw,
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjKind::Url => "URL",
            ObjKind::MimeHeader => "MIME_HEADER",
            ObjKind::Raw => "RAW",
        };
        f.write_str(name)
    }
}

/// An object that can live in a heap's object table.
pub trait HeapObject: Relocatable + fmt::Debug + Send + Sync + 'static {
    /// Diagnostic kind of the object.
    fn kind(&self) -> ObjKind {
        ObjKind::Raw
    }

    /// Boxed copy of the object, used by clone-then-mutate.
    fn clone_boxed(&self) -> Box<dyn HeapObject>;

    /// Upcast for typed access through [`ObjHandle`].
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed access through [`ObjHandle`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Implements [`HeapObject`] for a `Clone` type that already implements
/// [`Relocatable`].
///
/// ```
/// # use hdrheap::{Relocatable, StrRef, ObjKind};
/// #[derive(Debug, Clone)]
/// struct Tag(StrRef);
///
/// impl Relocatable for Tag {
///     fn visit_strs(&self, f: &mut dyn FnMut(&StrRef)) { f(&self.0) }
///     fn visit_strs_mut(&mut self, f: &mut dyn FnMut(&mut StrRef)) { f(&mut self.0) }
/// }
///
/// hdrheap::impl_heap_object!(Tag, ObjKind::Raw);
/// ```
#[macro_export]
macro_rules! impl_heap_object {
    ($ty:ty) => {
        $crate::impl_heap_object!($ty, $crate::ObjKind::Raw);
    };
    ($ty:ty, $kind:expr) => {
        impl $crate::HeapObject for $ty {
            fn kind(&self) -> $crate::ObjKind {
                $kind
            }

            fn clone_boxed(&self) -> ::std::boxed::Box<dyn $crate::HeapObject> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
}

/// Typed reference to an object stored in a heap.
///
/// A handle records the heap that minted it and the generation of its slot,
/// so using it against another heap or after the object was deallocated is
/// reported instead of silently resolving to the wrong object.
pub struct ObjHandle<T> {
    pub(crate) heap: u64,
    pub(crate) index: u32,
    pub(crate) generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjHandle<T> {
    pub(crate) const fn new(heap: u64, index: u32, generation: u32) -> Self {
        Self {
            heap,
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index in the heap's object table.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl<T> Clone for ObjHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjHandle<T> {}

impl<T> PartialEq for ObjHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.heap == other.heap && self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for ObjHandle<T> {}

impl<T> fmt::Debug for ObjHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjHandle")
            .field("heap", &self.heap)
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}
