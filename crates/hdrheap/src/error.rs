//! Error types for the header heap.
//!
//! The heap knows two kinds of failure. Running out of memory while creating
//! a segment is fatal at every growth site (see [`fatal`]); it only surfaces
//! as a value from constructors that are explicitly fallible. Everything
//! else is a caller bug reported as an [`Error::InvariantViolation`].

use thiserror::Error;

/// Errors produced by the header heap.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The system allocator could not provide a segment of `size` bytes.
    #[error("failed to allocate a {size} byte segment")]
    AllocationFailure {
        /// Requested segment capacity.
        size: usize,
    },

    /// A caller broke one of the heap's usage contracts.
    #[error("heap invariant violated: {0}")]
    InvariantViolation(#[from] Violation),
}

/// The specific contract that was broken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// An object handle minted by a different heap.
    #[error("object handle belongs to heap {handle_heap}, not heap {heap}")]
    ForeignHandle {
        /// Heap that was asked to resolve the handle.
        heap: u64,
        /// Heap recorded in the handle.
        handle_heap: u64,
    },

    /// The handle's slot was deallocated (and possibly reused).
    #[error("object handle {index} is stale")]
    StaleHandle {
        /// Slot index carried by the handle.
        index: u32,
    },

    /// The slot holds an object of a different type than the handle.
    #[error("object {index} is not a {expected}")]
    WrongKind {
        /// Slot index carried by the handle.
        index: u32,
        /// Type name the handle expected.
        expected: &'static str,
    },

    /// A copied string points at a segment this heap no longer holds.
    #[error("string of {len} bytes at offset {offset} in segment {segment} is not in this heap")]
    DanglingString {
        /// Segment id recorded in the reference.
        segment: u64,
        /// Offset inside the segment.
        offset: u32,
        /// Length of the string.
        len: u32,
    },

    /// Mutation of a heap that was made read-only.
    #[error("heap is read-only")]
    ReadOnlyHeap,

    /// A single request larger than one segment can address.
    #[error("allocation of {requested} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Requested size.
        requested: usize,
        /// Largest size the heap accepts.
        max: usize,
    },

    /// Live strings did not fit the segment sized for them during a
    /// coalesce. Indicates objects whose string visitors disagree.
    #[error("evacuation needs {required} bytes but the new segment holds {capacity}")]
    EvacuationOverflow {
        /// Live bytes counted before evacuation.
        required: usize,
        /// Capacity of the evacuation target.
        capacity: usize,
    },

    /// A header field name was empty.
    #[error("field name must not be empty")]
    EmptyFieldName,
}

/// Result type for header heap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Logs `err` and aborts the process.
///
/// Segment allocation failure has no degraded mode: a heap that cannot grow
/// cannot keep its pointer-stability promise, so growth sites end here.
#[cold]
pub(crate) fn fatal(err: Error) -> ! {
    hdrheap_log::error!("{err}; aborting");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::AllocationFailure { size: 4096 }.to_string(),
            "failed to allocate a 4096 byte segment"
        );
        assert_eq!(
            Error::from(Violation::StaleHandle { index: 7 }).to_string(),
            "heap invariant violated: object handle 7 is stale"
        );
    }

    #[test]
    fn test_violation_converts_into_error() {
        let err: Error = Violation::ReadOnlyHeap.into();
        assert_eq!(err, Error::InvariantViolation(Violation::ReadOnlyHeap));
        assert_ne!(err, Error::AllocationFailure { size: 0 });
    }
}
