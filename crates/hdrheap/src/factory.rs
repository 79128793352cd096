//! Factory for heaps that share one configuration.
//!
//! `HeapFactory` creates heaps (and, with the `mem-arena` feature, byte
//! arenas) on demand. It does not pool or reuse them: each heap lives for
//! one header and is dropped with it.
//!
//! # Examples
//!
//! ```
//! use hdrheap::{HeapConfig, HeapFactory};
//!
//! let factory = HeapFactory::new(HeapConfig::default().with_str_heap_size(512));
//!
//! let request = factory.create_heap();
//! let response = factory.create_heap();
//!
//! assert_ne!(request.id(), response.id());
//! assert_eq!(request.config().str_heap_size, 512);
//! ```
//!
//! # Per-thread factories
//!
//! ```ignore
//! use hdrheap::{HdrHeap, HeapConfig, HeapFactory};
//! use std::thread_local;
//!
//! thread_local! {
//!     static HEAPS: HeapFactory = HeapFactory::new(HeapConfig::from_env());
//! }
//!
//! fn with_scratch_heap<R>(f: impl FnOnce(&mut HdrHeap) -> R) -> R {
//!     HEAPS.with(|factory| f(&mut factory.create_heap()))
//! }
//! ```

use crate::config::HeapConfig;
use crate::heap::HdrHeap;
#[cfg(feature = "mem-arena")]
use crate::mem_arena::MemArena;

/// Creates heaps with a fixed configuration.
///
/// The factory is `Copy` and holds nothing but the configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapFactory {
    config: HeapConfig,
}

impl HeapFactory {
    /// Creates a factory handing `config` to every heap.
    #[must_use]
    pub const fn new(config: HeapConfig) -> Self {
        Self { config }
    }

    /// Factory configured from the `HDRHEAP_*` environment variables. Also
    /// applies `HDRHEAP_LOG` to the global logger.
    #[must_use]
    pub fn from_env() -> Self {
        if let Err(err) = hdrheap_log::init_from_env() {
            hdrheap_log::warn!("ignoring {}: {err}", hdrheap_log::LOG_ENV);
        }
        Self::new(HeapConfig::from_env())
    }

    /// The configuration given to new heaps.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Creates an empty heap. No string segment is allocated until the
    /// heap's first copied string.
    #[must_use]
    pub fn create_heap(&self) -> HdrHeap {
        HdrHeap::with_config(self.config)
    }

    /// Creates an empty byte arena whose first block matches the heap's
    /// string segment size.
    #[cfg(feature = "mem-arena")]
    #[must_use]
    pub fn create_mem_arena(&self) -> MemArena {
        MemArena::new(self.config.str_heap_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;

    #[test]
    fn test_factory_passes_config() {
        let config = HeapConfig::default()
            .with_str_heap_size(128)
            .with_overflow_policy(OverflowPolicy::Chain);
        let factory = HeapFactory::new(config);

        let heap = factory.create_heap();
        assert_eq!(*heap.config(), config);
        assert!(heap.is_writeable());
    }

    #[test]
    fn test_factory_heaps_are_independent() {
        let factory = HeapFactory::default();
        let mut first = factory.create_heap();
        let mut second = factory.create_heap();

        let a = first.duplicate_str(b"first").unwrap();
        let b = second.duplicate_str(b"second").unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.str_bytes(&a), Some(&b"first"[..]));
        assert_eq!(second.str_bytes(&b), Some(&b"second"[..]));
        assert_eq!(first.str_bytes(&b), None);
    }

    #[cfg(feature = "mem-arena")]
    #[test]
    fn test_factory_mem_arena_block_size() {
        let factory = HeapFactory::new(HeapConfig::default().with_str_heap_size(256));
        let mut arena = factory.create_mem_arena();

        arena.alloc(1);
        assert_eq!(arena.extent(), 256);
    }
}
