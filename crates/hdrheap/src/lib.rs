//! Header heap arena for HTTP proxies
//!
//! This crate stores HTTP header objects and their strings with low
//! per-transaction allocation overhead:
//!
//! - **Header heap** ([`HdrHeap`]): object table plus a string sub-heap that
//!   grows by demoting full segments to read-only, chains or coalesces once
//!   the read-only slots run out, and never moves a string except during a
//!   coalesce that rewrites every reference
//! - **Copied and aliased strings** ([`StrRef`]): copies live in the heap and
//!   move with it; aliases point at shared [`bytes::Bytes`] and are never
//!   touched
//! - **Header objects**: URLs and MIME headers (requires `headers` feature)
//! - **Byte arena** ([`MemArena`]): bump allocation with a freeze/thaw
//!   checkpoint (requires `mem-arena` feature)
//!
//! Logging goes through `hdrheap-log`; set `HDRHEAP_LOG=debug` to see
//! demotions and coalesces.

pub mod config;
pub mod error;
pub mod factory;
pub mod heap;
pub mod obj;
pub mod segment;
mod str_heap;

#[cfg(feature = "mem-arena")]
pub mod mem_arena;

#[cfg(feature = "headers")]
pub mod mime;
#[cfg(feature = "headers")]
pub mod url;

pub use config::{HeapConfig, OverflowPolicy};
pub use error::{Error, Result, Violation};
pub use factory::HeapFactory;
pub use heap::{HdrHeap, HeapStats, MAX_STR_LEN};
pub use obj::{HeapObject, HeapStr, ObjHandle, ObjKind, Relocatable, StrRef, StrValue};
pub use segment::{MemSpan, Segment, SegmentId};
pub use str_heap::RONLY_HEAPS;

#[cfg(feature = "mem-arena")]
pub use mem_arena::MemArena;

#[cfg(feature = "headers")]
pub use mime::{MimeField, MimeHdr};
#[cfg(feature = "headers")]
pub use url::{UrlComponent, UrlImpl};
