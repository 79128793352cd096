//! Tunables for [`HdrHeap`](crate::HdrHeap).
//!
//! Defaults match the proxy's header heaps: 2 KiB string segments and a
//! 1 KiB allowance of abandoned string bytes before a forced coalesce.
//!
//! ```
//! use hdrheap::{HeapConfig, OverflowPolicy};
//!
//! let config = HeapConfig::default()
//!     .with_str_heap_size(4096)
//!     .with_overflow_policy(OverflowPolicy::Chain);
//!
//! assert_eq!(config.str_heap_size, 4096);
//! ```

use std::fmt;
use std::str::FromStr;

/// Default capacity of the first string segment.
pub const DEFAULT_STR_HEAP_SIZE: usize = 2048;

/// Abandoned copied-string bytes tolerated before the next string
/// allocation forces a coalesce.
pub const DEFAULT_MAX_LOST_STR_SPACE: usize = 1024;

/// Environment variable overriding [`HeapConfig::str_heap_size`].
pub const ENV_STR_HEAP_SIZE: &str = "HDRHEAP_STR_HEAP_SIZE";
/// Environment variable overriding [`HeapConfig::max_lost_string_space`].
pub const ENV_MAX_LOST_SPACE: &str = "HDRHEAP_MAX_LOST_SPACE";
/// Environment variable overriding [`HeapConfig::overflow_policy`].
pub const ENV_OVERFLOW: &str = "HDRHEAP_OVERFLOW";

/// What a string allocation does once every read-only slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverflowPolicy {
    /// Evacuate all live strings into one fresh segment.
    #[default]
    Coalesce,
    /// Link another set of segments after the full one.
    Chain,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Coalesce => f.write_str("coalesce"),
            OverflowPolicy::Chain => f.write_str("chain"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coalesce" => Ok(OverflowPolicy::Coalesce),
            "chain" => Ok(OverflowPolicy::Chain),
            other => Err(format!("unknown overflow policy: {other}")),
        }
    }
}

/// Configuration shared by every heap created from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Capacity of the first string segment. Later segments double.
    pub str_heap_size: usize,
    /// Lost string space that triggers a coalesce on the next allocation.
    pub max_lost_string_space: usize,
    /// Behaviour once the read-only slots are exhausted.
    pub overflow_policy: OverflowPolicy,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            str_heap_size: DEFAULT_STR_HEAP_SIZE,
            max_lost_string_space: DEFAULT_MAX_LOST_STR_SPACE,
            overflow_policy: OverflowPolicy::Coalesce,
        }
    }
}

impl HeapConfig {
    /// Sets the first string segment's capacity (at least one byte).
    #[must_use]
    pub const fn with_str_heap_size(mut self, size: usize) -> Self {
        self.str_heap_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the lost-space threshold.
    #[must_use]
    pub const fn with_max_lost_string_space(mut self, bytes: usize) -> Self {
        self.max_lost_string_space = bytes;
        self
    }

    /// Sets the overflow policy.
    #[must_use]
    pub const fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Returns the defaults overridden by any `HDRHEAP_*` variables that are
    /// set. Unparsable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_STR_HEAP_SIZE) {
            match raw.trim().parse::<usize>() {
                Ok(size) => self = self.with_str_heap_size(size),
                Err(_) => hdrheap_log::warn!("ignoring {ENV_STR_HEAP_SIZE}={raw:?}"),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_LOST_SPACE) {
            match raw.trim().parse::<usize>() {
                Ok(bytes) => self.max_lost_string_space = bytes,
                Err(_) => hdrheap_log::warn!("ignoring {ENV_MAX_LOST_SPACE}={raw:?}"),
            }
        }
        if let Some(raw) = lookup(ENV_OVERFLOW) {
            match raw.parse::<OverflowPolicy>() {
                Ok(policy) => self.overflow_policy = policy,
                Err(err) => hdrheap_log::warn!("ignoring {ENV_OVERFLOW}: {err}"),
            }
        }
        self
    }
}
