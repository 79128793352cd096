//! A small leveled logger for the `hdrheap` workspace.
//!
//! Records go to stderr as `[LEVEL] module::path: message`. The minimum level
//! is a process-wide atomic, so checking whether a record is enabled costs a
//! single relaxed load. Heap internals log segment growth at `trace`,
//! demotion and coalescing at `debug`, and fatal allocation failures at
//! `error`.
//!
//! # Example
//!
//! ```
//! use hdrheap_log::{debug, info, Level};
//!
//! hdrheap_log::set_level(Level::Debug);
//!
//! let segments = 3;
//! info!("heap has {} string segments", segments);
//! debug!("segment sizes: {:?}", [2048, 4096, 8192]);
//! ```
//!
//! # Environment
//!
//! - `HDRHEAP_LOG` selects the level when [`init_from_env`] is called
//!   (`error`, `warn`, `info`, `debug`, `trace` or `off`).
//! - `NO_COLOR` disables ANSI colours.

use std::fmt::{self, Arguments};
use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Name of the environment variable read by [`init_from_env`].
pub const LOG_ENV: &str = "HDRHEAP_LOG";

/// Severity of a log record, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Unrecoverable failures.
    Error = 0,
    /// Suspicious but recoverable situations.
    Warn = 1,
    /// Coarse progress information.
    Info = 2,
    /// Heap maintenance events (demotion, chaining, coalescing).
    Debug = 3,
    /// Per-segment detail.
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Upper-case name used in the record prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Level::Error),
            1 => Some(Level::Warn),
            2 => Some(Level::Info),
            3 => Some(Level::Debug),
            4 => Some(Level::Trace),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError {
    input: String,
}

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {:?}", self.input)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    /// Parses a level name, ignoring case.
    ///
    /// ```
    /// use hdrheap_log::Level;
    ///
    /// assert_eq!("debug".parse::<Level>(), Ok(Level::Debug));
    /// assert!("loud".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Level::Error),
            "warn" | "warning" => Ok(Level::Warn),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            "trace" => Ok(Level::Trace),
            _ => Err(ParseLevelError {
                input: s.to_string(),
            }),
        }
    }
}

/// Sentinel stored in the level atomic when logging is switched off.
const OFF: u8 = u8::MAX;

/// Process-wide logger state.
pub struct Logger {
    level: AtomicU8,
    color: AtomicBool,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            color: AtomicBool::new(true),
        }
    }

    /// Sets the minimum level that will be written.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// Suppresses every record, including errors.
    pub fn disable(&self) {
        self.level.store(OFF, Ordering::Relaxed);
    }

    /// Returns the current minimum level, or `None` when disabled.
    pub fn level(&self) -> Option<Level> {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Returns `true` if a record at `level` would be written.
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        let current = self.level.load(Ordering::Relaxed);
        current != OFF && level as u8 <= current
    }

    /// Turns ANSI colours on or off.
    pub fn set_color(&self, color: bool) {
        self.color.store(color, Ordering::Relaxed);
    }

    fn write(&self, level: Level, target: &str, args: Arguments) {
        let stderr = std::io::stderr();
        let mut out = stderr.lock();
        // A failed write to stderr has nowhere better to be reported.
        let _ = if self.color.load(Ordering::Relaxed) {
            writeln!(
                out,
                "{}[{}]\x1b[0m {target}: {args}",
                level.color_code(),
                level.as_str()
            )
        } else {
            writeln!(out, "[{}] {target}: {args}", level.as_str())
        };
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the global logger, creating it at `Level::Warn` on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| {
        let logger = Logger::new(Level::Warn);
        if std::env::var_os("NO_COLOR").is_some() {
            logger.set_color(false);
        }
        logger
    })
}

/// Sets the minimum level of the global logger.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Parses `s` and sets it as the global level. `"off"` disables logging.
pub fn set_level_from_str(s: &str) -> Result<(), ParseLevelError> {
    if s.trim().eq_ignore_ascii_case("off") {
        get_logger().disable();
        return Ok(());
    }
    set_level(s.parse()?);
    Ok(())
}

/// Configures the global logger from [`LOG_ENV`].
///
/// Leaves the level untouched when the variable is unset. Returns the
/// parse error for an unrecognised value so the caller can decide whether
/// that is fatal.
pub fn init_from_env() -> Result<(), ParseLevelError> {
    match std::env::var(LOG_ENV) {
        Ok(value) => set_level_from_str(&value),
        Err(_) => Ok(()),
    }
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments) {
    let logger = get_logger();
    if logger.enabled(level) {
        logger.write(level, target, args);
    }
}

/// Logs at an explicit level, tagging the record with the caller's module.
///
/// ```
/// use hdrheap_log::{log, Level};
///
/// log!(level: Level::Info, "evacuated {} bytes", 512);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            let level = $level;
            if $crate::get_logger().enabled(level) {
                $crate::__log_with_target(
                    level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("error".parse::<Level>(), Ok(Level::Error));
        assert_eq!("WARNING".parse::<Level>(), Ok(Level::Warn));
        assert_eq!(" Info ".parse::<Level>(), Ok(Level::Info));
        assert_eq!("trace".parse::<Level>(), Ok(Level::Trace));

        let err = "verbose".parse::<Level>().unwrap_err();
        assert_eq!(err.to_string(), "invalid log level: \"verbose\"");
    }

    #[test]
    fn test_level_round_trips_through_u8() {
        for level in [Level::Error, Level::Warn, Level::Info, Level::Debug, Level::Trace] {
            assert_eq!(Level::from_u8(level as u8), Some(level));
        }
        assert_eq!(Level::from_u8(OFF), None);
    }

    #[test]
    fn test_logger_filtering() {
        let logger = Logger::new(Level::Info);

        assert!(logger.enabled(Level::Error));
        assert!(logger.enabled(Level::Info));
        assert!(!logger.enabled(Level::Debug));

        logger.set_level(Level::Trace);
        assert!(logger.enabled(Level::Trace));

        logger.disable();
        assert!(!logger.enabled(Level::Error));
        assert_eq!(logger.level(), None);
    }

    #[test]
    fn test_local_logger_write_does_not_panic() {
        let logger = Logger::new(Level::Trace);
        logger.set_color(false);
        logger.write(Level::Debug, "hdrheap_log::tests", format_args!("plain {}", 1));
        logger.set_color(true);
        logger.write(Level::Debug, "hdrheap_log::tests", format_args!("colored {}", 2));
    }

    // The global level is shared by every test in this binary, so all
    // assertions against it live in this single test.
    #[test]
    fn test_global_logger() {
        set_level_from_str("debug").unwrap();
        assert_eq!(get_logger().level(), Some(Level::Debug));

        set_level_from_str("off").unwrap();
        assert_eq!(get_logger().level(), None);

        assert!(set_level_from_str("nope").is_err());

        set_level(Level::Warn);
        assert!(std::ptr::eq(get_logger(), get_logger()));

        debug!("suppressed at warn");
        warn!("visible at warn: {}", 42);
    }
}
