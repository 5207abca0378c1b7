//! Kernel logging (`klog`).
//!
//! Profile-aware logging macros shared by every kernel sub-crate. The crate
//! has no dependency on any driver: output goes to a sink that the boot path
//! registers once with [`set_sink`] (serial port, VGA console, ring buffer).
//! Until a sink is registered every message is discarded.
//!
//! # Hardening Profile Integration
//!
//! Log filtering is **runtime** and derived from the active hardening profile:
//!
//! - **Secure** : no output
//! - **Balanced**: `Error` + `Warn` only
//! - **Performance**: all levels
//!
//! The hot path is a single `Relaxed` atomic load + integer compare.
//!
//! # Examples
//!
//! ```ignore
//! klog::set_sink(serial_print);
//! klog::set_profile(klog::KlogProfile::Balanced);
//! klog!(Warn, "fd {}: inbound queue full, refusing {} bytes", fd, len);
//! ```

#![no_std]

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};
use spin::Once;

// ============================================================================
// Log Levels
// ============================================================================

/// Severity level for [`klog!`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Extremely verbose tracing (compiled out in release).
    Trace = 0,
    /// Developer-oriented debug information (compiled out in release).
    Debug = 1,
    /// Normal operational information.
    Info = 2,
    /// Potential problems that merit attention.
    Warn = 3,
    /// Errors that affect correctness.
    Error = 4,
}

impl Level {
    /// Short tag printed in front of every message.
    pub const fn tag(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

// ============================================================================
// Profile Filter
// ============================================================================

/// Sentinel: all output suppressed.
const LEVEL_DISABLED: u8 = u8::MAX;

/// Runtime minimum level. Initialised to DISABLED until [`set_profile`].
static LOG_MIN_LEVEL: AtomicU8 = AtomicU8::new(LEVEL_DISABLED);

/// Hardening profile identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KlogProfile {
    /// Maximum security, no klog output.
    Secure = 0,
    /// Balanced: errors and warnings only.
    Balanced = 1,
    /// Performance/debug: all levels.
    Performance = 2,
}

/// Set the klog filter from a profile.
///
/// Safe to call again if the profile changes at runtime.
#[inline]
pub fn set_profile(profile: KlogProfile) {
    let min = match profile {
        KlogProfile::Secure => LEVEL_DISABLED,
        KlogProfile::Balanced => Level::Warn as u8,
        KlogProfile::Performance => Level::Trace as u8,
    };
    LOG_MIN_LEVEL.store(min, Ordering::Release);
}

/// Disable all klog output.
#[inline]
pub fn disable() {
    LOG_MIN_LEVEL.store(LEVEL_DISABLED, Ordering::Release);
}

/// Returns `true` if a message at `level` would currently be emitted.
#[inline(always)]
pub fn enabled(level: Level) -> bool {
    level as u8 >= LOG_MIN_LEVEL.load(Ordering::Relaxed)
}

// ============================================================================
// Sink
// ============================================================================

/// Output routine installed by the boot path.
pub type Sink = fn(Level, fmt::Arguments);

static SINK: Once<Sink> = Once::new();

/// Register the output sink.
///
/// Only the first registration takes effect.
pub fn set_sink(sink: Sink) {
    SINK.call_once(|| sink);
}

#[doc(hidden)]
#[inline]
pub fn _klog_print(level: Level, args: fmt::Arguments) {
    if let Some(sink) = SINK.get() {
        sink(level, args);
    }
}

// ============================================================================
// Macros
// ============================================================================

/// Profile-aware kernel logging.
///
/// `Debug` and `Trace` levels are additionally compiled out in release builds.
///
/// ```ignore
/// klog!(Error, "fd {}: connection reset by peer", fd);
/// klog!(Debug, "fd {}: state {:?} -> {:?}", fd, old, new);
/// ```
#[macro_export]
macro_rules! klog {
    (Error, $($arg:tt)+) => {
        $crate::klog!(@emit $crate::Level::Error, $($arg)+)
    };
    (Warn, $($arg:tt)+) => {
        $crate::klog!(@emit $crate::Level::Warn, $($arg)+)
    };
    (Info, $($arg:tt)+) => {
        $crate::klog!(@emit $crate::Level::Info, $($arg)+)
    };
    (Debug, $($arg:tt)+) => {{
        #[cfg(debug_assertions)]
        $crate::klog!(@emit $crate::Level::Debug, $($arg)+);
    }};
    (Trace, $($arg:tt)+) => {{
        #[cfg(debug_assertions)]
        $crate::klog!(@emit $crate::Level::Trace, $($arg)+);
    }};
    (@emit $level:expr, $($arg:tt)+) => {{
        if $crate::enabled($level) {
            $crate::_klog_print($level, format_args!($($arg)+));
        }
    }};
}
