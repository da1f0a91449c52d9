//! Feature-gated tracing macros for zero-overhead instrumentation.
//!
//! When the `tracing` feature is enabled, this module re-exports the tracing
//! crate's macros. When disabled, all macros compile to no-ops with zero
//! overhead, so search-loop call sites never pay for logging they do not use.

// When the tracing feature is enabled, re-export from the tracing crate
#[cfg(feature = "tracing")]
pub use tracing::{debug, debug_span, error, info, info_span, span, trace, warn, Level, Span};

// When the tracing feature is disabled, provide no-op implementations
#[cfg(not(feature = "tracing"))]
mod noop {
    /// No-op span that does nothing
    pub struct Span;

    impl Span {
        pub fn none() -> Self {
            Span
        }

        pub fn entered(self) -> SpanGuard {
            SpanGuard
        }

        pub fn enter(&self) -> SpanGuard {
            SpanGuard
        }
    }

    /// No-op guard that implements Drop
    pub struct SpanGuard;

    impl Drop for SpanGuard {
        fn drop(&mut self) {}
    }

    /// Tracing levels (no-op)
    #[derive(Clone, Copy, Debug)]
    pub struct Level;

    impl Level {
        pub const TRACE: Level = Level;
        pub const DEBUG: Level = Level;
        pub const INFO: Level = Level;
        pub const WARN: Level = Level;
        pub const ERROR: Level = Level;
    }

    /// No-op trace macro
    #[macro_export]
    macro_rules! trace {
        ($($tt:tt)*) => {};
    }

    /// No-op debug macro
    #[macro_export]
    macro_rules! debug {
        ($($tt:tt)*) => {};
    }

    /// No-op info macro
    #[macro_export]
    macro_rules! info {
        ($($tt:tt)*) => {};
    }

    /// No-op warn macro
    #[macro_export]
    macro_rules! warn {
        ($($tt:tt)*) => {};
    }

    /// No-op error macro
    #[macro_export]
    macro_rules! error {
        ($($tt:tt)*) => {};
    }

    /// No-op span macro
    #[macro_export]
    macro_rules! span {
        ($($tt:tt)*) => {
            $crate::trace::Span::none()
        };
    }

    /// No-op debug_span macro
    #[macro_export]
    macro_rules! debug_span {
        ($($tt:tt)*) => {
            $crate::trace::Span::none()
        };
    }

    /// No-op info_span macro
    #[macro_export]
    macro_rules! info_span {
        ($($tt:tt)*) => {
            $crate::trace::Span::none()
        };
    }

    // Re-export macros at module level
    pub use crate::{debug, debug_span, error, info, info_span, span, trace, warn};
}

#[cfg(not(feature = "tracing"))]
pub use noop::*;

/// Initialize a tracing subscriber for tests/development.
///
/// Call once at the start of a test or driver when tracing is enabled.
/// Honors `RUST_LOG`, defaulting to `info`.
#[cfg(feature = "tracing")]
pub fn init_subscriber() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_ansi(false),
        )
        .with(filter)
        .try_init()
        .ok(); // Ignore error if already initialized
}

#[cfg(not(feature = "tracing"))]
pub fn init_subscriber() {
    // No-op when tracing is disabled
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_subscriber_is_idempotent() {
        super::init_subscriber();
        super::init_subscriber();
    }

    #[test]
    fn macros_compile_in_statement_position() {
        crate::trace::trace!("tracing a thing");
        crate::trace::debug!(value = 3, "debugging a thing");
        crate::trace::info!("informing about a thing");
    }
}
