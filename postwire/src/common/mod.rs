//! Supporting utility type.
mod bytestr;
pub use bytestr::ByteStr;

/// Trace when `verbose` feature enabled.
macro_rules! verbose {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        tracing::trace!($($tt)*)
    };
}

/// Create and enter `Span` when `verbose` feature enabled.
macro_rules! span {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        let s = tracing::trace_span!($($tt)*);
        #[cfg(feature = "verbose")]
        let _s = s.enter();
    };
}

/// Debug log when `log` feature enabled.
macro_rules! debug {
    ($($tt:tt)*) => {{
        #[cfg(feature = "log")]
        log::debug!($($tt)*);
        #[cfg(not(feature = "log"))]
        let _ = format_args!($($tt)*);
    }};
}

/// Warning log when `log` feature enabled.
macro_rules! warning {
    ($($tt:tt)*) => {{
        #[cfg(feature = "log")]
        log::warn!($($tt)*);
        #[cfg(not(feature = "log"))]
        let _ = format_args!($($tt)*);
    }};
}

pub(crate) use verbose;
pub(crate) use span;
pub(crate) use debug;
pub(crate) use warning;
