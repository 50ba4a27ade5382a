//! Convenience macros for the DFU project
//!
//! The logging macros forward to `defmt` or `log`, depending on which
//! backend feature is enabled. Format strings must stay within the subset
//! both understand: `{}` for integers and strings, `{:?}` for types
//! deriving both `Debug` and `defmt::Format`.
#![macro_use]

macro_rules! dfu_log {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::$level!($($arg)*);
        #[cfg(feature = "log")]
        log::$level!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = core::format_args!($($arg)*);
    }};
}

macro_rules! dfu_trace {
    ($($arg:tt)*) => { dfu_log!(trace, $($arg)*) };
}

macro_rules! dfu_info {
    ($($arg:tt)*) => { dfu_log!(info, $($arg)*) };
}

macro_rules! dfu_warn {
    ($($arg:tt)*) => { dfu_log!(warn, $($arg)*) };
}

macro_rules! dfu_error {
    ($($arg:tt)*) => { dfu_log!(error, $($arg)*) };
}
