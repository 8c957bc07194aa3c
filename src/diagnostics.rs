//! Feature-gated diagnostic logging.
//!
//! These macros compile away entirely unless the `diagnostics` feature is
//! enabled, so the core pays zero runtime cost for logging by default.

#[macro_export]
#[cfg(feature = "diagnostics")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        eprintln!("[embercache] {}", format!($($arg)*));
    };
}

#[macro_export]
#[cfg(not(feature = "diagnostics"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

#[macro_export]
#[cfg(feature = "diagnostics")]
macro_rules! trace_warn {
    ($($arg:tt)*) => {
        eprintln!("[embercache:warn] {}", format!($($arg)*));
    };
}

#[macro_export]
#[cfg(not(feature = "diagnostics"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}

#[macro_export]
#[cfg(feature = "diagnostics")]
macro_rules! trace_error {
    ($($arg:tt)*) => {
        eprintln!("[embercache:error] {}", format!($($arg)*));
    };
}

#[macro_export]
#[cfg(not(feature = "diagnostics"))]
macro_rules! trace_error {
    ($($arg:tt)*) => {};
}
