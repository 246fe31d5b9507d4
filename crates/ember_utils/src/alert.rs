//! Non-fatal assertion macros.
//!
//! Unlike `assert!`, these log and hand the condition back to the caller so
//! recoverable paths can branch on it:
//!
//! ```
//! # use ember_utils::alert_if;
//! # fn parse(byte_count: usize) {
//! if alert_if!(byte_count == 0, "refusing to parse an empty package") {
//!     return;
//! }
//! # }
//! ```

/// Evaluate `cond`; when true, log the message as an error. Evaluates to the
/// condition value either way.
#[macro_export]
macro_rules! alert_if {
    ($cond:expr, $($msg:tt)+) => {{
        let condition = $cond;
        if condition {
            $crate::tracing::error!($($msg)+);
        }
        condition
    }};
}

/// Evaluate `cond`; when false, log the message as an error. Evaluates to the
/// condition value either way.
#[macro_export]
macro_rules! alert_if_not {
    ($cond:expr, $($msg:tt)+) => {{
        let condition = $cond;
        if !condition {
            $crate::tracing::error!($($msg)+);
        }
        condition
    }};
}
