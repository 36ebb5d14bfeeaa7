//! Internal logging macros for lifecycle events of this crate.
//!
//! These cover startup and resolution outcomes and prober thread
//! breadcrumbs. They are deliberately *not* used on the gate's failure
//! path or for per-probe notices; those go through
//! [`DiagnosticsSink`](crate::diag::DiagnosticsSink), which cannot re-enter
//! a structured pipeline.
//!
//! Every call takes an event `name` plus optional `key = value`
//! attributes. With the `internal-logs` feature (default) the four
//! per-level macros all funnel into one `tracing` event keyed by `name`;
//! without it, test builds print the event to stdout (visible with
//! `--nocapture`) and release builds compile it away.

/// Dispatch arm shared by the per-level macros. Not public API.
#[doc(hidden)]
#[macro_export]
macro_rules! guard_log {
    ($level:expr, $label:literal, name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::event!(
                name: $name,
                target: env!("CARGO_PKG_NAME"),
                $level,
                name = $name
                $(, $key = $value)*
            );
        }

        #[cfg(all(test, not(feature = "internal-logs")))]
        {
            print!("guard_{}: name={}", $label, $name);
            $(print!(", {}={}", stringify!($key), $value);)*
            println!();
        }

        #[cfg(all(not(test), not(feature = "internal-logs")))]
        {
            let _ = $name;
            $(let _ = $value;)*
        }
    }};
}

/// Logs a debug-level lifecycle event.
#[macro_export]
macro_rules! guard_debug {
    (name: $($event:tt)+) => {
        $crate::guard_log!($crate::_private::Level::DEBUG, "debug", name: $($event)+)
    };
}

/// Logs an informational lifecycle event.
#[macro_export]
macro_rules! guard_info {
    (name: $($event:tt)+) => {
        $crate::guard_log!($crate::_private::Level::INFO, "info", name: $($event)+)
    };
}

/// Logs a warning-level lifecycle event.
#[macro_export]
macro_rules! guard_warn {
    (name: $($event:tt)+) => {
        $crate::guard_log!($crate::_private::Level::WARN, "warn", name: $($event)+)
    };
}

/// Logs an error-level lifecycle event.
#[macro_export]
macro_rules! guard_error {
    (name: $($event:tt)+) => {
        $crate::guard_log!($crate::_private::Level::ERROR, "error", name: $($event)+)
    };
}
