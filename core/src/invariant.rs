//! Fatal invariant checks
//!
//! These are for programming errors and broken host contracts only. A failed
//! check logs one FATAL line and aborts the process without unwinding.
//! Recoverable OS failures go through [`crate::translate`] instead.

/// Host-side view of the most recent boundary call
pub trait HostStatus {
    /// Description of a failure the host has pending, if any
    fn pending_failure(&self) -> Option<String>;
}

/// Report a failed plain invariant and abort
#[cold]
pub fn fail(expr: &str, file: &str, line: u32) -> ! {
    crate::logging::fatal(format_args!("{}: {}: Assertion failed: {}", file, line, expr));
    std::process::abort()
}

/// Report a failed host-call invariant and abort.
///
/// If the host has a failure pending, its description is written to stderr
/// after the FATAL line so the root cause is not lost.
#[cold]
pub fn host_fail(host: &dyn HostStatus, expr: &str, file: &str, line: u32) -> ! {
    let Some(pending) = host.pending_failure() else {
        fail(expr, file, line)
    };

    crate::logging::fatal(format_args!(
        "{}: {}: Assertion failed: {} (host failure details sent to stderr)",
        file, line, expr
    ));
    eprintln!("{}", pending);
    std::process::abort()
}

/// Abort the process if `cond` is false
#[macro_export]
macro_rules! invariant {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::invariant::fail(stringify!($cond), file!(), line!())
        }
    };
}

/// Abort the process if `cond` is false, reporting any failure pending in `host`
#[macro_export]
macro_rules! host_invariant {
    ($host:expr, $cond:expr $(,)?) => {
        if !$cond {
            $crate::invariant::host_fail($host, stringify!($cond), file!(), line!())
        }
    };
}
