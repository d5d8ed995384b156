//! Diagnostic logging with a non-recursive stderr fallback
//!
//! Messages are delivered to a process-wide primary sink that the host
//! establishes once with [`init`]. Until then every message goes straight to
//! stderr, untagged. Once a sink exists, a failed delivery (error, panic, or a
//! message that could not be formatted) falls back to a tagged stderr line,
//! and FATAL messages always get that stderr line as well. A message logged
//! while the sink is already delivering on the same thread skips the sink and
//! takes the tagged stderr line.
//!
//! Nothing in this module may call into the invariant checker: the checker
//! logs through here, and a failing sink must not loop back into it.

use crate::{Result, ShellError};
use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use thiserror::Error;

/// Format of the timestamp on fallback lines (millisecond field is fixed)
pub const FALLBACK_TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S:000";

static PRIMARY_SINK: OnceLock<Box<dyn LogSink>> = OnceLock::new();

thread_local! {
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// Message severity, used for routing only (nothing is filtered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Name of the delivery method on the primary sink
    pub fn method_name(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    /// Fixed-width tag printed on fallback lines
    pub fn tag(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO ",
            Severity::Warn => "WARN ",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag().trim_end())
    }
}

/// Primary sink failure; never surfaced, only triggers the fallback
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("log sink unavailable: {0}")]
pub struct SinkError(pub String);

/// Destination for formatted diagnostic messages
pub trait LogSink: Send + Sync {
    /// Deliver one formatted message at the given severity.
    ///
    /// Hosts that dispatch by method name resolve [`Severity::method_name`].
    fn deliver(&self, severity: Severity, message: &str) -> std::result::Result<(), SinkError>;
}

/// Sink that forwards every message to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn deliver(&self, severity: Severity, message: &str) -> std::result::Result<(), SinkError> {
        match severity {
            Severity::Debug => tracing::debug!("{}", message),
            Severity::Info => tracing::info!("{}", message),
            Severity::Warn => tracing::warn!("{}", message),
            Severity::Error => tracing::error!("{}", message),
            Severity::Fatal => tracing::error!(fatal = true, "{}", message),
        }
        Ok(())
    }
}

/// Sink that writes the tagged fallback line for every message
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn deliver(&self, severity: Severity, message: &str) -> std::result::Result<(), SinkError> {
        let mut err = io::stderr().lock();
        write_tagged(&mut err, severity, message).map_err(|e| SinkError(e.to_string()))
    }
}

/// Establish the process-wide primary sink. May only succeed once.
pub fn init(sink: Box<dyn LogSink>) -> Result<()> {
    PRIMARY_SINK
        .set(sink)
        .map_err(|_| ShellError::InitializationError("primary log sink already established".to_string()))
}

/// Whether [`init`] has run
pub fn is_initialized() -> bool {
    PRIMARY_SINK.get().is_some()
}

/// Log a message at the given severity
pub fn log(severity: Severity, args: fmt::Arguments<'_>) {
    let sink = PRIMARY_SINK.get().map(|s| s.as_ref());
    route(sink, severity, args, &mut LazyStderr::default());
}

/// Stderr that is locked on first write, so a sink never runs under the lock
#[derive(Default)]
struct LazyStderr(Option<io::StderrLock<'static>>);

impl Write for LazyStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.get_or_insert_with(|| io::stderr().lock()).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.0 {
            Some(lock) => lock.flush(),
            None => Ok(()),
        }
    }
}

/// Log a debugging message
pub fn debug(args: fmt::Arguments<'_>) {
    log(Severity::Debug, args)
}

/// Log an informational message
pub fn info(args: fmt::Arguments<'_>) {
    log(Severity::Info, args)
}

/// Log a warning
pub fn warn(args: fmt::Arguments<'_>) {
    log(Severity::Warn, args)
}

/// Log an error
pub fn error(args: fmt::Arguments<'_>) {
    log(Severity::Error, args)
}

/// Log a fatal message; it always reaches stderr
pub fn fatal(args: fmt::Arguments<'_>) {
    log(Severity::Fatal, args)
}

/// Outcome of a single routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// No sink yet: raw message written to the fallback stream
    Uninitialized,
    /// Sink accepted the message
    Primary,
    /// Sink accepted the message and a fatal copy went to the fallback stream
    PrimaryAndFallback,
    /// Sink failed: tagged line written to the fallback stream
    Fallback,
}

/// Routing policy, with the fallback stream injected.
///
/// Write errors on `fallback` are ignored: there is nowhere left to report them.
pub(crate) fn route<W: Write>(
    sink: Option<&dyn LogSink>,
    severity: Severity,
    args: fmt::Arguments<'_>,
    fallback: &mut W,
) -> Delivery {
    let mut message = String::new();
    let formatted = message.write_fmt(args).is_ok();

    let Some(sink) = sink else {
        let _ = writeln!(fallback, "{}", message);
        return Delivery::Uninitialized;
    };

    let delivered = formatted && deliver_once(sink, severity, &message);

    if !delivered {
        let _ = write_tagged(fallback, severity, &message);
        Delivery::Fallback
    } else if severity == Severity::Fatal {
        let _ = write_tagged(fallback, severity, &message);
        Delivery::PrimaryAndFallback
    } else {
        Delivery::Primary
    }
}

/// Hand `message` to the sink unless this thread is already inside it
fn deliver_once(sink: &dyn LogSink, severity: Severity, message: &str) -> bool {
    if DELIVERING.with(Cell::get) {
        return false;
    }
    let _guard = DeliveringGuard::enter();
    matches!(
        panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(severity, message))),
        Ok(Ok(()))
    )
}

struct DeliveringGuard;

impl DeliveringGuard {
    fn enter() -> Self {
        DELIVERING.with(|d| d.set(true));
        DeliveringGuard
    }
}

impl Drop for DeliveringGuard {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(false));
    }
}

fn write_tagged<W: Write>(out: &mut W, severity: Severity, message: &str) -> io::Result<()> {
    let stamp = chrono::Local::now().format(FALLBACK_TIMESTAMP_FORMAT);
    writeln!(out, "{} {} {}", severity.tag(), stamp, message.trim_end_matches('\n'))
}

/// Log at DEBUG with a format template
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::debug(format_args!($($arg)*))
    };
}

/// Log at INFO with a format template
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::info(format_args!($($arg)*))
    };
}

/// Log at WARN with a format template
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::warn(format_args!($($arg)*))
    };
}

/// Log at ERROR with a format template
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::error(format_args!($($arg)*))
    };
}

/// Log at FATAL with a format template
#[macro_export]
macro_rules! log_fatal {
    ($($arg:tt)*) => {
        $crate::logging::fatal(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(Severity, String)>>,
    }

    impl LogSink for RecordingSink {
        fn deliver(&self, severity: Severity, message: &str) -> std::result::Result<(), SinkError> {
            self.seen.lock().unwrap().push((severity, message.to_string()));
            Ok(())
        }
    }

    struct FailingSink;

    impl LogSink for FailingSink {
        fn deliver(&self, _: Severity, _: &str) -> std::result::Result<(), SinkError> {
            Err(SinkError("method lookup failed".to_string()))
        }
    }

    struct PanickingSink;

    impl LogSink for PanickingSink {
        fn deliver(&self, _: Severity, _: &str) -> std::result::Result<(), SinkError> {
            panic!("sink exploded");
        }
    }

    /// Logs about every message it receives, from inside `deliver`
    #[derive(Default)]
    struct ChattySink {
        delivered: Mutex<Vec<String>>,
        nested: Mutex<Vec<u8>>,
    }

    impl LogSink for ChattySink {
        fn deliver(&self, _: Severity, message: &str) -> std::result::Result<(), SinkError> {
            self.delivered.lock().unwrap().push(message.to_string());
            let mut nested = self.nested.lock().unwrap();
            let d = route(
                Some(self),
                Severity::Debug,
                format_args!("sink saw '{}'", message),
                &mut *nested,
            );
            assert_eq!(d, Delivery::Fallback);
            Ok(())
        }
    }

    struct BrokenDisplay;

    impl fmt::Display for BrokenDisplay {
        fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_uninitialized_writes_raw_message() {
        let mut out = Vec::new();
        let d = route(None, Severity::Warn, format_args!("disk {} full", 3), &mut out);
        assert_eq!(d, Delivery::Uninitialized);
        assert_eq!(text(out), "disk 3 full\n");
    }

    #[test]
    fn test_primary_delivery_uses_severity() {
        let sink = RecordingSink::default();
        let mut out = Vec::new();
        let d = route(Some(&sink), Severity::Info, format_args!("spawned {}", 42), &mut out);
        assert_eq!(d, Delivery::Primary);
        assert!(out.is_empty());
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(Severity::Info, "spawned 42".to_string())]);
    }

    #[test]
    fn test_fatal_goes_to_both() {
        let sink = RecordingSink::default();
        let mut out = Vec::new();
        let d = route(Some(&sink), Severity::Fatal, format_args!("boom"), &mut out);
        assert_eq!(d, Delivery::PrimaryAndFallback);
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
        let line = text(out);
        assert!(line.starts_with("FATAL "));
        assert!(line.ends_with(" boom\n"));
        assert_eq!(line.matches("boom").count(), 1);
    }

    #[test]
    fn test_failing_sink_degrades_to_tagged_line() {
        let mut out = Vec::new();
        let d = route(Some(&FailingSink), Severity::Warn, format_args!("careful"), &mut out);
        assert_eq!(d, Delivery::Fallback);
        assert!(text(out).starts_with("WARN  "));
    }

    #[test]
    fn test_failing_sink_fatal_emitted_once() {
        let mut out = Vec::new();
        route(Some(&FailingSink), Severity::Fatal, format_args!("dying"), &mut out);
        assert_eq!(text(out).matches("dying").count(), 1);
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        let mut out = Vec::new();
        let d = route(Some(&PanickingSink), Severity::Error, format_args!("oops"), &mut out);
        assert_eq!(d, Delivery::Fallback);
        assert!(text(out).starts_with("ERROR "));
    }

    #[test]
    fn test_unformattable_message_falls_back() {
        let sink = RecordingSink::default();
        let mut out = Vec::new();
        let d = route(Some(&sink), Severity::Debug, format_args!("x{}", BrokenDisplay), &mut out);
        assert_eq!(d, Delivery::Fallback);
        assert!(sink.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reentrant_sink_is_not_called_again() {
        let sink = ChattySink::default();
        let mut out = Vec::new();
        let d = route(Some(&sink), Severity::Info, format_args!("hello"), &mut out);

        assert_eq!(d, Delivery::Primary);
        assert!(out.is_empty());
        assert_eq!(sink.delivered.lock().unwrap().as_slice(), &["hello".to_string()]);
        let nested = text(sink.nested.lock().unwrap().clone());
        assert!(nested.starts_with("DEBUG "), "{}", nested);
        assert!(nested.ends_with(" sink saw 'hello'\n"), "{}", nested);
    }

    #[test]
    fn test_sink_usable_again_after_reentry() {
        let sink = ChattySink::default();
        route(Some(&sink), Severity::Info, format_args!("one"), &mut Vec::new());
        route(Some(&sink), Severity::Warn, format_args!("two"), &mut Vec::new());
        assert_eq!(sink.delivered.lock().unwrap().len(), 2);
        assert!(!DELIVERING.with(Cell::get));
    }

    #[test]
    fn test_panicking_sink_clears_delivering_flag() {
        route(Some(&PanickingSink), Severity::Error, format_args!("x"), &mut Vec::new());
        let sink = RecordingSink::default();
        let d = route(Some(&sink), Severity::Info, format_args!("after"), &mut Vec::new());
        assert_eq!(d, Delivery::Primary);
    }

    #[test]
    fn test_lazy_stderr_locks_only_on_write() {
        let mut err = LazyStderr::default();
        err.flush().unwrap();
        assert!(err.0.is_none());
        assert_eq!(err.write(b"").unwrap(), 0);
        assert!(err.0.is_some());
    }

    #[test]
    fn test_fallback_timestamp_shape() {
        let mut out = Vec::new();
        write_tagged(&mut out, Severity::Info, "hello").unwrap();
        let line = text(out);
        // "INFO  YYYY.MM.DD HH:MM:SS:000 hello"
        let stamp = &line[6..29];
        assert_eq!(stamp.len(), 23);
        assert_eq!(&stamp[4..5], ".");
        assert_eq!(&stamp[7..8], ".");
        assert!(stamp.ends_with(":000"));
        assert_eq!(&line[29..], " hello\n");
    }

    #[test]
    fn test_severity_ordering_and_names() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Error < Severity::Fatal);
        assert_eq!(Severity::Warn.method_name(), "warn");
        assert_eq!(Severity::Info.tag().len(), 5);
        assert_eq!(Severity::Info.to_string(), "INFO");
    }
}
