//! Raw-handle host boundary, driven the way an embedding host would
//!
//! The bridge establishes the process-wide log sink, so every test in this
//! binary shares one bridge.

#![cfg(unix)]

use std::sync::{Mutex, OnceLock};
use subshell_core::logging::{LogSink, Severity, SinkError};
use subshell_core::{HostBridge, HostStatus, ShellError};

#[derive(Default)]
struct RecordingHost {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingHost {
    fn saw(&self, severity: Severity, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|(s, m)| *s == severity && m.contains(needle))
    }
}

impl LogSink for RecordingHost {
    fn deliver(&self, severity: Severity, message: &str) -> Result<(), SinkError> {
        self.messages
            .lock()
            .unwrap()
            .push((severity, message.to_string()));
        Ok(())
    }
}

impl HostStatus for RecordingHost {
    fn pending_failure(&self) -> Option<String> {
        None
    }
}

static BRIDGE: OnceLock<HostBridge<RecordingHost>> = OnceLock::new();

fn bridge() -> &'static HostBridge<RecordingHost> {
    BRIDGE.get_or_init(|| HostBridge::init(RecordingHost::default()).expect("first init"))
}

#[test]
fn test_second_init_is_rejected() {
    bridge();
    let err = HostBridge::init(RecordingHost::default()).err().expect("second init must fail");
    assert!(matches!(err, ShellError::InitializationError(_)));
}

#[test]
fn test_popen_write_close_wait() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("stdin.txt");
    let out_str = out.to_str().unwrap();
    let bridge = bridge();

    let (pid, fd) = bridge
        .popen(&["/bin/sh", "-c", "cat > \"$0\"", out_str])
        .expect("Failed to popen");
    assert!(pid > 0);
    assert!(fd >= 0);

    let buffer = b"xxselect 1;yy";
    bridge.write_bytes(fd, buffer, 2, 9).unwrap();
    bridge.write_byte(fd, b'\n').unwrap();
    bridge.close(fd).unwrap();

    assert_eq!(bridge.wait_pid(pid).unwrap(), 0);
    assert_eq!(std::fs::read(&out).unwrap(), b"select 1;\n");
    assert!(bridge.host().saw(Severity::Debug, "Spawned process"));
}

#[test]
fn test_exec_reports_exit_code_and_sentinel() {
    let bridge = bridge();

    let pid = bridge.exec(&["/bin/sh", "-c", "exit 5"]).unwrap();
    assert_eq!(bridge.wait_pid(pid).unwrap(), 5);

    let pid = bridge.exec(&["/bin/sh", "-c", "kill -KILL $$"]).unwrap();
    assert_eq!(bridge.wait_pid(pid).unwrap(), 1);
}

#[test]
fn test_write_bytes_range_is_checked() {
    let bridge = bridge();
    let (pid, fd) = bridge.popen(&["/bin/sh", "-c", "cat > /dev/null"]).unwrap();

    let err = bridge.write_bytes(fd, b"abc", 2, 2).unwrap_err();
    assert!(matches!(err, ShellError::InvalidArgument(_)));
    assert_eq!(HostBridge::<RecordingHost>::failure(&err).category, "UsageError");

    let err = bridge.write_bytes(fd, b"abc", usize::MAX, 1).unwrap_err();
    assert!(matches!(err, ShellError::InvalidArgument(_)));

    // Empty range at the very end is fine
    bridge.write_bytes(fd, b"abc", 3, 0).unwrap();

    bridge.close(fd).unwrap();
    assert_eq!(bridge.wait_pid(pid).unwrap(), 0);
}

#[test]
fn test_usage_errors() {
    let bridge = bridge();
    let empty: [&str; 0] = [];

    let err = bridge.popen(&empty).unwrap_err();
    assert_eq!(HostBridge::<RecordingHost>::failure(&err).category, "UsageError");
    assert!(matches!(bridge.exec(&empty), Err(ShellError::InvalidCommand(_))));
    assert!(matches!(bridge.close(-1), Err(ShellError::InvalidArgument(_))));
    assert!(matches!(bridge.wait_pid(0), Err(ShellError::InvalidArgument(_))));
}

#[test]
fn test_os_failure_shape_and_logging() {
    let bridge = bridge();
    let (pid, fd) = bridge.popen(&["/bin/sh", "-c", "exit 0"]).unwrap();
    assert_eq!(bridge.wait_pid(pid).unwrap(), 0);

    let err = bridge.write_byte(fd, b'x').unwrap_err();
    let failure = HostBridge::<RecordingHost>::failure(&err);
    assert_eq!(failure.category, "IoError");
    assert_eq!(failure.code, "SHELL003");
    assert!(failure.message.starts_with("write failed: "), "{}", failure.message);
    assert!(bridge.host().saw(Severity::Debug, "write failed (SHELL003)"));

    bridge.close(fd).unwrap();
}

#[test]
fn test_screen_width_is_positive_or_unavailable() {
    let width = bridge().screen_width();
    assert!(width == -1 || width > 0, "unexpected width {}", width);
}
