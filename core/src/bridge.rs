//! Raw-handle boundary for an embedding host
//!
//! A host that cannot hold Rust values (an interpreter, a VM, a C caller)
//! deals in plain 64-bit handle values. [`HostBridge`] accepts and returns
//! those values and reports failures as [`HostFailure`]s the host can turn
//! into its own typed errors.
//!
//! Because raw values can be copied freely, a host can hand back a handle it
//! already closed or reaped. The bridge does not track handles: the stale
//! value reaches the operating system, which rejects it, and that rejection
//! is returned like any other OS failure.

use crate::invariant::HostStatus;
use crate::logging::{self, LogSink, Severity, SinkError};
use crate::process::{self, Command, PipeHandle, ProcessHandle, RawHandle};
use crate::{host_invariant, log_debug, Result, ShellError};
use std::sync::Arc;

/// Value returned by [`HostBridge::screen_width`] when the width is unknown
pub const WIDTH_NOT_AVAILABLE: i32 = -1;

/// The runtime context a host binds at initialization
pub trait Host: LogSink + HostStatus + Send + Sync {}

impl<T: LogSink + HostStatus + Send + Sync> Host for T {}

/// A failure in the shape the host presents to its own callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    /// Host-recognised error class name
    pub category: &'static str,
    /// Stable error code (`SHELLnnn`)
    pub code: &'static str,
    pub message: String,
}

impl From<&ShellError> for HostFailure {
    fn from(err: &ShellError) -> Self {
        Self {
            category: err.category().name(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Forwards log messages into the host
struct HostSink<H>(Arc<H>);

impl<H: Host> LogSink for HostSink<H> {
    fn deliver(&self, severity: Severity, message: &str) -> std::result::Result<(), SinkError> {
        self.0.deliver(severity, message)
    }
}

/// Entry points for a host that exchanges raw handle values
pub struct HostBridge<H: Host + 'static> {
    host: Arc<H>,
}

impl<H: Host + 'static> HostBridge<H> {
    /// Bind `host` and make it the process-wide primary log sink.
    ///
    /// Fails with [`ShellError::InitializationError`] if a primary sink was
    /// already established; there is no re-initialization.
    pub fn init(host: H) -> Result<Self> {
        let host = Arc::new(host);
        logging::init(Box::new(HostSink(Arc::clone(&host))))?;
        host_invariant!(&*host, logging::is_initialized());
        log_debug!("Host bridge bound");
        Ok(Self { host })
    }

    /// The bound host
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Spawn `args` with a pipe on its stdin; returns `(process, pipe)`
    pub fn popen<S: AsRef<str>>(&self, args: &[S]) -> Result<(RawHandle, RawHandle)> {
        let command = command_from(args)?;
        let (process, pipe) = traced("popen", process::spawn_with_pipe(&command))?;
        Ok((process.into_raw(), pipe.into_raw()))
    }

    /// Spawn `args` with inherited stdio; returns the process handle
    pub fn exec<S: AsRef<str>>(&self, args: &[S]) -> Result<RawHandle> {
        let command = command_from(args)?;
        let process = traced("exec", process::spawn(&command))?;
        Ok(process.into_raw())
    }

    /// Close a pipe handle
    pub fn close(&self, handle: RawHandle) -> Result<()> {
        traced("close", process::close(PipeHandle::from_raw(handle)))
    }

    /// Wait for a process; abnormal termination reports exit code 1
    pub fn wait_pid(&self, process: RawHandle) -> Result<i32> {
        let status = traced("wait", process::reap(ProcessHandle::from_raw(process)))?;
        Ok(status.code())
    }

    /// Write one byte to a pipe handle
    pub fn write_byte(&self, handle: RawHandle, byte: u8) -> Result<()> {
        traced("write", process::write_all(&PipeHandle::from_raw(handle), &[byte]))
    }

    /// Write `len` bytes of `bytes`, starting at `offset`, to a pipe handle
    pub fn write_bytes(&self, handle: RawHandle, bytes: &[u8], offset: usize, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| {
                ShellError::InvalidArgument(format!(
                    "offset {} + length {} exceeds buffer of {} bytes",
                    offset,
                    len,
                    bytes.len()
                ))
            })?;
        traced(
            "write",
            process::write_all(&PipeHandle::from_raw(handle), &bytes[offset..end]),
        )
    }

    /// Output column width, or [`WIDTH_NOT_AVAILABLE`]
    pub fn screen_width(&self) -> i32 {
        process::terminal_width().map_or(WIDTH_NOT_AVAILABLE, i32::from)
    }

    /// Shape `err` for the host
    pub fn failure(err: &ShellError) -> HostFailure {
        HostFailure::from(err)
    }
}

fn command_from<S: AsRef<str>>(args: &[S]) -> Result<Command> {
    Command::new(args.iter().map(|a| a.as_ref().to_string()))
}

fn traced<T>(operation: &str, result: Result<T>) -> Result<T> {
    result.map_err(|e| {
        log_debug!("{} failed ({}): {}", operation, e.code(), e);
        e
    })
}
