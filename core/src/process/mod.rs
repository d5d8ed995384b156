//! Process management for the subshell core
//!
//! This module owns the platform primitives: spawning a child (optionally with
//! a pipe on its stdin), reaping it, writing to and closing the pipe, and
//! probing the terminal width. Exactly one backend is compiled in per target.
//!
//! ## Platform Support
//!
//! - **Unix**: `pipe` + `fork` + `execv`, reaped with `waitpid`
//! - **Windows**: anonymous pipe + `CreateProcessW`, reaped with
//!   `WaitForSingleObject` / `GetExitCodeProcess`
//!
//! ## Handle ownership
//!
//! [`ProcessHandle`] and [`PipeHandle`] are not `Clone`. [`reap`] and
//! [`close`] take them by value, so the typed API cannot wait on or close the
//! same handle twice. Hosts that hold raw values (see [`crate::bridge`]) can
//! still hand back a stale one; the operating system rejects it and the
//! failure is surfaced as [`ShellError::Os`].

use crate::{Result, ShellError};

#[cfg(unix)]
pub mod unix;
#[cfg(unix)]
pub use unix::UnixBackend as NativeBackend;

#[cfg(windows)]
pub mod windows;
#[cfg(windows)]
pub use windows::WindowsBackend as NativeBackend;

/// Raw handle value as exchanged with the host (pid/fd on Unix, HANDLE on Windows)
pub type RawHandle = i64;

/// A non-empty argument vector; element 0 is the executable path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<String>,
}

impl Command {
    /// Build a command from its argument vector
    ///
    /// ## Example
    ///
    /// ```
    /// use subshell_core::process::Command;
    ///
    /// let cmd = Command::new(["/bin/sh", "-c", "exit 7"])?;
    /// assert_eq!(cmd.program(), "/bin/sh");
    /// assert!(Command::new(Vec::<String>::new()).is_err());
    /// # Ok::<(), subshell_core::ShellError>(())
    /// ```
    pub fn new<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            return Err(ShellError::InvalidCommand(
                "command must name an executable".to_string(),
            ));
        }
        Ok(Self { args })
    }

    /// The executable path (first argument)
    pub fn program(&self) -> &str {
        &self.args[0]
    }

    /// All arguments, including the executable path
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Serialize as a single command line: arguments joined by one space.
    ///
    /// Arguments are not quoted or escaped. An argument that itself contains
    /// a space or a quote character will be split differently by the child.
    pub fn to_command_line(&self) -> String {
        self.args.join(" ")
    }
}

/// Owning handle to a spawned child process
#[derive(Debug, PartialEq, Eq)]
pub struct ProcessHandle(RawHandle);

impl ProcessHandle {
    /// Wrap a raw value previously obtained from [`ProcessHandle::into_raw`]
    pub fn from_raw(raw: RawHandle) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> RawHandle {
        self.0
    }

    /// Give up ownership; the caller must eventually reap the raw value
    pub fn into_raw(self) -> RawHandle {
        self.0
    }
}

/// Owning handle to the write end of a child's stdin pipe
#[derive(Debug, PartialEq, Eq)]
pub struct PipeHandle(RawHandle);

impl PipeHandle {
    /// Wrap a raw value previously obtained from [`PipeHandle::into_raw`]
    pub fn from_raw(raw: RawHandle) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> RawHandle {
        self.0
    }

    /// Give up ownership; the caller must eventually close the raw value
    pub fn into_raw(self) -> RawHandle {
        self.0
    }
}

/// How a reaped child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with the given status
    Exited(i32),
    /// Killed by the given signal (Unix only)
    Signaled(i32),
    /// Any other wait outcome
    Other,
}

/// Result of reaping a child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapStatus {
    termination: Termination,
}

impl ReapStatus {
    /// Exit code reported for anything other than a normal exit
    pub const ABNORMAL_EXIT_CODE: i32 = 1;

    pub fn new(termination: Termination) -> Self {
        Self { termination }
    }

    /// Exit code, or [`Self::ABNORMAL_EXIT_CODE`] when the child did not exit normally
    pub fn code(&self) -> i32 {
        match self.termination {
            Termination::Exited(code) => code,
            Termination::Signaled(_) | Termination::Other => Self::ABNORMAL_EXIT_CODE,
        }
    }

    /// The actual termination reason
    pub fn termination(&self) -> Termination {
        self.termination
    }

    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }
}

/// Platform process primitives
pub trait ProcessBackend {
    /// Spawn `command` with a fresh pipe bound to its stdin; stdout and stderr are inherited
    fn spawn_with_pipe(&self, command: &Command) -> Result<(ProcessHandle, PipeHandle)>;

    /// Spawn `command` inheriting stdin, stdout and stderr
    fn spawn(&self, command: &Command) -> Result<ProcessHandle>;

    /// Block until the child terminates and return how it ended
    fn reap(&self, process: ProcessHandle) -> Result<ReapStatus>;

    /// Write every byte of `bytes` to the pipe
    fn write_all(&self, pipe: &PipeHandle, bytes: &[u8]) -> Result<()>;

    /// Release the pipe's descriptor
    fn close(&self, pipe: PipeHandle) -> Result<()>;

    /// Column width of the output device, `None` when it cannot be determined
    fn terminal_width(&self) -> Option<u16>;
}

/// Spawn `command` with a writable pipe on its stdin
pub fn spawn_with_pipe(command: &Command) -> Result<(ProcessHandle, PipeHandle)> {
    NativeBackend.spawn_with_pipe(command)
}

/// Spawn `command` with inherited stdio
pub fn spawn(command: &Command) -> Result<ProcessHandle> {
    NativeBackend.spawn(command)
}

/// Wait for `process` to terminate
pub fn reap(process: ProcessHandle) -> Result<ReapStatus> {
    NativeBackend.reap(process)
}

/// Write all of `bytes` to `pipe`
pub fn write_all(pipe: &PipeHandle, bytes: &[u8]) -> Result<()> {
    NativeBackend.write_all(pipe, bytes)
}

/// Close `pipe`
pub fn close(pipe: PipeHandle) -> Result<()> {
    NativeBackend.close(pipe)
}

/// Width of the terminal attached to stdout
pub fn terminal_width() -> Option<u16> {
    NativeBackend.terminal_width()
}

/// Drive `write_once` until `buf` is fully written.
///
/// `write_once` performs a single underlying write and returns how many bytes
/// it accepted; every pass resumes after the bytes already written.
pub(crate) fn write_fully<F>(buf: &[u8], mut write_once: F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<usize>,
{
    let mut written = 0;
    while written < buf.len() {
        let n = write_once(&buf[written..])?;
        if n == 0 {
            return Err(ShellError::WriteStalled {
                written,
                remaining: buf.len() - written,
            });
        }
        written += n;
    }
    Ok(())
}
