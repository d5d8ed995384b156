//! Typed wrappers over the process primitives
//!
//! [`ShellProcess`] pairs a spawned child with the writer for its stdin, and
//! [`PipeWriter`] exposes the pipe as a [`std::io::Write`].

use crate::process::{self, Command, PipeHandle, ProcessHandle, RawHandle, ReapStatus};
use crate::{log_debug, log_warn, Result};
use std::io;

/// Writable end of a child's stdin pipe
#[derive(Debug)]
pub struct PipeWriter {
    pipe: Option<PipeHandle>,
}

impl PipeWriter {
    pub fn new(pipe: PipeHandle) -> Self {
        Self { pipe: Some(pipe) }
    }

    /// Raw handle value, for hosts that track descriptors themselves
    pub fn as_raw(&self) -> Option<RawHandle> {
        self.pipe.as_ref().map(PipeHandle::as_raw)
    }

    /// Write a single byte
    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.send(&[byte])
    }

    /// Write every byte of `bytes`
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match &self.pipe {
            Some(pipe) => process::write_all(pipe, bytes),
            None => Err(closed_pipe().into()),
        }
    }

    /// Close the pipe, reporting any failure from the OS
    pub fn close(mut self) -> Result<()> {
        match self.pipe.take() {
            Some(pipe) => process::close(pipe),
            None => Ok(()),
        }
    }

    /// Release the handle without closing it
    pub fn into_inner(mut self) -> Option<PipeHandle> {
        self.pipe.take()
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Writes go straight to the descriptor
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if let Some(pipe) = self.pipe.take() {
            let raw = pipe.as_raw();
            if let Err(e) = process::close(pipe) {
                log_warn!("Failed to close stdin pipe {} on drop: {}", raw, e);
            }
        }
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stdin pipe already closed")
}

/// A spawned child together with its (optional) stdin writer
///
/// The child must be reaped with [`ShellProcess::wait`]; dropping a
/// `ShellProcess` closes its stdin but does not wait for the child.
#[derive(Debug)]
pub struct ShellProcess {
    process: ProcessHandle,
    stdin: Option<PipeWriter>,
}

impl ShellProcess {
    /// Spawn `command` with a pipe attached to its stdin
    ///
    /// ## Example
    ///
    /// ```rust,no_run
    /// use std::io::Write;
    /// use subshell_core::process::Command;
    /// use subshell_core::shell::ShellProcess;
    ///
    /// let mut child = ShellProcess::piped(&Command::new(["/usr/bin/less"])?)?;
    /// if let Some(stdin) = child.stdin() {
    ///     writeln!(stdin, "hello")?;
    /// }
    /// let status = child.wait()?;
    /// println!("less exited with {}", status.code());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn piped(command: &Command) -> Result<Self> {
        let (process, pipe) = process::spawn_with_pipe(command)?;
        Ok(Self {
            process,
            stdin: Some(PipeWriter::new(pipe)),
        })
    }

    /// Spawn `command` sharing this process's stdin, stdout and stderr
    pub fn inherited(command: &Command) -> Result<Self> {
        let process = process::spawn(command)?;
        Ok(Self {
            process,
            stdin: None,
        })
    }

    /// Raw process handle (pid on Unix)
    pub fn id(&self) -> RawHandle {
        self.process.as_raw()
    }

    /// The stdin writer, if the child was spawned with a pipe and it is still held
    pub fn stdin(&mut self) -> Option<&mut PipeWriter> {
        self.stdin.as_mut()
    }

    /// Take ownership of the stdin writer
    pub fn take_stdin(&mut self) -> Option<PipeWriter> {
        self.stdin.take()
    }

    /// Close stdin (if still held) so the child sees EOF, then block until it exits
    ///
    /// The child is reaped even if closing stdin fails; the close error is
    /// reported afterwards.
    pub fn wait(mut self) -> Result<ReapStatus> {
        let closed = match self.stdin.take() {
            Some(stdin) => stdin.close(),
            None => Ok(()),
        };
        log_debug!("Waiting for process {}", self.process.as_raw());
        let status = process::reap(self.process)?;
        closed?;
        Ok(status)
    }
}
