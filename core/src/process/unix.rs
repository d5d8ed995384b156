//! Unix process backend built on `pipe`, `fork`, `execv` and `waitpid`
//!
//! ## Safety
//!
//! - Both pipe ends are created with `FD_CLOEXEC`, so children spawned by
//!   other threads never inherit them; the spawned child gets the read end
//!   only through `dup2` onto stdin, which clears the flag on the copy.
//! - Everything the child needs (C strings, the argv pointer array, the
//!   failure message prefix) is built before `fork`. Between `fork` and
//!   `execv` the child only makes async-signal-safe libc calls.
//! - If `execv` fails, the child prints `Failed to launch '<path>' (errno N)`
//!   to its own stderr and `_exit(1)`s. The parent has already returned by
//!   then, so this surfaces as exit status 1 from [`UnixBackend::reap`].
//! - No `PATH` lookup is performed: the first argument must be a path.

// Allow unsafe code for this module since fork/exec and raw descriptors require libc calls
#![allow(unsafe_code)]

use super::{
    write_fully, Command, PipeHandle, ProcessBackend, ProcessHandle, RawHandle, ReapStatus,
    Termination,
};
use crate::translate::ErrorCategory;
use crate::{invariant, log_debug, Result, ShellError};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::ffi::CString;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};
use std::os::raw::c_char;

mod ioctl {
    nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);
}

/// The POSIX implementation of [`ProcessBackend`]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixBackend;

impl UnixBackend {
    /// Create a new Unix backend
    pub fn new() -> Self {
        Self
    }
}

impl ProcessBackend for UnixBackend {
    fn spawn_with_pipe(&self, command: &Command) -> Result<(ProcessHandle, PipeHandle)> {
        let exec = PreparedExec::new(command)?;

        // Both ends are OwnedFd: any early return below closes them
        let (read_end, write_end) = cloexec_pipe()?;

        // Safety: the child branch only makes async-signal-safe calls before execv/_exit
        match unsafe { fork() } {
            Err(e) => Err(ShellError::os("fork", e as i32, None)),
            Ok(ForkResult::Child) => {
                unsafe { libc::close(write_end.as_raw_fd()) };
                if let Err(errno) = attach_stdin(read_end.as_raw_fd()) {
                    exec.fail(errno)
                }
                exec.run()
            }
            Ok(ForkResult::Parent { child }) => {
                invariant!(child.as_raw() > 0);
                drop(read_end);
                let fd = write_end.into_raw_fd();
                log_debug!(
                    "Spawned process {} for '{}' with stdin pipe {}",
                    child,
                    command.program(),
                    fd
                );
                Ok((
                    ProcessHandle::from_raw(RawHandle::from(child.as_raw())),
                    PipeHandle::from_raw(RawHandle::from(fd)),
                ))
            }
        }
    }

    fn spawn(&self, command: &Command) -> Result<ProcessHandle> {
        let exec = PreparedExec::new(command)?;

        // Safety: the child branch only makes async-signal-safe calls before execv/_exit
        match unsafe { fork() } {
            Err(e) => Err(ShellError::os("fork", e as i32, None)),
            Ok(ForkResult::Child) => exec.run(),
            Ok(ForkResult::Parent { child }) => {
                invariant!(child.as_raw() > 0);
                log_debug!("Spawned process {} for '{}'", child, command.program());
                Ok(ProcessHandle::from_raw(RawHandle::from(child.as_raw())))
            }
        }
    }

    fn reap(&self, process: ProcessHandle) -> Result<ReapStatus> {
        let pid = Pid::from_raw(raw_pid(process.as_raw())?);

        let termination = loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, code)) => break Termination::Exited(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => break Termination::Signaled(signal as i32),
                Ok(other) => {
                    log_debug!("Unexpected wait status for process {}: {:?}", pid, other);
                    break Termination::Other;
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ShellError::os("waitpid", e as i32, None)),
            }
        };

        log_debug!("Reaped process {}: {:?}", pid, termination);
        Ok(ReapStatus::new(termination))
    }

    fn write_all(&self, pipe: &PipeHandle, bytes: &[u8]) -> Result<()> {
        let fd = raw_fd(pipe.as_raw())?;
        // Safety: borrowed for this call only; the PipeHandle owner keeps the descriptor open
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };

        write_fully(bytes, |chunk| loop {
            match nix::unistd::write(fd, chunk) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ShellError::os("write", e as i32, Some(ErrorCategory::Io))),
            }
        })
    }

    fn close(&self, pipe: PipeHandle) -> Result<()> {
        let fd = raw_fd(pipe.into_raw())?;
        nix::unistd::close(fd).map_err(|e| ShellError::os("close", e as i32, Some(ErrorCategory::Io)))
    }

    fn terminal_width(&self) -> Option<u16> {
        let mut size = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        match unsafe { ioctl::tiocgwinsz(libc::STDOUT_FILENO, &mut size) } {
            Ok(_) if size.ws_col > 0 => Some(size.ws_col),
            _ => None,
        }
    }
}

/// A command converted to C strings ahead of `fork`
struct PreparedExec {
    path: CString,
    // Owns the storage `argv` points into
    _args: Vec<CString>,
    argv: Vec<*const c_char>,
    failure_prefix: Vec<u8>,
}

impl PreparedExec {
    fn new(command: &Command) -> Result<Self> {
        let args = command
            .args()
            .iter()
            .map(|arg| {
                CString::new(arg.as_bytes()).map_err(|_| {
                    ShellError::InvalidCommand(format!("argument {:?} contains a NUL byte", arg))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let path = args[0].clone();
        let mut argv: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();
        argv.push(std::ptr::null());
        let failure_prefix = format!("Failed to launch '{}' (errno ", command.program()).into_bytes();

        Ok(Self {
            path,
            _args: args,
            argv,
            failure_prefix,
        })
    }

    /// Replace the child's image. Called only in the forked child.
    fn run(&self) -> ! {
        reset_signals();
        unsafe { libc::execv(self.path.as_ptr(), self.argv.as_ptr()) };
        self.fail(Errno::last() as i32)
    }

    /// Report a launch failure on stderr and exit the child
    fn fail(&self, errno: i32) -> ! {
        let mut digits = [0u8; 12];
        write_stderr(&self.failure_prefix);
        write_stderr(format_decimal(errno, &mut digits));
        write_stderr(b")\n");
        unsafe { libc::_exit(1) }
    }
}

/// Bind `read_end` to the child's stdin
fn attach_stdin(read_end: RawFd) -> std::result::Result<(), i32> {
    unsafe {
        if read_end == libc::STDIN_FILENO {
            // dup2 onto itself is a no-op, so drop FD_CLOEXEC by hand
            if libc::fcntl(read_end, libc::F_SETFD, 0) == -1 {
                return Err(Errno::last() as i32);
            }
            return Ok(());
        }
        if libc::dup2(read_end, libc::STDIN_FILENO) == -1 {
            return Err(Errno::last() as i32);
        }
        libc::close(read_end);
    }
    Ok(())
}

/// Undo the parent's signal setup: the Rust runtime ignores SIGPIPE, and
/// ignored dispositions survive exec.
fn reset_signals() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        let mut empty: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty);
        libc::pthread_sigmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
    }
}

fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}

/// Render `value` in decimal without allocating
fn format_decimal(value: i32, buf: &mut [u8; 12]) -> &[u8] {
    let mut n = i64::from(value).unsigned_abs();
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if value < 0 {
        pos -= 1;
        buf[pos] = b'-';
    }
    &buf[pos..]
}

/// A pipe whose ends are never inherited across `exec`
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).map_err(|e| ShellError::os("pipe", e as i32, None))
}

/// A pipe whose ends are never inherited across `exec`
///
/// Without `pipe2` the flag is set after creation, so a concurrent `fork`
/// on another thread may still inherit the descriptors.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let (read_end, write_end) =
        nix::unistd::pipe().map_err(|e| ShellError::os("pipe", e as i32, None))?;
    set_cloexec(&read_end)?;
    set_cloexec(&write_end)?;
    Ok((read_end, write_end))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
fn set_cloexec(fd: &OwnedFd) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map(drop)
        .map_err(|e| ShellError::os("pipe", e as i32, None))
}

fn raw_fd(raw: RawHandle) -> Result<RawFd> {
    RawFd::try_from(raw)
        .ok()
        .filter(|fd| *fd >= 0)
        .ok_or_else(|| ShellError::InvalidArgument(format!("{} is not a file descriptor", raw)))
}

fn raw_pid(raw: RawHandle) -> Result<i32> {
    // waitpid gives 0 and negative values group/any-child meanings
    i32::try_from(raw)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| ShellError::InvalidArgument(format!("{} is not a process id", raw)))
}
