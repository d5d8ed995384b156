//! Windows process backend built on anonymous pipes and `CreateProcessW`
//!
//! Windows takes a single command line string rather than an argument
//! vector, so [`Command::to_command_line`] joins the arguments with single
//! spaces. No quoting is applied: an argument containing spaces or quotes is
//! re-split by the child.
//!
//! The pipe is created non-inheritable and only the read end is then marked
//! inheritable, so the write end is never visible to any child, including
//! one created concurrently by another thread.

// Allow unsafe code for this module since every Win32 call is an FFI call
#![allow(unsafe_code)]

use super::{
    write_fully, Command, PipeHandle, ProcessBackend, ProcessHandle, RawHandle, ReapStatus,
    Termination,
};
use crate::translate::ErrorCategory;
use crate::{log_debug, Result, ShellError};
use std::ffi::c_void;
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, GetLastError, SetHandleInformation, FALSE, HANDLE, HANDLE_FLAG_INHERIT, TRUE,
    WAIT_FAILED,
};
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::Storage::FileSystem::WriteFile;
use windows::Win32::System::Console::{
    GetConsoleScreenBufferInfo, GetStdHandle, CONSOLE_SCREEN_BUFFER_INFO, STD_ERROR_HANDLE,
    STD_OUTPUT_HANDLE,
};
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, WaitForSingleObject, INFINITE, PROCESS_CREATION_FLAGS,
    PROCESS_INFORMATION, STARTF_USESTDHANDLES, STARTUPINFOW,
};

/// Longest command line `CreateProcessW` accepts, in UTF-16 units including the NUL
const MAX_COMMAND_LINE: usize = 32_767;

/// The Win32 implementation of [`ProcessBackend`]
#[derive(Copy, Clone, Debug, Default)]
pub struct WindowsBackend;

impl WindowsBackend {
    /// Create a new Windows backend
    pub fn new() -> Self {
        Self
    }
}

/// Closes the wrapped handle on drop unless released
struct OwnedHandle(HANDLE);

impl OwnedHandle {
    fn release(self) -> HANDLE {
        let handle = self.0;
        std::mem::forget(self);
        handle
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

impl ProcessBackend for WindowsBackend {
    fn spawn_with_pipe(&self, command: &Command) -> Result<(ProcessHandle, PipeHandle)> {
        let mut command_line = wide_command_line(command)?;
        let (read, write) = stdin_pipe()?;

        let startup = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            hStdInput: read.0,
            hStdOutput: std_handle(STD_OUTPUT_HANDLE),
            hStdError: std_handle(STD_ERROR_HANDLE),
            dwFlags: STARTF_USESTDHANDLES,
            ..Default::default()
        };

        let process = create_process(&mut command_line, &startup)?;
        // The child holds its own copy of the read end now
        drop(read);
        let write = write.release();

        log_debug!(
            "Spawned process {} for '{}' with stdin pipe {:?}",
            process.dwProcessId,
            command.program(),
            write
        );
        Ok((
            ProcessHandle::from_raw(to_raw(process.hProcess)),
            PipeHandle::from_raw(to_raw(write)),
        ))
    }

    fn spawn(&self, command: &Command) -> Result<ProcessHandle> {
        let mut command_line = wide_command_line(command)?;
        let startup = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            ..Default::default()
        };

        let process = create_process(&mut command_line, &startup)?;
        log_debug!("Spawned process {} for '{}'", process.dwProcessId, command.program());
        Ok(ProcessHandle::from_raw(to_raw(process.hProcess)))
    }

    fn reap(&self, process: ProcessHandle) -> Result<ReapStatus> {
        // Closed on every path: reaping always consumes the handle
        let process = OwnedHandle(from_raw(process.into_raw()));

        if unsafe { WaitForSingleObject(process.0, INFINITE) } == WAIT_FAILED {
            return Err(ShellError::os("WaitForSingleObject", last_error(), None));
        }

        let mut code = 0u32;
        unsafe { GetExitCodeProcess(process.0, &mut code) }
            .map_err(|e| ShellError::os("GetExitCodeProcess", win32_code(&e), None))?;

        unsafe { CloseHandle(process.release()) }
            .map_err(|e| ShellError::os("CloseHandle", win32_code(&e), None))?;

        let termination = Termination::Exited(code as i32);
        log_debug!("Reaped process: {:?}", termination);
        Ok(ReapStatus::new(termination))
    }

    fn write_all(&self, pipe: &PipeHandle, bytes: &[u8]) -> Result<()> {
        let handle = from_raw(pipe.as_raw());

        write_fully(bytes, |chunk| {
            let chunk = &chunk[..chunk.len().min(u32::MAX as usize)];
            let mut written = 0u32;
            unsafe { WriteFile(handle, Some(chunk), Some(&mut written), None) }
                .map_err(|e| ShellError::os("WriteFile", win32_code(&e), Some(ErrorCategory::Io)))?;
            Ok(written as usize)
        })
    }

    fn close(&self, pipe: PipeHandle) -> Result<()> {
        unsafe { CloseHandle(from_raw(pipe.into_raw())) }
            .map_err(|e| ShellError::os("CloseHandle", win32_code(&e), Some(ErrorCategory::Io)))
    }

    fn terminal_width(&self) -> Option<u16> {
        let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();
        let handle = unsafe { GetStdHandle(STD_OUTPUT_HANDLE) }.ok()?;
        unsafe { GetConsoleScreenBufferInfo(handle, &mut info) }.ok()?;
        u16::try_from(info.dwSize.X).ok().filter(|w| *w > 0)
    }
}

/// Anonymous pipe whose read end alone is inheritable
fn stdin_pipe() -> Result<(OwnedHandle, OwnedHandle)> {
    let security = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: std::ptr::null_mut(),
        bInheritHandle: FALSE,
    };

    let mut read = HANDLE::default();
    let mut write = HANDLE::default();
    unsafe { CreatePipe(&mut read, &mut write, Some(&security), 0) }
        .map_err(|e| ShellError::os("CreatePipe", win32_code(&e), None))?;
    let read = OwnedHandle(read);
    let write = OwnedHandle(write);

    unsafe { SetHandleInformation(read.0, HANDLE_FLAG_INHERIT.0, HANDLE_FLAG_INHERIT) }
        .map_err(|e| ShellError::os("SetHandleInformation", win32_code(&e), None))?;
    Ok((read, write))
}

fn create_process(command_line: &mut [u16], startup: &STARTUPINFOW) -> Result<PROCESS_INFORMATION> {
    let mut process = PROCESS_INFORMATION::default();
    unsafe {
        CreateProcessW(
            PCWSTR::null(),
            PWSTR(command_line.as_mut_ptr()),
            None,
            None,
            TRUE,
            PROCESS_CREATION_FLAGS(0),
            None,
            PCWSTR::null(),
            startup,
            &mut process,
        )
    }
    .map_err(|e| ShellError::os("CreateProcess", win32_code(&e), None))?;

    unsafe {
        let _ = CloseHandle(process.hThread);
    }
    Ok(process)
}

/// NUL-terminated UTF-16 command line for `CreateProcessW` (which may modify it)
fn wide_command_line(command: &Command) -> Result<Vec<u16>> {
    if command.args().iter().any(|arg| arg.contains('\0')) {
        return Err(ShellError::InvalidCommand(
            "arguments cannot contain NUL characters".to_string(),
        ));
    }
    let wide: Vec<u16> = command
        .to_command_line()
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();
    if wide.len() > MAX_COMMAND_LINE {
        return Err(ShellError::InvalidCommand(format!(
            "command line is {} UTF-16 units, limit is {}",
            wide.len() - 1,
            MAX_COMMAND_LINE - 1
        )));
    }
    Ok(wide)
}

fn std_handle(which: windows::Win32::System::Console::STD_HANDLE) -> HANDLE {
    unsafe { GetStdHandle(which) }.unwrap_or_default()
}

fn to_raw(handle: HANDLE) -> RawHandle {
    handle.0 as isize as RawHandle
}

fn from_raw(raw: RawHandle) -> HANDLE {
    HANDLE(raw as isize as *mut c_void)
}

fn last_error() -> i32 {
    unsafe { GetLastError() }.0 as i32
}

/// Recover the Win32 error code from an `HRESULT_FROM_WIN32` value
fn win32_code(err: &windows::core::Error) -> i32 {
    let hr = err.code().0;
    if (hr as u32) & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    }
}
