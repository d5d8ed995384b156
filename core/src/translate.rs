//! Translation of OS-native failure codes into structured errors
//!
//! The message text always comes from the platform's own code-to-text table,
//! so the host sees the same wording the operating system would print.

use std::fmt;
use thiserror::Error;

/// Error class label the host uses to present a typed failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCategory {
    /// Generic process-core failure (spawn, pipe creation, wait)
    #[default]
    Shell,
    /// Failure while moving bytes or releasing a descriptor
    Io,
    /// Caller handed the core something it cannot act on
    Usage,
}

impl ErrorCategory {
    /// Host-recognised name of the category
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCategory::Shell => "ShellError",
            ErrorCategory::Io => "IoError",
            ErrorCategory::Usage => "UsageError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An OS failure code together with its human-readable description
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// Raw platform code (errno on POSIX, `GetLastError` value on Windows)
    pub code: i32,
    pub message: String,
}

/// Map a platform error code to a [`StructuredError`].
///
/// `category` defaults to [`ErrorCategory::Shell`]. Never fails: codes the
/// platform does not know still produce a (generic) message.
pub fn translate(code: i32, category: Option<ErrorCategory>) -> StructuredError {
    StructuredError {
        category: category.unwrap_or_default(),
        code,
        message: describe(code),
    }
}

fn describe(code: i32) -> String {
    // std renders through strerror_r / FormatMessageW and appends " (os error N)"
    let text = std::io::Error::from_raw_os_error(code).to_string();
    match text.rfind(" (os error ") {
        Some(idx) => text[..idx].trim_end().to_string(),
        None => text,
    }
}
