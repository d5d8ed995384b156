//! Core error types and utilities

use crate::translate::{ErrorCategory, StructuredError};
use thiserror::Error;

/// Errors surfaced to the host by the process core
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{operation} failed: {source}")]
    Os {
        operation: &'static str,
        #[source]
        source: StructuredError,
    },

    #[error("Write stalled after {written} bytes with {remaining} bytes remaining")]
    WriteStalled { written: usize, remaining: usize },

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ShellError {
    /// Build an OS-resource failure by running `code` through the translator
    pub fn os(operation: &'static str, code: i32, category: Option<ErrorCategory>) -> Self {
        ShellError::Os {
            operation,
            source: crate::translate::translate(code, category),
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            ShellError::InvalidCommand(_) => "SHELL001",
            ShellError::InvalidArgument(_) => "SHELL002",
            ShellError::Os { .. } => "SHELL003",
            ShellError::WriteStalled { .. } => "SHELL004",
            ShellError::InitializationError(_) => "SHELL005",
            ShellError::ConfigurationError(_) => "SHELL006",
            ShellError::ValidationError(_) => "SHELL007",
            ShellError::IoError(_) => "SHELL008",
        }
    }

    /// Category the host should use when presenting this failure
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShellError::InvalidCommand(_) | ShellError::InvalidArgument(_) => ErrorCategory::Usage,
            ShellError::Os { source, .. } => source.category,
            ShellError::WriteStalled { .. } | ShellError::IoError(_) => ErrorCategory::Io,
            ShellError::InitializationError(_)
            | ShellError::ConfigurationError(_)
            | ShellError::ValidationError(_) => ErrorCategory::Shell,
        }
    }

    /// Raw OS error code, when the failure came from the operating system
    pub fn os_code(&self) -> Option<i32> {
        match self {
            ShellError::Os { source, .. } => Some(source.code),
            ShellError::IoError(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, ShellError>;

impl From<ShellError> for std::io::Error {
    fn from(err: ShellError) -> Self {
        use std::io::ErrorKind;

        match err {
            ShellError::IoError(e) => e,
            ShellError::Os { source, .. } => std::io::Error::from_raw_os_error(source.code),
            ShellError::WriteStalled { .. } => {
                std::io::Error::new(ErrorKind::WriteZero, err.to_string())
            }
            ShellError::InvalidCommand(_) | ShellError::InvalidArgument(_) => {
                std::io::Error::new(ErrorKind::InvalidInput, err.to_string())
            }
            other => std::io::Error::new(ErrorKind::Other, other.to_string()),
        }
    }
}
