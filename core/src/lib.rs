//! Native process core for interactive shells
//!
//! This crate spawns child processes (optionally with a pipe on their
//! stdin), writes to and closes those pipes, waits for children, and reports
//! the terminal width. Failures come back as [`ShellError`] values carrying a
//! host-presentable category; diagnostics flow through [`logging`], which
//! falls back to stderr when the host's sink is unavailable.

pub mod bridge;
pub mod config;
pub mod error;
pub mod invariant;
pub mod logging;
pub mod process;
pub mod shell;
pub mod translate;


pub use bridge::{Host, HostBridge, HostFailure};
pub use config::{CoreConfig, SinkKind};
pub use error::{Result, ShellError};
pub use invariant::HostStatus;
pub use logging::{LogSink, Severity, SinkError};
pub use process::{Command, PipeHandle, ProcessHandle, RawHandle, ReapStatus, Termination};
pub use shell::{PipeWriter, ShellProcess};
pub use translate::{ErrorCategory, StructuredError};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::ShellError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
