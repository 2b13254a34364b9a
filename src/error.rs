//! Custom error types for the application.
//!
//! This module defines the primary error type, `PanelError`, for the whole panel.
//! Using the `thiserror` crate, it gives one consistent way to report everything
//! from configuration problems to a jaw motor that stopped answering.
//!
//! ## Error Hierarchy
//!
//! - **`UnknownDevice`**: a configured device name does not resolve to a live handle.
//!   This is fatal at startup: a scraper cannot be built without its axes.
//! - **`DeviceCommunication`**: a read, write or abort failed after the device was
//!   resolved (timeout, device fault, network loss). Callers recover from it locally
//!   and report it to the operator.
//! - **`Config`** / **`Configuration`**: parse errors from `figment` and semantic
//!   errors found by validation.
//! - **`AbortFailed`**: the aggregate of every per-device failure of one abort.
//!
//! By using `#[from]`, `PanelError` can be created from the underlying error types
//! with the `?` operator.

use std::fmt;

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, PanelError>;

/// Remote call that failed on a resolved device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOperation {
    /// Attribute read.
    Read,
    /// Attribute write.
    Write,
    /// Motion abort.
    Abort,
}

impl fmt::Display for DeviceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceOperation::Read => "read",
            DeviceOperation::Write => "write",
            DeviceOperation::Abort => "abort",
        };
        f.write_str(name)
    }
}

/// Primary error type of the scraper panel.
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Unknown device: {name}")]
    UnknownDevice { name: String },

    #[error("Device communication error on {device} ({operation}): {cause:#}")]
    DeviceCommunication {
        device: String,
        operation: DeviceOperation,
        cause: anyhow::Error,
    },

    #[error("Invalid device name: {0}")]
    InvalidDeviceName(String),

    #[error("Unknown scraper '{id}'. Use one of: {}", .valid.join(" "))]
    UnknownScraper { id: String, valid: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Abort failed on {} device(s)", .0.len())]
    AbortFailed(Vec<PanelError>),
}

impl PanelError {
    /// Build a communication error for `operation` on `device`.
    pub fn communication(
        device: impl Into<String>,
        operation: DeviceOperation,
        cause: impl Into<anyhow::Error>,
    ) -> Self {
        PanelError::DeviceCommunication {
            device: device.into(),
            operation,
            cause: cause.into(),
        }
    }

    /// Startup-class errors that leave the panel unable to run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PanelError::UnknownDevice { .. }
                | PanelError::InvalidDeviceName(_)
                | PanelError::UnknownScraper { .. }
                | PanelError::Config(_)
                | PanelError::Configuration(_)
        )
    }

    /// Name of the device involved, when the error concerns a single device.
    pub fn device(&self) -> Option<&str> {
        match self {
            PanelError::UnknownDevice { name } => Some(name.as_str()),
            PanelError::DeviceCommunication { device, .. } => Some(device.as_str()),
            _ => None,
        }
    }
}

impl From<figment::Error> for PanelError {
    fn from(err: figment::Error) -> Self {
        PanelError::Config(Box::new(err))
    }
}
