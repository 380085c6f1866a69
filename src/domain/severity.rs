//! Severity levels and error categorisation.

use crate::domain::event::Sensitivity;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::io;

/// Severity of an alert or reported error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl From<Severity> for Sensitivity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => Sensitivity::Low,
            Severity::Medium => Sensitivity::Medium,
            Severity::High => Sensitivity::High,
            Severity::Critical => Sensitivity::Critical,
        }
    }
}

/// Broad class of an error, used to derive its default severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Out of memory, allocation failure, exhausted handles
    ResourceExhaustion,
    /// Access denied or other security failure
    Security,
    /// Local I/O failure
    Io,
    /// Remote call failure
    Network,
    #[default]
    Other,
}

impl ErrorCategory {
    /// Default severity for this category.
    pub const fn severity(self) -> Severity {
        match self {
            ErrorCategory::ResourceExhaustion => Severity::Critical,
            ErrorCategory::Security => Severity::High,
            ErrorCategory::Io | ErrorCategory::Network => Severity::Medium,
            ErrorCategory::Other => Severity::Low,
        }
    }

    /// Infer the category by walking the error's source chain.
    ///
    /// The first recognised error in the chain wins.
    pub fn infer(error: &(dyn Error + 'static)) -> Self {
        let mut current: Option<&(dyn Error + 'static)> = Some(error);
        while let Some(err) = current {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                return Self::from_io_kind(io_err.kind());
            }
            if err.is::<std::collections::TryReserveError>() {
                return ErrorCategory::ResourceExhaustion;
            }
            current = err.source();
        }
        ErrorCategory::Other
    }

    /// Category for an I/O error kind.
    pub fn from_io_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::OutOfMemory => ErrorCategory::ResourceExhaustion,
            io::ErrorKind::PermissionDenied => ErrorCategory::Security,
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe => ErrorCategory::Network,
            _ => ErrorCategory::Io,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::Security => "security",
            ErrorCategory::Io => "io",
            ErrorCategory::Network => "network",
            ErrorCategory::Other => "other",
        };
        f.write_str(s)
    }
}
