//! Unified Error Handling System
//!
//! This module defines centralized error types for dispsnap, shared by the
//! capture, reconciliation and apply stages and by both display services.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status reported by a failed native display service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeStatus {
    /// Feature not supported by this device or driver
    NotSupported,
    /// No driver-settings session or no active display session
    NoActiveSession,
    /// Display is not driven by this vendor's GPU
    DeviceNotFound,
    /// Buffers sized by a previous query are too small now
    InsufficientBuffer,
    InvalidParameter,
    BadConfiguration,
    GenFailure,
    AccessDenied,
    Other(i32),
}

impl NativeStatus {
    /// Maps a Win32 error code returned by the OS display configuration API.
    pub fn from_win32(code: u32) -> Self {
        match code {
            5 => NativeStatus::AccessDenied,
            31 => NativeStatus::GenFailure,
            50 => NativeStatus::NotSupported,
            87 => NativeStatus::InvalidParameter,
            122 => NativeStatus::InsufficientBuffer,
            1610 => NativeStatus::BadConfiguration,
            other => NativeStatus::Other(other as i32),
        }
    }

    /// Transient failures mean "this sub-feature is unavailable" and never
    /// abort a capture.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NativeStatus::NotSupported | NativeStatus::NoActiveSession | NativeStatus::DeviceNotFound
        )
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeStatus::NotSupported => write!(f, "not supported"),
            NativeStatus::NoActiveSession => write!(f, "no active session"),
            NativeStatus::DeviceNotFound => write!(f, "device not found"),
            NativeStatus::InsufficientBuffer => write!(f, "insufficient buffer"),
            NativeStatus::InvalidParameter => write!(f, "invalid parameter"),
            NativeStatus::BadConfiguration => write!(f, "bad configuration"),
            NativeStatus::GenFailure => write!(f, "general failure"),
            NativeStatus::AccessDenied => write!(f, "access denied"),
            NativeStatus::Other(code) => write!(f, "status {}", code),
        }
    }
}

/// Enumeration of all error types in the application
#[derive(Error, Debug)]
pub enum DisplayError {
    /// A native service call failed
    #[error("{backend} call {call} failed: {status}")]
    NativeCall {
        backend: &'static str,
        call: &'static str,
        status: NativeStatus,
    },

    /// Path/mode buffers changed size twice in a row during one capture
    #[error("Display configuration kept changing while querying {0}")]
    BufferRace(&'static str),

    /// Saved displays are not connected right now
    #[error("Configuration not possible, missing displays: {}", .missing.join(", "))]
    NotPossible { missing: Vec<String> },

    /// Every paths/modes apply strategy failed
    #[error("Applying paths and modes failed after {attempts} attempt(s): {last}")]
    ApplyFailed { attempts: usize, last: NativeStatus },

    /// Mosaic topology could not be changed
    #[error("Topology change failed: {0}")]
    TopologyFailed(String),

    /// Invalid arguments error
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// System I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Data conversion error
    #[error("Conversion error: {0}")]
    ConversionError(String),

    /// Resource not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Generic system error
    #[error("System error: {0}")]
    SystemError(String),
}

impl DisplayError {
    pub fn native(backend: &'static str, call: &'static str, status: NativeStatus) -> Self {
        DisplayError::NativeCall {
            backend,
            call,
            status,
        }
    }

    /// Native status carried by this error, if it came from a service call.
    pub fn status(&self) -> Option<NativeStatus> {
        match self {
            DisplayError::NativeCall { status, .. } => Some(*status),
            DisplayError::ApplyFailed { last, .. } => Some(*last),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.status().is_some_and(|status| status.is_transient())
    }
}

impl From<serde_json::Error> for DisplayError {
    fn from(error: serde_json::Error) -> Self {
        DisplayError::ConversionError(error.to_string())
    }
}

impl From<toml::ser::Error> for DisplayError {
    fn from(error: toml::ser::Error) -> Self {
        DisplayError::SystemError(error.to_string())
    }
}

impl From<toml::de::Error> for DisplayError {
    fn from(error: toml::de::Error) -> Self {
        DisplayError::SystemError(error.to_string())
    }
}

/// Standardized result type for the entire application
pub type Result<T> = std::result::Result<T, DisplayError>;
