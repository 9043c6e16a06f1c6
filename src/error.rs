// src/error.rs - Error taxonomy for reporting, arbitration and delivery
use crate::property::PropertyIdentifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol error class returned alongside an [`ErrorCode`] in a service
/// level error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    Device,
    Object,
    Property,
    Services,
}

/// Protocol error codes surfaced to writers and remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidArrayIndex,
    WriteAccessDenied,
    ValueOutOfRange,
    InvalidDataType,
    InvalidTimeStamp,
    UnknownProperty,
    UnknownObject,
}

impl ErrorCode {
    /// Error class this code is reported under
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorCode::InvalidArrayIndex
            | ErrorCode::WriteAccessDenied
            | ErrorCode::ValueOutOfRange
            | ErrorCode::InvalidDataType
            | ErrorCode::UnknownProperty => ErrorClass::Property,
            ErrorCode::InvalidTimeStamp => ErrorClass::Services,
            ErrorCode::UnknownObject => ErrorClass::Object,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::InvalidArrayIndex => "invalid-array-index",
            ErrorCode::WriteAccessDenied => "write-access-denied",
            ErrorCode::ValueOutOfRange => "value-out-of-range",
            ErrorCode::InvalidDataType => "invalid-data-type",
            ErrorCode::InvalidTimeStamp => "invalid-time-stamp",
            ErrorCode::UnknownProperty => "unknown-property",
            ErrorCode::UnknownObject => "unknown-object",
        };
        f.write_str(name)
    }
}

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum BacError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Write rejected before any state was touched
    #[error("Validation error: {0}")]
    Validation(ErrorCode),

    /// Service level failure reported to a remote caller
    #[error("Protocol error: {0}")]
    Protocol(ErrorCode),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A single recipient could not be reached
    #[error("Delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },

    /// A notification consumer failed
    #[error("Listener error: {0}")]
    Listener(String),

    /// Requested property was not found in the store
    #[error("Property not found: {0}")]
    PropertyNotFound(PropertyIdentifier),

    /// Returned value type does not match the expected type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: &'static str, actual: &'static str },
}

impl BacError {
    /// Protocol error code carried by validation and protocol failures
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            BacError::Validation(code) | BacError::Protocol(code) => Some(*code),
            BacError::PropertyNotFound(_) => Some(ErrorCode::UnknownProperty),
            BacError::TypeMismatch { .. } => Some(ErrorCode::InvalidDataType),
            _ => None,
        }
    }

    /// True for failures raised synchronously before any mutation
    pub fn is_validation(&self) -> bool {
        matches!(self, BacError::Validation(_))
    }
}

/// Convenient alias over [`Result`] using [`BacError`]
pub type Result<T> = std::result::Result<T, BacError>;
