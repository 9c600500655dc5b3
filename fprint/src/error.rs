//! The two error domains applications see (§7): `DeviceError` for terminal
//! action failures and `DeviceRetry` for transient, user-actionable
//! conditions reported without aborting an enroll.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    General,
    NotSupported,
    NotOpen,
    AlreadyOpen,
    Busy,
    Cancelled,
    Proto,
    DataInvalid,
    DataFull,
    DataNotFound,
    Untrusted,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceError::General => "general device error",
            DeviceError::NotSupported => "operation not supported by this device",
            DeviceError::NotOpen => "device is not open",
            DeviceError::AlreadyOpen => "device is already open",
            DeviceError::Busy => "device has an action in flight",
            DeviceError::Cancelled => "action was cancelled",
            DeviceError::Proto => "driver protocol violation",
            DeviceError::DataInvalid => "stored print data is invalid",
            DeviceError::DataFull => "on-device storage is full",
            DeviceError::DataNotFound => "print not found",
            DeviceError::Untrusted => "cryptographic verification failed",
        };
        f.write_str(s)
    }
}

impl std::error::Error for DeviceError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRetry {
    General,
    TooShort,
    CenterFinger,
    RemoveFinger,
}

impl fmt::Display for DeviceRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceRetry::General => "scan did not succeed, try again",
            DeviceRetry::TooShort => "swipe was too short",
            DeviceRetry::CenterFinger => "center finger on the sensor",
            DeviceRetry::RemoveFinger => "remove finger and try again",
        };
        f.write_str(s)
    }
}

impl std::error::Error for DeviceRetry {}

/// The two ways an in-flight action can fail without completing
/// normally - a terminal device error, or (during enroll) a transient
/// retry condition reported without aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionError {
    Device(DeviceError),
    Retry(DeviceRetry),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::Device(e) => e.fmt(f),
            ActionError::Retry(r) => r.fmt(f),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<DeviceError> for ActionError {
    fn from(e: DeviceError) -> Self {
        ActionError::Device(e)
    }
}

impl From<DeviceRetry> for ActionError {
    fn from(e: DeviceRetry) -> Self {
        ActionError::Retry(e)
    }
}
