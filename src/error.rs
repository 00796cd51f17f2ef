//! Error types for cellctl

use std::io;
use thiserror::Error;

/// ModemManager D-Bus error name prefix
const MM_ERROR_PREFIX: &str = "org.freedesktop.ModemManager1.Error.";

#[derive(Debug, Error)]
pub enum CellularError {
    /// Modem is not in the state required by the operation
    #[error("Wrong state: {0}")]
    WrongState(String),
    /// Network rejected the requested APN
    #[error("Invalid APN: {0}")]
    InvalidApn(String),
    /// Generic remote failure
    #[error("Operation failed: {0}")]
    OperationFailed(String),
    /// Same operation is already outstanding
    #[error("In progress: {0}")]
    InProgress(String),
    /// Remote object or local proxy not available
    #[error("Not found: {0}")]
    NotFound(String),
    /// Not supported
    #[error("Not supported: {0}")]
    NotSupported(String),
    /// Wrong PIN or PUK supplied
    #[error("Incorrect PIN: {0}")]
    IncorrectPin(String),
    /// SIM requires the PUK
    #[error("PIN blocked: {0}")]
    PinBlocked(String),
    /// Remote call did not complete before its deadline
    #[error("Timeout: {0}")]
    Timeout(String),
    /// Pending completion was discarded before it could fire
    #[error("Cancelled: {0}")]
    Cancelled(String),
    /// Invalid parameter
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// Transport level failure talking to the modem daemon
    #[error("IPC error: {0}")]
    Ipc(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
    /// Activation store error
    #[error("Store error: {0}")]
    Store(String),
}

impl CellularError {
    /// Classify a remote D-Bus error by name.
    pub fn from_remote(name: &str, message: &str) -> Self {
        let message = message.to_string();
        let Some(suffix) = name.strip_prefix(MM_ERROR_PREFIX) else {
            return match name {
                "org.freedesktop.DBus.Error.NoReply" | "org.freedesktop.DBus.Error.Timeout" => {
                    CellularError::Timeout(message)
                }
                "org.freedesktop.DBus.Error.UnknownObject"
                | "org.freedesktop.DBus.Error.UnknownMethod"
                | "org.freedesktop.DBus.Error.ServiceUnknown" => CellularError::NotFound(message),
                "org.freedesktop.DBus.Error.InvalidArgs" => CellularError::InvalidArguments(message),
                _ => CellularError::Ipc(format!("{}: {}", name, message)),
            };
        };

        match suffix {
            "Core.WrongState" => CellularError::WrongState(message),
            "Core.InProgress" => CellularError::InProgress(message),
            "Core.Unsupported" => CellularError::NotSupported(message),
            "Core.InvalidArgs" => CellularError::InvalidArguments(message),
            "Core.NotFound" => CellularError::NotFound(message),
            "Core.Cancelled" | "Core.Aborted" => CellularError::Cancelled(message),
            "MobileEquipment.GprsMissingOrUnknownApn"
            | "MobileEquipment.GprsServiceOptionNotSubscribed" => CellularError::InvalidApn(message),
            "MobileEquipment.IncorrectPassword" => CellularError::IncorrectPin(message),
            "MobileEquipment.SimPuk" | "MobileEquipment.SimPuk2" => {
                CellularError::PinBlocked(message)
            }
            _ => CellularError::OperationFailed(message),
        }
    }

    /// Whether the failure is the deferrable "modem not in expected state"
    pub fn is_wrong_state(&self) -> bool {
        matches!(self, CellularError::WrongState(_))
    }
}

impl From<zbus::Error> for CellularError {
    fn from(error: zbus::Error) -> Self {
        match error {
            zbus::Error::MethodError(name, description, _) => {
                CellularError::from_remote(name.as_str(), description.as_deref().unwrap_or(""))
            }
            zbus::Error::InputOutput(e) => CellularError::Ipc(e.to_string()),
            other => CellularError::Ipc(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for CellularError {
    fn from(error: toml::de::Error) -> Self {
        CellularError::Config(error.to_string())
    }
}

pub type CellularResult<T> = Result<T, CellularError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_classification() {
        assert!(CellularError::from_remote(
            "org.freedesktop.ModemManager1.Error.Core.WrongState",
            "modem locked"
        )
        .is_wrong_state());
        assert!(matches!(
            CellularError::from_remote(
                "org.freedesktop.ModemManager1.Error.MobileEquipment.GprsMissingOrUnknownApn",
                ""
            ),
            CellularError::InvalidApn(_)
        ));
        assert!(matches!(
            CellularError::from_remote("org.freedesktop.ModemManager1.Error.Core.Failed", ""),
            CellularError::OperationFailed(_)
        ));
        assert!(matches!(
            CellularError::from_remote("org.freedesktop.DBus.Error.NoReply", ""),
            CellularError::Timeout(_)
        ));
        assert!(matches!(
            CellularError::from_remote("com.example.Whatever", "boom"),
            CellularError::Ipc(_)
        ));
    }
}
