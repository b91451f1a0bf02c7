//! 设备语义层错误类型

use crate::family::DeviceFamily;
use deep_protocol::ProtocolError;
use thiserror::Error;

/// 协议解析器错误
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("{family} protocol does not support command '{command}'")]
    UnsupportedCommand { family: DeviceFamily, command: String },

    #[error("Invalid arguments for '{command}': {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error("Unknown device type for '{0}'")]
    UnknownDeviceType(String),

    #[error("No parser registered for {0}")]
    NoParser(DeviceFamily),

    #[error("Failed to encode command: {0}")]
    Protocol(#[from] ProtocolError),
}

/// 设备逻辑错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device '{device_id}' does not support command '{command}'")]
    UnsupportedCommand { device_id: String, command: String },

    #[error("Device '{device_id}': invalid arguments for '{command}': {reason}")]
    InvalidArguments {
        device_id: String,
        command: String,
        reason: String,
    },
}

/// 设备逻辑管理器错误
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Unknown device type for '{0}'")]
    UnknownDeviceType(String),

    #[error(transparent)]
    Command(#[from] DeviceError),

    #[error("Trajectory error for '{device_id}': {message}")]
    Trajectory { device_id: String, message: String },

    #[error("Device '{device_id}' is registered as {registered}, not {requested}")]
    FamilyMismatch {
        device_id: String,
        registered: DeviceFamily,
        requested: DeviceFamily,
    },
}

impl ManagerError {
    pub(crate) fn trajectory(device_id: &str, message: impl Into<String>) -> Self {
        Self::Trajectory {
            device_id: device_id.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ParserError::UnsupportedCommand {
            family: DeviceFamily::Arm,
            command: "noop".to_string(),
        };
        assert_eq!(err.to_string(), "DeepArm protocol does not support command 'noop'");

        let err = ManagerError::from(DeviceError::InvalidArguments {
            device_id: "DeepMotor01".to_string(),
            command: "set_rpm".to_string(),
            reason: "expected 1 numeric argument".to_string(),
        });
        assert!(err.to_string().contains("set_rpm"));
        assert!(matches!(err, ManagerError::Command(_)));
    }
}
