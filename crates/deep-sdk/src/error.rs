//! SDK 层错误类型

use deep_client::{ManagerError, ParserError};
use deep_driver::{BridgeError, SchedulerError, TransportError};
use deep_protocol::ProtocolError;
use deep_tools::ConfigError;
use thiserror::Error;

/// SDK 统一错误类型
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 设备未连接（没有可用的端口或通道）
    #[error("Device '{device_id}' is not connected")]
    NotConnected { device_id: String },

    /// 设备已连接
    #[error("Device '{device_id}' is already connected")]
    AlreadyConnected { device_id: String },

    /// 协调器已关闭
    #[error("Coordinator is shut down")]
    ShutDown,

    /// 后台线程创建失败
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// 日志系统初始化失败（过滤指令非法）
    #[error("Invalid log filter '{directive}': {message}")]
    Logging { directive: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SdkError::NotConnected {
            device_id: "DeepArm01".to_string(),
        };
        assert_eq!(err.to_string(), "Device 'DeepArm01' is not connected");

        let err: SdkError = ManagerError::UnknownDeviceType("Foo".to_string()).into();
        assert_eq!(err.to_string(), "Unknown device type for 'Foo'");

        let err: SdkError = SchedulerError::PoolClosed.into();
        assert!(matches!(err, SdkError::Scheduler(_)));

        let err: SdkError = SchedulerError::QueueFull { capacity: 8 }.into();
        assert!(matches!(err, SdkError::Scheduler(SchedulerError::QueueFull { capacity: 8 })));
        assert!(err.to_string().contains("queue is full"));
    }
}
