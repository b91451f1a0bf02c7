//! 驱动层错误类型定义

use deep_can::LinkError;
use deep_protocol::{DbcError, ProtocolError};
use thiserror::Error;

/// 串口传输错误
#[derive(Error, Debug)]
pub enum TransportError {
    /// 端口已打开（读循环仍在运行）
    #[error("Port {port} is already open")]
    AlreadyOpen { port: String },

    /// 打开端口失败
    #[error("Failed to connect {port}: {source}")]
    Connect {
        port: String,
        #[source]
        source: LinkError,
    },

    /// 端口未连接（未打开、已关闭或正在重连）
    #[error("Port {port} is not connected")]
    NotConnected { port: String },

    /// 超过写超时
    #[error("Write to {port} timed out")]
    WriteTimeout { port: String },

    /// 写入失败
    #[error("Write to {port} failed: {source}")]
    Write {
        port: String,
        #[source]
        source: LinkError,
    },

    /// 读线程创建失败
    #[error("Failed to spawn read loop for {port}: {source}")]
    Spawn {
        port: String,
        #[source]
        source: std::io::Error,
    },
}

/// 信号桥错误
#[derive(Error, Debug)]
pub enum BridgeError {
    /// DBC 加载失败
    #[error("Failed to load DBC for channel {channel}: {source}")]
    Load {
        channel: String,
        #[source]
        source: DbcError,
    },

    /// 报文 ID 不在数据库中（调用方通常以 debug 级别记录后跳过）
    #[error("Unknown message id 0x{message_id:X} on channel {channel}")]
    UnknownMessageId { channel: String, message_id: u32 },

    #[error("Decode failed on channel {channel}: {source}")]
    Decode {
        channel: String,
        #[source]
        source: DbcError,
    },

    #[error("Encode failed on channel {channel}: {source}")]
    Encode {
        channel: String,
        #[source]
        source: DbcError,
    },

    /// 通道未连接或数据库未加载
    #[error("Channel {channel} is not ready")]
    NotReady { channel: String },

    /// CAN 适配器错误
    #[error("Adapter error on channel {channel}: {message}")]
    Adapter { channel: String, message: String },
}

/// 调度器错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// 工作池已关闭
    #[error("Worker pool is shut down")]
    PoolClosed,

    /// 待执行队列已满，任务被拒绝
    #[error("Worker pool queue is full ({capacity} pending), task rejected")]
    QueueFull { capacity: usize },

    /// 调度器已关闭
    #[error("Scheduler is shut down")]
    Stopped,

    /// 线程创建失败
    #[error("Failed to spawn thread: {0}")]
    Spawn(String),
}

/// 任务执行失败（返回错误或 panic）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Task {task_id} failed: {cause}")]
pub struct TaskFailure {
    pub task_id: String,
    pub cause: String,
}

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// 协议编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::from(TransportError::NotConnected {
            port: "COM1".to_string(),
        });
        assert_eq!(err.to_string(), "Transport error: Port COM1 is not connected");

        let err = DriverError::from(BridgeError::UnknownMessageId {
            channel: "DeepArm_01".to_string(),
            message_id: 0x1FF,
        });
        assert!(err.to_string().contains("0x1FF"));

        let err = DriverError::from(SchedulerError::PoolClosed);
        assert_eq!(err.to_string(), "Scheduler error: Worker pool is shut down");

        let err = DriverError::from(SchedulerError::QueueFull { capacity: 64 });
        assert_eq!(
            err.to_string(),
            "Scheduler error: Worker pool queue is full (64 pending), task rejected"
        );
    }

    #[test]
    fn test_from_link_error() {
        let err: DriverError = LinkError::Timeout.into();
        assert!(matches!(err, DriverError::Link(LinkError::Timeout)));
    }

    #[test]
    fn test_task_failure_display() {
        let failure = TaskFailure {
            task_id: "poll".to_string(),
            cause: "boom".to_string(),
        };
        assert_eq!(failure.to_string(), "Task poll failed: boom");
    }
}
