//! # Deep Link Layer
//!
//! 链路层抽象，屏蔽串口桥接与真实 CAN 适配器的差异。
//!
//! - 串口：[`LinkOpener`] 打开端口后得到一对独立的 [`RxLink`] / [`TxLink`]，
//!   读线程与发送方互不阻塞。
//! - CAN：[`CanAdapter`] 以帧为单位收发，Linux 下由 SocketCAN 实现。

use std::time::Duration;
use thiserror::Error;

pub use deep_protocol::DeepFrame;

pub mod ports;
pub mod serial;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use ports::{PortInfo, PortKind, list_ports};
pub use serial::SerialPortOpener;

#[cfg(target_os = "linux")]
pub use self::socketcan::SocketCanAdapter;

/// 链路层统一错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] LinkDeviceError),
    #[error("Operation timed out")]
    Timeout,
    #[error("Link not open")]
    NotOpen,
}

impl LinkError {
    /// 是否为不可恢复错误（设备不存在、无权限）
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Device(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDeviceErrorKind {
    Unknown,
    NotFound,
    AccessDenied,
    Busy,
    InvalidConfig,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct LinkDeviceError {
    pub kind: LinkDeviceErrorKind,
    pub message: String,
}

impl LinkDeviceError {
    pub fn new(kind: LinkDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            LinkDeviceErrorKind::AccessDenied | LinkDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for LinkDeviceError {
    fn from(message: String) -> Self {
        Self::new(LinkDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for LinkDeviceError {
    fn from(message: &str) -> Self {
        Self::new(LinkDeviceErrorKind::Unknown, message)
    }
}

/// 打开串口时使用的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// 单次读取的最长阻塞时间（读循环据此轮询退出标志）
    pub read_timeout: Duration,
    /// 单次写入的最长阻塞时间
    pub write_timeout: Duration,
}

impl LinkSettings {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(1),
        }
    }
}

/// 行接收端
pub trait RxLink: Send {
    /// 读取一行（已去除首尾空白）
    ///
    /// 在读超时内没有完整的行时返回 `Ok(None)`，调用方继续轮询即可。
    fn read_line(&mut self) -> Result<Option<String>, LinkError>;
}

/// 字节发送端
pub trait TxLink: Send {
    /// 写入全部字节并刷新
    ///
    /// # 错误
    /// - `LinkError::Timeout`: 超过写超时
    /// - `LinkError::Io`: 其他 IO 错误
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, LinkError>;
}

/// 已打开的串口：一对独立的收发端
pub struct LinkPair {
    pub rx: Box<dyn RxLink>,
    pub tx: Box<dyn TxLink>,
}

/// 串口打开器
///
/// 传输层在首次连接和自动重连时都通过它打开端口，
/// 测试中可替换为 `mock::MockOpener`（`mock` feature）。
pub trait LinkOpener: Send + Sync {
    fn open(&self, port: &str, settings: &LinkSettings) -> Result<LinkPair, LinkError>;
}

/// CAN 适配器（以帧为单位收发）
pub trait CanAdapter: Send {
    fn send(&mut self, frame: &DeepFrame) -> Result<(), LinkError>;
    fn receive(&mut self) -> Result<DeepFrame, LinkError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
    fn receive_timeout(&mut self, timeout: Duration) -> Result<DeepFrame, LinkError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }
    /// 非阻塞接收：无帧时返回 `Ok(None)`
    fn try_receive(&mut self) -> Result<Option<DeepFrame>, LinkError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(LinkError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_fatal_kinds() {
        assert!(LinkDeviceError::new(LinkDeviceErrorKind::NotFound, "x").is_fatal());
        assert!(LinkDeviceError::new(LinkDeviceErrorKind::AccessDenied, "x").is_fatal());
        assert!(!LinkDeviceError::new(LinkDeviceErrorKind::Busy, "x").is_fatal());
        assert!(!LinkError::Timeout.is_fatal());
    }

    #[test]
    fn test_device_error_from_str() {
        let err: LinkDeviceError = "boom".into();
        assert_eq!(err.kind, LinkDeviceErrorKind::Unknown);
        assert_eq!(err.to_string(), "Unknown: boom");
    }

    #[test]
    fn test_link_settings_default() {
        let settings = LinkSettings::new(115200);
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.write_timeout, Duration::from_secs(1));
    }
}
