//! SocketCAN 适配器（仅 Linux）
//!
//! 用于适配器模式的信号桥：直接从内核 CAN 接口收发帧，
//! 帧的 `channel` 字段为接口名。
//!
//! 接口的波特率由系统工具（`ip link`）配置，不在应用层设置。

use crate::{CanAdapter, DeepFrame, LinkDeviceError, LinkDeviceErrorKind, LinkError};
use socketcan::{
    BlockingCan, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId,
};
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{trace, warn};

/// 最小读超时（SO_RCVTIMEO 为 0 表示永久阻塞，因此零超时按 1ms 处理）
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// SocketCAN 适配器
///
/// # 示例
///
/// ```no_run
/// use deep_can::{CanAdapter, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::new("can0").unwrap();
/// if let Some(frame) = adapter.try_receive().unwrap() {
///     println!("0x{:X} {}", frame.arbitration_id(), frame.payload_hex());
/// }
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    socket: CanSocket,
    interface: String,
    read_timeout: Duration,
}

impl SocketCanAdapter {
    /// 打开 CAN 接口
    ///
    /// # 错误
    /// - `LinkError::Device`: 接口不存在或无法打开
    /// - `LinkError::Io`: 设置读超时失败
    pub fn new(interface: impl Into<String>) -> Result<Self, LinkError> {
        let interface = interface.into();

        let socket = CanSocket::open(&interface).map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::NotFound => LinkDeviceErrorKind::NotFound,
                ErrorKind::PermissionDenied => LinkDeviceErrorKind::AccessDenied,
                _ => LinkDeviceErrorKind::Backend,
            };
            LinkError::Device(LinkDeviceError::new(
                kind,
                format!("Failed to open CAN interface '{}': {}", interface, e),
            ))
        })?;

        let read_timeout = Duration::from_millis(10);
        socket.set_read_timeout(read_timeout).map_err(LinkError::Io)?;

        trace!("SocketCAN interface '{}' opened", interface);

        Ok(Self {
            socket,
            interface,
            read_timeout,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 设置读超时
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), LinkError> {
        let timeout = timeout.max(MIN_READ_TIMEOUT);
        self.socket.set_read_timeout(timeout).map_err(LinkError::Io)?;
        self.read_timeout = timeout;
        Ok(())
    }

    fn to_can_frame(frame: &DeepFrame) -> Result<CanFrame, LinkError> {
        let id = frame.arbitration_id();
        let built = if frame.is_extended_id() || id > deep_protocol::MAX_STANDARD_ID {
            ExtendedId::new(id).and_then(|id| CanFrame::new(id, frame.payload()))
        } else {
            StandardId::new(id as u16).and_then(|id| CanFrame::new(id, frame.payload()))
        };
        built.ok_or_else(|| {
            LinkError::Device(LinkDeviceError::new(
                LinkDeviceErrorKind::InvalidFrame,
                format!("Failed to create CAN frame with ID 0x{:X}", id),
            ))
        })
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: &DeepFrame) -> Result<(), LinkError> {
        let can_frame = Self::to_can_frame(frame)?;
        self.socket.transmit(&can_frame).map_err(|e| {
            LinkError::Io(std::io::Error::other(format!(
                "SocketCAN transmit error: {}",
                e
            )))
        })?;
        trace!(
            "Sent CAN frame on '{}': ID=0x{:X}, len={}",
            self.interface,
            frame.arbitration_id(),
            frame.len()
        );
        Ok(())
    }

    /// 接收数据帧，错误帧与远程帧被跳过
    fn receive(&mut self) -> Result<DeepFrame, LinkError> {
        loop {
            let can_frame = match self.socket.read_frame() {
                Ok(f) => f,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(LinkError::Timeout);
                },
                Err(e) => return Err(LinkError::Io(e)),
            };

            if let CanFrame::Error(err) = &can_frame {
                warn!("Error frame on '{}': {:?}", self.interface, err);
                continue;
            }
            if let CanFrame::Remote(_) = &can_frame {
                continue;
            }

            let data = can_frame.data();
            let len = data.len().min(deep_protocol::MAX_PAYLOAD_LEN);
            let frame = DeepFrame::new(self.interface.as_str(), can_frame.raw_id(), &data[..len])
                .map_err(|e| {
                    LinkError::Device(LinkDeviceError::new(
                        LinkDeviceErrorKind::InvalidFrame,
                        e.to_string(),
                    ))
                })?
                .with_extended_id(can_frame.is_extended());

            trace!(
                "Received CAN frame on '{}': ID=0x{:X}, len={}",
                self.interface,
                frame.arbitration_id(),
                frame.len()
            );
            return Ok(frame);
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.set_read_timeout(timeout) {
            warn!("Failed to set receive timeout: {}", e);
        }
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<DeepFrame, LinkError> {
        let old_timeout = self.read_timeout;
        self.set_read_timeout(timeout)?;
        let result = self.receive();
        let _ = self.set_read_timeout(old_timeout);
        result
    }
}

impl Drop for SocketCanAdapter {
    fn drop(&mut self) {
        trace!("[Auto-Drop] SocketCAN interface '{}' closed", self.interface);
    }
}
