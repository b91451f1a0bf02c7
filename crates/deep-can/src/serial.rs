//! `serialport` 后端
//!
//! 打开后通过 `try_clone()` 得到独立的写句柄：读端持有原句柄做行缓冲，
//! 写端持有克隆句柄并使用写超时，两者可以在不同线程中并发使用。

use crate::{LinkDeviceError, LinkDeviceErrorKind, LinkError, LinkOpener, LinkPair, LinkSettings, RxLink, TxLink};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use tracing::{trace, warn};

/// 单行最大长度，超过后丢弃缓冲区（防止无换行的噪声占满内存）
const MAX_LINE_LEN: usize = 4096;

/// 基于 `serialport` 的打开器
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortOpener;

impl LinkOpener for SerialPortOpener {
    fn open(&self, port: &str, settings: &LinkSettings) -> Result<LinkPair, LinkError> {
        let rx_port = serialport::new(port, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| map_serial_error(port, e))?;

        if let Err(e) = rx_port.clear(serialport::ClearBuffer::All) {
            warn!("Failed to clear buffers on '{}': {}", port, e);
        }

        let mut tx_port = rx_port.try_clone().map_err(|e| map_serial_error(port, e))?;
        tx_port
            .set_timeout(settings.write_timeout)
            .map_err(|e| map_serial_error(port, e))?;

        trace!("Serial port '{}' opened at {} baud", port, settings.baud_rate);

        Ok(LinkPair {
            rx: Box::new(SerialRx::new(port, rx_port)),
            tx: Box::new(SerialTx {
                port: port.to_string(),
                inner: tx_port,
            }),
        })
    }
}

fn map_serial_error(port: &str, e: serialport::Error) -> LinkError {
    let kind = match e.kind {
        serialport::ErrorKind::NoDevice => LinkDeviceErrorKind::NotFound,
        serialport::ErrorKind::InvalidInput => LinkDeviceErrorKind::InvalidConfig,
        serialport::ErrorKind::Io(ErrorKind::NotFound) => LinkDeviceErrorKind::NotFound,
        serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => LinkDeviceErrorKind::AccessDenied,
        serialport::ErrorKind::Io(ErrorKind::AddrInUse) => LinkDeviceErrorKind::Busy,
        serialport::ErrorKind::Io(_) => LinkDeviceErrorKind::Backend,
        serialport::ErrorKind::Unknown => LinkDeviceErrorKind::Unknown,
    };
    LinkError::Device(LinkDeviceError::new(
        kind,
        format!("Failed to open serial port '{}': {}", port, e.description),
    ))
}

/// 行缓冲
///
/// 将任意切分的字节流还原为以 `\n` 结尾的行。
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_LINE_LEN && !self.buf.contains(&b'\n') {
            warn!("Discarding {} bytes without line terminator", self.buf.len());
            self.buf.clear();
        }
    }

    /// 取出下一行，空行被跳过
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

struct SerialRx {
    port: String,
    inner: Box<dyn SerialPort>,
    lines: LineBuffer,
}

impl SerialRx {
    fn new(port: &str, inner: Box<dyn SerialPort>) -> Self {
        Self {
            port: port.to_string(),
            inner,
            lines: LineBuffer::new(),
        }
    }
}

impl RxLink for SerialRx {
    fn read_line(&mut self) -> Result<Option<String>, LinkError> {
        if let Some(line) = self.lines.next_line() {
            return Ok(Some(line));
        }

        let mut chunk = [0u8; 256];
        match self.inner.read(&mut chunk) {
            Ok(0) => Err(LinkError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("serial port '{}' closed", self.port),
            ))),
            Ok(n) => {
                self.lines.extend(&chunk[..n]);
                Ok(self.lines.next_line())
            },
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

struct SerialTx {
    port: String,
    inner: Box<dyn SerialPort>,
}

impl TxLink for SerialTx {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, LinkError> {
        match self.inner.write_all(bytes).and_then(|_| self.inner.flush()) {
            Ok(()) => {
                trace!("Wrote {} bytes to '{}'", bytes.len(), self.port);
                Ok(bytes.len())
            },
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Err(LinkError::Timeout),
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}
