//! 串口枚举

use crate::{LinkDeviceError, LinkDeviceErrorKind, LinkError};

/// 端口类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortKind {
    Usb,
    Bluetooth,
    Pci,
    Other,
}

/// 可用串口信息
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    pub name: String,
    pub kind: PortKind,
    /// 人类可读描述（USB 设备为厂商/产品名与 VID:PID）
    pub description: String,
}

/// 列出系统中的可用串口
///
/// macOS 上只保留 `/dev/cu.*`，`/dev/tty.*` 在打开时会等待载波信号。
pub fn list_ports() -> Result<Vec<PortInfo>, LinkError> {
    let ports = serialport::available_ports().map_err(|e| {
        LinkError::Device(LinkDeviceError::new(
            LinkDeviceErrorKind::Backend,
            format!("Failed to enumerate ports: {}", e),
        ))
    })?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (kind, description) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => {
                    let label = [info.manufacturer, info.product]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" ");
                    (
                        PortKind::Usb,
                        describe_usb(&label, info.vid, info.pid, info.serial_number.as_deref()),
                    )
                },
                serialport::SerialPortType::BluetoothPort => {
                    (PortKind::Bluetooth, "Bluetooth".to_string())
                },
                serialport::SerialPortType::PciPort => (PortKind::Pci, "PCI".to_string()),
                serialport::SerialPortType::Unknown => (PortKind::Other, "Unknown".to_string()),
            };
            PortInfo {
                name: p.port_name,
                kind,
                description,
            }
        })
        .collect())
}

fn describe_usb(label: &str, vid: u16, pid: u16, serial: Option<&str>) -> String {
    let mut out = if label.is_empty() {
        "USB".to_string()
    } else {
        label.to_string()
    };
    out.push_str(&format!(" ({:04x}:{:04x})", vid, pid));
    if let Some(serial) = serial {
        out.push_str(&format!(" SN {}", serial));
    }
    out
}
