//! 传输层配置

use deep_can::LinkSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 串口传输配置（配置文件 `[serial]` 段）
///
/// 所有字段都有默认值，配置文件中缺失的字段按默认值补齐。
///
/// # Example
///
/// ```
/// use deep_driver::TransportConfig;
///
/// let config = TransportConfig {
///     reconnect_attempts: 3,
///     ..Default::default()
/// };
/// assert!(config.auto_reconnect);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// 打开端口时未指定波特率（0）所用的波特率
    pub default_baud_rate: u32,
    /// 链路读超时（毫秒），读循环按此间隔检查退出标志
    pub read_timeout_ms: u64,
    /// 写超时（毫秒）
    pub write_timeout_ms: u64,
    /// I/O 错误后是否自动重连
    pub auto_reconnect: bool,
    /// 最大重连次数
    pub reconnect_attempts: u32,
    /// 两次重连之间的间隔（毫秒）
    pub reconnect_delay_ms: u64,
    /// 每个订阅者的事件队列容量
    pub event_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_baud_rate: 9600,
            read_timeout_ms: 100,
            write_timeout_ms: 1000,
            auto_reconnect: true,
            reconnect_attempts: 5,
            reconnect_delay_ms: 2000,
            event_capacity: 1024,
        }
    }
}

impl TransportConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// 生成打开端口所需的链路参数（`baud_rate` 为 0 时取 `default_baud_rate`）
    pub fn link_settings(&self, baud_rate: u32) -> LinkSettings {
        LinkSettings {
            baud_rate: if baud_rate == 0 { self.default_baud_rate } else { baud_rate },
            read_timeout: self.read_timeout(),
            write_timeout: self.write_timeout(),
        }
    }
}
