//! 驱动层
//!
//! 设备控制系统的底层运行时：
//! - [`SerialTransport`]：串口打开/关闭、逐行读取、断线重连
//! - [`SignalBridge`]：按通道加载 DBC，帧与信号的相互转换
//! - [`WorkerPool`] 与 [`TaskScheduler`]：周期/延迟任务
//!
//! 各组件通过 [`EventBus`] 向上层发布事件，上层按需订阅。

pub mod bridge;
pub mod config;
mod error;
pub mod events;
pub mod pool;
pub mod scheduler;
mod thread;
pub mod transport;

pub use bridge::{BUSTYPE_SERIAL_BRIDGE, BridgeEvent, ChannelConfig, SignalBridge};
pub use config::TransportConfig;
pub use error::{BridgeError, DriverError, SchedulerError, TaskFailure, TransportError};
pub use events::EventBus;
pub use pool::{TaskEvent, TaskResult, WorkerPool, default_pool_size};
pub use scheduler::{TaskKind, TaskScheduler};
pub use transport::{SerialTransport, TransportEvent};
