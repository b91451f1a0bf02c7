//! # Deep SDK
//!
//! DeepArm / DeepMotor 设备控制的统一入口。
//!
//! ## 分层
//!
//! - [`deep_protocol`]: 帧、AT 行协议、DBC 信号数据库
//! - [`deep_can`]: 串口链路与 CAN 适配器抽象
//! - [`deep_driver`]: 串口传输、信号桥、事件总线、线程池与调度器
//! - [`deep_client`]: 协议解析器、设备逻辑与设备管理器
//! - [`deep_tools`]: 配置文件与轨迹文件
//!
//! 本 crate 在此之上提供 [`Coordinator`] 和日志初始化。
//!
//! ## 快速开始
//!
//! ```no_run
//! use deep_sdk::prelude::*;
//!
//! let config = AppConfig::load("deepwin.toml")?;
//! init_logging(&config.logging())?;
//!
//! let coordinator = CoordinatorBuilder::from_config(&config).build()?;
//! let settings = config.device_settings();
//! coordinator.connect_device(DeviceConfig::from_settings("DeepArm01", DeviceFamily::Arm, &settings))?;
//! coordinator.handle_device_control_request("DeepArm01", "move_joint_angles(10, 20, 30, 40, 50, 60)")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod coordinator;
mod error;
pub mod logging;

pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorEvent, DeviceConfig};
pub use error::SdkError;
pub use logging::init_logging;

pub use deep_can;
pub use deep_client;
pub use deep_driver;
pub use deep_protocol;
pub use deep_tools;

pub use deep_can::{PortInfo, PortKind, list_ports};
pub use deep_client::{
    AbstractCommand, Anomaly, CommandRequest, DeviceEvent, DeviceFamily, DeviceLogicManager, DeviceSnapshot,
    DeviceStatus, ParserRegistry, SemanticRecord, Severity, Value,
};
pub use deep_driver::{TaskEvent, TaskScheduler, TransportConfig, TransportEvent};
pub use deep_protocol::{DeepFrame, SignalMap};
pub use deep_tools::{AppConfig, DeviceSettings, LoggingConfig, Trajectory};

/// 常用类型
pub mod prelude {
    pub use crate::{
        AppConfig, Coordinator, CoordinatorBuilder, CoordinatorEvent, DeviceConfig, DeviceFamily, DeviceStatus,
        SdkError, SignalMap, Value, init_logging,
    };
}
