//! 设备语义层
//!
//! 本 crate 把信号映射（[`deep_protocol::SignalMap`]）翻译成设备语义，并维护每台设备的状态：
//! - [`parser`]：设备族协议解析器（信号 → 语义记录，命令 → 设备字节）
//! - [`device`]：DeepArm / DeepMotor 设备逻辑（状态合并、阈值检查、命令校验）
//! - [`DeviceLogicManager`]：按设备 ID 路由语义记录与抽象命令，管理示教轨迹
//!
//! 本层不做任何 I/O；命令请求作为返回值交给上层编码发送，同时发布 [`DeviceEvent::CommandRequested`] 通知。

pub mod command;
pub mod device;
pub mod error;
pub mod family;
pub mod manager;
pub mod parser;
pub mod record;
mod teaching;
pub mod value;

pub use command::{AbstractCommand, CommandRequest};
pub use device::{
    Anomaly, ArmState, ArmStatusCode, DeepArm, DeepMotor, DeviceDetails, DeviceLogic, DeviceSnapshot, DeviceState,
    DeviceStatus, MotorState, Severity, create_device,
};
pub use error::{DeviceError, ManagerError, ParserError};
pub use family::DeviceFamily;
pub use manager::{DeviceEvent, DeviceLogicManager};
pub use parser::{ArmParser, FieldRule, InputRule, MotorParser, ParserRegistry, ProtocolParser};
pub use record::{Fields, SemanticRecord};
pub use value::Value;
