//! 设备状态与逻辑
//!
//! 每台设备一个 [`DeviceLogic`] 实例，持有该设备的状态并负责：
//! - 合并语义记录（[`DeviceLogic::update_from_semantic`]）
//! - 阈值检查（[`DeviceLogic::check_anomaly`]），只修改连接状态
//! - 校验抽象命令并生成 [`CommandRequest`]，本身不做任何 I/O

pub mod arm;
pub mod motor;

use crate::command::CommandRequest;
use crate::error::DeviceError;
use crate::family::DeviceFamily;
use crate::record::SemanticRecord;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use arm::{ArmState, ArmStatusCode, DeepArm};
pub use motor::{DeepMotor, MotorState};

/// 本地查询当前状态的通用命令
pub const GET_STATUS: &str = "get_status";

/// 连接/运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceStatus {
    #[default]
    Disconnected,
    Connected,
    Idle,
    Working,
    Error,
    Warning,
    Teaching,
    Playing,
}

/// 所有设备共有的状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: String,
    pub connection_status: DeviceStatus,
    /// 最近一次接收数据的时间（Unix 毫秒），单调不减
    pub last_active_time: u64,
    pub firmware_version: String,
    pub is_online: bool,
}

impl DeviceState {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            connection_status: DeviceStatus::Disconnected,
            last_active_time: 0,
            firmware_version: "Unknown".to_string(),
            is_online: false,
        }
    }

    /// 接收到一条语义记录：刷新活跃时间并标记在线
    pub(crate) fn touch(&mut self, record: &SemanticRecord) {
        self.last_active_time = self.last_active_time.max(unix_millis());
        self.is_online = true;
        self.connection_status = DeviceStatus::Connected;
        if let Some(version) = record.get("firmware_version").and_then(Value::as_str) {
            self.firmware_version = version.to_string();
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 异常严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// 阈值检查产生的异常事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub device_id: String,
    pub severity: Severity,
    pub message: String,
}

impl Anomaly {
    pub fn warning(device_id: &str, message: impl Into<String>) -> Self {
        Self {
            device_id: device_id.to_string(),
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(device_id: &str, message: impl Into<String>) -> Self {
        Self {
            device_id: device_id.to_string(),
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// 设备族特有状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "device_type")]
pub enum DeviceDetails {
    DeepArm(ArmState),
    DeepMotor(MotorState),
}

/// 设备状态快照（用于状态事件，可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(flatten)]
    pub common: DeviceState,
    #[serde(flatten)]
    pub details: DeviceDetails,
}

impl DeviceSnapshot {
    pub fn device_id(&self) -> &str {
        &self.common.device_id
    }

    pub fn status(&self) -> DeviceStatus {
        self.common.connection_status
    }

    pub fn family(&self) -> DeviceFamily {
        match self.details {
            DeviceDetails::DeepArm(_) => DeviceFamily::Arm,
            DeviceDetails::DeepMotor(_) => DeviceFamily::Motor,
        }
    }
}

/// 设备逻辑
pub trait DeviceLogic: Send {
    fn family(&self) -> DeviceFamily;

    fn state(&self) -> &DeviceState;

    fn state_mut(&mut self) -> &mut DeviceState;

    fn device_id(&self) -> &str {
        &self.state().device_id
    }

    fn status(&self) -> DeviceStatus {
        self.state().connection_status
    }

    /// 由上层（示教、回放）覆盖连接状态
    fn set_status(&mut self, status: DeviceStatus) {
        self.state_mut().connection_status = status;
    }

    /// 合并已知字段，忽略未知字段
    fn update_from_semantic(&mut self, record: &SemanticRecord);

    /// 阈值检查
    fn check_anomaly(&mut self) -> Vec<Anomaly>;

    /// 支持的抽象命令
    fn supported_commands(&self) -> &'static [&'static str];

    /// 校验抽象命令
    ///
    /// 返回 `Ok(None)` 表示命令在本地完成（如 `get_status`），不需要发送。
    fn execute_abstract_command(&self, name: &str, args: &[Value]) -> Result<Option<CommandRequest>, DeviceError>;

    fn snapshot(&self) -> DeviceSnapshot;

    /// 当前关节角度（只有机械臂有）
    fn joint_angles(&self) -> Option<[f64; 6]> {
        None
    }
}

/// 按设备族创建设备逻辑实例
pub fn create_device(device_id: &str, family: DeviceFamily) -> Box<dyn DeviceLogic> {
    match family {
        DeviceFamily::Arm => Box::new(DeepArm::new(device_id)),
        DeviceFamily::Motor => Box::new(DeepMotor::new(device_id)),
    }
}

pub(crate) fn unsupported(device_id: &str, command: &str) -> DeviceError {
    DeviceError::UnsupportedCommand {
        device_id: device_id.to_string(),
        command: command.to_string(),
    }
}

pub(crate) fn invalid_args(device_id: &str, command: &str, reason: impl Into<String>) -> DeviceError {
    DeviceError::InvalidArguments {
        device_id: device_id.to_string(),
        command: command.to_string(),
        reason: reason.into(),
    }
}
