//! DeepArm 机械臂
//!
//! 机械臂由六个 DeepMotor 组成（`<id>_Motor1` .. `<id>_Motor6`）。子电机只用于状态
//! 聚合和异常检查；机械臂命令整体下发，不拆分为电机命令。

use super::motor::DeepMotor;
use super::{
    Anomaly, DeviceDetails, DeviceLogic, DeviceSnapshot, DeviceState, DeviceStatus, GET_STATUS, invalid_args,
    unsupported,
};
use crate::command::CommandRequest;
use crate::error::DeviceError;
use crate::family::DeviceFamily;
use crate::parser::arm::{GET_ARM_STATUS, MOVE_JOINT_ANGLES, RESET_ARM};
use crate::record::SemanticRecord;
use crate::value::Value;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// 整臂温度告警阈值（°C）
pub const ARM_TEMPERATURE_LIMIT: f64 = 85.0;

/// 子电机数量
pub const SUB_MOTOR_COUNT: usize = 6;

const COMMANDS: &[&str] = &[GET_STATUS, MOVE_JOINT_ANGLES, GET_ARM_STATUS, RESET_ARM];

/// 机械臂上报的状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ArmStatusCode {
    Ok = 0x00,
    Warning = 0x01,
    Error = 0x02,
}

impl ArmStatusCode {
    /// 2 及以上都视为错误，负数视为正常
    pub fn from_code(code: i64) -> Self {
        match u8::try_from(code) {
            Ok(raw) => Self::try_from(raw).unwrap_or(Self::Error),
            Err(_) if code > 0 => Self::Error,
            Err(_) => Self::Ok,
        }
    }
}

/// 机械臂特有状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmState {
    pub joint1_angle: f64,
    pub joint2_angle: f64,
    pub joint3_angle: f64,
    pub joint4_angle: f64,
    pub joint5_angle: f64,
    pub joint6_angle: f64,
    pub end_effector_x: f64,
    pub end_effector_y: f64,
    pub end_effector_z: f64,
    /// 整臂温度（°C）
    pub temperature: f64,
    /// 0 = 正常，1 = 警告，≥2 = 错误
    pub current_status: i64,
}

impl ArmState {
    pub fn joint_angles(&self) -> [f64; 6] {
        [
            self.joint1_angle,
            self.joint2_angle,
            self.joint3_angle,
            self.joint4_angle,
            self.joint5_angle,
            self.joint6_angle,
        ]
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut f64> {
        Some(match key {
            "joint1_angle" => &mut self.joint1_angle,
            "joint2_angle" => &mut self.joint2_angle,
            "joint3_angle" => &mut self.joint3_angle,
            "joint4_angle" => &mut self.joint4_angle,
            "joint5_angle" => &mut self.joint5_angle,
            "joint6_angle" => &mut self.joint6_angle,
            "end_effector_x" => &mut self.end_effector_x,
            "end_effector_y" => &mut self.end_effector_y,
            "end_effector_z" => &mut self.end_effector_z,
            "temperature" => &mut self.temperature,
            _ => return None,
        })
    }
}

/// 把 `motor3_temperature` 这类字段拆成（子电机序号 0..6，电机字段名）
fn sub_motor_field(key: &str) -> Option<(usize, &'static str)> {
    let rest = key.strip_prefix("motor")?;
    let (index, field) = rest.split_once('_')?;
    let index: usize = index.parse().ok()?;
    if !(1..=SUB_MOTOR_COUNT).contains(&index) {
        return None;
    }
    let field = match field {
        "temperature" => "motor_temperature",
        "error_code" => "error_code",
        "rpm" => "motor_rpm",
        "current" => "motor_current",
        _ => return None,
    };
    Some((index - 1, field))
}

/// 机械臂设备逻辑
#[derive(Debug, Clone)]
pub struct DeepArm {
    state: DeviceState,
    arm: ArmState,
    motors: Vec<DeepMotor>,
}

impl DeepArm {
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        let motors = (1..=SUB_MOTOR_COUNT)
            .map(|i| DeepMotor::new(format!("{device_id}_Motor{i}")))
            .collect();
        Self {
            state: DeviceState::new(device_id),
            arm: ArmState::default(),
            motors,
        }
    }

    pub fn arm_state(&self) -> &ArmState {
        &self.arm
    }

    pub fn sub_motors(&self) -> &[DeepMotor] {
        &self.motors
    }

    pub fn status_code(&self) -> ArmStatusCode {
        ArmStatusCode::from_code(self.arm.current_status)
    }

    fn forward_to_sub_motors(&mut self, record: &SemanticRecord) {
        let mut sub_records: Vec<Option<SemanticRecord>> = vec![None; SUB_MOTOR_COUNT];
        for (key, value) in &record.fields {
            if let Some((index, field)) = sub_motor_field(key) {
                sub_records[index]
                    .get_or_insert_with(|| SemanticRecord::new(self.motors[index].device_id(), DeviceFamily::Motor))
                    .insert(field, value.clone());
            }
        }
        for (motor, sub_record) in self.motors.iter_mut().zip(sub_records) {
            if let Some(sub_record) = sub_record {
                motor.update_from_semantic(&sub_record);
            }
        }
    }
}

impl DeviceLogic for DeepArm {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Arm
    }

    fn state(&self) -> &DeviceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }

    fn update_from_semantic(&mut self, record: &SemanticRecord) {
        self.state.touch(record);

        for (key, value) in &record.fields {
            if key == "current_status" {
                if let Some(code) = value.as_i64() {
                    self.arm.current_status = code;
                }
                continue;
            }
            match (self.arm.field_mut(key), value.as_f64()) {
                (Some(slot), Some(v)) => *slot = v,
                (Some(_), None) => {
                    debug!("{}: ignoring non-numeric value {} for {}", self.state.device_id, value, key)
                },
                (None, _) => {},
            }
        }

        self.forward_to_sub_motors(record);
    }

    fn check_anomaly(&mut self) -> Vec<Anomaly> {
        let id = self.state.device_id.clone();
        let mut anomalies = Vec::new();

        if self.arm.temperature > ARM_TEMPERATURE_LIMIT {
            anomalies.push(Anomaly::warning(
                &id,
                format!("arm temperature too high ({}°C)", self.arm.temperature),
            ));
            self.state.connection_status = DeviceStatus::Warning;
        }

        for motor in &mut self.motors {
            for anomaly in motor.check_anomaly() {
                anomalies.push(Anomaly {
                    device_id: id.clone(),
                    severity: anomaly.severity,
                    message: format!("sub-motor {}: {}", anomaly.device_id, anomaly.message),
                });
            }
        }

        match self.status_code() {
            ArmStatusCode::Ok => {},
            ArmStatusCode::Warning => {
                anomalies.push(Anomaly::warning(&id, "arm reported warning status"));
                self.state.connection_status = DeviceStatus::Warning;
            },
            ArmStatusCode::Error => {
                anomalies.push(Anomaly::error(
                    &id,
                    format!("arm reported error status {}", self.arm.current_status),
                ));
                self.state.connection_status = DeviceStatus::Error;
            },
        }
        anomalies
    }

    fn supported_commands(&self) -> &'static [&'static str] {
        COMMANDS
    }

    fn execute_abstract_command(&self, name: &str, args: &[Value]) -> Result<Option<CommandRequest>, DeviceError> {
        let id = &self.state.device_id;
        let request = |command: &str, args: Vec<Value>| -> Result<Option<CommandRequest>, DeviceError> {
            Ok(Some(CommandRequest::new(id.as_str(), DeviceFamily::Arm, command, args)))
        };

        match name {
            MOVE_JOINT_ANGLES => {
                if args.len() != 6 || !args.iter().all(Value::is_number) {
                    return Err(invalid_args(id, name, "expected 6 numeric joint angles"));
                }
                info!("{}: requesting joint move to {:?}", id, args);
                request(MOVE_JOINT_ANGLES, args.to_vec())
            },
            GET_ARM_STATUS | RESET_ARM => {
                if !args.is_empty() {
                    return Err(invalid_args(id, name, "takes no arguments"));
                }
                info!("{}: requesting {}", id, name);
                request(name, Vec::new())
            },
            GET_STATUS => {
                debug!("{}: status {:?}", id, self.arm);
                Ok(None)
            },
            _ => Err(unsupported(id, name)),
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            common: self.state.clone(),
            details: DeviceDetails::DeepArm(self.arm.clone()),
        }
    }

    fn joint_angles(&self) -> Option<[f64; 6]> {
        Some(self.arm.joint_angles())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Severity;

    fn record() -> SemanticRecord {
        SemanticRecord::new("DeepArm01", DeviceFamily::Arm)
    }

    #[test]
    fn test_sub_motors_created() {
        let arm = DeepArm::new("DeepArm01");
        let ids: Vec<&str> = arm.sub_motors().iter().map(|m| m.device_id()).collect();
        assert_eq!(
            ids,
            vec![
                "DeepArm01_Motor1",
                "DeepArm01_Motor2",
                "DeepArm01_Motor3",
                "DeepArm01_Motor4",
                "DeepArm01_Motor5",
                "DeepArm01_Motor6",
            ]
        );
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(ArmStatusCode::from_code(0), ArmStatusCode::Ok);
        assert_eq!(ArmStatusCode::from_code(1), ArmStatusCode::Warning);
        assert_eq!(ArmStatusCode::from_code(2), ArmStatusCode::Error);
        assert_eq!(ArmStatusCode::from_code(7), ArmStatusCode::Error);
        assert_eq!(ArmStatusCode::from_code(1000), ArmStatusCode::Error);
        assert_eq!(ArmStatusCode::from_code(-1), ArmStatusCode::Ok);
    }

    #[test]
    fn test_update_merges_fields() {
        let mut arm = DeepArm::new("DeepArm01");
        arm.update_from_semantic(
            &record()
                .with("joint1_angle", 170)
                .with("joint6_angle", 12.5)
                .with("temperature", 60)
                .with("current_status", 0)
                .with("status_text", "ok")
                .with("motor2_temperature", 50),
        );

        assert_eq!(arm.status(), DeviceStatus::Connected);
        assert_eq!(arm.joint_angles(), Some([170.0, 0.0, 0.0, 0.0, 0.0, 12.5]));
        assert_eq!(arm.arm_state().temperature, 60.0);
        assert_eq!(arm.sub_motors()[1].motor_state().motor_temperature, 50.0);
        assert_eq!(arm.sub_motors()[1].status(), DeviceStatus::Connected);
        assert_eq!(arm.sub_motors()[0].status(), DeviceStatus::Disconnected);
        assert!(arm.check_anomaly().is_empty());
    }

    #[test]
    fn test_over_temperature_warning() {
        let mut arm = DeepArm::new("DeepArm01");
        arm.update_from_semantic(&record().with("temperature", 86));
        let anomalies = arm.check_anomaly();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::Warning);
        assert_eq!(arm.status(), DeviceStatus::Warning);
    }

    #[test]
    fn test_error_status() {
        let mut arm = DeepArm::new("DeepArm01");
        arm.update_from_semantic(&record().with("temperature", 90).with("current_status", 2));
        let anomalies = arm.check_anomaly();
        assert_eq!(anomalies.len(), 2);
        assert_eq!(arm.status(), DeviceStatus::Error);
    }

    #[test]
    fn test_sub_motor_anomaly_propagated() {
        let mut arm = DeepArm::new("DeepArm01");
        arm.update_from_semantic(&record().with("motor4_error_code", 5));

        let anomalies = arm.check_anomaly();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].device_id, "DeepArm01");
        assert_eq!(anomalies[0].severity, Severity::Error);
        assert!(anomalies[0].message.contains("DeepArm01_Motor4"));
        // 子电机异常不改变整臂状态
        assert_eq!(arm.status(), DeviceStatus::Connected);
        assert_eq!(arm.sub_motors()[3].status(), DeviceStatus::Error);
    }

    #[test]
    fn test_commands() {
        let arm = DeepArm::new("DeepArm01");
        let angles: Vec<Value> = [10, 20, 30, 40, 50, 60].into_iter().map(Value::from).collect();

        let request = arm.execute_abstract_command(MOVE_JOINT_ANGLES, &angles).unwrap().unwrap();
        assert_eq!(request.command, MOVE_JOINT_ANGLES);
        assert_eq!(request.args, angles);

        let request = arm.execute_abstract_command(RESET_ARM, &[]).unwrap().unwrap();
        assert_eq!(request.command, RESET_ARM);
        let request = arm.execute_abstract_command(GET_ARM_STATUS, &[]).unwrap().unwrap();
        assert_eq!(request.command, GET_ARM_STATUS);
        assert_eq!(arm.execute_abstract_command(GET_STATUS, &[]).unwrap(), None);

        assert!(matches!(
            arm.execute_abstract_command(MOVE_JOINT_ANGLES, &angles[..5]),
            Err(DeviceError::InvalidArguments { .. })
        ));
        assert!(matches!(
            arm.execute_abstract_command("set_rpm", &[Value::Int(1)]),
            Err(DeviceError::UnsupportedCommand { .. })
        ));
    }

    #[test]
    fn test_sub_motor_field_parsing() {
        assert_eq!(sub_motor_field("motor1_temperature"), Some((0, "motor_temperature")));
        assert_eq!(sub_motor_field("motor6_rpm"), Some((5, "motor_rpm")));
        assert_eq!(sub_motor_field("motor7_rpm"), None);
        assert_eq!(sub_motor_field("motor0_rpm"), None);
        assert_eq!(sub_motor_field("motor_rpm"), None);
        assert_eq!(sub_motor_field("joint1_angle"), None);
    }
}
