//! DeepArm 协议
//!
//! 输入来自 DBC 解码后的 CAN 信号；输出为 AT 行协议帧。
//!
//! | 命令 | CAN ID | 载荷 |
//! |------|--------|------|
//! | `move_joint_angles(a1..a6)` | 0x101 | 6 字节，每个角度截断到 0..=255 |
//! | `reset_arm()` | 0x102 | `FF` |
//! | `get_arm_status()` | 0x103 | `01` |

use super::{FieldRule, InputRule, ProtocolParser, numeric_args};
use crate::error::ParserError;
use crate::family::DeviceFamily;
use crate::value::Value;
use deep_protocol::codec;
use tracing::debug;

pub const MOVE_JOINT_ANGLES_ID: u32 = 0x101;
pub const RESET_ARM_ID: u32 = 0x102;
pub const GET_ARM_STATUS_ID: u32 = 0x103;

pub const MOVE_JOINT_ANGLES: &str = "move_joint_angles";
pub const RESET_ARM: &str = "reset_arm";
pub const GET_ARM_STATUS: &str = "get_arm_status";

const STATUS_LABELS: &[(i64, &str)] = &[(0, "ok"), (1, "warning"), (2, "error")];

const INPUT_RULES: &[InputRule] = &[
    InputRule::new("Joint1Angle", FieldRule::Rename("joint1_angle")),
    InputRule::new("Joint2Angle", FieldRule::Rename("joint2_angle")),
    InputRule::new("Joint3Angle", FieldRule::Rename("joint3_angle")),
    InputRule::new("Joint4Angle", FieldRule::Rename("joint4_angle")),
    InputRule::new("Joint5Angle", FieldRule::Rename("joint5_angle")),
    InputRule::new("Joint6Angle", FieldRule::Rename("joint6_angle")),
    InputRule::new("ArmTemperature", FieldRule::Rename("temperature")),
    InputRule::new("ArmStatusCode", FieldRule::Rename("current_status")),
    InputRule::new("ArmStatusCode", FieldRule::Lookup("status_text", STATUS_LABELS)),
    InputRule::new("EndEffectorX", FieldRule::Rename("end_effector_x")),
    InputRule::new("EndEffectorY", FieldRule::Rename("end_effector_y")),
    InputRule::new("EndEffectorZ", FieldRule::Rename("end_effector_z")),
    // 子电机遥测，由机械臂转发给对应子电机
    InputRule::new("Motor1Temperature", FieldRule::Rename("motor1_temperature")),
    InputRule::new("Motor2Temperature", FieldRule::Rename("motor2_temperature")),
    InputRule::new("Motor3Temperature", FieldRule::Rename("motor3_temperature")),
    InputRule::new("Motor4Temperature", FieldRule::Rename("motor4_temperature")),
    InputRule::new("Motor5Temperature", FieldRule::Rename("motor5_temperature")),
    InputRule::new("Motor6Temperature", FieldRule::Rename("motor6_temperature")),
    InputRule::new("Motor1ErrorCode", FieldRule::Rename("motor1_error_code")),
    InputRule::new("Motor2ErrorCode", FieldRule::Rename("motor2_error_code")),
    InputRule::new("Motor3ErrorCode", FieldRule::Rename("motor3_error_code")),
    InputRule::new("Motor4ErrorCode", FieldRule::Rename("motor4_error_code")),
    InputRule::new("Motor5ErrorCode", FieldRule::Rename("motor5_error_code")),
    InputRule::new("Motor6ErrorCode", FieldRule::Rename("motor6_error_code")),
];

const COMMANDS: &[&str] = &[MOVE_JOINT_ANGLES, RESET_ARM, GET_ARM_STATUS];

/// DeepArm 协议解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmParser;

impl ArmParser {
    fn encode_move_joint_angles(args: &[Value]) -> Result<Vec<u8>, ParserError> {
        let angles = numeric_args(MOVE_JOINT_ANGLES, args, 6)?;
        // 先夹到 0..=255 再向零截断
        let payload: Vec<u8> = angles.iter().map(|a| a.clamp(0.0, 255.0) as u8).collect();
        Ok(codec::encode(MOVE_JOINT_ANGLES_ID, &payload)?.into_bytes())
    }
}

impl ProtocolParser for ArmParser {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Arm
    }

    fn input_rules(&self) -> &[InputRule] {
        INPUT_RULES
    }

    fn commands(&self) -> &[&'static str] {
        COMMANDS
    }

    fn generate_output(&self, command: &str, args: &[Value]) -> Result<Vec<u8>, ParserError> {
        let bytes = match command {
            MOVE_JOINT_ANGLES => Self::encode_move_joint_angles(args)?,
            RESET_ARM => {
                numeric_args(RESET_ARM, args, 0)?;
                codec::encode(RESET_ARM_ID, &[0xFF])?.into_bytes()
            },
            GET_ARM_STATUS => {
                numeric_args(GET_ARM_STATUS, args, 0)?;
                codec::encode(GET_ARM_STATUS_ID, &[0x01])?.into_bytes()
            },
            _ => {
                return Err(ParserError::UnsupportedCommand {
                    family: DeviceFamily::Arm,
                    command: command.to_string(),
                });
            },
        };
        debug!("Generated {} command: {}", command, String::from_utf8_lossy(&bytes).trim_end());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deep_protocol::SignalMap;

    #[test]
    fn test_move_joint_angles_frame() {
        let args: Vec<Value> = [10, 20, 30, 40, 50, 60].into_iter().map(Value::from).collect();
        let bytes = ArmParser.generate_output(MOVE_JOINT_ANGLES, &args).unwrap();
        assert_eq!(bytes, b"AT101060A141E28323C\r\n");

        let frame = codec::decode("DeepArm01", std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(frame.arbitration_id(), 0x101);
        assert_eq!(frame.payload(), &[0x0A, 0x14, 0x1E, 0x28, 0x32, 0x3C]);
    }

    #[test]
    fn test_move_joint_angles_clamps() {
        let args = vec![
            Value::Int(-5),
            Value::Int(300),
            Value::Float(12.9),
            Value::Int(0),
            Value::Int(255),
            Value::Float(255.5),
        ];
        let bytes = ArmParser.generate_output(MOVE_JOINT_ANGLES, &args).unwrap();
        assert_eq!(bytes, b"AT1010600FF0C00FFFF\r\n");
    }

    #[test]
    fn test_move_joint_angles_invalid_args() {
        let err = ArmParser.generate_output(MOVE_JOINT_ANGLES, &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, ParserError::InvalidArguments { .. }));

        let mut args: Vec<Value> = (0..5).map(Value::from).collect();
        args.push(Value::from("up"));
        let err = ArmParser.generate_output(MOVE_JOINT_ANGLES, &args).unwrap_err();
        assert!(matches!(err, ParserError::InvalidArguments { .. }));
    }

    #[test]
    fn test_reset_and_status_frames() {
        assert_eq!(ArmParser.generate_output(RESET_ARM, &[]).unwrap(), b"AT10201FF\r\n");
        assert_eq!(ArmParser.generate_output(GET_ARM_STATUS, &[]).unwrap(), b"AT1030101\r\n");
        assert!(ArmParser.generate_output(RESET_ARM, &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_unsupported_command() {
        let err = ArmParser.generate_output("noop", &[]).unwrap_err();
        assert!(matches!(
            err,
            ParserError::UnsupportedCommand { family: DeviceFamily::Arm, .. }
        ));
    }

    #[test]
    fn test_parse_input() {
        let mut signals = SignalMap::new();
        signals.insert("Joint1Angle".to_string(), 170.0);
        signals.insert("ArmTemperature".to_string(), 75.5);
        signals.insert("ArmStatusCode".to_string(), 1.0);
        signals.insert("Motor3Temperature".to_string(), 40.0);
        signals.insert("Unrelated".to_string(), 1.0);

        let record = ArmParser.parse_input("DeepArm01", &signals);
        assert_eq!(record.device_id, "DeepArm01");
        assert_eq!(record.device_type, DeviceFamily::Arm);
        assert_eq!(record.get("joint1_angle"), Some(&Value::Int(170)));
        assert_eq!(record.get("temperature"), Some(&Value::Float(75.5)));
        assert_eq!(record.get("current_status"), Some(&Value::Int(1)));
        assert_eq!(record.get("status_text"), Some(&Value::from("warning")));
        assert_eq!(record.get("motor3_temperature"), Some(&Value::Int(40)));
        assert!(record.get("joint2_angle").is_none());
        assert_eq!(record.len(), 5);
    }
}
