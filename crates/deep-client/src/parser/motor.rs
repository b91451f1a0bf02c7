//! DeepMotor 协议
//!
//! 电机走自定义串口文本协议，不经过 DBC：
//! - 输入：遥测行 `rpm_raw=1000,current_mv=500,temp_c=45,err_code=0`
//! - 输出：`SET_RPM:<4 位大写十六进制>\r\n`、`GET_STATUS\r\n`

use super::{FieldRule, InputRule, ProtocolParser, numeric_args};
use crate::error::ParserError;
use crate::family::DeviceFamily;
use crate::value::Value;
use tracing::debug;

pub const SET_MOTOR_RPM: &str = "set_motor_rpm";
pub const GET_MOTOR_STATUS: &str = "get_motor_status";

/// 允许的最大转速
pub const MAX_RPM: f64 = 0xFFFF as f64;

fn millivolts_to_amps(mv: f64) -> Value {
    Value::Float(mv / 1000.0)
}

const INPUT_RULES: &[InputRule] = &[
    InputRule::new("rpm_raw", FieldRule::Rename("motor_rpm")),
    InputRule::new("current_mv", FieldRule::Transform("motor_current", millivolts_to_amps)),
    InputRule::new("temp_c", FieldRule::Rename("motor_temperature")),
    InputRule::new("err_code", FieldRule::Rename("error_code")),
];

const COMMANDS: &[&str] = &[SET_MOTOR_RPM, GET_MOTOR_STATUS];

/// DeepMotor 协议解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorParser;

impl ProtocolParser for MotorParser {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Motor
    }

    fn input_rules(&self) -> &[InputRule] {
        INPUT_RULES
    }

    fn commands(&self) -> &[&'static str] {
        COMMANDS
    }

    fn generate_output(&self, command: &str, args: &[Value]) -> Result<Vec<u8>, ParserError> {
        let line = match command {
            SET_MOTOR_RPM => {
                let rpm = numeric_args(SET_MOTOR_RPM, args, 1)?[0];
                if !(0.0..=MAX_RPM).contains(&rpm) {
                    return Err(ParserError::InvalidArguments {
                        command: SET_MOTOR_RPM.to_string(),
                        reason: format!("rpm {rpm} out of range 0..=65535"),
                    });
                }
                format!("SET_RPM:{:04X}\r\n", rpm as u16)
            },
            GET_MOTOR_STATUS => {
                numeric_args(GET_MOTOR_STATUS, args, 0)?;
                "GET_STATUS\r\n".to_string()
            },
            _ => {
                return Err(ParserError::UnsupportedCommand {
                    family: DeviceFamily::Motor,
                    command: command.to_string(),
                });
            },
        };
        debug!("Generated {} command: {}", command, line.trim_end());
        Ok(line.into_bytes())
    }
}
