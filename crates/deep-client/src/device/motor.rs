//! DeepMotor 无刷电机

use super::{
    Anomaly, DeviceDetails, DeviceLogic, DeviceSnapshot, DeviceState, DeviceStatus, GET_STATUS, invalid_args,
    unsupported,
};
use crate::command::CommandRequest;
use crate::error::DeviceError;
use crate::family::DeviceFamily;
use crate::parser::motor::SET_MOTOR_RPM;
use crate::record::SemanticRecord;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// 电机温度告警阈值（°C）
pub const MOTOR_TEMPERATURE_LIMIT: f64 = 90.0;

pub const SET_RPM: &str = "set_rpm";

const COMMANDS: &[&str] = &[GET_STATUS, SET_RPM];

/// 电机特有状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    pub motor_rpm: i64,
    /// 电流（A）
    pub motor_current: f64,
    /// 温度（°C）
    pub motor_temperature: f64,
    pub error_code: i64,
}

/// 电机设备逻辑
#[derive(Debug, Clone)]
pub struct DeepMotor {
    state: DeviceState,
    motor: MotorState,
}

impl DeepMotor {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            state: DeviceState::new(device_id),
            motor: MotorState::default(),
        }
    }

    pub fn motor_state(&self) -> &MotorState {
        &self.motor
    }
}

impl DeviceLogic for DeepMotor {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Motor
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
            let applied = match key.as_str() {
                "motor_rpm" => value.as_i64().map(|v| self.motor.motor_rpm = v),
                "motor_current" => value.as_f64().map(|v| self.motor.motor_current = v),
                "motor_temperature" => value.as_f64().map(|v| self.motor.motor_temperature = v),
                "error_code" => value.as_i64().map(|v| self.motor.error_code = v),
                _ => Some(()),
            };
            if applied.is_none() {
                debug!("{}: ignoring non-numeric value {} for {}", self.state.device_id, value, key);
            }
        }
    }

    fn check_anomaly(&mut self) -> Vec<Anomaly> {
        let id = self.state.device_id.clone();
        let mut anomalies = Vec::new();

        if self.motor.motor_temperature > MOTOR_TEMPERATURE_LIMIT {
            anomalies.push(Anomaly::warning(
                &id,
                format!("motor temperature too high ({}°C)", self.motor.motor_temperature),
            ));
            self.state.connection_status = DeviceStatus::Warning;
        }
        if self.motor.error_code != 0 {
            anomalies.push(Anomaly::error(
                &id,
                format!("motor reported error code {}", self.motor.error_code),
            ));
            self.state.connection_status = DeviceStatus::Error;
        }
        anomalies
    }

    fn supported_commands(&self) -> &'static [&'static str] {
        COMMANDS
    }

    fn execute_abstract_command(&self, name: &str, args: &[Value]) -> Result<Option<CommandRequest>, DeviceError> {
        let id = &self.state.device_id;
        match name {
            SET_RPM => {
                let rpm = match args {
                    [value] if value.is_number() => value.as_i64().unwrap_or_default(),
                    _ => return Err(invalid_args(id, name, "expected 1 numeric argument")),
                };
                info!("{}: requesting rpm {}", id, rpm);
                Ok(Some(CommandRequest::new(
                    id.as_str(),
                    DeviceFamily::Motor,
                    SET_MOTOR_RPM,
                    vec![Value::Int(rpm)],
                )))
            },
            GET_STATUS => {
                debug!("{}: status {:?}", id, self.motor);
                Ok(None)
            },
            _ => Err(unsupported(id, name)),
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            common: self.state.clone(),
            details: DeviceDetails::DeepMotor(self.motor.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Severity;

    fn record() -> SemanticRecord {
        SemanticRecord::new("DeepMotor01", DeviceFamily::Motor)
    }

    #[test]
    fn test_update_merges_known_fields() {
        let mut motor = DeepMotor::new("DeepMotor01");
        motor.update_from_semantic(
            &record()
                .with("motor_rpm", 1000)
                .with("motor_current", 0.5)
                .with("motor_temperature", 45)
                .with("unknown_field", "ignored")
                .with("error_code", "bad"),
        );

        assert_eq!(motor.status(), DeviceStatus::Connected);
        assert!(motor.state().is_online);
        assert_eq!(motor.motor_state().motor_rpm, 1000);
        assert_eq!(motor.motor_state().motor_current, 0.5);
        assert_eq!(motor.motor_state().motor_temperature, 45.0);
        assert_eq!(motor.motor_state().error_code, 0);
    }

    #[test]
    fn test_over_temperature_warning() {
        let mut motor = DeepMotor::new("DeepMotor01");
        motor.update_from_semantic(&record().with("motor_temperature", 95));

        let anomalies = motor.check_anomaly();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::Warning);
        assert_eq!(motor.status(), DeviceStatus::Warning);
    }

    #[test]
    fn test_error_code_wins_over_warning() {
        let mut motor = DeepMotor::new("DeepMotor01");
        motor.update_from_semantic(&record().with("motor_temperature", 95).with("error_code", 3));

        let anomalies = motor.check_anomaly();
        assert_eq!(anomalies.len(), 2);
        assert_eq!(motor.status(), DeviceStatus::Error);

        // 新数据到达后恢复为 Connected
        motor.update_from_semantic(&record().with("motor_temperature", 40).with("error_code", 0));
        assert!(motor.check_anomaly().is_empty());
        assert_eq!(motor.status(), DeviceStatus::Connected);
    }

    #[test]
    fn test_commands() {
        let motor = DeepMotor::new("DeepMotor01");

        let request = motor.execute_abstract_command(SET_RPM, &[Value::Float(1500.7)]).unwrap().unwrap();
        assert_eq!(request.command, SET_MOTOR_RPM);
        assert_eq!(request.args, vec![Value::Int(1500)]);
        assert_eq!(request.family, DeviceFamily::Motor);

        assert_eq!(motor.execute_abstract_command(GET_STATUS, &[]).unwrap(), None);
        assert!(matches!(
            motor.execute_abstract_command(SET_RPM, &[Value::from("fast")]),
            Err(DeviceError::InvalidArguments { .. })
        ));
        assert!(matches!(
            motor.execute_abstract_command("move_joint_angles", &[]),
            Err(DeviceError::UnsupportedCommand { .. })
        ));
    }
}
