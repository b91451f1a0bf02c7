//! 抽象命令与命令请求

use crate::family::DeviceFamily;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// 抽象命令：与线格式无关的设备请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractCommand {
    pub device_id: String,
    pub name: String,
    pub args: Vec<Value>,
}

impl AbstractCommand {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            args,
        }
    }

    /// 解析文本形式 `name(arg, arg, ...)`
    ///
    /// 没有括号时整个文本作为命令名；空参数被忽略。
    ///
    /// ```
    /// use deep_client::{AbstractCommand, Value};
    ///
    /// let cmd = AbstractCommand::parse("DeepMotor01", "set_rpm(1500)");
    /// assert_eq!(cmd.name, "set_rpm");
    /// assert_eq!(cmd.args, vec![Value::Int(1500)]);
    /// ```
    pub fn parse(device_id: impl Into<String>, text: &str) -> Self {
        let text = text.trim();
        let (name, args) = match text.find('(') {
            Some(open) => {
                let inner = &text[open + 1..];
                let inner = inner.strip_suffix(')').unwrap_or(inner);
                let args = inner
                    .split(',')
                    .map(str::trim)
                    .filter(|arg| !arg.is_empty())
                    .map(Value::parse_arg)
                    .collect();
                (text[..open].trim(), args)
            },
            None => (text, Vec::new()),
        };

        Self::new(device_id, name, args)
    }
}

/// 命令请求：设备逻辑校验通过后交给上层编码并发送
///
/// `command` 是协议层的命令名（例如设备命令 `set_rpm` 对应协议命令 `set_motor_rpm`）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub device_id: String,
    pub family: DeviceFamily,
    pub command: String,
    pub args: Vec<Value>,
}

impl CommandRequest {
    pub fn new(
        device_id: impl Into<String>,
        family: DeviceFamily,
        command: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            family,
            command: command.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_args() {
        let cmd = AbstractCommand::parse("DeepArm01", "move_joint_angles(10, 20.5, 30,40,50 , 60)");
        assert_eq!(cmd.device_id, "DeepArm01");
        assert_eq!(cmd.name, "move_joint_angles");
        assert_eq!(
            cmd.args,
            vec![
                Value::Int(10),
                Value::Float(20.5),
                Value::Int(30),
                Value::Int(40),
                Value::Int(50),
                Value::Int(60),
            ]
        );
    }

    #[test]
    fn test_parse_without_args() {
        let cmd = AbstractCommand::parse("DeepArm01", "reset_arm()");
        assert_eq!(cmd.name, "reset_arm");
        assert!(cmd.args.is_empty());

        let cmd = AbstractCommand::parse("DeepArm01", "  get_status ");
        assert_eq!(cmd.name, "get_status");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_parse_text_args() {
        let cmd = AbstractCommand::parse("DeepArm01", "play(wave, fast)");
        assert_eq!(cmd.args, vec![Value::from("wave"), Value::from("fast")]);
    }
}
