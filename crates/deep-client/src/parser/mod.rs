//! 设备协议解析器
//!
//! 每个设备族一个解析器，负责两件事：
//! - 输入：把信号映射（DBC 解码结果或遥测行）按静态规则表转换为 [`SemanticRecord`]
//! - 输出：把协议命令名和参数编码为可直接写入串口的字节
//!
//! [`ParserRegistry`] 按设备族保存解析器，并把设备 ID 一次性绑定到设备族；
//! 新增设备族只需实现 [`ProtocolParser`] 并注册。

pub mod arm;
pub mod motor;

use crate::error::ParserError;
use crate::family::DeviceFamily;
use crate::record::SemanticRecord;
use crate::value::Value;
use deep_protocol::SignalMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

pub use arm::ArmParser;
pub use motor::MotorParser;

/// 字段转换规则
#[derive(Debug, Clone, Copy)]
pub enum FieldRule {
    /// 直传并重命名
    Rename(&'static str),
    /// 经函数转换
    Transform(&'static str, fn(f64) -> Value),
    /// 查表，未命中时直传原值
    Lookup(&'static str, &'static [(i64, &'static str)]),
}

impl FieldRule {
    pub fn target(&self) -> &'static str {
        match self {
            Self::Rename(target) | Self::Transform(target, _) | Self::Lookup(target, _) => target,
        }
    }

    fn apply(&self, raw: f64) -> Value {
        match self {
            Self::Rename(_) => Value::from_signal(raw),
            Self::Transform(_, f) => f(raw),
            Self::Lookup(_, table) => {
                let key = raw as i64;
                table
                    .iter()
                    .find(|(code, _)| *code == key && raw.fract() == 0.0)
                    .map(|(_, label)| Value::Text((*label).to_string()))
                    .unwrap_or_else(|| Value::from_signal(raw))
            },
        }
    }
}

/// 输入规则：信号名 → 语义字段
#[derive(Debug, Clone, Copy)]
pub struct InputRule {
    pub signal: &'static str,
    pub rule: FieldRule,
}

impl InputRule {
    pub const fn new(signal: &'static str, rule: FieldRule) -> Self {
        Self { signal, rule }
    }
}

/// 设备协议解析器
pub trait ProtocolParser: Send + Sync {
    fn family(&self) -> DeviceFamily;

    /// 输入规则表
    fn input_rules(&self) -> &[InputRule];

    /// 支持的协议命令名
    fn commands(&self) -> &[&'static str];

    /// 编码协议命令
    ///
    /// # 错误
    /// - `ParserError::UnsupportedCommand`: 命令未注册
    /// - `ParserError::InvalidArguments`: 参数个数或类型不符
    fn generate_output(&self, command: &str, args: &[Value]) -> Result<Vec<u8>, ParserError>;

    /// 应用输入规则；信号中缺失的键被跳过，规则表外的信号被忽略
    fn parse_input(&self, device_id: &str, signals: &SignalMap) -> SemanticRecord {
        let mut record = SemanticRecord::new(device_id, self.family());
        for input in self.input_rules() {
            match signals.get(input.signal) {
                Some(&raw) => record.insert(input.rule.target(), input.rule.apply(raw)),
                None => trace!("{}: signal {} not present", device_id, input.signal),
            }
        }
        record
    }

    fn supports(&self, command: &str) -> bool {
        self.commands().contains(&command)
    }
}

/// 校验参数全部为数值且个数正确
pub(crate) fn numeric_args(command: &str, args: &[Value], expected: usize) -> Result<Vec<f64>, ParserError> {
    if args.len() != expected {
        return Err(ParserError::InvalidArguments {
            command: command.to_string(),
            reason: format!("expected {} argument(s), got {}", expected, args.len()),
        });
    }
    args.iter()
        .map(|arg| {
            arg.as_f64().ok_or_else(|| ParserError::InvalidArguments {
                command: command.to_string(),
                reason: format!("argument '{arg}' is not a number"),
            })
        })
        .collect()
}

/// 解析器注册表
pub struct ParserRegistry {
    parsers: HashMap<DeviceFamily, Arc<dyn ProtocolParser>>,
    bindings: RwLock<HashMap<String, DeviceFamily>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ArmParser));
        registry.register(Arc::new(MotorParser));
        registry
    }
}

impl ParserRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, parser: Arc<dyn ProtocolParser>) {
        let family = parser.family();
        debug!(
            "Registered {} parser ({} input rules, {} commands)",
            family,
            parser.input_rules().len(),
            parser.commands().len()
        );
        self.parsers.insert(family, parser);
    }

    pub fn parser(&self, family: DeviceFamily) -> Option<&Arc<dyn ProtocolParser>> {
        self.parsers.get(&family)
    }

    pub fn families(&self) -> Vec<DeviceFamily> {
        self.parsers.keys().copied().collect()
    }

    /// 显式绑定设备 ID 到设备族（类型标签）
    pub fn bind(&self, device_id: &str, family: DeviceFamily) {
        self.bindings.write().insert(device_id.to_string(), family);
    }

    pub fn unbind(&self, device_id: &str) {
        self.bindings.write().remove(device_id);
    }

    /// 解析设备族：已有绑定优先，否则按已注册设备族的前缀匹配并缓存
    pub fn resolve(&self, device_id: &str) -> Result<DeviceFamily, ParserError> {
        if let Some(family) = self.bindings.read().get(device_id) {
            return Ok(*family);
        }

        let family = self
            .parsers
            .keys()
            .copied()
            .find(|family| device_id.starts_with(family.name()))
            .ok_or_else(|| ParserError::UnknownDeviceType(device_id.to_string()))?;
        self.bindings.write().insert(device_id.to_string(), family);
        Ok(family)
    }

    /// 把信号映射转换为语义记录
    pub fn parse_input(&self, device_id: &str, signals: &SignalMap) -> Result<SemanticRecord, ParserError> {
        let family = self.resolve(device_id)?;
        let parser = self.parser(family).ok_or(ParserError::NoParser(family))?;
        Ok(parser.parse_input(device_id, signals))
    }

    /// 按设备族编码协议命令
    pub fn generate_output(
        &self,
        family: DeviceFamily,
        command: &str,
        args: &[Value],
    ) -> Result<Vec<u8>, ParserError> {
        let parser = self.parser(family).ok_or(ParserError::NoParser(family))?;
        parser.generate_output(command, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_prefix_and_binding() {
        let registry = ParserRegistry::default();
        assert_eq!(registry.resolve("DeepArm01").unwrap(), DeviceFamily::Arm);
        assert_eq!(registry.resolve("DeepMotor01").unwrap(), DeviceFamily::Motor);
        assert!(matches!(
            registry.resolve("UnknownDevice123"),
            Err(ParserError::UnknownDeviceType(_))
        ));

        registry.bind("bench-rig", DeviceFamily::Motor);
        assert_eq!(registry.resolve("bench-rig").unwrap(), DeviceFamily::Motor);
        registry.unbind("bench-rig");
        assert!(registry.resolve("bench-rig").is_err());
    }

    #[test]
    fn test_empty_registry_resolves_nothing() {
        let registry = ParserRegistry::new();
        assert!(registry.families().is_empty());
        assert!(registry.resolve("DeepArm01").is_err());
        assert!(matches!(
            registry.generate_output(DeviceFamily::Arm, "reset_arm", &[]),
            Err(ParserError::NoParser(DeviceFamily::Arm))
        ));
    }

    #[test]
    fn test_field_rules() {
        assert_eq!(FieldRule::Rename("x").apply(3.0), Value::Int(3));
        assert_eq!(
            FieldRule::Transform("x", |v| Value::Float(v * 2.0)).apply(1.5),
            Value::Float(3.0)
        );

        const TABLE: &[(i64, &str)] = &[(0, "ok"), (2, "error")];
        assert_eq!(FieldRule::Lookup("x", TABLE).apply(2.0), Value::Text("error".into()));
        assert_eq!(FieldRule::Lookup("x", TABLE).apply(5.0), Value::Int(5));
        assert_eq!(FieldRule::Lookup("x", TABLE).apply(0.5), Value::Float(0.5));
    }

    #[test]
    fn test_numeric_args() {
        assert_eq!(numeric_args("c", &[Value::Int(1), Value::Float(2.5)], 2).unwrap(), vec![1.0, 2.5]);
        assert!(numeric_args("c", &[Value::Int(1)], 2).is_err());
        assert!(numeric_args("c", &[Value::from("x")], 1).is_err());
    }
}
