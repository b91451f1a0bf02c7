//! DBC 信号数据库
//!
//! 使用 `can-dbc` 解析 DBC 文本，转换为只读的消息/信号布局表，
//! 并在此基础上实现位级的信号解码与编码。
//!
//! 支持：
//! - Intel（小端，`@1`）与 Motorola（大端，`@0`）字节序
//! - 有符号 / 无符号原始值
//! - `factor` / `offset` 物理值换算
//! - 简单多路复用（`M` / `mN`）
//!
//! 报文长度限制为经典 CAN 的 8 字节。

use crate::{DeepFrame, MAX_PAYLOAD_LEN, SignalMap};
use can_dbc::{ByteOrder as DbcByteOrder, MultiplexIndicator, ValueType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 29-bit 帧 ID 掩码（去除 DBC 中的扩展帧标志位）
const CAN_ID_MASK: u32 = 0x1FFF_FFFF;

/// DBC 相关错误
#[derive(Error, Debug)]
pub enum DbcError {
    /// 文件读取失败
    #[error("Failed to read DBC file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// DBC 语法错误
    #[error("Failed to parse DBC: {0}")]
    Parse(String),

    /// 信号布局非法（超出 64 位窗口、长度为 0、factor 为 0）
    #[error("Invalid layout for signal {signal} in message 0x{message_id:X}")]
    InvalidSignal { message_id: u32, signal: String },

    /// 数据库中不存在该报文 ID
    #[error("Unknown message id 0x{0:X}")]
    UnknownMessageId(u32),

    /// 报文长度超过经典 CAN 帧
    #[error("Message 0x{message_id:X} declares {size} bytes (max {MAX_PAYLOAD_LEN})")]
    UnsupportedMessageSize { message_id: u32, size: usize },

    /// 载荷短于报文布局要求
    #[error("Payload for 0x{message_id:X} too short: expected {expected}, got {actual}")]
    ShortPayload {
        message_id: u32,
        expected: usize,
        actual: usize,
    },

    /// 编码时缺少必需信号
    #[error("Missing signal {signal} for message 0x{message_id:X}")]
    MissingSignal { message_id: u32, signal: String },

    /// 物理值换算后超出信号位宽
    #[error("Value {value} out of range for signal {signal}")]
    ValueOutOfRange { signal: String, value: f64 },
}

/// 信号字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Intel
    LittleEndian,
    /// Motorola
    BigEndian,
}

/// 多路复用角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxRole {
    /// 普通信号，始终有效
    Plain,
    /// 多路复用开关信号
    Switch,
    /// 仅在开关值等于该值时有效
    Case(u64),
}

/// 信号定义
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDef {
    pub name: String,
    /// DBC 原始起始位（Motorola 为 MSB 位置）
    pub start_bit: u32,
    pub size: u32,
    pub byte_order: ByteOrder,
    pub signed: bool,
    pub factor: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    pub unit: String,
    pub mux: MuxRole,
}

impl SignalDef {
    fn mask(&self) -> u64 {
        if self.size >= 64 {
            u64::MAX
        } else {
            (1u64 << self.size) - 1
        }
    }

    /// 信号在 64 位窗口中的右移量
    ///
    /// Intel 以小端整字解释，Motorola 以大端整字解释。
    fn shift(&self) -> Option<u32> {
        match self.byte_order {
            ByteOrder::LittleEndian => {
                (self.start_bit + self.size <= 64).then_some(self.start_bit)
            },
            ByteOrder::BigEndian => {
                let msb = 8 * (self.start_bit / 8) + (7 - self.start_bit % 8);
                let end = msb + self.size;
                (end <= 64).then(|| 64 - end)
            },
        }
    }

    fn is_valid(&self) -> bool {
        self.size > 0 && self.size <= 64 && self.factor != 0.0 && self.shift().is_some()
    }

    fn window(&self, data: &[u8; MAX_PAYLOAD_LEN]) -> u64 {
        match self.byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(*data),
            ByteOrder::BigEndian => u64::from_be_bytes(*data),
        }
    }

    /// 读取原始值（未符号扩展）
    fn extract_raw(&self, data: &[u8; MAX_PAYLOAD_LEN]) -> u64 {
        let shift = self.shift().unwrap_or(0);
        (self.window(data) >> shift) & self.mask()
    }

    fn raw_to_physical(&self, raw: u64) -> f64 {
        let value = if self.signed && self.size < 64 {
            let unused = 64 - self.size;
            (((raw << unused) as i64) >> unused) as f64
        } else if self.signed {
            raw as i64 as f64
        } else {
            raw as f64
        };
        value * self.factor + self.offset
    }

    /// 物理值转原始值，超出位宽返回错误
    fn physical_to_raw(&self, value: f64) -> Result<u64, DbcError> {
        let raw = ((value - self.offset) / self.factor).round();
        let out_of_range = || DbcError::ValueOutOfRange {
            signal: self.name.clone(),
            value,
        };

        if !raw.is_finite() {
            return Err(out_of_range());
        }

        if self.signed {
            let half = 2f64.powi(self.size as i32 - 1);
            if raw < -half || raw > half - 1.0 {
                return Err(out_of_range());
            }
            Ok((raw as i64 as u64) & self.mask())
        } else {
            if raw < 0.0 || raw > self.mask() as f64 {
                return Err(out_of_range());
            }
            Ok(raw as u64)
        }
    }

    fn insert_raw(&self, data: &mut [u8; MAX_PAYLOAD_LEN], raw: u64) {
        let shift = self.shift().unwrap_or(0);
        let mask = self.mask() << shift;
        let word = (self.window(data) & !mask) | ((raw << shift) & mask);
        *data = match self.byte_order {
            ByteOrder::LittleEndian => word.to_le_bytes(),
            ByteOrder::BigEndian => word.to_be_bytes(),
        };
    }

    /// 在给定开关值下该信号是否有效
    fn active_for(&self, switch: Option<u64>) -> bool {
        match self.mux {
            MuxRole::Plain | MuxRole::Switch => true,
            MuxRole::Case(n) => switch == Some(n),
        }
    }
}

/// 报文定义
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDef {
    pub id: u32,
    pub name: String,
    /// 声明的字节数
    pub size: usize,
    pub signals: Vec<SignalDef>,
}

impl MessageDef {
    fn switch_signal(&self) -> Option<&SignalDef> {
        self.signals.iter().find(|s| s.mux == MuxRole::Switch)
    }

    fn check_size(&self) -> Result<(), DbcError> {
        if self.size > MAX_PAYLOAD_LEN {
            return Err(DbcError::UnsupportedMessageSize {
                message_id: self.id,
                size: self.size,
            });
        }
        Ok(())
    }

    /// 解码载荷为物理值
    ///
    /// 多余的载荷字节会被忽略；多路复用信号只在开关值匹配时出现在结果里。
    ///
    /// # 错误
    ///
    /// - `DbcError::ShortPayload`: 载荷短于 `size`
    /// - `DbcError::UnsupportedMessageSize`: 报文超过 8 字节
    pub fn decode(&self, payload: &[u8]) -> Result<SignalMap, DbcError> {
        self.check_size()?;
        if payload.len() < self.size {
            return Err(DbcError::ShortPayload {
                message_id: self.id,
                expected: self.size,
                actual: payload.len(),
            });
        }

        let mut data = [0u8; MAX_PAYLOAD_LEN];
        let used = payload.len().min(MAX_PAYLOAD_LEN);
        data[..used].copy_from_slice(&payload[..used]);

        let switch = self.switch_signal().map(|s| s.extract_raw(&data));

        Ok(self
            .signals
            .iter()
            .filter(|s| s.active_for(switch))
            .map(|s| (s.name.clone(), s.raw_to_physical(s.extract_raw(&data))))
            .collect())
    }

    /// 将物理值编码为 `size` 字节的载荷
    ///
    /// 普通信号与开关信号必须全部给出；多路复用信号可选，
    /// 只有开关值匹配时才会写入。未知信号名被忽略。
    pub fn encode(&self, signals: &SignalMap) -> Result<Vec<u8>, DbcError> {
        self.check_size()?;

        let mut data = [0u8; MAX_PAYLOAD_LEN];
        let mut switch = None;

        for signal in self.signals.iter().filter(|s| !matches!(s.mux, MuxRole::Case(_))) {
            let value = signals
                .get(&signal.name)
                .ok_or_else(|| DbcError::MissingSignal {
                    message_id: self.id,
                    signal: signal.name.clone(),
                })?;
            let raw = signal.physical_to_raw(*value)?;
            if signal.mux == MuxRole::Switch {
                switch = Some(raw);
            }
            signal.insert_raw(&mut data, raw);
        }

        for signal in self.signals.iter().filter(|s| matches!(s.mux, MuxRole::Case(_))) {
            if !signal.active_for(switch) {
                continue;
            }
            if let Some(value) = signals.get(&signal.name) {
                let raw = signal.physical_to_raw(*value)?;
                signal.insert_raw(&mut data, raw);
            }
        }

        Ok(data[..self.size].to_vec())
    }
}

/// 单个通道的信号数据库（加载后只读）
#[derive(Debug, Clone, Default)]
pub struct SignalDatabase {
    messages: HashMap<u32, MessageDef>,
    source: Option<PathBuf>,
}

impl SignalDatabase {
    /// 从文件加载
    ///
    /// # 错误
    ///
    /// - `DbcError::Io`: 文件不存在或不可读
    /// - `DbcError::Parse`: DBC 语法错误
    /// - `DbcError::InvalidSignal`: 信号布局非法
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DbcError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DbcError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut db = Self::parse(&content)?;
        db.source = Some(path.to_path_buf());
        Ok(db)
    }

    /// 从 DBC 文本解析
    pub fn parse(content: &str) -> Result<Self, DbcError> {
        let dbc = can_dbc::Dbc::try_from(content).map_err(|e| DbcError::Parse(format!("{e:?}")))?;

        let mut messages = HashMap::with_capacity(dbc.messages.len());
        for message in &dbc.messages {
            let id = message.id.raw() & CAN_ID_MASK;
            let mut signals = Vec::with_capacity(message.signals.len());

            for signal in &message.signals {
                let def = SignalDef {
                    name: signal.name.clone(),
                    start_bit: signal.start_bit as u32,
                    size: signal.size as u32,
                    byte_order: match signal.byte_order {
                        DbcByteOrder::LittleEndian => ByteOrder::LittleEndian,
                        DbcByteOrder::BigEndian => ByteOrder::BigEndian,
                    },
                    signed: matches!(signal.value_type, ValueType::Signed),
                    factor: signal.factor,
                    offset: signal.offset,
                    min: signal.min,
                    max: signal.max,
                    unit: signal.unit.clone(),
                    mux: match signal.multiplexer_indicator {
                        MultiplexIndicator::Plain => MuxRole::Plain,
                        MultiplexIndicator::Multiplexor => MuxRole::Switch,
                        MultiplexIndicator::MultiplexedSignal(n)
                        | MultiplexIndicator::MultiplexorAndMultiplexedSignal(n) => {
                            MuxRole::Case(n)
                        },
                    },
                };

                if !def.is_valid() {
                    return Err(DbcError::InvalidSignal {
                        message_id: id,
                        signal: def.name,
                    });
                }
                signals.push(def);
            }

            messages.insert(
                id,
                MessageDef {
                    id,
                    name: message.name.clone(),
                    size: message.size as usize,
                    signals,
                },
            );
        }

        Ok(Self {
            messages,
            source: None,
        })
    }

    /// 来源文件（从文本解析时为 `None`）
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn message(&self, id: u32) -> Option<&MessageDef> {
        self.messages.get(&id)
    }

    pub fn message_by_name(&self, name: &str) -> Option<&MessageDef> {
        self.messages.values().find(|m| m.name == name)
    }

    /// 所有报文 ID（升序）
    pub fn message_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.messages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 按 ID 解码载荷
    pub fn decode(&self, message_id: u32, payload: &[u8]) -> Result<SignalMap, DbcError> {
        self.message(message_id)
            .ok_or(DbcError::UnknownMessageId(message_id))?
            .decode(payload)
    }

    /// 解码帧
    pub fn decode_frame(&self, frame: &DeepFrame) -> Result<SignalMap, DbcError> {
        self.decode(frame.arbitration_id(), frame.payload())
    }

    /// 按 ID 编码信号
    pub fn encode(&self, message_id: u32, signals: &SignalMap) -> Result<Vec<u8>, DbcError> {
        self.message(message_id)
            .ok_or(DbcError::UnknownMessageId(message_id))?
            .encode(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ARM_DBC: &str = r#"VERSION ""

NS_ :
	NS_DESC_
	CM_

BS_:

BU_: DeepArm Host

BO_ 513 ArmFeedback: 8 DeepArm
 SG_ Joint1Angle : 0|8@1+ (1,0) [0|255] "deg" Host
 SG_ Joint2Angle : 8|8@1+ (1,0) [0|255] "deg" Host
 SG_ ArmTemperature : 16|16@1- (0.1,0) [-100|200] "degC" Host
 SG_ ArmStatusCode : 32|8@1+ (1,0) [0|255] "" Host

BO_ 514 MotorFeedback: 4 DeepArm
 SG_ Speed : 7|16@0+ (1,0) [0|65535] "rpm" Host
 SG_ Offsetted : 23|8@0+ (0.5,-10) [-10|117.5] "" Host

BO_ 515 MuxFrame: 3 DeepArm
 SG_ Selector M : 0|8@1+ (1,0) [0|255] "" Host
 SG_ CaseA m0 : 8|8@1+ (1,0) [0|255] "" Host
 SG_ CaseB m1 : 8|16@1+ (1,0) [0|65535] "" Host
"#;

    fn db() -> SignalDatabase {
        SignalDatabase::parse(ARM_DBC).unwrap()
    }

    fn signals(pairs: &[(&str, f64)]) -> SignalMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_parse_messages() {
        let db = db();
        assert_eq!(db.len(), 3);
        assert_eq!(db.message_ids(), vec![513, 514, 515]);
        let msg = db.message_by_name("ArmFeedback").unwrap();
        assert_eq!(msg.id, 0x201);
        assert_eq!(msg.size, 8);
        assert_eq!(msg.signals.len(), 4);
        assert!(db.source().is_none());
    }

    #[test]
    fn test_decode_intel_signed_with_factor() {
        // 温度 -12.5°C → 原始值 -125 = 0xFF83
        let payload = [10, 20, 0x83, 0xFF, 1, 0, 0, 0];
        let values = db().decode(513, &payload).unwrap();
        assert_eq!(values["Joint1Angle"], 10.0);
        assert_eq!(values["Joint2Angle"], 20.0);
        assert!((values["ArmTemperature"] - (-12.5)).abs() < 1e-9);
        assert_eq!(values["ArmStatusCode"], 1.0);
    }

    #[test]
    fn test_decode_motorola() {
        let values = db().decode(514, &[0x12, 0x34, 0x14, 0x00]).unwrap();
        assert_eq!(values["Speed"], 0x1234 as f64);
        assert_eq!(values["Offsetted"], 0.0);
    }

    #[test]
    fn test_decode_multiplexed() {
        let db = db();
        let case_a = db.decode(515, &[0, 7, 0]).unwrap();
        assert_eq!(case_a["CaseA"], 7.0);
        assert!(!case_a.contains_key("CaseB"));

        let case_b = db.decode(515, &[1, 0x34, 0x12]).unwrap();
        assert_eq!(case_b["CaseB"], 0x1234 as f64);
        assert!(!case_b.contains_key("CaseA"));
    }

    #[test]
    fn test_decode_errors() {
        let db = db();
        assert!(matches!(
            db.decode(0x7FF, &[0; 8]),
            Err(DbcError::UnknownMessageId(0x7FF))
        ));
        assert!(matches!(
            db.decode(513, &[0; 4]),
            Err(DbcError::ShortPayload {
                expected: 8,
                actual: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_encode_inverts_decode() {
        let db = db();
        let input = signals(&[
            ("Joint1Angle", 10.0),
            ("Joint2Angle", 20.0),
            ("ArmTemperature", -12.5),
            ("ArmStatusCode", 1.0),
        ]);
        let payload = db.encode(513, &input).unwrap();
        assert_eq!(payload, vec![10, 20, 0x83, 0xFF, 1, 0, 0, 0]);
        assert_eq!(db.decode(513, &payload).unwrap(), input);

        let motorola = signals(&[("Speed", 4660.0), ("Offsetted", 0.0)]);
        let payload = db.encode(514, &motorola).unwrap();
        assert_eq!(payload, vec![0x12, 0x34, 0x14, 0x00]);
    }

    #[test]
    fn test_encode_multiplexed_optional() {
        let db = db();
        let payload = db.encode(515, &signals(&[("Selector", 1.0), ("CaseB", 300.0)])).unwrap();
        assert_eq!(payload, vec![1, 0x2C, 0x01]);

        // 开关值不匹配的多路信号不写入
        let payload = db.encode(515, &signals(&[("Selector", 0.0), ("CaseB", 300.0)])).unwrap();
        assert_eq!(payload, vec![0, 0, 0]);
    }

    #[test]
    fn test_encode_errors() {
        let db = db();
        assert!(matches!(
            db.encode(513, &signals(&[("Joint1Angle", 1.0)])),
            Err(DbcError::MissingSignal { .. })
        ));
        assert!(matches!(
            db.encode(514, &signals(&[("Speed", 70000.0), ("Offsetted", 0.0)])),
            Err(DbcError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            db.encode(999, &SignalMap::new()),
            Err(DbcError::UnknownMessageId(999))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ARM_DBC.as_bytes()).unwrap();

        let db = SignalDatabase::from_file(file.path()).unwrap();
        assert_eq!(db.source(), Some(file.path()));
        assert!(db.message(513).is_some());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SignalDatabase::from_file(dir.path().join("absent.dbc")).unwrap_err();
        assert!(matches!(err, DbcError::Io { .. }));
    }

    #[test]
    fn test_decode_frame() {
        let frame = DeepFrame::new("DeepArm_01", 513, &[1, 2, 0, 0, 0, 0, 0, 0]).unwrap();
        let values = db().decode_frame(&frame).unwrap();
        assert_eq!(values["Joint2Angle"], 2.0);
    }
}
