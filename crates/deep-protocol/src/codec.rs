//! "AT" 行协议编解码
//!
//! 串口桥接设备把每个 CAN 帧编码为一行 ASCII：
//!
//! ```text
//! AT <id> <len:2> <payload> \r\n
//! ```
//!
//! - `id`: 标准 ID（≤ 0x7FF）用 3 位十六进制，其余用 8 位
//! - `len`: 2 位十六进制的声明长度
//! - `payload`: 每字节 2 位十六进制
//!
//! 解码时 ID 宽度不是固定的，按 3 位和 8 位两种宽度尝试，
//! 且只接受与 ID 范围匹配的宽度，因此编码结果总能唯一还原。
//! 奇数位载荷会在左侧补一个 `0`（宽容处理，不视为错误）。

use crate::{DeepFrame, MAX_PAYLOAD_LEN, MAX_STANDARD_ID, ProtocolError, SignalMap};
use std::fmt;
use thiserror::Error;

/// 行前缀
pub const FRAME_PREFIX: &str = "AT";

/// 行结束符
pub const LINE_TERMINATOR: &str = "\r\n";

const STANDARD_ID_DIGITS: usize = 3;
const EXTENDED_ID_DIGITS: usize = 8;
const LENGTH_DIGITS: usize = 2;

/// 行解码失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameFormatReason {
    /// 缺少 `AT` 前缀
    MissingPrefix,
    /// 含有非十六进制字符
    InvalidHex,
    /// 长度不足以容纳 ID 与长度字段
    TooShort,
    /// ID 位宽与 ID 范围不匹配（如 8 位宽度承载标准 ID）
    NonCanonicalId { digits: usize, id: u32 },
    /// 声明长度超过 8
    DeclaredLengthTooLarge { declared: usize },
    /// 声明长度与实际载荷字节数不一致
    LengthMismatch { declared: usize, actual: usize },
    /// 遥测行不是 `key=value` 形式
    InvalidTelemetry,
}

impl FrameFormatReason {
    /// 失败发生在解析的第几步
    fn depth(&self) -> u8 {
        match self {
            Self::MissingPrefix | Self::InvalidHex | Self::InvalidTelemetry => 0,
            Self::TooShort => 1,
            Self::NonCanonicalId { .. } => 2,
            Self::DeclaredLengthTooLarge { .. } => 3,
            Self::LengthMismatch { .. } => 4,
        }
    }
}

impl fmt::Display for FrameFormatReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrefix => write!(f, "missing '{FRAME_PREFIX}' prefix"),
            Self::InvalidHex => write!(f, "invalid hex digit"),
            Self::TooShort => write!(f, "line too short"),
            Self::NonCanonicalId { digits, id } => {
                write!(f, "id 0x{id:X} is not canonical for {digits} digits")
            },
            Self::DeclaredLengthTooLarge { declared } => {
                write!(f, "declared length {declared} exceeds {MAX_PAYLOAD_LEN}")
            },
            Self::LengthMismatch { declared, actual } => {
                write!(f, "declared length {declared} != actual {actual}")
            },
            Self::InvalidTelemetry => write!(f, "expected key=value pairs"),
        }
    }
}

/// 行格式错误（携带原始行）
///
/// 属于帧级错误：调用方丢弃该行并继续读取，不会终止读循环。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed frame line {line:?}: {reason}")]
pub struct FrameFormatError {
    pub line: String,
    pub reason: FrameFormatReason,
}

impl FrameFormatError {
    fn new(line: &str, reason: FrameFormatReason) -> Self {
        Self {
            line: line.to_string(),
            reason,
        }
    }
}

/// 编码为一行 ASCII（含 `\r\n`）
///
/// # 错误
///
/// - `ProtocolError::PayloadTooLong`: 载荷超过 8 字节
///
/// # 示例
///
/// ```rust
/// use deep_protocol::codec::encode;
///
/// let line = encode(0x101, &[0x0A, 0x14]).unwrap();
/// assert_eq!(line, "AT101020A14\r\n");
///
/// let line = encode(0x1234_5678, &[]).unwrap();
/// assert_eq!(line, "AT1234567800\r\n");
/// ```
pub fn encode(arbitration_id: u32, payload: &[u8]) -> Result<String, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLong { len: payload.len() });
    }

    let id = if arbitration_id <= MAX_STANDARD_ID {
        format!("{arbitration_id:03X}")
    } else {
        format!("{arbitration_id:08X}")
    };

    Ok(format!(
        "{FRAME_PREFIX}{id}{:02X}{}{LINE_TERMINATOR}",
        payload.len(),
        hex::encode_upper(payload)
    ))
}

/// 编码帧（帧构造时已保证载荷 ≤ 8 字节，因此不会失败）
pub fn encode_frame(frame: &DeepFrame) -> String {
    let id = frame.arbitration_id();
    let id = if id <= MAX_STANDARD_ID {
        format!("{id:03X}")
    } else {
        format!("{id:08X}")
    };
    format!(
        "{FRAME_PREFIX}{id}{:02X}{}{LINE_TERMINATOR}",
        frame.len(),
        frame.payload_hex()
    )
}

/// 一种 ID 宽度下的解析结果
struct Reading {
    id: u32,
    payload: Vec<u8>,
    padded: bool,
}

fn read_with_width(body: &str, digits: usize) -> Result<Reading, FrameFormatReason> {
    if body.len() < digits + LENGTH_DIGITS {
        return Err(FrameFormatReason::TooShort);
    }

    let id = u32::from_str_radix(&body[..digits], 16).map_err(|_| FrameFormatReason::InvalidHex)?;
    let canonical = if digits == STANDARD_ID_DIGITS {
        id <= MAX_STANDARD_ID
    } else {
        id > MAX_STANDARD_ID
    };
    if !canonical {
        return Err(FrameFormatReason::NonCanonicalId { digits, id });
    }

    let declared = usize::from_str_radix(&body[digits..digits + LENGTH_DIGITS], 16)
        .map_err(|_| FrameFormatReason::InvalidHex)?;
    if declared > MAX_PAYLOAD_LEN {
        return Err(FrameFormatReason::DeclaredLengthTooLarge { declared });
    }

    let payload_hex = &body[digits + LENGTH_DIGITS..];
    let padded = payload_hex.len() % 2 == 1;
    let payload = if padded {
        hex::decode(format!("0{payload_hex}"))
    } else {
        hex::decode(payload_hex)
    }
    .map_err(|_| FrameFormatReason::InvalidHex)?;

    if payload.len() != declared {
        return Err(FrameFormatReason::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    Ok(Reading {
        id,
        payload,
        padded,
    })
}

/// 解码一行（首尾空白、`\r\n` 会被忽略）
///
/// 结果帧的 `is_extended_id` 恒为 `false`。
///
/// ID 只接受编码器产生的规范宽度：不超过 0x7FF 的 ID 必须写成 3 位，
/// 8 位写法只用于大于 0x7FF 的 ID。以 8 位书写的小 ID
/// （如 `AT00000101060A141E28323C`）会被拒绝；若接受这种写法，
/// 声明长度与载荷不符的 `AT0000010608AABBCCDDEEFF0011` 会被读成 ID 0x106 的 8 字节帧。
///
/// # 错误
///
/// 任意格式不匹配都返回 [`FrameFormatError`]，原始行随错误一起返回。
///
/// # 示例
///
/// ```rust
/// use deep_protocol::codec::decode;
///
/// let frame = decode("DeepArm_01", "AT101060A141E28323C\r\n").unwrap();
/// assert_eq!(frame.arbitration_id(), 0x101);
/// assert_eq!(frame.payload_hex(), "0A141E28323C");
///
/// assert!(decode("DeepArm_01", "AT0000010608AABBCCDDEEFF0011").is_err());
/// ```
pub fn decode(channel: &str, line: &str) -> Result<DeepFrame, FrameFormatError> {
    let trimmed = line.trim();
    let body = trimmed
        .strip_prefix(FRAME_PREFIX)
        .ok_or_else(|| FrameFormatError::new(line, FrameFormatReason::MissingPrefix))?;

    if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FrameFormatError::new(line, FrameFormatReason::InvalidHex));
    }

    let mut fallback: Option<Reading> = None;
    let mut reason = FrameFormatReason::TooShort;

    for digits in [STANDARD_ID_DIGITS, EXTENDED_ID_DIGITS] {
        match read_with_width(body, digits) {
            Ok(reading) if !reading.padded => {
                return build_frame(channel, line, reading);
            },
            Ok(reading) => {
                fallback.get_or_insert(reading);
            },
            Err(r) => {
                // 保留解析走得最远的那个原因
                if r.depth() >= reason.depth() {
                    reason = r;
                }
            },
        }
    }

    match fallback {
        Some(reading) => build_frame(channel, line, reading),
        None => Err(FrameFormatError::new(line, reason)),
    }
}

fn build_frame(channel: &str, line: &str, reading: Reading) -> Result<DeepFrame, FrameFormatError> {
    DeepFrame::new(channel, reading.id, &reading.payload).map_err(|_| {
        FrameFormatError::new(
            line,
            FrameFormatReason::DeclaredLengthTooLarge {
                declared: reading.payload.len(),
            },
        )
    })
}

/// 判断一行是否为 AT 帧行
pub fn is_frame_line(line: &str) -> bool {
    line.trim_start().starts_with(FRAME_PREFIX)
}

/// 解析电机遥测行：`key=value[,key=value]*`
///
/// DeepMotor 走自定义串口协议，不经过 DBC；遥测行在这里被转换为信号映射。
///
/// ```rust
/// use deep_protocol::codec::decode_telemetry;
///
/// let signals = decode_telemetry("rpm_raw=1000, current_mv=500,temp_c=45").unwrap();
/// assert_eq!(signals["rpm_raw"], 1000.0);
/// assert_eq!(signals["temp_c"], 45.0);
/// ```
pub fn decode_telemetry(line: &str) -> Result<SignalMap, FrameFormatError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(FrameFormatError::new(line, FrameFormatReason::InvalidTelemetry));
    }

    let mut signals = SignalMap::new();
    for pair in trimmed.split(',') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| FrameFormatError::new(line, FrameFormatReason::InvalidTelemetry))?;
        let key = key.trim();
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| FrameFormatError::new(line, FrameFormatReason::InvalidTelemetry))?;
        if key.is_empty() {
            return Err(FrameFormatError::new(line, FrameFormatReason::InvalidTelemetry));
        }
        signals.insert(key.to_string(), value);
    }
    Ok(signals)
}
