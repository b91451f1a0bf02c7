//! # Deep Protocol
//!
//! DeepArm / DeepMotor 设备链路协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `frame`: 统一帧抽象 [`DeepFrame`]
//! - `codec`: "AT" 前缀的 ASCII 行协议编解码
//! - `dbc`: DBC 信号数据库（信号解码/编码）
//!
//! ## 线格式
//!
//! ```text
//! AT<hex CAN-ID><hex 长度 2 位><hex 载荷>\r\n
//! ```

pub mod codec;
pub mod dbc;
pub mod frame;

use std::collections::BTreeMap;

pub use codec::{FrameFormatError, FrameFormatReason};
pub use dbc::{DbcError, SignalDatabase};
pub use frame::DeepFrame;

/// 信号名到物理值的映射
///
/// DBC 解码结果、电机遥测行解析结果都使用此类型，
/// 按键名有序，便于日志输出和测试比较。
pub type SignalMap = BTreeMap<String, f64>;

/// CAN 2.0 单帧最大载荷长度
pub const MAX_PAYLOAD_LEN: usize = 8;

/// 标准帧（11-bit）最大 ID
pub const MAX_STANDARD_ID: u32 = 0x7FF;

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 载荷超过 8 字节（编码器拒绝，不做截断）
    #[error("Payload too long: {len} bytes (max {MAX_PAYLOAD_LEN})")]
    PayloadTooLong { len: usize },

    /// 行格式错误
    #[error(transparent)]
    FrameFormat(#[from] FrameFormatError),

    /// DBC 错误
    #[error(transparent)]
    Dbc(#[from] DbcError),
}
