//! 帧抽象
//!
//! `DeepFrame` 是链路层（串口桥接 / CAN 适配器）与信号层之间的中间抽象。

use crate::{MAX_PAYLOAD_LEN, ProtocolError};

/// 单个 CAN 帧
///
/// 构造后不可变：字段只读，只能通过构造器创建。
///
/// # 示例
///
/// ```rust
/// use deep_protocol::DeepFrame;
///
/// let frame = DeepFrame::new("DeepArm_01", 0x101, &[1, 2, 3]).unwrap();
/// assert_eq!(frame.arbitration_id(), 0x101);
/// assert_eq!(frame.payload(), &[1, 2, 3]);
/// assert!(!frame.is_extended_id());
///
/// // 超过 8 字节的载荷会被拒绝，而不是截断
/// assert!(DeepFrame::new("DeepArm_01", 0x101, &[0; 9]).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeepFrame {
    channel: String,
    arbitration_id: u32,
    data: [u8; MAX_PAYLOAD_LEN],
    len: u8,
    is_extended_id: bool,
}

impl DeepFrame {
    /// 创建帧（`is_extended_id = false`）
    ///
    /// # 错误
    ///
    /// - `ProtocolError::PayloadTooLong`: 载荷超过 8 字节
    pub fn new(
        channel: impl Into<String>,
        arbitration_id: u32,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLong { len: payload.len() });
        }

        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            channel: channel.into(),
            arbitration_id,
            data,
            len: payload.len() as u8,
            is_extended_id: false,
        })
    }

    /// 覆盖扩展帧标志
    ///
    /// 行协议本身不携带扩展位，只有真实 CAN 适配器或明确知道 ID 类型的调用方才需要设置。
    #[must_use]
    pub fn with_extended_id(mut self, is_extended_id: bool) -> Self {
        self.is_extended_id = is_extended_id;
        self
    }

    /// 通道名（设备 ID 或 CAN 接口名）
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn arbitration_id(&self) -> u32 {
        self.arbitration_id
    }

    /// 有效载荷切片
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_extended_id(&self) -> bool {
        self.is_extended_id
    }

    /// 大写十六进制载荷（日志/测试用）
    pub fn payload_hex(&self) -> String {
        hex::encode_upper(self.payload())
    }
}
