//! 设备族

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 设备族
///
/// 设备注册时确定一次，之后的解析、状态更新和命令生成都按族分派。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    #[serde(rename = "DeepArm")]
    Arm,
    #[serde(rename = "DeepMotor")]
    Motor,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 2] = [DeviceFamily::Arm, DeviceFamily::Motor];

    /// 类型标签，同时也是设备 ID 前缀
    pub fn name(self) -> &'static str {
        match self {
            Self::Arm => "DeepArm",
            Self::Motor => "DeepMotor",
        }
    }

    /// 按设备 ID 前缀推断
    ///
    /// ```
    /// use deep_client::DeviceFamily;
    ///
    /// assert_eq!(DeviceFamily::from_device_id("DeepArm01"), Some(DeviceFamily::Arm));
    /// assert_eq!(DeviceFamily::from_device_id("UnknownDevice123"), None);
    /// ```
    pub fn from_device_id(device_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|family| device_id.starts_with(family.name()))
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown device type: {s}"))
    }
}
