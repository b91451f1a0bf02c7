//! # 示教轨迹格式
//!
//! 示教录制得到的关节角度序列，以 JSON 保存：
//!
//! ```text
//! {
//!   "version": 1,
//!   "name": "pick",
//!   "device_id": "DeepArm01",
//!   "created_at_ms": 1760000000000,
//!   "points": [{ "offset_ms": 0, "joint_angles": [10.0, 20.0, 30.0, 40.0, 50.0, 60.0] }]
//! }
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 当前格式版本
pub const TRAJECTORY_VERSION: u8 = 1;

/// 关节数
pub const JOINT_COUNT: usize = 6;

/// 轨迹点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// 相对录制开始的时间（毫秒）
    pub offset_ms: u64,
    /// 六个关节角度
    pub joint_angles: [f64; JOINT_COUNT],
}

impl TrajectoryPoint {
    pub fn new(offset: Duration, joint_angles: [f64; JOINT_COUNT]) -> Self {
        Self {
            offset_ms: offset.as_millis() as u64,
            joint_angles,
        }
    }
}

/// 示教轨迹
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// 格式版本
    pub version: u8,
    pub name: String,
    pub device_id: String,
    /// 创建时间（Unix 毫秒）
    pub created_at_ms: u64,
    pub points: Vec<TrajectoryPoint>,
}

impl Trajectory {
    /// 创建空轨迹
    pub fn new(name: impl Into<String>, device_id: impl Into<String>) -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            version: TRAJECTORY_VERSION,
            name: name.into(),
            device_id: device_id.into(),
            created_at_ms,
            points: Vec::new(),
        }
    }

    pub fn push(&mut self, point: TrajectoryPoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 首末点的时间跨度
    pub fn duration(&self) -> Option<Duration> {
        let first = self.points.first()?.offset_ms;
        let last = self.points.last()?.offset_ms;
        Some(Duration::from_millis(last.saturating_sub(first)))
    }

    /// 保存为 JSON 文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create trajectory file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).context("Failed to serialize trajectory")?;
        writer.flush().context("Failed to flush trajectory file")?;
        Ok(())
    }

    /// 从 JSON 文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open trajectory file {}", path.display()))?;
        let trajectory: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Malformed trajectory file {}", path.display()))?;

        if trajectory.version != TRAJECTORY_VERSION {
            bail!("Unsupported trajectory version: {}", trajectory.version);
        }
        Ok(trajectory)
    }
}
