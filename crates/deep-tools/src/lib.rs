//! # Deep Tools - 共享配置与数据格式
//!
//! **依赖原则**: 不依赖 `deep-driver` / `deep-client`，可以被任意上层使用
//!
//! ## 包含模块
//!
//! - `config` - TOML 应用配置（点分路径访问，默认值合并）
//! - `trajectory` - 示教轨迹文件格式（JSON）

pub mod config;
pub mod trajectory;

// 重新导出常用类型
pub use config::{AppConfig, ConfigError, DeviceSettings, LoggingConfig};
pub use trajectory::{JOINT_COUNT, Trajectory, TrajectoryPoint};
