//! 命令共用的工具函数

use anyhow::{Context, Result, anyhow};
use deep_sdk::{AppConfig, CoordinatorEvent, DeviceConfig, DeviceFamily};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 当前目录下的配置文件名
const LOCAL_CONFIG: &str = "deepwin.toml";

/// 解析配置文件路径
///
/// 优先级：`--config` 参数 > 当前目录的 `deepwin.toml` > 用户配置目录的 `deepwin/config.toml`
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let local = PathBuf::from(LOCAL_CONFIG);
    if local.exists() {
        return Ok(local);
    }

    let mut path = dirs::config_dir().ok_or_else(|| anyhow!("Cannot determine the user config directory"))?;
    path.push("deepwin");
    path.push("config.toml");
    Ok(path)
}

/// 加载配置（文件不存在时使用默认值）
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = config_path(explicit)?;
    AppConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

/// 注册 Ctrl-C 处理器，返回运行标志
pub fn install_ctrlc() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!();
        println!("🛑 收到退出信号，正在关闭...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(running)
}

/// 设备连接参数：配置文件 `[device_settings]` 加命令行覆盖
pub fn device_config(
    device_id: &str,
    config: &AppConfig,
    port: Option<String>,
    baud: Option<u32>,
    dbc: Option<PathBuf>,
) -> Result<DeviceConfig> {
    let family = DeviceFamily::from_device_id(device_id)
        .ok_or_else(|| anyhow!("Unknown device type for '{}' (expected a DeepArm or DeepMotor id)", device_id))?;

    let mut device = DeviceConfig::from_settings(device_id, family, &config.device_settings());
    if let Some(port) = port {
        device.port = port;
    }
    if let Some(baud) = baud {
        device.baud_rate = baud;
    }
    if dbc.is_some() {
        device.dbc_path = dbc;
    }
    Ok(device)
}

/// 单行事件输出
pub fn format_event(event: &CoordinatorEvent) -> String {
    match event {
        CoordinatorEvent::AppStatus(message) => format!("ℹ️  {}", message),
        CoordinatorEvent::DeviceStatusUpdated(snapshot) => match serde_json::to_string(snapshot) {
            Ok(json) => format!("📊 {}", json),
            Err(_) => format!("📊 {:?}", snapshot),
        },
        CoordinatorEvent::DeviceError { device_id, message } => format!("⚠️  [{}] {}", device_id, message),
        CoordinatorEvent::ImageProcessingStarted { path } => format!("🖼️  processing {}", path.display()),
        CoordinatorEvent::ImageProcessingFinished { summary, .. } => format!("🖼️  {}", summary),
        CoordinatorEvent::ImageProcessingError { path, message } => {
            format!("❌ image {}: {}", path.display(), message)
        },
        CoordinatorEvent::TaskCompleted { task_id } => format!("✅ task {} completed", task_id),
        CoordinatorEvent::TaskFailed { task_id, cause } => format!("❌ task {} failed: {}", task_id, cause),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_explicit() {
        let path = config_path(Some(Path::new("/tmp/custom.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom.toml"));
    }

    #[test]
    fn test_device_config_overrides() {
        let config = AppConfig::default();

        let arm = device_config("DeepArm01", &config, Some("/dev/ttyUSB1".into()), None, None).unwrap();
        assert_eq!(arm.port, "/dev/ttyUSB1");
        assert_eq!(arm.baud_rate, 9600);
        assert_eq!(arm.dbc_path, Some(PathBuf::from("deeparm.dbc")));

        let motor = device_config("DeepMotor01", &config, None, Some(57_600), None).unwrap();
        assert_eq!(motor.port, "COM2");
        assert_eq!(motor.baud_rate, 57_600);
        assert_eq!(motor.family, Some(DeviceFamily::Motor));

        assert!(device_config("Gripper01", &config, None, None, None).is_err());
    }

    #[test]
    fn test_format_event() {
        let event = CoordinatorEvent::DeviceError {
            device_id: "DeepMotor01".into(),
            message: "warning: motor temperature too high".into(),
        };
        assert_eq!(format_event(&event), "⚠️  [DeepMotor01] warning: motor temperature too high");

        let event = CoordinatorEvent::TaskFailed {
            task_id: "image-1".into(),
            cause: "not found".into(),
        };
        assert_eq!(format_event(&event), "❌ task image-1 failed: not found");
    }
}
