//! 发送一条设备命令
//!
//! ```bash
//! deep-cli send --device DeepArm01 --port /dev/ttyUSB0 "move_joint_angles(10, 20, 30, 40, 50, 60)"
//! deep-cli send --device DeepMotor01 "set_rpm(1500)"
//! ```

use anyhow::{Context, Result, bail};
use clap::Args;
use deep_sdk::{AppConfig, CoordinatorBuilder, CoordinatorEvent};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::utils;

#[derive(Args, Debug)]
pub struct SendCommand {
    /// 设备 ID（如 DeepArm01、DeepMotor01）
    #[arg(short, long)]
    pub device: String,

    /// 串口（默认取配置文件）
    #[arg(short, long)]
    pub port: Option<String>,

    /// 波特率（默认取配置文件）
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// DBC 文件（DeepArm）
    #[arg(long)]
    pub dbc: Option<PathBuf>,

    /// 等待发送完成的超时（毫秒）
    #[arg(long, default_value_t = 3000)]
    pub timeout_ms: u64,

    /// 命令文本，如 `set_rpm(1500)`
    pub command: String,
}

impl SendCommand {
    pub fn execute(self, config: &AppConfig) -> Result<()> {
        let device = utils::device_config(&self.device, config, self.port, self.baud, self.dbc)?;
        let coordinator = CoordinatorBuilder::from_config(config).build()?;
        let events = coordinator.subscribe();

        println!("⏳ 连接 {} ({} @ {})...", device.device_id, device.port, device.baud_rate);
        coordinator
            .connect_device(device)
            .with_context(|| format!("Failed to connect {}", self.device))?;

        let request = coordinator
            .handle_device_control_request(&self.device, &self.command)
            .with_context(|| format!("Command '{}' rejected", self.command))?;

        let Some(request) = request else {
            // 本地命令：打印当前状态
            if let Some(snapshot) = coordinator.devices().snapshot(&self.device) {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            coordinator.shutdown();
            return Ok(());
        };

        let prefix = format!("command-{}-", self.device);
        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms);
        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(CoordinatorEvent::TaskCompleted { task_id }) if task_id.starts_with(&prefix) => break Ok(()),
                Ok(CoordinatorEvent::TaskFailed { task_id, cause }) if task_id.starts_with(&prefix) => {
                    break Err(cause);
                },
                Ok(_) => {},
                Err(_) => break Err(format!("no confirmation within {} ms", self.timeout_ms)),
            }
        };
        coordinator.shutdown();

        match outcome {
            Ok(()) => {
                println!("✅ {} -> {}", request.command, self.device);
                Ok(())
            },
            Err(cause) => bail!("Failed to send {}: {}", request.command, cause),
        }
    }
}
