//! 监控设备
//!
//! 连接一台设备并打印协调器事件，直到 Ctrl-C。

use anyhow::{Context, Result};
use clap::Args;
use deep_sdk::{AppConfig, CoordinatorBuilder, CoordinatorEvent};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::utils;

#[derive(Args, Debug)]
pub struct MonitorCommand {
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

    /// 只打印设备状态和错误
    #[arg(short, long)]
    pub quiet: bool,

    /// 周期巡检间隔（毫秒，0 关闭）
    #[arg(long, default_value_t = 1000)]
    pub health_check_ms: u64,
}

impl MonitorCommand {
    pub fn execute(self, config: &AppConfig) -> Result<()> {
        let device = utils::device_config(&self.device, config, self.port, self.baud, self.dbc)?;

        let mut builder = CoordinatorBuilder::from_config(config);
        if self.health_check_ms > 0 {
            builder = builder.health_check(Duration::from_millis(self.health_check_ms));
        }
        let coordinator = builder.build()?;
        let events = coordinator.subscribe();
        let running = utils::install_ctrlc()?;

        println!("⏳ 连接 {} ({} @ {})...", device.device_id, device.port, device.baud_rate);
        coordinator
            .connect_device(device)
            .with_context(|| format!("Failed to connect {}", self.device))?;
        println!("✅ 已连接，按 Ctrl+C 停止\n");

        while running.load(Ordering::SeqCst) {
            match events.recv_timeout(Duration::from_millis(200)) {
                Ok(event) => {
                    if self.quiet && !is_device_event(&event) {
                        continue;
                    }
                    println!("{}", utils::format_event(&event));
                },
                Err(e) if e.is_timeout() => {},
                Err(_) => break,
            }
        }

        coordinator.shutdown();
        println!("✅ 已断开");
        Ok(())
    }
}

fn is_device_event(event: &CoordinatorEvent) -> bool {
    matches!(
        event,
        CoordinatorEvent::DeviceStatusUpdated(_) | CoordinatorEvent::DeviceError { .. }
    )
}
