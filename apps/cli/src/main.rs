//! # Deep CLI
//!
//! DeepArm / DeepMotor 设备命令行工具。
//!
//! ```bash
//! # 列出串口
//! deep-cli ports
//!
//! # 监控电机遥测
//! deep-cli monitor --device DeepMotor01 --port /dev/ttyUSB0
//!
//! # 发送一条命令
//! deep-cli send --device DeepArm01 "move_joint_angles(10, 20, 30, 40, 50, 60)"
//!
//! # 修改配置
//! deep-cli config set device_settings.deeparm_serial_port /dev/ttyUSB1
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod utils;

use commands::{ConfigCommand, MonitorCommand, PortsCommand, SendCommand};

/// Deep CLI - DeepArm / DeepMotor 命令行工具
#[derive(Parser, Debug)]
#[command(name = "deep-cli")]
#[command(about = "Command-line interface for DeepArm / DeepMotor devices", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出可用串口
    Ports {
        #[command(flatten)]
        args: PortsCommand,
    },

    /// 连接设备并打印事件
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 发送一条设备命令
    Send {
        #[command(flatten)]
        args: SendCommand,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = utils::config_path(cli.config.as_deref())?;
    let config = utils::load_config(Some(path.as_path()))?;
    deep_sdk::init_logging(&config.logging())?;
    tracing::debug!("Using config {}", path.display());

    match cli.command {
        Commands::Ports { args } => args.execute(),
        Commands::Monitor { args } => args.execute(&config),
        Commands::Send { args } => args.execute(&config),
        Commands::Config(cmd) => cmd.execute(config, &path),
    }
}
