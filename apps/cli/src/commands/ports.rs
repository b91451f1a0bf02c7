//! 列出可用串口

use anyhow::{Context, Result};
use clap::Args;
use deep_sdk::{PortKind, list_ports};

#[derive(Args, Debug)]
pub struct PortsCommand {
    /// 只显示 USB 串口
    #[arg(long)]
    pub usb_only: bool,
}

impl PortsCommand {
    pub fn execute(&self) -> Result<()> {
        let ports = list_ports().context("Failed to enumerate serial ports")?;
        let ports: Vec<_> = ports
            .into_iter()
            .filter(|p| !self.usb_only || p.kind == PortKind::Usb)
            .collect();

        if ports.is_empty() {
            println!("未发现可用串口");
            return Ok(());
        }

        println!("可用串口 ({}):", ports.len());
        for port in ports {
            if port.description.is_empty() {
                println!("  {}", port.name);
            } else {
                println!("  {:<24} {}", port.name, port.description);
            }
        }
        Ok(())
    }
}
