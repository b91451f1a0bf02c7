//! 命令定义和实现

pub mod config;
pub mod monitor;
pub mod ports;
pub mod send;

pub use config::ConfigCommand;
pub use monitor::MonitorCommand;
pub use ports::PortsCommand;
pub use send::SendCommand;
