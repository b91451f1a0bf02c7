//! 配置管理命令

use anyhow::{Context, Result, anyhow};
use clap::Subcommand;
use deep_sdk::AppConfig;
use std::path::Path;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 打印完整配置
    Show,

    /// 读取配置项（点分路径，如 `device_settings.deeparm_serial_port`）
    Get { key: String },

    /// 写入配置项并保存
    Set {
        key: String,
        /// TOML 值；无法解析时按字符串保存
        value: String,
    },

    /// 打印配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self, mut config: AppConfig, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Show => {
                print!("{}", config.to_toml_string()?);
            },
            ConfigCommand::Get { key } => {
                let value = config.value(&key).ok_or_else(|| anyhow!("Config key '{}' not found", key))?;
                println!("{}", display_value(value));
            },
            ConfigCommand::Set { key, value } => {
                config.set(&key, parse_value(&value))?;
                config
                    .save_to(path)
                    .with_context(|| format!("Failed to save {}", path.display()))?;
                println!("✅ {} = {}", key, value);
            },
            ConfigCommand::Path => {
                let marker = if path.exists() { "" } else { " (not created yet)" };
                println!("{}{}", path.display(), marker);
            },
        }
        Ok(())
    }
}

/// 字符串直接输出，其他值按 TOML 格式
fn display_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Table(table) => toml::to_string_pretty(table).unwrap_or_else(|_| format!("{:?}", table)),
        other => other.to_string(),
    }
}

fn parse_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("value = {}", raw))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("9600"), toml::Value::Integer(9600));
        assert_eq!(parse_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_value("\"COM3\""), toml::Value::String("COM3".into()));
        assert_eq!(parse_value("/dev/ttyUSB0"), toml::Value::String("/dev/ttyUSB0".into()));
    }

    #[test]
    fn test_set_saves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deepwin.toml");

        let config = AppConfig::load(&path).unwrap();
        ConfigCommand::Set {
            key: "device_settings.deepmotor_serial_port".into(),
            value: "/dev/ttyACM0".into(),
        }
        .execute(config, &path)
        .unwrap();

        let reloaded = AppConfig::load(&path).unwrap();
        assert_eq!(reloaded.device_settings().deepmotor_serial_port, "/dev/ttyACM0");
        assert_eq!(reloaded.device_settings().deepmotor_baud_rate, 115_200);
    }
}
