//! # 应用配置
//!
//! TOML 配置文件，按点分路径访问：
//!
//! ```text
//! [device_settings]
//! deeparm_baud_rate = 9600      # get::<u32>("device_settings.deeparm_baud_rate")
//! ```
//!
//! 加载时文件内容递归合并到默认配置之上，文件中缺失的项保留默认值。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml::{Table, Value};
use tracing::{debug, info, warn};

/// 默认配置
const DEFAULT_CONFIG: &str = r#"
[general]
language = "zh_CN"
data_storage_path = "data/"

[device_settings]
deeparm_serial_port = "COM1"
deeparm_baud_rate = 9600
deeparm_can_bustype = "serial_can_bridge"
deeparm_dbc_path = "deeparm.dbc"
deepmotor_serial_port = "COM2"
deepmotor_baud_rate = 115200

[serial]
default_baud_rate = 9600
read_timeout_ms = 100
write_timeout_ms = 1000
auto_reconnect = true
reconnect_attempts = 5
reconnect_delay_ms = 2000
event_capacity = 1024

[logging]
level = "info"
"#;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Config key not found: {0}")]
    MissingKey(String),

    #[error("Invalid value for config key '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("No config file path set")]
    NoPath,
}

/// `[device_settings]` 段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub deeparm_serial_port: String,
    pub deeparm_baud_rate: u32,
    pub deeparm_can_bustype: String,
    pub deeparm_dbc_path: PathBuf,
    pub deepmotor_serial_port: String,
    pub deepmotor_baud_rate: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            deeparm_serial_port: "COM1".to_string(),
            deeparm_baud_rate: 9600,
            deeparm_can_bustype: "serial_can_bridge".to_string(),
            deeparm_dbc_path: PathBuf::from("deeparm.dbc"),
            deepmotor_serial_port: "COM2".to_string(),
            deepmotor_baud_rate: 115_200,
        }
    }
}

/// `[logging]` 段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 默认级别（trace/debug/info/warn/error）
    pub level: String,
    /// 完整的过滤指令，例如 `"deep_driver=debug,info"`，优先于 `level`
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filter: None,
        }
    }
}

impl LoggingConfig {
    /// 生成过滤指令
    pub fn directive(&self) -> &str {
        self.filter.as_deref().unwrap_or(&self.level)
    }
}

/// 应用配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    path: Option<PathBuf>,
    table: Table,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            path: None,
            table: default_table(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    ///
    /// - 文件不存在：使用默认配置，`save` 时写入该路径
    /// - 文件格式错误：返回 `ConfigError::Parse`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self {
                path: Some(path),
                table: default_table(),
            });
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.clone(),
                message,
            },
            other => other,
        })?;
        info!("Config loaded from {}", path.display());
        config.path = Some(path);
        Ok(config)
    }

    /// 从 TOML 文本构造（合并到默认配置之上）
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let loaded: Table = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        let mut table = default_table();
        merge_tables(&mut table, loaded);
        Ok(Self { path: None, table })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    /// 完整配置表
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// 按点分路径查找原始值
    pub fn value(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.table.get(first)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    /// 按点分路径读取并反序列化
    ///
    /// # 错误
    /// - `ConfigError::MissingKey`: 路径不存在
    /// - `ConfigError::InvalidValue`: 值无法转换为 `T`
    ///
    /// # Example
    ///
    /// ```
    /// use deep_tools::AppConfig;
    ///
    /// let config = AppConfig::default();
    /// let baud: u32 = config.get("device_settings.deeparm_baud_rate").unwrap();
    /// assert_eq!(baud, 9600);
    /// ```
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.value(key).ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
        value.clone().try_into().map_err(|e: toml::de::Error| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// 读取失败时返回 `default`
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Ok(value) => value,
            Err(e) => {
                debug!("Falling back to default for '{}': {}", key, e);
                default
            },
        }
    }

    /// 按点分路径写入；中间层不存在或不是表时创建新表
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), ConfigError> {
        let value = Value::try_from(value).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let parts: Vec<&str> = key.split('.').collect();
        let Some((last, parents)) = parts.split_last() else {
            return Err(ConfigError::MissingKey(key.to_string()));
        };
        if last.is_empty() {
            return Err(ConfigError::MissingKey(key.to_string()));
        }

        let mut current = &mut self.table;
        for part in parents {
            let entry = current
                .entry(part.to_string())
                .or_insert(Value::Table(Table::new()));
            if !entry.is_table() {
                *entry = Value::Table(Table::new());
            }
            current = match entry {
                Value::Table(next) => next,
                _ => return Err(ConfigError::MissingKey(key.to_string())),
            };
        }
        current.insert(last.to_string(), value);
        debug!("Config key '{}' updated", key);
        Ok(())
    }

    pub fn device_settings(&self) -> DeviceSettings {
        self.get_or("device_settings", DeviceSettings::default())
    }

    pub fn logging(&self) -> LoggingConfig {
        self.get_or("logging", LoggingConfig::default())
    }

    /// 序列化为 TOML 文本
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(&self.table).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// 保存到加载时的路径
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.path.as_deref().ok_or(ConfigError::NoPath)?;
        self.save_to(path)
    }

    /// 保存到指定路径（自动创建父目录）
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Config saved to {}", path.display());
        Ok(())
    }
}

fn default_table() -> Table {
    toml::from_str(DEFAULT_CONFIG).unwrap_or_default()
}

/// 递归合并：`overlay` 中的值覆盖 `base`，两边都是表时逐项合并
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            },
            (_, value) => {
                base.insert(key, value);
            },
        }
    }
}
