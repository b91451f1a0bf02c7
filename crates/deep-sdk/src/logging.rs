//! 日志初始化
//!
//! 由入口程序调用一次；库代码本身只使用 `tracing` 宏，不安装订阅者。

use crate::error::SdkError;
use deep_tools::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// 根据配置生成过滤器，设置了 `RUST_LOG` 时以环境变量为准
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, SdkError> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }
    let directive = config.directive();
    EnvFilter::try_new(directive).map_err(|e| SdkError::Logging {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}

/// 安装全局 fmt 订阅者
///
/// 返回 `Ok(true)` 表示本次完成安装，`Ok(false)` 表示已有全局订阅者（重复调用不报错）。
///
/// # 错误
/// - `SdkError::Logging`: 过滤指令非法
///
/// # Example
///
/// ```
/// use deep_sdk::{LoggingConfig, init_logging};
///
/// let config = LoggingConfig::default();
/// init_logging(&config).unwrap();
/// assert!(!init_logging(&config).unwrap());
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<bool, SdkError> {
    let filter = build_filter(config)?;
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("Logging initialized with '{}'", config.directive());
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_invalid_directive_rejected() {
        // SAFETY: serial 测试内修改环境变量，没有并发读取
        unsafe { std::env::remove_var("RUST_LOG") };
        let config = LoggingConfig {
            level: "info".to_string(),
            filter: Some("deep_driver=notalevel".to_string()),
        };
        assert!(matches!(build_filter(&config), Err(SdkError::Logging { .. })));
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_config() {
        // SAFETY: 同上
        unsafe { std::env::set_var("RUST_LOG", "deep_sdk=trace") };
        let config = LoggingConfig {
            level: "info".to_string(),
            filter: Some("deep_driver=notalevel".to_string()),
        };
        let filter = build_filter(&config);
        unsafe { std::env::remove_var("RUST_LOG") };
        assert!(filter.is_ok());
    }

    #[test]
    #[serial]
    fn test_init_is_idempotent() {
        // SAFETY: 同上
        unsafe { std::env::remove_var("RUST_LOG") };
        let config = LoggingConfig::default();
        init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }
}
