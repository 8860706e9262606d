//! TOML 配置。
//!
//! # 教案式说明
//! - **意图 (Why)**：通道复用开关与日志级别需要在不重新编译的情况下调整；
//! - **逻辑 (How)**：`serde` 反序列化 + `#[serde(default)]`，缺省的段与字段取默认值；
//!   日志级别名称在加载时统一校验，未知名称以 [`ConfigError::UnknownLevel`] 报告；
//! - **契约 (What)**：
//!
//! ```toml
//! [connection]
//! recycle_channels = true
//!
//! [logging]
//! root = "info"
//! [logging.levels]
//! "spark_http2_client::pool" = "debug"
//! ```

use std::{fs, path::Path};

use serde::Deserialize;

use crate::{error::ConfigError, logging::LogLevels};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub logging: LogLevels,
}

/// 连接级配置。
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 交换结束后健康的通道是否回到空闲队列；关闭时每次交换结束都销毁通道。
    pub recycle_channels: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            recycle_channels: true,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.logging.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ClientConfig::from_toml_str("").expect("空文档应可解析");
        assert!(config.connection.recycle_channels);
        assert_eq!(config.logging, LogLevels::default());
    }

    #[test]
    fn full_document_is_parsed() {
        let config = ClientConfig::from_toml_str(
            r#"
            [connection]
            recycle_channels = false

            [logging]
            root = "warn"
            [logging.levels]
            "spark_http2_client::pool" = "DEBUG"
            "#,
        )
        .expect("配置应可解析");

        assert!(!config.connection.recycle_channels);
        assert_eq!(
            config.logging.level_for("spark_http2_client::pool::idle").ok(),
            Some(LogLevel::Debug)
        );
        assert_eq!(
            config.logging.level_for("spark_http2_client::connection").ok(),
            Some(LogLevel::Warn)
        );
    }

    #[test]
    fn unknown_level_is_rejected() {
        let error = ClientConfig::from_toml_str(
            r#"
            [logging.levels]
            "spark_http2_client" = "verbose"
            "#,
        )
        .expect_err("未知级别必须被拒绝");
        assert!(matches!(
            error,
            ConfigError::UnknownLevel { ref target, ref level }
                if target == "spark_http2_client" && level == "verbose"
        ));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let error = ClientConfig::from_toml_str("[connection\nrecycle_channels = 1")
            .expect_err("非法 TOML 必须报错");
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let error = ClientConfig::load("/nonexistent/spark-http2-client.toml")
            .expect_err("不存在的文件必须报错");
        match error {
            ConfigError::Io { path, .. } => {
                assert!(path.ends_with("spark-http2-client.toml"));
            }
            other => panic!("期望 Io 错误，实际为 {other:?}"),
        }
    }
}
