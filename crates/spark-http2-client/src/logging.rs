//! 分层日志级别与 `tracing` 订阅器装配。
//!
//! # 教案式说明
//! - **意图 (Why)**：排查连接问题时常需要只放开某个模块（例如通道池）的调试日志，
//!   其余模块保持 `info`；
//! - **逻辑 (How)**：[`LogLevels`] 保存 `target → level` 映射，查找时沿 `::` 从最长前缀逐级回退，
//!   再回退到 `root`，最后回退到 `INFO`；[`LogLevels::to_env_filter`] 把映射翻译为
//!   `tracing_subscriber::EnvFilter` 指令，由 `EnvFilter` 自身的前缀匹配完成同样的回退；
//! - **契约 (What)**：
//!   - 级别名称不区分大小写，合法值为 `ALL, TRACE, DEBUG, INFO, WARN, ERROR, OFF`，`ALL` 等价于 `TRACE`；
//!   - [`install`] 只能成功一次；设置了 `RUST_LOG` 时以环境变量为准。

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

use crate::error::{ConfigError, LoggingError};

/// 根级别缺省时使用的级别。
const DEFAULT_LEVEL: LogLevel = LogLevel::Info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    All,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// 解析级别名称；`target` 只用于错误报告。
    pub fn parse(target: &str, name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "OFF" => Ok(Self::Off),
            _ => Err(ConfigError::UnknownLevel {
                target: target.to_owned(),
                level: name.to_owned(),
            }),
        }
    }

    /// `EnvFilter` 指令中的级别写法。
    pub fn directive(self) -> &'static str {
        match self {
            Self::All | Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }
}

/// 分层日志级别表。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogLevels {
    root: Option<String>,
    levels: BTreeMap<String, String>,
}

impl LogLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, level: LogLevel) -> Self {
        self.root = Some(level.directive().to_owned());
        self
    }

    pub fn with_level(mut self, target: impl Into<String>, level: LogLevel) -> Self {
        self.levels
            .insert(target.into(), level.directive().to_owned());
        self
    }

    /// 校验所有级别名称。
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.root_level()?;
        for (target, name) in &self.levels {
            LogLevel::parse(target, name)?;
        }
        Ok(())
    }

    /// 解析 `target` 的有效级别。
    pub fn level_for(&self, target: &str) -> Result<LogLevel, ConfigError> {
        let mut candidate = target;
        loop {
            if let Some(name) = self.levels.get(candidate) {
                return LogLevel::parse(candidate, name);
            }
            match candidate.rfind("::") {
                Some(split) => candidate = &candidate[..split],
                None => break,
            }
        }
        self.root_level()
    }

    fn root_level(&self) -> Result<LogLevel, ConfigError> {
        match self.root.as_deref() {
            Some(name) => LogLevel::parse("root", name),
            None => Ok(DEFAULT_LEVEL),
        }
    }

    /// 生成 `EnvFilter` 指令串：先写根级别，再按目标名排序写出各条目。
    pub fn directives(&self) -> Result<String, ConfigError> {
        let mut directives = vec![self.root_level()?.directive().to_owned()];
        for (target, name) in &self.levels {
            let level = LogLevel::parse(target, name)?;
            directives.push(format!("{target}={}", level.directive()));
        }
        Ok(directives.join(","))
    }

    pub fn to_env_filter(&self) -> Result<EnvFilter, LoggingError> {
        Ok(EnvFilter::builder().parse(self.directives()?)?)
    }
}

/// 组装 `registry + EnvFilter + fmt` 并设置为全局 Subscriber。
///
/// # 契约说明（What）
/// - 外部已设置全局 Subscriber 时返回 [`LoggingError::SubscriberAlreadySet`]；
/// - `RUST_LOG` 可解析时优先使用，否则使用 `levels`。
pub fn install(levels: &LogLevels) -> Result<(), LoggingError> {
    if tracing::dispatcher::has_been_set() {
        return Err(LoggingError::SubscriberAlreadySet);
    }
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => levels.to_env_filter()?,
    };
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
