//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为连接层对外暴露的失败语义提供集中定义：拆除原因（[`Failure`]）、发送失败（[`SendFailure`]）、
//!   协作方错误（[`SessionError`]）、升级错误（[`UpgradeError`]）以及配置/日志装配错误；
//! - 每类失败都带稳定的点分错误码（如 `http2.connection.closed`），便于日志检索与告警聚合。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，满足 `Send + Sync + 'static`；
//! - “资源已不存在”类竞态（重复释放、清空空队列）不属于错误，由调用结果枚举表达。

use std::{fmt, io, path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::frame::ErrorCode;

/// 拆除/中止原因的分类。
///
/// 拆除路径对所有分类一视同仁，分类只用于诊断与错误码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// 连接被主动关闭（所有者调用 `close`）。
    ConnectionClosed,
    /// 空闲超时触发的关闭。
    Timeout,
    /// 传输层致命错误导致的中止。
    TransportAbort,
    /// 单个请求层面的失败（例如无法与通道关联）。
    Request,
}

impl FailureKind {
    /// 稳定错误码，格式与工作区其余 crate 的 `domain.category.detail` 约定一致。
    pub const fn code(self) -> &'static str {
        match self {
            FailureKind::ConnectionClosed => "http2.connection.closed",
            FailureKind::Timeout => "http2.connection.idle_timeout",
            FailureKind::TransportAbort => "http2.transport.abort",
            FailureKind::Request => "http2.request.failed",
        }
    }
}

/// 关闭或中止连接时传播给每个在途交换的失败原因。
///
/// # 教案式说明
/// - **意图 (Why)**：一次关闭会扇出到 N 个在途交换，失败对象需要被反复克隆；
/// - **逻辑 (How)**：消息保存在 `Arc<str>` 中，克隆只增加引用计数；
/// - **契约 (What)**：[`Failure::message`] 作为会话 GOAWAY 的诊断文本发送给对端，调用方不应放入敏感信息。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{}: {message}", .kind.code())]
pub struct Failure {
    kind: FailureKind,
    message: Arc<str>,
}

impl Failure {
    /// 以任意分类与消息构造失败。
    pub fn new(kind: FailureKind, message: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 所有者主动关闭时使用的通用失败。
    pub fn connection_closed() -> Self {
        Self::new(FailureKind::ConnectionClosed, "connection closed")
    }

    pub fn timeout(message: impl Into<Arc<str>>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn transport_abort(message: impl Into<Arc<str>>) -> Self {
        Self::new(FailureKind::TransportAbort, message)
    }

    pub fn request(message: impl Into<Arc<str>>) -> Self {
        Self::new(FailureKind::Request, message)
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// `send` 无法派发交换时返回的失败。
///
/// # 契约说明（What）
/// - 以返回值而非 panic/传播的方式交给交换机制；是否重试由调用方根据 `retry` 决定；
/// - `retry == true` 表示交换尚未触达网络，可安全地换一条连接重发。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("send failed (retry={retry}): {failure}")]
pub struct SendFailure {
    pub failure: Failure,
    pub retry: bool,
}

impl SendFailure {
    pub fn new(failure: Failure, retry: bool) -> Self {
        Self { failure, retry }
    }
}

/// 会话协作方报告的错误。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    /// 会话已关闭，无法再开启新流。
    #[error("session is closed")]
    Closed,

    /// 会话拒绝开启新流（例如超过对端的并发流上限）。
    #[error("stream refused: {reason}")]
    Refused { reason: String },

    /// 协议层错误，携带 HTTP/2 错误码。
    #[error("protocol error {code}: {reason}")]
    Protocol { code: ErrorCode, reason: String },
}

/// 升级引导失败。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UpgradeError {
    /// 同一连接上重复调用 `upgrade`；隐式流 #1 只能存在一次。
    #[error("connection has already been upgraded")]
    AlreadyUpgraded,

    /// 连接已关闭，不再接受升级。
    #[error("connection is closed")]
    ConnectionClosed,

    /// 会话无法创建隐式流，原样透传，不做重试。
    #[error("session could not open the implicit stream: {0}")]
    Session(#[from] SessionError),
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// 未知的日志级别名称；合法值为 `ALL, TRACE, DEBUG, INFO, WARN, ERROR, OFF`。
    #[error("unknown log level `{level}` for `{target}`")]
    UnknownLevel { target: String, level: String },
}

/// 日志订阅器装配错误。
#[derive(Debug, Error)]
pub enum LoggingError {
    /// 外部已经设置了全局 `tracing` Subscriber。
    #[error("a global tracing subscriber has already been set")]
    SubscriberAlreadySet,

    #[error("invalid log levels: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid log filter directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_carries_stable_code() {
        let failure = Failure::timeout("idle_timeout");
        assert_eq!(failure.to_string(), "http2.connection.idle_timeout: idle_timeout");
        assert_eq!(failure.message(), "idle_timeout");
        assert_eq!(failure.kind(), FailureKind::Timeout);
    }

    #[test]
    fn send_failure_wraps_failure() {
        let failure = SendFailure::new(Failure::connection_closed(), true);
        assert!(failure.retry);
        assert_eq!(
            failure.to_string(),
            "send failed (retry=true): http2.connection.closed: connection closed"
        );
    }

    #[test]
    fn upgrade_error_converts_from_session_error() {
        let error: UpgradeError = SessionError::Closed.into();
        assert_eq!(error, UpgradeError::Session(SessionError::Closed));
    }
}
