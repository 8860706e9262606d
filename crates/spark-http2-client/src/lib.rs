//! # spark-http2-client
//!
//! ## 定位与职责（Why）
//! - 将一条 HTTP/2 物理会话（[`Session`]）呈现为一组可复用的逐交换通道（[`HttpChannel`]），
//!   供目的地级连接池在其上并发派发请求；
//! - 集中处理连接内资源的生命周期：通道的获取与回收、幂等关闭、失败传播、空闲超时拦截，
//!   以及面向外部回收器（[`Sweeper`]）的去抖式“可回收”判定；
//! - 为 HTTP/1.1 → HTTP/2 升级提供一次性的隐式流 #1 引导路径。
//!
//! ## 架构嵌入（Where）
//! - `session`/`channel`/`destination`/`idle` 模块仅定义协作方契约，帧编解码、流控等由外部实现；
//! - `pool`、`lifecycle`、`sweep`、`connection`、`upgrade` 构成本 crate 的核心；
//! - `config` 与 `logging` 提供 TOML 配置加载与 `tracing` 订阅器装配；
//! - `test_stubs` 公开记录型桩实现，供下游契约测试复用。
//!
//! ## 并发契约（What）
//! - 所有公开方法均不阻塞，可在任意线程并发调用；
//! - 关闭通过单个 CAS 线性化，仅有一个调用方执行拆除；
//! - 任一通道在任意时刻只处于 {活跃集合, 空闲队列, 已销毁} 之一。

pub mod channel;
pub mod config;
pub mod connection;
pub mod destination;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod idle;
pub mod lifecycle;
pub mod logging;
pub mod pool;
pub mod request;
pub mod session;
pub mod sweep;
pub mod test_stubs;
pub mod upgrade;

mod sync;

pub use channel::{ChannelContext, ChannelFactory, ChannelId, HttpChannel};
pub use config::{ClientConfig, ConnectionConfig};
pub use connection::{ConnectionId, Http2Connection, Http2ConnectionBuilder};
pub use destination::Destination;
pub use error::{
    ConfigError, Failure, FailureKind, LoggingError, SendFailure, SessionError, UpgradeError,
};
pub use exchange::HttpExchange;
pub use frame::{CloseEvent, ErrorCode, HeadersFrame, RequestMetadata, ResponseMetadata, StreamId};
pub use idle::{ActivityIdlePolicy, IdleTimeoutPolicy};
pub use lifecycle::CloseGate;
pub use logging::{LogLevel, LogLevels, install as install_logging};
pub use pool::{ChannelPool, ReleaseOutcome};
pub use request::{HttpConversation, HttpRequest, HttpRequestBuilder, HttpUpgrader, UpgraderFactory};
pub use session::{CloseCallback, Session, Stream, StreamListener};
pub use sweep::{SWEEP_THRESHOLD, SweepGate, Sweepable, Sweeper};
pub use upgrade::UpgradeContext;
