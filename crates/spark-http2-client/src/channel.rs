//! 逐交换通道契约。
//!
//! # 教案式说明
//! - **意图 (Why)**：一个连接对应 N 个通道，每个在途交换独占一个通道；通道负责把交换翻译为
//!   流上的帧，连接层只负责通道的借出、回收与销毁；
//! - **逻辑 (How)**：连接通过 [`ChannelFactory`] 按需创建通道，并在 [`ChannelContext`] 中传入
//!   池分配的 [`ChannelId`] 与指回连接的弱引用，避免 `连接 → 通道 → 连接` 的强引用环；
//! - **契约 (What)**：
//!   - [`HttpChannel::id`] 必须返回创建时收到的 `ChannelId`，连接以此作为活跃集合的键；
//!   - [`HttpChannel::destroy`] 必须幂等；
//!   - 交换结束时，通道应调用 [`Http2Connection::release`] 归还自身；
//!     流关闭时调用 [`Http2Connection::on_stream_closed`]。

use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    connection::Http2Connection,
    error::SendFailure,
    exchange::HttpExchange,
    session::{Session, Stream, StreamListener},
};

/// 池内通道标识，由连接单调分配。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// 创建通道时交给工厂的上下文。
#[derive(Clone)]
pub struct ChannelContext {
    pub id: ChannelId,
    pub connection: Weak<Http2Connection>,
    pub session: Arc<dyn Session>,
}

impl fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelContext")
            .field("id", &self.id)
            .field("session", &self.session)
            .finish()
    }
}

/// 单个交换与单条流之间的适配器。
pub trait HttpChannel: Send + Sync + fmt::Debug {
    fn id(&self) -> ChannelId;

    /// 通道是否处于失败状态；失败的通道不会被复用。
    fn is_failed(&self) -> bool;

    /// 释放通道持有的资源，可重复调用。
    fn destroy(&self);

    /// 将交换绑定到通道；通道已被其他交换占用时返回 `false`。
    fn associate(&self, exchange: Arc<HttpExchange>) -> bool;

    /// 当前绑定的交换。
    fn exchange(&self) -> Option<Arc<HttpExchange>>;

    fn set_stream(&self, stream: Option<Arc<dyn Stream>>);

    fn stream(&self) -> Option<Arc<dyn Stream>>;

    fn stream_listener(&self) -> Arc<dyn StreamListener>;

    /// 开流并发送请求帧，失败原样返回给连接的调用方。
    fn send(&self, exchange: &Arc<HttpExchange>) -> Result<(), SendFailure>;
}

/// 通道工厂。
pub trait ChannelFactory: Send + Sync {
    fn new_channel(&self, context: ChannelContext) -> Arc<dyn HttpChannel>;
}
