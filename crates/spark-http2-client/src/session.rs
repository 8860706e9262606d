//! 多路复用会话与流的协作方契约。
//!
//! # 教案式说明
//! - **意图 (Why)**：HTTP/2 帧编解码、流控与 HPACK 由会话实现负责，连接层只需要开流、
//!   关会话以及推进流的半关闭状态；
//! - **契约 (What)**：
//!   - 所有方法不得阻塞调用线程，真正的 I/O 由实现自行调度；
//!   - [`Session::close`] 的结果经由回调异步交付，连接层不会把关闭失败回传给自身调用方；
//!   - 实现需要提供 `Debug`，连接的诊断输出会内嵌会话描述。

use std::{fmt, sync::Arc};

use crate::{
    error::SessionError,
    frame::{CloseEvent, ErrorCode, HeadersFrame, ResponseMetadata, StreamId},
};

/// 会话关闭完成后的回调。
pub type CloseCallback = Box<dyn FnOnce(Result<(), SessionError>) + Send + 'static>;

/// 一条物理连接上的 HTTP/2 会话。
pub trait Session: Send + Sync + fmt::Debug {
    /// 发送 HEADERS 帧开启一条本地流，并把流事件交给 `listener`。
    fn open_local_stream(
        &self,
        frame: HeadersFrame,
        listener: Arc<dyn StreamListener>,
    ) -> Result<Arc<dyn Stream>, SessionError>;

    /// 直接创建本地流而不发送任何帧，用于升级后的隐式流 #1。
    ///
    /// 返回的流尚未设置监听器，由调用方随后通过 [`Stream::set_listener`] 绑定。
    fn new_implicit_stream(&self, frame: &HeadersFrame) -> Result<Arc<dyn Stream>, SessionError>;

    /// 以 GOAWAY 优雅关闭会话；`reason` 作为诊断文本发送给对端。
    fn close(&self, code: ErrorCode, reason: &str, callback: CloseCallback);
}

/// 会话内的一条逻辑流。
pub trait Stream: Send + Sync + fmt::Debug {
    fn id(&self) -> StreamId;

    /// 本地发起的流返回 `true`；服务器推送的流返回 `false`。
    fn is_local(&self) -> bool;

    /// 推进半关闭状态；当流因此完全关闭时返回 `true`。
    fn update_close(&self, end_stream: bool, event: CloseEvent) -> bool;

    fn set_listener(&self, listener: Arc<dyn StreamListener>);
}

/// 流事件监听器，通常由通道提供，负责把帧翻译为交换上的事件。
pub trait StreamListener: Send + Sync {
    fn on_headers(&self, stream: &Arc<dyn Stream>, response: ResponseMetadata, end_stream: bool);

    fn on_reset(&self, stream: &Arc<dyn Stream>, code: ErrorCode) {
        let _ = (stream, code);
    }
}
