//! HTTP/1.1 → HTTP/2 升级引导。
//!
//! # 教案式说明
//! - **意图 (Why)**：升级成功后，原始 HTTP/1.1 请求的响应会出现在隐式打开的流 #1 上，
//!   但这条流没有经过常规的发送路径，也就没有通道与交换去接收它；
//! - **逻辑 (How)**：以原请求的元数据构造 HEADERS 帧，让会话直接创建流 #1 并把本地端标记为
//!   已发送完毕；随后为它借出一个通道、创建新的交换并完成请求阶段，把流的监听器指向通道；
//! - **契约 (What)**：
//!   - 每个连接只能升级一次，重复调用返回 [`UpgradeError::AlreadyUpgraded`]；
//!   - 已关闭的连接返回 [`UpgradeError::ConnectionClosed`]；引导途中连接被关闭时同样返回该错误，
//!     借出的通道被销毁，原请求以关闭原因中止；
//!   - 会话拒绝创建隐式流时原样返回 [`UpgradeError::Session`]，不做重试。

use std::sync::{
    Arc,
    atomic::{Ordering, fence},
};

use http::{StatusCode, Version};

use crate::{
    connection::Http2Connection,
    error::UpgradeError,
    exchange::HttpExchange,
    frame::{CloseEvent, HeadersFrame, RequestMetadata},
    request::HttpRequest,
};

/// 升级响应的上下文：触发升级的原请求与 HTTP/1.1 响应状态。
#[derive(Debug, Clone)]
pub struct UpgradeContext {
    request: Arc<HttpRequest>,
    status: StatusCode,
}

impl UpgradeContext {
    pub fn new(request: Arc<HttpRequest>, status: StatusCode) -> Self {
        Self { request, status }
    }

    /// 以 `101 Switching Protocols` 构造上下文。
    pub fn switching_protocols(request: Arc<HttpRequest>) -> Self {
        Self::new(request, StatusCode::SWITCHING_PROTOCOLS)
    }

    pub fn request(&self) -> &Arc<HttpRequest> {
        &self.request
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl Http2Connection {
    /// 把升级请求的响应绑定到隐式流 #1，返回新建的交换。
    pub fn upgrade(&self, context: &UpgradeContext) -> Result<Arc<HttpExchange>, UpgradeError> {
        if self.is_closed() {
            return Err(UpgradeError::ConnectionClosed);
        }
        if !self.claim_upgrade() {
            return Err(UpgradeError::AlreadyUpgraded);
        }

        let request = context.request();
        let metadata = RequestMetadata::new(
            request.method().clone(),
            request.uri().clone(),
            Version::HTTP_2,
            request.headers().clone(),
        );
        let frame = HeadersFrame::new(metadata, true);
        let stream = self.session().new_implicit_stream(&frame)?;
        stream.update_close(frame.is_end_stream(), CloseEvent::AfterSend);

        let channel = self.acquire_channel();
        self.pool().activate(channel.clone());

        // 与 close_with 中的栅栏配对，语义同发送路径。
        fence(Ordering::SeqCst);
        if self.is_closed() {
            if let Some(channel) = self.pool().deactivate(channel.id()) {
                channel.destroy();
            }
            request.abort(self.abort_failure());
            return Err(UpgradeError::ConnectionClosed);
        }

        let exchange = HttpExchange::new(request.clone());
        channel.associate(exchange.clone());
        if !self.pool().is_active(channel.id()) {
            self.reclaim_taken(&channel, &exchange);
            return Err(UpgradeError::ConnectionClosed);
        }
        stream.set_listener(channel.stream_listener());
        channel.set_stream(Some(stream.clone()));
        exchange.request_complete(None);
        exchange.terminate_request();

        tracing::debug!(
            connection = %self,
            stream = %stream.id(),
            channel = %channel.id(),
            status = %context.status(),
            "upgrade bootstrapped on implicit stream"
        );
        Ok(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::SessionError,
        frame::StreamId,
        test_stubs::{Fixture, get_request},
    };

    #[test]
    fn upgrade_refuses_closed_connection() {
        let fixture = Fixture::new();
        fixture.connection.close();
        let context = UpgradeContext::switching_protocols(get_request("/upgrade"));
        assert_eq!(
            fixture.connection.upgrade(&context).map(|_| ()),
            Err(UpgradeError::ConnectionClosed)
        );
    }

    #[test]
    fn session_refusal_is_surfaced() {
        let fixture = Fixture::new();
        fixture.session.refuse_streams();
        let context = UpgradeContext::switching_protocols(get_request("/upgrade"));
        let error = fixture.connection.upgrade(&context).map(|_| ());
        assert!(matches!(
            error,
            Err(UpgradeError::Session(SessionError::Refused { .. }))
        ));
        assert_eq!(fixture.connection.pool().active_len(), 0);
        assert!(fixture.session.stream(StreamId::UPGRADE).is_none());
    }
}
