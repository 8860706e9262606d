//! 记录型测试桩：为每个协作方契约提供可观察的最小实现。
//!
//! # 设计定位（Why）
//! - 连接层的行为全部体现在它对协作方的调用上（开流、关会话、通知目的地、销毁通道），
//!   测试需要能够断言这些调用发生的次数与参数；
//! - 集成测试、属性测试与下游契约测试共享同一套桩，避免各测试文件重复定义。
//!
//! # 使用方式（How）
//! - [`Fixture::new`] 一次性装配会话、目的地、通道工厂与连接；
//! - [`RecordingChannel::finish_exchange`]、[`RecordingChannel::close_stream`] 模拟上层交换机制
//!   在交换结束与流关闭时回调连接；
//! - [`RecordingStream::deliver_headers`] 模拟会话把响应帧交给流监听器。
//!
//! # 风险提示（Trade-offs）
//! - 桩不做任何 I/O，也不模拟流控；它们只记录调用并按开关返回预设的失败。

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
};

use http::{Method, Uri};
use parking_lot::Mutex;

use crate::{
    channel::{ChannelContext, ChannelFactory, ChannelId, HttpChannel},
    config::ConnectionConfig,
    connection::Http2Connection,
    destination::Destination,
    error::{Failure, SendFailure, SessionError},
    exchange::HttpExchange,
    frame::{CloseEvent, ErrorCode, HeadersFrame, RequestMetadata, ResponseMetadata, StreamId},
    idle::IdleTimeoutPolicy,
    pool::ReleaseOutcome,
    request::HttpRequest,
    session::{CloseCallback, Session, Stream, StreamListener},
};

/// 记录关闭请求、按序分配流标识的会话。
#[derive(Default)]
pub struct RecordingSession {
    next_stream: AtomicU32,
    streams: Mutex<Vec<Arc<RecordingStream>>>,
    closes: Mutex<Vec<(ErrorCode, String)>>,
    refuse_streams: AtomicBool,
    fail_close: AtomicBool,
    implicit_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl RecordingSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 之后的开流请求返回 [`SessionError::Refused`]。
    pub fn refuse_streams(&self) {
        self.refuse_streams.store(true, Ordering::Release);
    }

    /// 之后的关闭回调收到 [`SessionError::Closed`]。
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::Release);
    }

    /// 下一次创建隐式流之前执行 `hook`，用于在升级引导途中插入其他操作。
    pub fn on_implicit_stream(&self, hook: impl FnOnce() + Send + 'static) {
        *self.implicit_hook.lock() = Some(Box::new(hook));
    }

    pub fn close_count(&self) -> usize {
        self.closes.lock().len()
    }

    pub fn closes(&self) -> Vec<(ErrorCode, String)> {
        self.closes.lock().clone()
    }

    pub fn streams(&self) -> Vec<Arc<RecordingStream>> {
        self.streams.lock().clone()
    }

    pub fn stream(&self, id: StreamId) -> Option<Arc<RecordingStream>> {
        self.streams
            .lock()
            .iter()
            .find(|stream| stream.id == id)
            .cloned()
    }

    // 客户端流为奇数，#1 保留给升级后的隐式流。
    fn allocate(&self) -> StreamId {
        let n = self.next_stream.fetch_add(1, Ordering::AcqRel);
        StreamId(3 + 2 * n)
    }

    fn register(&self, stream: Arc<RecordingStream>) -> Arc<dyn Stream> {
        self.streams.lock().push(stream.clone());
        stream
    }
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordingSession(streams={})", self.streams.lock().len())
    }
}

impl Session for RecordingSession {
    fn open_local_stream(
        &self,
        frame: HeadersFrame,
        listener: Arc<dyn StreamListener>,
    ) -> Result<Arc<dyn Stream>, SessionError> {
        if self.refuse_streams.load(Ordering::Acquire) {
            return Err(SessionError::Refused {
                reason: "stream refused".to_owned(),
            });
        }
        let stream = RecordingStream::new(self.allocate(), true, Some(frame));
        stream.set_listener(listener);
        Ok(self.register(stream))
    }

    fn new_implicit_stream(&self, frame: &HeadersFrame) -> Result<Arc<dyn Stream>, SessionError> {
        let hook = self.implicit_hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        if self.refuse_streams.load(Ordering::Acquire) {
            return Err(SessionError::Refused {
                reason: "stream refused".to_owned(),
            });
        }
        let stream = RecordingStream::new(StreamId::UPGRADE, true, Some(frame.clone()));
        Ok(self.register(stream))
    }

    fn close(&self, code: ErrorCode, reason: &str, callback: CloseCallback) {
        self.closes.lock().push((code, reason.to_owned()));
        if self.fail_close.load(Ordering::Acquire) {
            callback(Err(SessionError::Closed));
        } else {
            callback(Ok(()));
        }
    }
}

/// 记录半关闭推进与监听器绑定的流。
pub struct RecordingStream {
    id: StreamId,
    local: bool,
    frame: Option<HeadersFrame>,
    listener: Mutex<Option<Arc<dyn StreamListener>>>,
    close_updates: Mutex<Vec<(bool, CloseEvent)>>,
    this: Weak<RecordingStream>,
}

impl RecordingStream {
    pub fn new(id: StreamId, local: bool, frame: Option<HeadersFrame>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            local,
            frame,
            listener: Mutex::new(None),
            close_updates: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// 服务器推送的流。
    pub fn pushed(id: StreamId) -> Arc<Self> {
        Self::new(id, false, None)
    }

    pub fn frame(&self) -> Option<&HeadersFrame> {
        self.frame.as_ref()
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub fn close_updates(&self) -> Vec<(bool, CloseEvent)> {
        self.close_updates.lock().clone()
    }

    /// 把响应头交给当前监听器；没有监听器时返回 `false`。
    pub fn deliver_headers(&self, response: ResponseMetadata, end_stream: bool) -> bool {
        let listener = self.listener.lock().clone();
        let Some(listener) = listener else {
            return false;
        };
        let Some(this) = self.this.upgrade() else {
            return false;
        };
        let stream: Arc<dyn Stream> = this;
        listener.on_headers(&stream, response, end_stream);
        true
    }
}

impl fmt::Debug for RecordingStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingStream")
            .field("id", &self.id)
            .field("local", &self.local)
            .finish()
    }
}

impl Stream for RecordingStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn is_local(&self) -> bool {
        self.local
    }

    fn update_close(&self, end_stream: bool, event: CloseEvent) -> bool {
        let mut updates = self.close_updates.lock();
        updates.push((end_stream, event));
        end_stream && updates.iter().any(|(_, event)| *event == CloseEvent::Received)
    }

    fn set_listener(&self, listener: Arc<dyn StreamListener>) {
        *self.listener.lock() = Some(listener);
    }
}

/// 关联成功后对所属连接执行的回调。
pub type AssociateHook = Arc<dyn Fn(&Http2Connection) + Send + Sync>;

/// 记录关联、发送与销毁的通道。
pub struct RecordingChannel {
    id: ChannelId,
    connection: Weak<Http2Connection>,
    session: Option<Arc<dyn Session>>,
    exchange: Mutex<Option<Arc<HttpExchange>>>,
    stream: Mutex<Option<Arc<dyn Stream>>>,
    failed: AtomicBool,
    reject_association: AtomicBool,
    on_associate: Option<AssociateHook>,
    destroys: AtomicUsize,
    sends: AtomicUsize,
    this: Weak<RecordingChannel>,
}

impl RecordingChannel {
    /// 由连接创建的通道。
    pub fn attached(context: ChannelContext) -> Arc<Self> {
        Self::attached_with(context, None)
    }

    /// 由连接创建、关联成功后执行 `on_associate` 的通道。
    pub fn attached_with(context: ChannelContext, on_associate: Option<AssociateHook>) -> Arc<Self> {
        Self::build(
            context.id,
            context.connection,
            Some(context.session),
            on_associate,
        )
    }

    /// 不属于任何连接的通道，用于单独测试通道池。
    pub fn detached(id: ChannelId) -> Arc<Self> {
        Self::build(id, Weak::new(), None, None)
    }

    fn build(
        id: ChannelId,
        connection: Weak<Http2Connection>,
        session: Option<Arc<dyn Session>>,
        on_associate: Option<AssociateHook>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            connection,
            session,
            exchange: Mutex::new(None),
            stream: Mutex::new(None),
            failed: AtomicBool::new(false),
            reject_association: AtomicBool::new(false),
            on_associate,
            destroys: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
            this: this.clone(),
        })
    }

    pub fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// 之后的 [`HttpChannel::associate`] 返回 `false`。
    pub fn reject_association(&self) {
        self.reject_association.store(true, Ordering::Release);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroys.load(Ordering::Acquire) > 0
    }

    /// 实际生效的销毁次数；重复销毁不计数。
    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::Acquire)
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::Acquire)
    }

    fn as_dyn(&self) -> Option<Arc<dyn HttpChannel>> {
        self.this
            .upgrade()
            .map(|channel| channel as Arc<dyn HttpChannel>)
    }

    /// 模拟交换结束：解除关联与流绑定，然后把自身归还给连接。
    ///
    /// 连接已释放时返回 `None`。
    pub fn finish_exchange(&self) -> Option<ReleaseOutcome> {
        self.exchange.lock().take();
        self.stream.lock().take();
        let connection = self.connection.upgrade()?;
        let channel = self.as_dyn()?;
        Some(connection.release(&channel))
    }

    /// 模拟会话报告当前绑定的流已关闭；没有绑定流时返回 `false`。
    pub fn close_stream(&self) -> bool {
        let stream = self.stream.lock().clone();
        let (Some(stream), Some(connection), Some(channel)) =
            (stream, self.connection.upgrade(), self.as_dyn())
        else {
            return false;
        };
        connection.on_stream_closed(&stream, &channel);
        true
    }
}

impl fmt::Debug for RecordingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingChannel")
            .field("id", &self.id)
            .field("failed", &self.failed.load(Ordering::Acquire))
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl HttpChannel for RecordingChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn destroy(&self) {
        let _ = self
            .destroys
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire);
    }

    fn associate(&self, exchange: Arc<HttpExchange>) -> bool {
        if self.reject_association.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut slot = self.exchange.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(exchange);
        }
        // 回调可能关闭连接，中止路径会再次读取关联的交换，不能持锁调用。
        if let (Some(hook), Some(connection)) = (&self.on_associate, self.connection.upgrade()) {
            hook(&connection);
        }
        true
    }

    fn exchange(&self) -> Option<Arc<HttpExchange>> {
        self.exchange.lock().clone()
    }

    fn set_stream(&self, stream: Option<Arc<dyn Stream>>) {
        *self.stream.lock() = stream;
    }

    fn stream(&self) -> Option<Arc<dyn Stream>> {
        self.stream.lock().clone()
    }

    fn stream_listener(&self) -> Arc<dyn StreamListener> {
        Arc::new(ChannelListener {
            channel: self.this.clone(),
        })
    }

    fn send(&self, exchange: &Arc<HttpExchange>) -> Result<(), SendFailure> {
        self.sends.fetch_add(1, Ordering::AcqRel);
        let Some(session) = self.session.as_ref() else {
            return Err(SendFailure::new(
                Failure::request("channel is not bound to a session"),
                false,
            ));
        };
        let request = exchange.request();
        let metadata = RequestMetadata::new(
            request.method().clone(),
            request.uri().clone(),
            request.version(),
            request.headers().clone(),
        );
        match session.open_local_stream(HeadersFrame::new(metadata, true), self.stream_listener()) {
            Ok(stream) => {
                self.set_stream(Some(stream));
                exchange.request_complete(None);
                Ok(())
            }
            Err(error) => {
                self.fail();
                Err(SendFailure::new(Failure::request(error.to_string()), false))
            }
        }
    }
}

/// 把流上的响应头转交给通道当前关联的交换。
struct ChannelListener {
    channel: Weak<RecordingChannel>,
}

impl StreamListener for ChannelListener {
    fn on_headers(&self, _stream: &Arc<dyn Stream>, response: ResponseMetadata, _end_stream: bool) {
        if let Some(exchange) = self.channel.upgrade().and_then(|channel| channel.exchange()) {
            exchange.response_begin(response);
        }
    }
}

/// 创建 [`RecordingChannel`] 并保留其引用的工厂。
#[derive(Default)]
pub struct RecordingChannelFactory {
    created: Mutex<Vec<Arc<RecordingChannel>>>,
    on_associate: Mutex<Option<AssociateHook>>,
}

impl RecordingChannelFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 之后创建的通道在关联成功后对所属连接执行 `hook`。
    pub fn on_associate(&self, hook: impl Fn(&Http2Connection) + Send + Sync + 'static) {
        *self.on_associate.lock() = Some(Arc::new(hook));
    }

    pub fn created(&self) -> Vec<Arc<RecordingChannel>> {
        self.created.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<RecordingChannel>> {
        self.created
            .lock()
            .iter()
            .find(|channel| channel.id == id)
            .cloned()
    }

    /// 找到当前关联 `exchange` 的通道。
    pub fn channel_for(&self, exchange: &Arc<HttpExchange>) -> Option<Arc<RecordingChannel>> {
        self.created
            .lock()
            .iter()
            .find(|channel| {
                channel
                    .exchange()
                    .is_some_and(|bound| Arc::ptr_eq(&bound, exchange))
            })
            .cloned()
    }
}

impl ChannelFactory for RecordingChannelFactory {
    fn new_channel(&self, context: ChannelContext) -> Arc<dyn HttpChannel> {
        let hook = self.on_associate.lock().clone();
        let channel = RecordingChannel::attached_with(context, hook);
        self.created.lock().push(channel.clone());
        channel
    }
}

/// 统计容量释放与关闭通知的目的地。
#[derive(Debug, Default)]
pub struct RecordingDestination {
    releases: AtomicUsize,
    closes: AtomicUsize,
}

impl RecordingDestination {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::Acquire)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

impl Destination for RecordingDestination {
    fn release(&self, _connection: &Http2Connection) {
        self.releases.fetch_add(1, Ordering::AcqRel);
    }

    fn close(&self, _connection: &Http2Connection) {
        self.closes.fetch_add(1, Ordering::AcqRel);
    }
}

/// 装配完成的连接及其全部协作方。
pub struct Fixture {
    pub connection: Arc<Http2Connection>,
    pub session: Arc<RecordingSession>,
    pub destination: Arc<RecordingDestination>,
    pub channels: Arc<RecordingChannelFactory>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(ConnectionConfig::default(), None)
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_idle_policy(policy: Arc<dyn IdleTimeoutPolicy>) -> Self {
        Self::build(ConnectionConfig::default(), Some(policy))
    }

    fn build(config: ConnectionConfig, policy: Option<Arc<dyn IdleTimeoutPolicy>>) -> Self {
        let session = RecordingSession::new();
        let destination = RecordingDestination::new();
        let channels = RecordingChannelFactory::new();
        let mut builder =
            Http2Connection::builder(session.clone(), destination.clone(), channels.clone())
                .config(config);
        if let Some(policy) = policy {
            builder = builder.idle_policy(policy);
        }
        Self {
            connection: builder.build(),
            session,
            destination,
            channels,
        }
    }

    /// 发送一个新交换，返回交换与承载它的通道。
    pub fn dispatch(
        &self,
        path: &str,
    ) -> Result<(Arc<HttpExchange>, Arc<RecordingChannel>), SendFailure> {
        let exchange = get_exchange(path);
        self.connection.send(exchange.clone())?;
        let channel = self.channels.channel_for(&exchange).ok_or_else(|| {
            SendFailure::new(Failure::request("exchange is not bound to a channel"), false)
        })?;
        Ok((exchange, channel))
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// 构造指向 `http://localhost{path}` 的 GET 交换；路径非法时退回根路径。
pub fn get_exchange(path: &str) -> Arc<HttpExchange> {
    HttpExchange::new(get_request(path))
}

pub fn get_request(path: &str) -> Arc<HttpRequest> {
    let uri = format!("http://localhost{path}")
        .parse::<Uri>()
        .unwrap_or_else(|_| Uri::from_static("http://localhost/"));
    HttpRequest::builder(Method::GET, uri).build()
}
