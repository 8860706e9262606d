//! # Http2Connection：连接级多路复用控制器
//!
//! ## 核心意图（Why）
//! - 一条 HTTP/2 会话承载多个并发交换；本类型把会话呈现为可复用的通道池，并集中管理连接内
//!   资源的生命周期（目的地池负责连接本身的去留）；
//! - 多个线程可能同时在发送新交换、接收流关闭通知、触发空闲超时、被回收器轮询，所有路径都
//!   必须满足：关闭恰好执行一次、通道不泄漏也不重复回收、交换不会被失败两次。
//!
//! ## 行为契约（What）
//! - [`Http2Connection::send`]：检查连接未关闭 → 规范化请求 → 获取并登记通道 → 交由通道开流发送；
//! - [`Http2Connection::release`]：交换结束后归还通道，健康且开启复用时入空闲队列；
//! - [`Http2Connection::on_stream_closed`]：解绑流；本地流关闭时通知目的地有空余容量；
//! - [`Http2Connection::close_with`]：CAS 胜出者依次通知目的地、中止在途交换、GOAWAY 关闭会话、
//!   清空空闲队列，四步互不阻断；
//! - [`Http2Connection::on_idle_timeout`]：空闲时自行关闭，但始终返回 `false`，
//!   防止调用方基于返回值再次关闭。
//!
//! ## 风险提示（Trade-offs）
//! - 发送路径与关闭路径分别写入不同的并发容器后再读取对方的状态，属于“存储缓冲”式竞态；
//!   两侧各放置一个 `SeqCst` 栅栏，保证至少有一方观察到另一方的写入。

use std::{
    fmt,
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering, fence},
    },
    time::Duration,
};

use http::Version;
use parking_lot::Mutex;

use crate::{
    channel::{ChannelContext, ChannelFactory, HttpChannel},
    config::ConnectionConfig,
    destination::Destination,
    error::{Failure, SendFailure},
    exchange::HttpExchange,
    frame::ErrorCode,
    idle::{ActivityIdlePolicy, IdleTimeoutPolicy},
    lifecycle::CloseGate,
    pool::{ChannelPool, ReleaseOutcome},
    request::HttpRequest,
    session::{Session, Stream},
    sweep::{SweepGate, Sweepable},
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的连接标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

pub struct Http2Connection {
    id: ConnectionId,
    session: Arc<dyn Session>,
    destination: Arc<dyn Destination>,
    channels: Arc<dyn ChannelFactory>,
    idle_policy: Arc<dyn IdleTimeoutPolicy>,
    pool: ChannelPool,
    close_gate: CloseGate,
    close_cause: OnceLock<Failure>,
    last_abort: Mutex<Option<Failure>>,
    sweep_gate: SweepGate,
    upgraded: AtomicBool,
    this: Weak<Http2Connection>,
}

impl Http2Connection {
    /// 以会话、目的地与通道工厂开始构建连接。
    pub fn builder(
        session: Arc<dyn Session>,
        destination: Arc<dyn Destination>,
        channels: Arc<dyn ChannelFactory>,
    ) -> Http2ConnectionBuilder {
        Http2ConnectionBuilder {
            session,
            destination,
            channels,
            idle_policy: None,
            config: ConnectionConfig::default(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// 连接内的通道池，主要用于诊断与测试观察。
    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    pub fn recycle_channels(&self) -> bool {
        self.pool.recycle_channels()
    }

    pub fn set_recycle_channels(&self, recycle: bool) {
        self.pool.set_recycle_channels(recycle);
    }

    /// 派发一个交换。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：一个连接映射到 N 个通道，每个交换占用一个通道；
    /// - **逻辑 (How)**：
    ///   1. 连接已关闭 → 可重试的 `ConnectionClosed`；
    ///   2. 请求版本改为 HTTP/2，并按需装配升级器；
    ///   3. 进入空闲守卫的发送窗口，被拒绝（已判定空闲）→ 可重试的超时失败；
    ///   4. 获取通道、登记为活跃、与交换关联，再交给通道开流发送；
    /// - **契约 (What)**：返回的失败只做转交，不做解释；重试策略属于交换机制。
    pub fn send(&self, exchange: Arc<HttpExchange>) -> Result<(), SendFailure> {
        if self.is_closed() {
            return Err(SendFailure::new(self.close_failure(), true));
        }

        let request = exchange.request();
        request.set_version(Version::HTTP_2);
        self.normalize_request(request);

        if !self.idle_policy.begin_send() {
            return Err(SendFailure::new(Failure::timeout("idle_timeout"), true));
        }
        let result = self.dispatch(&exchange);
        self.idle_policy.end_send();
        result
    }

    fn dispatch(&self, exchange: &Arc<HttpExchange>) -> Result<(), SendFailure> {
        let channel = self.acquire_channel();
        self.pool.activate(channel.clone());

        // 与 close_with 中的栅栏配对。
        fence(Ordering::SeqCst);
        if self.is_closed() {
            // 中止路径若已取走该通道，会因其尚无交换而直接销毁。
            if let Some(channel) = self.pool.deactivate(channel.id()) {
                channel.destroy();
            }
            return Err(SendFailure::new(self.close_failure(), true));
        }

        if !channel.associate(exchange.clone()) {
            self.release(&channel);
            return Err(SendFailure::new(
                Failure::request("could not associate request to connection"),
                false,
            ));
        }

        if !self.pool.is_active(channel.id()) {
            return Err(SendFailure::new(self.reclaim_taken(&channel, exchange), false));
        }

        tracing::trace!(connection = %self, channel = %channel.id(), "dispatching exchange");
        channel.send(exchange)
    }

    /// 中止路径在关联前后摘走了通道：发送方是它仅剩的持有者，负责销毁通道并失败交换。
    ///
    /// 返回交换最终携带的失败原因；摘走通道的中止若已看到交换，沿用它的原因。
    pub(crate) fn reclaim_taken(
        &self,
        channel: &Arc<dyn HttpChannel>,
        exchange: &Arc<HttpExchange>,
    ) -> Failure {
        channel.destroy();
        let request = exchange.request();
        if let Some(cause) = request.abort_cause() {
            return cause.clone();
        }
        let failure = self.abort_failure();
        request.abort(failure.clone());
        request.abort_cause().cloned().unwrap_or(failure)
    }

    fn normalize_request(&self, request: &HttpRequest) {
        if let Some(factory) = request.upgrader_factory() {
            let upgrader = factory.new_upgrader(Version::HTTP_2);
            request.conversation().set_upgrader(upgrader.clone());
            upgrader.prepare(request);
        }
    }

    pub(crate) fn acquire_channel(&self) -> Arc<dyn HttpChannel> {
        self.pool.acquire(|id| {
            self.channels.new_channel(ChannelContext {
                id,
                connection: self.this.clone(),
                session: self.session.clone(),
            })
        })
    }

    /// 交换结束后归还通道。
    ///
    /// 通道入队后若发现连接已关闭，再清空一次空闲队列，确保没有通道在拆除之后滞留。
    pub fn release(&self, channel: &Arc<dyn HttpChannel>) -> ReleaseOutcome {
        let outcome = self.pool.release(channel);
        tracing::debug!(connection = %self, channel = %channel.id(), ?outcome, "released channel");
        if outcome == ReleaseOutcome::Recycled {
            fence(Ordering::SeqCst);
            if self.is_closed() {
                self.pool.drain_idle();
            }
        }
        outcome
    }

    /// 流关闭通知。
    ///
    /// 只有本地发起的流会通知目的地；服务器推送的流不占用调用方的并发名额。
    pub fn on_stream_closed(&self, stream: &Arc<dyn Stream>, channel: &Arc<dyn HttpChannel>) {
        tracing::debug!(
            connection = %self,
            stream = %stream.id(),
            channel = %channel.id(),
            "stream closed"
        );
        channel.set_stream(None);
        if stream.is_local() {
            self.destination.release(self);
        }
    }

    /// 传输层报告空闲超时。
    ///
    /// 判定为空闲时由连接自行以超时原因关闭；无论如何都返回 `false`，
    /// 调用方不得再基于返回值关闭连接。
    pub fn on_idle_timeout(&self, timeout: Duration) -> bool {
        if self.idle_policy.on_idle_timeout(timeout) {
            tracing::debug!(connection = %self, ?timeout, "idle timeout expired");
            self.close_with(Failure::timeout("idle_timeout"));
        }
        false
    }

    /// 以通用的“连接已关闭”原因关闭连接。
    pub fn close(&self) -> bool {
        self.close_with(Failure::connection_closed())
    }

    /// 关闭连接；返回 `true` 表示本次调用执行了拆除。
    ///
    /// # 执行逻辑（How）
    /// CAS 胜出者依次执行以下步骤，任一步骤都不会阻断后续步骤：
    /// 1. 通知目的地移除本连接；
    /// 2. [`Http2Connection::abort`] 失败所有在途交换并清空空闲队列；
    /// 3. 以 `NO_ERROR` 与失败消息关闭会话，关闭失败只记录日志；
    /// 4. 再次清空空闲队列，回收中止期间被归还的通道。
    pub fn close_with(&self, failure: Failure) -> bool {
        if !self.close_gate.try_close() {
            return false;
        }
        // 与发送、归还路径中的栅栏配对。
        fence(Ordering::SeqCst);
        let _ = self.close_cause.set(failure.clone());
        tracing::info!(connection = %self, cause = %failure, "closing connection");

        self.destination.close(self);

        self.abort(&failure);

        let connection = self.to_string();
        self.session.close(
            ErrorCode::NoError,
            failure.message(),
            Box::new(move |result| {
                if let Err(error) = result {
                    tracing::debug!(%connection, %error, "session close failed");
                }
            }),
        );

        self.pool.drain_idle();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.close_gate.is_closed()
    }

    /// 关闭原因；连接未关闭时返回 `None`。
    pub fn close_cause(&self) -> Option<&Failure> {
        self.close_cause.get()
    }

    fn close_failure(&self) -> Failure {
        self.close_cause
            .get()
            .cloned()
            .unwrap_or_else(Failure::connection_closed)
    }

    // 最近一次中止的原因；直接中止不会关闭连接，不能只看关闭原因。
    pub(crate) fn abort_failure(&self) -> Failure {
        self.last_abort
            .lock()
            .clone()
            .unwrap_or_else(|| self.close_failure())
    }

    /// 以 `failure` 中止所有在途交换，并销毁空闲通道。
    ///
    /// # 契约说明（What）
    /// - 每个活跃通道只会被一个并发调用方取走，取走者若发现其绑定了交换则中止该交换的请求；
    ///   请求的中止本身也只生效一次，因此同一交换不会被失败两次；
    /// - 尚未绑定交换的活跃通道直接销毁；
    /// - 可以独立调用（例如传输层致命错误），也会被关闭路径调用；返回本次实际中止的交换数。
    pub fn abort(&self, failure: &Failure) -> usize {
        *self.last_abort.lock() = Some(failure.clone());
        let mut aborted = 0;
        for channel in self.pool.take_active() {
            match channel.exchange() {
                Some(exchange) => {
                    if exchange.request().abort(failure.clone()) {
                        aborted += 1;
                    }
                }
                None => channel.destroy(),
            }
        }
        let destroyed = self.pool.drain_idle();
        if aborted > 0 {
            tracing::warn!(connection = %self, aborted, cause = %failure, "aborted in-flight exchanges");
        }
        tracing::debug!(connection = %self, destroyed, "destroyed idle channels");
        aborted
    }

    pub(crate) fn claim_upgrade(&self) -> bool {
        self.upgraded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Sweepable for Http2Connection {
    fn sweep(&self) -> bool {
        self.sweep_gate.poll(self.is_closed())
    }
}

impl fmt::Display for Http2Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Http2Connection@{}(closed={})[{:?}]",
            self.id,
            self.is_closed(),
            self.session
        )
    }
}

impl fmt::Debug for Http2Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http2Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("pool", &self.pool)
            .field("session", &self.session)
            .finish()
    }
}

/// [`Http2Connection`] 的构建器。
pub struct Http2ConnectionBuilder {
    session: Arc<dyn Session>,
    destination: Arc<dyn Destination>,
    channels: Arc<dyn ChannelFactory>,
    idle_policy: Option<Arc<dyn IdleTimeoutPolicy>>,
    config: ConnectionConfig,
}

impl Http2ConnectionBuilder {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换默认的 [`ActivityIdlePolicy`]。
    pub fn idle_policy(mut self, policy: Arc<dyn IdleTimeoutPolicy>) -> Self {
        self.idle_policy = Some(policy);
        self
    }

    pub fn build(self) -> Arc<Http2Connection> {
        let idle_policy = self
            .idle_policy
            .unwrap_or_else(|| Arc::new(ActivityIdlePolicy::new()));
        let connection = Arc::new_cyclic(|this| Http2Connection {
            id: ConnectionId::next(),
            session: self.session,
            destination: self.destination,
            channels: self.channels,
            idle_policy,
            pool: ChannelPool::new(self.config.recycle_channels),
            close_gate: CloseGate::new(),
            close_cause: OnceLock::new(),
            last_abort: Mutex::new(None),
            sweep_gate: SweepGate::new(),
            upgraded: AtomicBool::new(false),
            this: this.clone(),
        });
        tracing::debug!(connection = %connection, "created connection");
        connection
    }
}
