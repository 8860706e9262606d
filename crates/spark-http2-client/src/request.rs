//! 请求与会话（conversation）模型。
//!
//! # 教案式说明
//! - **意图 (Why)**：连接层需要对请求做三件事：把协议版本规范化为 HTTP/2、在关闭时以某个
//!   [`Failure`] 中止请求、在升级时基于同一请求重建交换。这里给出满足这三点的最小请求模型；
//! - **逻辑 (How)**：方法、URI、头部在构建后不可变；版本与中止原因需要跨线程修改，分别放在
//!   `RwLock` 与 `OnceLock` 中；
//! - **契约 (What)**：[`HttpRequest::abort`] 只有第一次调用生效，后续调用返回 `false`，
//!   因而同一请求不会被失败两次。

use std::{
    fmt,
    sync::{Arc, OnceLock, Weak},
};

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};
use parking_lot::{Mutex, RwLock};

use crate::{error::Failure, exchange::HttpExchange};

/// 协议升级器：在请求以 HTTP/2 发出前为其追加升级所需的头部或状态。
pub trait HttpUpgrader: Send + Sync {
    fn prepare(&self, request: &HttpRequest);
}

/// 请求携带的升级器工厂；连接在规范化请求时按目标协议版本创建升级器。
pub trait UpgraderFactory: Send + Sync {
    fn new_upgrader(&self, version: Version) -> Arc<dyn HttpUpgrader>;
}

/// 同一逻辑请求在重定向、认证重试、协议升级过程中产生的交换历史。
///
/// 交换以弱引用保存，避免 `交换 → 请求 → 会话 → 交换` 的引用环。
#[derive(Default)]
pub struct HttpConversation {
    exchanges: Mutex<Vec<Weak<HttpExchange>>>,
    upgrader: OnceLock<Arc<dyn HttpUpgrader>>,
}

impl HttpConversation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_exchange(&self, exchange: &Arc<HttpExchange>) {
        let mut exchanges = self.exchanges.lock();
        exchanges.retain(|weak| weak.strong_count() > 0);
        exchanges.push(Arc::downgrade(exchange));
    }

    /// 仍然存活的交换，按加入顺序排列。
    pub fn exchanges(&self) -> Vec<Arc<HttpExchange>> {
        self.exchanges
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn last_exchange(&self) -> Option<Arc<HttpExchange>> {
        self.exchanges.lock().iter().rev().find_map(Weak::upgrade)
    }

    /// 记录升级器；会话内只保留第一个。
    pub fn set_upgrader(&self, upgrader: Arc<dyn HttpUpgrader>) -> bool {
        self.upgrader.set(upgrader).is_ok()
    }

    pub fn upgrader(&self) -> Option<Arc<dyn HttpUpgrader>> {
        self.upgrader.get().cloned()
    }
}

impl fmt::Debug for HttpConversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConversation")
            .field("exchanges", &self.exchanges.lock().len())
            .field("upgrader", &self.upgrader.get().is_some())
            .finish()
    }
}

/// 客户端请求。
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    version: RwLock<Version>,
    headers: HeaderMap,
    conversation: Arc<HttpConversation>,
    abort_cause: OnceLock<Failure>,
    upgrader_factory: Option<Arc<dyn UpgraderFactory>>,
}

impl HttpRequest {
    pub fn builder(method: Method, uri: Uri) -> HttpRequestBuilder {
        HttpRequestBuilder {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            conversation: None,
            upgrader_factory: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn version(&self) -> Version {
        *self.version.read()
    }

    pub fn set_version(&self, version: Version) {
        *self.version.write() = version;
    }

    pub fn conversation(&self) -> &Arc<HttpConversation> {
        &self.conversation
    }

    pub fn upgrader_factory(&self) -> Option<&Arc<dyn UpgraderFactory>> {
        self.upgrader_factory.as_ref()
    }

    /// 以 `failure` 中止请求。
    ///
    /// 返回 `true` 表示本次调用首次生效；重复中止返回 `false` 且保留第一次的原因。
    pub fn abort(&self, failure: Failure) -> bool {
        let first = self.abort_cause.set(failure).is_ok();
        if first {
            tracing::debug!(
                method = %self.method,
                uri = %self.uri,
                cause = ?self.abort_cause.get(),
                "request aborted"
            );
        }
        first
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_cause.get().is_some()
    }

    pub fn abort_cause(&self) -> Option<&Failure> {
        self.abort_cause.get()
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// [`HttpRequest`] 的构建器。
pub struct HttpRequestBuilder {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    conversation: Option<Arc<HttpConversation>>,
    upgrader_factory: Option<Arc<dyn UpgraderFactory>>,
}

impl HttpRequestBuilder {
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// 加入已有会话；未指定时创建新会话。
    pub fn conversation(mut self, conversation: Arc<HttpConversation>) -> Self {
        self.conversation = Some(conversation);
        self
    }

    pub fn upgrader(mut self, factory: Arc<dyn UpgraderFactory>) -> Self {
        self.upgrader_factory = Some(factory);
        self
    }

    pub fn build(self) -> Arc<HttpRequest> {
        Arc::new(HttpRequest {
            method: self.method,
            uri: self.uri,
            version: RwLock::new(self.version),
            headers: self.headers,
            conversation: self.conversation.unwrap_or_else(HttpConversation::new),
            abort_cause: OnceLock::new(),
            upgrader_factory: self.upgrader_factory,
        })
    }
}
