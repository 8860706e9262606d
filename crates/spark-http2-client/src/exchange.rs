//! 交换：一次请求/响应往返。
//!
//! 连接层只关心交换的请求阶段（是否已完成、是否已终结）以及把响应元数据交给它；
//! 完整的响应体处理与重试策略属于上层交换机制。

use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    error::Failure,
    frame::ResponseMetadata,
    request::HttpRequest,
};

/// 请求/响应交换。
///
/// # 教案式说明
/// - **意图 (Why)**：通道把交换绑定到一条流上；关闭路径通过交换找到请求并中止它；
/// - **逻辑 (How)**：请求阶段用两个原子位表达“完成”与“终结”，完成结果写入 `OnceLock`；
///   响应元数据同样只接受第一次写入；
/// - **契约 (What)**：
///   - 构造即加入请求所在会话的交换历史；
///   - [`HttpExchange::terminate_request`] 只有在请求完成后才会生效。
pub struct HttpExchange {
    request: Arc<HttpRequest>,
    request_complete: AtomicBool,
    request_result: OnceLock<Option<Failure>>,
    request_terminated: AtomicBool,
    response: OnceLock<ResponseMetadata>,
}

impl HttpExchange {
    pub fn new(request: Arc<HttpRequest>) -> Arc<Self> {
        let exchange = Arc::new(Self {
            request,
            request_complete: AtomicBool::new(false),
            request_result: OnceLock::new(),
            request_terminated: AtomicBool::new(false),
            response: OnceLock::new(),
        });
        exchange.request.conversation().push_exchange(&exchange);
        exchange
    }

    pub fn request(&self) -> &Arc<HttpRequest> {
        &self.request
    }

    /// 标记请求阶段完成；`failure` 为 `None` 表示成功发送。
    ///
    /// 返回 `true` 表示本次调用完成了请求阶段。
    pub fn request_complete(&self, failure: Option<Failure>) -> bool {
        if self
            .request_complete
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _ = self.request_result.set(failure);
        true
    }

    /// 终结请求阶段，之后请求侧不会再有任何事件。
    pub fn terminate_request(&self) -> bool {
        if !self.request_complete.load(Ordering::Acquire) {
            return false;
        }
        self.request_terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_request_complete(&self) -> bool {
        self.request_complete.load(Ordering::Acquire)
    }

    pub fn is_request_terminated(&self) -> bool {
        self.request_terminated.load(Ordering::Acquire)
    }

    /// 请求阶段的完成结果；请求尚未完成时返回 `None`。
    pub fn request_failure(&self) -> Option<Option<&Failure>> {
        self.request_result.get().map(Option::as_ref)
    }

    /// 记录响应头部；只接受第一次。
    pub fn response_begin(&self, response: ResponseMetadata) -> bool {
        self.response.set(response).is_ok()
    }

    pub fn response(&self) -> Option<&ResponseMetadata> {
        self.response.get()
    }
}

impl fmt::Debug for HttpExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExchange")
            .field("request", &self.request)
            .field("request_complete", &self.is_request_complete())
            .field("request_terminated", &self.is_request_terminated())
            .field("response", &self.response.get().map(|r| r.status))
            .finish()
    }
}
