//! 连接关闭守卫。
//!
//! # 设计背景（Why）
//! - 关闭可能同时由所有者、空闲超时、传输层错误触发，拆除逻辑必须恰好执行一次；
//! - 连接只有一次状态迁移（Open → Closed），因此不引入显式状态枚举，一个布尔 CAS 足以线性化。
//!
//! # 契约说明（What）
//! - [`CloseGate::try_close`] 只对第一个调用方返回 `true`，该调用方负责执行全部拆除步骤；
//! - [`CloseGate::is_closed`] 可在任意线程随时调用；`Acquire` 读保证观察到关闭的线程
//!   同时能观察到胜出线程在 CAS 之前写入的状态。

use crate::sync::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct CloseGate {
    closed: AtomicBool,
}

impl CloseGate {
    pub fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
        }
    }

    /// 尝试执行 Open → Closed 迁移；返回 `true` 表示本次调用赢得迁移。
    pub fn try_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for CloseGate {
    fn default() -> Self {
        Self::new()
    }
}
