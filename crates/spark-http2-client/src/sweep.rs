//! 去抖式回收协议与外部回收器。
//!
//! # 教案式说明
//! - **意图 (Why)**：外部回收器定期扫描持有连接的集合，需要判断“这条已关闭的连接是否可以
//!   永久移除”。连接刚关闭时，目的地池等其他组件可能仍在处理关闭通知；立即移除会与这些
//!   收尾逻辑竞争。为此连接在关闭后需要连续被轮询 [`SWEEP_THRESHOLD`] 次才报告可回收；
//! - **逻辑 (How)**：[`SweepGate`] 只在已关闭时递增计数，计数饱和不回绕；
//!   [`Sweeper`] 持有一组 [`Sweepable`]，每轮询问一次并移除报告可回收的条目；
//! - **契约 (What)**：
//!   - 未关闭时 `poll` 始终返回 `false` 且不触碰计数；
//!   - 关闭后前 3 次返回 `false`，第 4 次起始终返回 `true`；
//!   - 计数上的竞争最多让回收推迟一轮，不需要更强的同步。

use std::sync::Arc;
#[cfg(feature = "tokio")]
use std::time::Duration;

use parking_lot::Mutex;

use crate::sync::{AtomicU32, Ordering};

/// 关闭后需要连续轮询的次数。
pub const SWEEP_THRESHOLD: u32 = 4;

/// 可被外部回收器轮询的资源。
pub trait Sweepable: Send + Sync {
    /// 返回 `true` 表示可以从回收器集合中永久移除。
    fn sweep(&self) -> bool;
}

/// 关闭后的回收计数。
#[derive(Debug)]
pub struct SweepGate {
    sweeps: AtomicU32,
}

impl SweepGate {
    pub fn new() -> Self {
        Self {
            sweeps: AtomicU32::new(0),
        }
    }

    pub fn poll(&self, closed: bool) -> bool {
        if !closed {
            return false;
        }
        let previous = match self
            .sweeps
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_add(1))
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        previous.saturating_add(1) >= SWEEP_THRESHOLD
    }

    pub fn count(&self) -> u32 {
        self.sweeps.load(Ordering::Acquire)
    }
}

impl Default for SweepGate {
    fn default() -> Self {
        Self::new()
    }
}

/// 周期性回收器。
///
/// 持有强引用：条目在被判定可回收之前不会被释放。
#[derive(Default)]
pub struct Sweeper {
    items: Mutex<Vec<Arc<dyn Sweepable>>>,
}

impl Sweeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, item: Arc<dyn Sweepable>) {
        self.items.lock().push(item);
    }

    /// 按指针身份移除条目。
    pub fn remove(&self, item: &Arc<dyn Sweepable>) -> bool {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|candidate| !Arc::ptr_eq(candidate, item));
        items.len() != before
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// 执行一轮回收，返回被移除的条目数。
    ///
    /// 轮询在锁外进行：`sweep` 的实现可以安全地回调本回收器。
    pub fn run_once(&self) -> usize {
        let snapshot: Vec<Arc<dyn Sweepable>> = self.items.lock().clone();
        let swept: Vec<Arc<dyn Sweepable>> = snapshot
            .into_iter()
            .filter(|item| item.sweep())
            .collect();
        if swept.is_empty() {
            return 0;
        }
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|candidate| !swept.iter().any(|gone| Arc::ptr_eq(gone, candidate)));
        let evicted = before - items.len();
        tracing::debug!(evicted, remaining = items.len(), "sweep round finished");
        evicted
    }

    /// 在 Tokio 运行时上按 `period` 周期执行 [`Sweeper::run_once`]。
    #[cfg(feature = "tokio")]
    pub fn spawn(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_once();
            }
        })
    }
}
