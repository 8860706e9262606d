//! 连接内的通道池：活跃集合 + 空闲队列。
//!
//! # 模块角色（Why）
//! - 一个连接对应 N 个通道，每个在途交换独占一个通道；交换结束后健康的通道回到空闲队列，
//!   下一个交换优先复用，避免反复构造通道；
//! - 关闭路径需要枚举所有在途通道以失败其交换，因此活跃通道必须集中登记。
//!
//! # 核心机制（How）
//! - 活跃集合使用 `DashMap<ChannelId, Arc<dyn HttpChannel>>`，按键移除天然是“检查成员并摘除”
//!   的原子操作；
//! - 空闲队列使用 `parking_lot::Mutex<VecDeque<_>>`，临界区只包含单次入队/出队；
//! - 两个容器之间的转移不需要跨容器锁：每次转移都先从源容器原子摘除，摘除成功者才拥有该通道。
//!
//! # 契约说明（What）
//! - 任一通道在任意时刻只处于 {活跃集合, 空闲队列, 已销毁} 之一；
//! - 空闲队列中的通道均未绑定流且未失败；
//! - [`ChannelPool::release`] 对不在活跃集合中的通道一律销毁，重复释放不会重复入池。

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::channel::{ChannelId, HttpChannel};

/// [`ChannelPool::release`] 的处理结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// 通道健康且开启复用，已进入空闲队列。
    Recycled,
    /// 通道已失败或复用关闭，已销毁。
    Destroyed,
    /// 通道不在活跃集合中（已被中止路径或先前的释放摘除），已销毁。
    Discarded,
}

pub struct ChannelPool {
    active: DashMap<ChannelId, Arc<dyn HttpChannel>>,
    idle: Mutex<VecDeque<Arc<dyn HttpChannel>>>,
    next_id: AtomicU64,
    recycle: AtomicBool,
}

impl ChannelPool {
    pub fn new(recycle_channels: bool) -> Self {
        Self {
            active: DashMap::new(),
            idle: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            recycle: AtomicBool::new(recycle_channels),
        }
    }

    pub fn recycle_channels(&self) -> bool {
        self.recycle.load(Ordering::Acquire)
    }

    pub fn set_recycle_channels(&self, recycle: bool) {
        self.recycle.store(recycle, Ordering::Release);
    }

    /// 取出空闲队列头部的通道；队列为空时分配新的 [`ChannelId`] 并交给 `make` 构造。
    ///
    /// 不会阻塞，也不会失败。返回的通道尚未登记为活跃，调用方随后需调用 [`ChannelPool::activate`]。
    pub fn acquire<F>(&self, make: F) -> Arc<dyn HttpChannel>
    where
        F: FnOnce(ChannelId) -> Arc<dyn HttpChannel>,
    {
        if let Some(channel) = self.idle.lock().pop_front() {
            tracing::trace!(channel = %channel.id(), "reusing idle channel");
            return channel;
        }
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(channel = %id, "creating channel");
        make(id)
    }

    pub fn activate(&self, channel: Arc<dyn HttpChannel>) {
        self.active.insert(channel.id(), channel);
    }

    /// 将通道从活跃集合摘除并决定其去向。
    ///
    /// # 执行逻辑（How）
    /// 1. 按 `id` 从活跃集合摘除；摘除失败说明通道已被中止路径或先前的释放取走，
    ///    此时若它仍滞留在空闲队列中先将其取出，再无条件销毁；
    /// 2. 摘除成功：失败的通道销毁；开启复用则入队；否则销毁。
    pub fn release(&self, channel: &Arc<dyn HttpChannel>) -> ReleaseOutcome {
        let id = channel.id();
        if self.active.remove(&id).is_none() {
            self.idle.lock().retain(|idle| idle.id() != id);
            channel.destroy();
            return ReleaseOutcome::Discarded;
        }
        if channel.is_failed() {
            channel.destroy();
            ReleaseOutcome::Destroyed
        } else if self.recycle_channels() {
            self.idle.lock().push_back(channel.clone());
            ReleaseOutcome::Recycled
        } else {
            channel.destroy();
            ReleaseOutcome::Destroyed
        }
    }

    /// 摘除指定的活跃通道；返回 `None` 表示它已被其他调用方取走。
    pub fn deactivate(&self, id: ChannelId) -> Option<Arc<dyn HttpChannel>> {
        self.active.remove(&id).map(|(_, channel)| channel)
    }

    /// 摘除并返回全部活跃通道。
    ///
    /// 逐键摘除：并发调用时每个通道只会出现在一个调用方的结果中。
    pub fn take_active(&self) -> Vec<Arc<dyn HttpChannel>> {
        let ids: Vec<ChannelId> = self.active.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.deactivate(id))
            .collect()
    }

    /// 逐个弹出并销毁空闲通道，返回销毁数量；队列为空时什么也不做。
    pub fn drain_idle(&self) -> usize {
        let mut destroyed = 0;
        // 每次只在锁内弹出一个，销毁在锁外进行。
        loop {
            let next = self.idle.lock().pop_front();
            match next {
                Some(channel) => {
                    channel.destroy();
                    destroyed += 1;
                }
                None => return destroyed,
            }
        }
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_active(&self, id: ChannelId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn is_idle(&self, id: ChannelId) -> bool {
        self.idle.lock().iter().any(|channel| channel.id() == id)
    }
}

impl fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPool")
            .field("active", &self.active_len())
            .field("idle", &self.idle_len())
            .field("recycle", &self.recycle_channels())
            .finish()
    }
}
