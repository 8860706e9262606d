//! 空闲超时判定。
//!
//! # 教案式说明
//! - **意图 (Why)**：传输层的空闲计时器只知道“一段时间没有 I/O”，但连接可能正处于
//!   “请求刚与通道关联、尚未写出首帧”的窗口中；此时关闭会误伤刚派发的交换；
//! - **逻辑 (How)**：[`ActivityIdlePolicy`] 维护一个守卫计数与最近活动时间戳：
//!   发送窗口期间守卫大于 0，拒绝空闲关闭；一旦判定为空闲，守卫被置为 -1，
//!   此后的发送被拒绝并以可重试的超时失败返回；
//! - **契约 (What)**：判定空闲需要同时满足“无发送窗口”与“距最近活动超过超时的一半”。

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 连接咨询的空闲超时判定。
pub trait IdleTimeoutPolicy: Send + Sync {
    /// 进入发送窗口；返回 `false` 表示连接已被判定空闲，不应再发送。
    fn begin_send(&self) -> bool;

    /// 离开发送窗口，并记录一次活动。
    fn end_send(&self);

    /// 传输层报告空闲超时；返回 `true` 表示连接应当关闭。
    fn on_idle_timeout(&self, timeout: Duration) -> bool;
}

/// 基于发送窗口与最近活动时间的默认判定。
#[derive(Debug)]
pub struct ActivityIdlePolicy {
    state: Mutex<IdleState>,
}

#[derive(Debug)]
struct IdleState {
    // > 0：发送窗口数；0：空闲可判定；-1：已判定空闲。
    guard: i64,
    stamp: Instant,
}

impl ActivityIdlePolicy {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(stamp: Instant) -> Self {
        Self {
            state: Mutex::new(IdleState { guard: 0, stamp }),
        }
    }

    fn end_send_at(&self, now: Instant) {
        let mut state = self.state.lock();
        if state.guard > 0 {
            state.guard -= 1;
        }
        state.stamp = now;
    }

    fn on_idle_timeout_at(&self, timeout: Duration, now: Instant) -> bool {
        let mut state = self.state.lock();
        if state.guard != 0 {
            return false;
        }
        let idle = now.saturating_duration_since(state.stamp) > timeout / 2;
        if idle {
            state.guard = -1;
        }
        idle
    }
}

impl Default for ActivityIdlePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleTimeoutPolicy for ActivityIdlePolicy {
    fn begin_send(&self) -> bool {
        let mut state = self.state.lock();
        if state.guard < 0 {
            return false;
        }
        state.guard += 1;
        true
    }

    fn end_send(&self) {
        self.end_send_at(Instant::now());
    }

    fn on_idle_timeout(&self, timeout: Duration) -> bool {
        self.on_idle_timeout_at(timeout, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn idle_after_half_timeout_without_activity() {
        let start = Instant::now();
        let policy = ActivityIdlePolicy::starting_at(start);

        assert!(!policy.on_idle_timeout_at(TIMEOUT, start + Duration::from_secs(4)));
        assert!(policy.on_idle_timeout_at(TIMEOUT, start + Duration::from_secs(6)));
        assert!(!policy.begin_send(), "判定空闲后发送窗口必须被拒绝");
        assert!(
            !policy.on_idle_timeout_at(TIMEOUT, start + Duration::from_secs(60)),
            "空闲只判定一次"
        );
    }

    #[test]
    fn send_window_blocks_idle_decision() {
        let start = Instant::now();
        let policy = ActivityIdlePolicy::starting_at(start);

        assert!(policy.begin_send());
        assert!(!policy.on_idle_timeout_at(TIMEOUT, start + Duration::from_secs(60)));

        let resumed = start + Duration::from_secs(61);
        policy.end_send_at(resumed);
        assert!(
            !policy.on_idle_timeout_at(TIMEOUT, resumed + Duration::from_secs(1)),
            "活动时间戳应在发送窗口结束时刷新"
        );
        assert!(policy.on_idle_timeout_at(TIMEOUT, resumed + Duration::from_secs(6)));
    }
}
