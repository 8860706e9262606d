//
// 教案级说明：Loom 模型检查需要替换原子类型以穷举调度交错；常规构建使用标准库原子。
// 只有 `CloseGate` 与 `SweepGate` 走此垫片，`DashMap`/`parking_lot` 不参与 Loom 模型。
#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU32, Ordering};
