//! 目的地级连接池契约。
//!
//! 目的地决定连接的去留（复用、退役、新建），连接只在两个时刻通知它：
//! 本地流关闭后有了空余容量，以及连接自身关闭。

use crate::connection::Http2Connection;

pub trait Destination: Send + Sync {
    /// 连接上的一个本地流已关闭，连接可以承载下一个交换。
    fn release(&self, connection: &Http2Connection);

    /// 连接已关闭，应从目的地的连接集合中移除。
    fn close(&self, connection: &Http2Connection);
}
