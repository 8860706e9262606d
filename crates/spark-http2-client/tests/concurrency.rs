//! 多线程竞争：并发关闭、发送与关闭交错、释放与中止交错。
//!
//! # 教案级导览
//!
//! - **Why**：连接的每个入口都可能在任意线程被调用，单线程测试无法覆盖交错；
//! - **How**：使用 `std::thread` 构造真实竞争，并用 `Barrier` 尽量让各线程同时起跑；
//! - **What**：断言拆除恰好一次、没有通道滞留、每个在途交换都被失败且只失败一次；
//!   关联回调用于把关闭或中止精确地插入到关联与活跃检查之间。

use std::{
    sync::{Arc, Barrier},
    thread,
};

use spark_http2_client::{
    Failure, FailureKind, ReleaseOutcome,
    test_stubs::{Fixture, get_exchange},
};

const THREADS: usize = 8;

#[test]
fn concurrent_close_has_single_winner() {
    let fixture = Arc::new(Fixture::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let fixture = Arc::clone(&fixture);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                fixture.connection.close()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|handle| handle.join().expect("关闭线程不应 panic"))
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(fixture.session.close_count(), 1);
    assert_eq!(fixture.destination.close_count(), 1);
}

#[test]
fn sends_racing_close_leave_no_channel_behind() {
    let fixture = Arc::new(Fixture::new());
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let senders: Vec<_> = (0..THREADS)
        .map(|t| {
            let fixture = Arc::clone(&fixture);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..32)
                    .map(|i| {
                        let exchange = get_exchange(&format!("/race/{t}/{i}"));
                        let result = fixture.connection.send(exchange.clone());
                        (exchange, result)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    barrier.wait();
    fixture.connection.close_with(Failure::transport_abort("racing close"));

    let mut dispatched = Vec::new();
    for sender in senders {
        for (exchange, result) in sender.join().expect("发送线程不应 panic") {
            match result {
                Ok(()) => {
                    assert!(
                        exchange.request().is_aborted(),
                        "关闭前成功派发的交换必须被中止"
                    );
                    dispatched.push(exchange);
                }
                Err(failure) if failure.retry => assert!(
                    fixture.channels.channel_for(&exchange).is_none()
                        || exchange.request().is_aborted(),
                    "可重试的失败不应留下关联"
                ),
                Err(_) => assert!(exchange.request().is_aborted()),
            }
        }
    }

    // 只有成功派发的交换由上层负责归还通道；失败的发送必须自行清理。
    for exchange in &dispatched {
        let channel = fixture
            .channels
            .channel_for(exchange)
            .expect("成功派发的交换应绑定通道");
        assert_eq!(channel.finish_exchange(), Some(ReleaseOutcome::Discarded));
    }
    for channel in fixture.channels.created() {
        assert!(channel.is_destroyed(), "{:?} 未被销毁", channel);
        assert_eq!(channel.destroy_count(), 1);
    }
    assert_eq!(fixture.connection.pool().active_len(), 0);
    assert_eq!(fixture.connection.pool().idle_len(), 0);
}

#[test]
fn releases_racing_abort_fail_each_exchange_at_most_once() {
    let fixture = Arc::new(Fixture::new());
    let dispatched: Vec<_> = (0..THREADS)
        .map(|i| fixture.dispatch(&format!("/abort/{i}")).expect("发送应成功"))
        .collect();
    let barrier = Arc::new(Barrier::new(THREADS + 2));

    let releasers: Vec<_> = dispatched
        .iter()
        .map(|(_, channel)| {
            let channel = Arc::clone(channel);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                channel.finish_exchange()
            })
        })
        .collect();
    let aborters: Vec<_> = (0..2)
        .map(|_| {
            let fixture = Arc::clone(&fixture);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                fixture.connection.abort(&Failure::transport_abort("abort"))
            })
        })
        .collect();

    for releaser in releasers {
        let outcome = releaser.join().expect("释放线程不应 panic");
        assert!(matches!(
            outcome,
            Some(ReleaseOutcome::Recycled | ReleaseOutcome::Discarded)
        ));
    }
    let aborted: usize = aborters
        .into_iter()
        .map(|aborter| aborter.join().expect("中止线程不应 panic"))
        .sum();
    let observed = dispatched
        .iter()
        .filter(|(exchange, _)| exchange.request().is_aborted())
        .count();
    assert_eq!(aborted, observed, "每个交换至多被中止一次");

    fixture.connection.close();
    for (_, channel) in &dispatched {
        assert!(channel.is_destroyed());
    }
    assert_eq!(fixture.connection.pool().idle_len(), 0);
}

#[test]
fn close_between_associate_and_dispatch_destroys_channel() {
    let fixture = Fixture::new();
    fixture.channels.on_associate(|connection| {
        connection.close_with(Failure::transport_abort("closed mid-send"));
    });

    let exchange = get_exchange("/mid-send");
    let failure = fixture
        .connection
        .send(exchange.clone())
        .expect_err("关联后被关闭的发送应失败");

    assert!(!failure.retry);
    assert_eq!(failure.failure.message(), "closed mid-send");
    assert!(exchange.request().is_aborted());

    let channel = fixture.channels.created().pop().expect("应借出一个通道");
    assert_eq!(channel.destroy_count(), 1);
    assert_eq!(channel.send_count(), 0);
    assert_eq!(fixture.connection.pool().active_len(), 0);
    assert_eq!(fixture.connection.pool().idle_len(), 0);
}

#[test]
fn abort_between_associate_and_dispatch_reports_its_cause() {
    let fixture = Fixture::new();
    fixture.channels.on_associate(|connection| {
        connection.abort(&Failure::transport_abort("reset"));
    });

    let exchange = get_exchange("/reset");
    let failure = fixture
        .connection
        .send(exchange.clone())
        .expect_err("关联后被中止的发送应失败");

    assert!(!failure.retry);
    assert_eq!(failure.failure.kind(), FailureKind::TransportAbort);
    assert_eq!(failure.failure.message(), "reset");
    assert_eq!(
        exchange.request().abort_cause().map(Failure::message),
        Some("reset")
    );
    assert!(!fixture.connection.is_closed(), "直接中止不关闭连接");

    let channel = fixture.channels.created().pop().expect("应借出一个通道");
    assert!(channel.is_destroyed());
    assert_eq!(fixture.connection.pool().active_len(), 0);
}
