#![cfg(loom)]

use loom::{model, sync::Arc, thread};
use spark_http2_client::{CloseGate, SWEEP_THRESHOLD, SweepGate};

#[test]
fn close_gate_elects_exactly_one_winner() {
    //
    // 教案级说明：关闭拆除必须只执行一次。
    // - **Why**：两个线程同时关闭时，若 CAS 语义错误，目的地与会话会被通知两次；
    // - **How**：Loom 穷举两个 `try_close` 的交错；
    // - **What**：恰好一个线程返回 `true`，之后两个视角都观察到已关闭。
    model(|| {
        let gate = Arc::new(CloseGate::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.try_close())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("关闭线程不应 panic"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(gate.is_closed());
    });
}

#[test]
fn sweep_gate_counts_every_concurrent_poll() {
    //
    // 教案级说明：计数竞争最多推迟一轮回收，但不能丢失轮询。
    // - **How**：两个线程各轮询两次，共计达到阈值；
    // - **What**：结束后计数等于阈值，下一次轮询必然报告可回收。
    model(|| {
        let gate = Arc::new(SweepGate::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || {
                    gate.poll(true);
                    gate.poll(true);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("轮询线程不应 panic");
        }

        assert_eq!(gate.count(), SWEEP_THRESHOLD);
        assert!(gate.poll(true));
    });
}

#[test]
fn open_gate_ignores_racing_polls() {
    model(|| {
        let close = Arc::new(CloseGate::new());
        let sweep = Arc::new(SweepGate::new());

        let poller = {
            let close = Arc::clone(&close);
            let sweep = Arc::clone(&sweep);
            thread::spawn(move || sweep.poll(close.is_closed()))
        };
        close.try_close();
        let swept = poller.join().expect("轮询线程不应 panic");

        assert!(!swept, "单次轮询不可能达到阈值");
        assert!(sweep.count() <= 1);
    });
}
