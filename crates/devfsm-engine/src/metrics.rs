//! 引擎运行指标
//!
//! 原子计数器，任何线程都可以无锁读取。工作线程和调用方线程各自更新
//! 与自己相关的计数器。

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// `state_proc` 调用次数
    pub state_proc_calls: AtomicU64,
    /// 状态转换次数（包括原地重入）
    pub transitions: AtomicU64,
    /// 状态回调 panic 或报告 Error 的次数
    pub faults: AtomicU64,
    /// 被队列接收的命令数
    pub commands_enqueued: AtomicU64,
    /// 因队列已满被置为 Ignored 的命令数
    pub commands_ignored: AtomicU64,
    /// 进入终态的命令数（所有终态）
    pub commands_settled: AtomicU64,
    /// 出队时已过期、以 Timeout 结束的命令数
    pub commands_timed_out: AtomicU64,
    /// `state_proc` 耗时超过看门狗周期的次数
    pub watchdog_overruns: AtomicU64,
    /// 单次 `state_proc` 最长耗时（微秒）
    pub max_state_proc_us: AtomicU64,
    pub listener_failures: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_state_proc(&self, elapsed_us: u64) {
        self.state_proc_calls.fetch_add(1, Ordering::Relaxed);
        self.max_state_proc_us.fetch_max(elapsed_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            state_proc_calls: self.state_proc_calls.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            commands_enqueued: self.commands_enqueued.load(Ordering::Relaxed),
            commands_ignored: self.commands_ignored.load(Ordering::Relaxed),
            commands_settled: self.commands_settled.load(Ordering::Relaxed),
            commands_timed_out: self.commands_timed_out.load(Ordering::Relaxed),
            watchdog_overruns: self.watchdog_overruns.load(Ordering::Relaxed),
            max_state_proc_us: self.max_state_proc_us.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.state_proc_calls,
            &self.transitions,
            &self.faults,
            &self.commands_enqueued,
            &self.commands_ignored,
            &self.commands_settled,
            &self.commands_timed_out,
            &self.watchdog_overruns,
            &self.max_state_proc_us,
            &self.listener_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub state_proc_calls: u64,
    pub transitions: u64,
    pub faults: u64,
    pub commands_enqueued: u64,
    pub commands_ignored: u64,
    pub commands_settled: u64,
    pub commands_timed_out: u64,
    pub watchdog_overruns: u64,
    pub max_state_proc_us: u64,
    pub listener_failures: u64,
}
