//! 空闲与唤醒
//!
//! 工作线程只在两次 `state_proc` 之间挂起。唤醒令牌通过容量为 1 的
//! crossbeam 通道传递：多次 `notify` 合并为一次，先 `notify` 后 `wait`
//! 也不会丢失唤醒。

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::time::Duration;

/// `state_proc` 本次被调用的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// 进入状态后的第一次调用
    Entered,
    /// 队列中有待处理命令
    CommandPending,
    /// 看门狗周期到期
    Tick,
    /// 外部唤醒（配置变化、resume 等）
    Woken,
    /// 连续运行状态，没有空闲
    Continuous,
}

/// 等待结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Notified,
    TimedOut,
}

pub(crate) struct WakeSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl WakeSignal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub(crate) fn notify(&self) {
        // Full：已有未消费的令牌，合并
        if let Err(TrySendError::Disconnected(())) = self.tx.try_send(()) {
            debug_assert!(false, "wake channel disconnected");
        }
    }

    /// 无限等待
    pub(crate) fn wait(&self) -> Wake {
        // 两端都由 WakeSignal 持有，不会断开
        let _ = self.rx.recv();
        Wake::Notified
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Wake {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Wake::Notified,
            Err(RecvTimeoutError::Timeout) => Wake::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Wake::Notified,
        }
    }
}
