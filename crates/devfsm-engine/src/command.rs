//! 命令类型定义模块
//!
//! 调用方创建 [`Command`]，通过 `enqueue_command` 交给引擎；此后命令状态
//! 只由引擎（工作线程）写入，调用方轮询 [`Command::status`] 观察结果。
//!
//! # 生命周期
//!
//! ```text
//! Pending ──► Active ──► Success | Error | Timeout | Failed | Rejected
//!    │
//!    └──────► Ignored | Rejected | Timeout   （未被执行即结束）
//! ```
//!
//! 终态只会写入一次，之后不再改变。

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 命令生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CommandStatus {
    /// 已入队，等待执行
    Pending = 0,
    /// 已出队，正在由当前状态执行
    Active = 1,
    Success = 2,
    Error = 3,
    Timeout = 4,
    /// 队列已满等原因未被接收
    Ignored = 5,
    Rejected = 6,
    Failed = 7,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Active)
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// 以失败告终（不含 Ignored/Rejected 这类"未执行"的结束）
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Timeout | Self::Failed)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 命令状态（原子版本，用于线程间共享）
///
/// 写入规则：
/// - `Pending → Active` 只能发生一次
/// - 任意非终态 → 终态 只能发生一次
#[derive(Debug)]
pub struct AtomicCommandStatus {
    inner: AtomicU8,
}

impl AtomicCommandStatus {
    pub fn new(status: CommandStatus) -> Self {
        Self {
            inner: AtomicU8::new(status.into()),
        }
    }

    pub fn get(&self) -> CommandStatus {
        // 只有本类型写入 inner，值总是合法的
        CommandStatus::try_from(self.inner.load(Ordering::Acquire)).unwrap_or(CommandStatus::Failed)
    }

    /// 比较并交换，成功返回 true
    fn compare_exchange(&self, current: CommandStatus, new: CommandStatus) -> bool {
        self.inner
            .compare_exchange(current.into(), new.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Pending → Active
    pub(crate) fn activate(&self) -> bool {
        self.compare_exchange(CommandStatus::Pending, CommandStatus::Active)
    }

    /// 写入终态；已处于终态时返回 false 且不做修改
    pub(crate) fn settle(&self, status: CommandStatus) -> bool {
        if !status.is_terminal() {
            debug_assert!(false, "settle() called with non-terminal status {status:?}");
            return false;
        }
        loop {
            let current = self.get();
            if current.is_terminal() {
                return false;
            }
            if self.compare_exchange(current, status) {
                return true;
            }
        }
    }
}

/// 领域命令类型
///
/// 通常是设备自己的枚举（Open、Close、Measure ...）。引擎不解释它，
/// 只在错误状态中通过 [`CommandKind::is_reset`] 识别复位命令。
pub trait CommandKind: fmt::Debug + Send + Sync + 'static {
    fn is_reset(&self) -> bool {
        false
    }
}

/// 不透明的命令参数
pub type Payload = Box<dyn Any + Send + Sync>;

/// 调用方命令
pub struct Command<K> {
    id: u64,
    kind: K,
    payload: Option<Payload>,
    created_at: Instant,
    deadline: Option<Instant>,
    status: AtomicCommandStatus,
}

impl<K: CommandKind> Command<K> {
    /// 创建命令（初始状态 Pending）
    ///
    /// `id` 由调用方提供，通常来自引擎的 [`CommandSequence`]。
    pub fn new(id: u64, kind: K) -> Self {
        Self {
            id,
            kind,
            payload: None,
            created_at: Instant::now(),
            deadline: None,
            status: AtomicCommandStatus::new(CommandStatus::Pending),
        }
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// 排队超时：超过该时间仍未被取出执行，则以 Timeout 结束
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(self.created_at + timeout);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<T>())
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn status(&self) -> CommandStatus {
        self.status.get()
    }

    pub fn is_settled(&self) -> bool {
        self.status().is_terminal()
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub(crate) fn activate(&self) -> bool {
        self.status.activate()
    }

    pub(crate) fn settle(&self, status: CommandStatus) -> bool {
        self.status.settle(status)
    }

    /// 等待命令进入终态
    ///
    /// 轮询实现（1ms 间隔）；超时返回当时的状态（可能仍为非终态）。
    pub fn wait(&self, timeout: Duration) -> CommandStatus {
        let start = Instant::now();
        loop {
            let status = self.status();
            if status.is_terminal() || start.elapsed() >= timeout {
                return status;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for Command<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status.get())
            .field("has_payload", &self.payload.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// 命令 id 生成器（每个引擎一个，从 1 开始）
#[derive(Debug)]
pub struct CommandSequence {
    next: AtomicU64,
}

impl CommandSequence {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for CommandSequence {
    fn default() -> Self {
        Self::new()
    }
}
