//! 状态定义
//!
//! 每个状态在构建引擎时创建一次，之后在每次激活时复用：
//! - `enter`/`exit` 每次激活/离开恰好调用一次
//! - `state_proc` 每次激活调用零到多次，必须能在部分完成的情况下重复调用
//!
//! 状态通过 [`StateCore`] 向引擎报告执行结果（Working/Completed/Error）
//! 和空闲策略（[`IdlePeriod`]）。

use crate::command::CommandStatus;
use crate::context::StateContext;
use crate::identity::StateId;
use crate::profile::DeviceProfile;
use std::time::Duration;

/// 状态执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StateResult {
    #[default]
    Working,
    Completed,
    Error,
}

impl StateResult {
    /// 命令终态 → 状态结果
    ///
    /// | 命令状态                     | 结果      |
    /// |------------------------------|-----------|
    /// | Success / Ignored / Rejected | Completed |
    /// | Error / Timeout / Failed     | Error     |
    ///
    /// # Panics
    ///
    /// 非终态（Pending/Active）没有对应结果，属于调用方的编程错误。
    pub fn from_command_status(status: CommandStatus) -> Self {
        match Self::try_from_command_status(status) {
            Some(result) => result,
            None => panic!("No state result for non-terminal command status {status:?}"),
        }
    }

    pub fn try_from_command_status(status: CommandStatus) -> Option<Self> {
        match status {
            CommandStatus::Success | CommandStatus::Ignored | CommandStatus::Rejected => {
                Some(Self::Completed)
            },
            CommandStatus::Error | CommandStatus::Timeout | CommandStatus::Failed => {
                Some(Self::Error)
            },
            CommandStatus::Pending | CommandStatus::Active => None,
        }
    }
}

/// 空闲策略
///
/// 与毫秒哨兵值一一对应：`-1` 无限等待，`0` 连续运行，`>0` 看门狗周期
/// （不低于 [`IdlePeriod::MIN_WATCHDOG`]）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePeriod {
    /// 只在外部事件（命令入队、配置变化、resume、stop）时唤醒
    Infinite,
    /// 不空闲，立即再次调用 `state_proc`
    Continuous,
    /// 最多等待该时长，期间外部事件会提前唤醒
    Watchdog(Duration),
}

impl IdlePeriod {
    pub const INFINITE_MS: i64 = -1;
    pub const MIN_WATCHDOG: Duration = Duration::from_millis(15);

    pub fn from_ms(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Self::Infinite,
            0 => Self::Continuous,
            ms => Self::watchdog(Duration::from_millis(ms as u64)),
        }
    }

    /// 看门狗周期（低于下限时取下限）
    pub fn watchdog(period: Duration) -> Self {
        Self::Watchdog(period.max(Self::MIN_WATCHDOG))
    }

    pub fn as_ms(&self) -> i64 {
        match self {
            Self::Infinite => Self::INFINITE_MS,
            Self::Continuous => 0,
            Self::Watchdog(d) => d.as_millis() as i64,
        }
    }
}

impl Default for IdlePeriod {
    fn default() -> Self {
        Self::Watchdog(Self::MIN_WATCHDOG)
    }
}

/// 状态的引擎可见部分
///
/// 具体状态把它作为字段持有，并通过 [`State::core`] 暴露给引擎。
#[derive(Debug, Clone)]
pub struct StateCore {
    id: StateId,
    period: IdlePeriod,
    result: StateResult,
    last_error: Option<String>,
    /// 构造时声明的后继状态
    default_next: Option<StateId>,
    /// 本次激活中由 `complete_to` 指定的后继状态
    pending_next: Option<StateId>,
}

impl StateCore {
    pub fn new(id: StateId) -> Self {
        Self {
            id,
            period: IdlePeriod::default(),
            result: StateResult::Working,
            last_error: None,
            default_next: None,
            pending_next: None,
        }
    }

    pub fn with_period(mut self, period: IdlePeriod) -> Self {
        self.period = period;
        self
    }

    pub fn with_next(mut self, next: StateId) -> Self {
        self.default_next = Some(next);
        self
    }

    pub fn id(&self) -> &StateId {
        &self.id
    }

    pub fn period(&self) -> IdlePeriod {
        self.period
    }

    pub fn set_period(&mut self, period: IdlePeriod) {
        self.period = period;
    }

    pub fn result(&self) -> StateResult {
        self.result
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_next(&mut self, next: Option<StateId>) {
        self.default_next = next;
    }

    /// 后继状态：`complete_to` 指定的优先于构造时声明的
    pub fn next(&self) -> Option<&StateId> {
        self.pending_next.as_ref().or(self.default_next.as_ref())
    }

    pub fn working(&mut self) {
        self.result = StateResult::Working;
    }

    pub fn complete(&mut self) {
        self.result = StateResult::Completed;
    }

    /// 完成并转到指定状态（仅本次激活有效）
    pub fn complete_to(&mut self, next: StateId) {
        self.pending_next = Some(next);
        self.result = StateResult::Completed;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.result = StateResult::Error;
    }

    /// 进入前重置本次激活的状态
    pub(crate) fn activate(&mut self) {
        self.result = StateResult::Working;
        self.last_error = None;
        self.pending_next = None;
    }
}

/// 设备状态
///
/// 所有回调都只在引擎的工作线程中执行，实现不需要内部同步。
///
/// ```
/// use devfsm_engine::{DeviceProfile, IdlePeriod, State, StateContext, StateCore, StateId};
/// # use devfsm_engine::{CommandKind, Configuration};
/// # #[derive(Debug, Clone)] struct Cfg; impl Configuration for Cfg {}
/// # #[derive(Debug)] struct Cmd; impl CommandKind for Cmd {}
/// # struct Dev; impl DeviceProfile for Dev { type Config = Cfg; type Command = Cmd; type Data = u32; }
///
/// struct Counting {
///     core: StateCore,
/// }
///
/// impl State<Dev> for Counting {
///     fn core(&self) -> &StateCore {
///         &self.core
///     }
///     fn core_mut(&mut self) -> &mut StateCore {
///         &mut self.core
///     }
///     fn state_proc(&mut self, ctx: &mut StateContext<'_, Dev>) {
///         *ctx.data_mut() += 1;
///         if *ctx.data() >= 10 {
///             self.core.complete();
///         }
///     }
/// }
///
/// let s = Counting {
///     core: StateCore::new(StateId::new_static("Counting", 100)).with_period(IdlePeriod::from_ms(50)),
/// };
/// assert_eq!(s.id().name(), "Counting");
/// ```
pub trait State<P: DeviceProfile>: Send {
    fn core(&self) -> &StateCore;
    fn core_mut(&mut self) -> &mut StateCore;

    fn enter(&mut self, ctx: &mut StateContext<'_, P>) {
        let _ = ctx;
    }

    fn state_proc(&mut self, ctx: &mut StateContext<'_, P>);

    fn exit(&mut self, ctx: &mut StateContext<'_, P>) {
        let _ = ctx;
    }

    fn id(&self) -> &StateId {
        self.core().id()
    }

    fn period(&self) -> IdlePeriod {
        self.core().period()
    }

    fn result(&self) -> StateResult {
        self.core().result()
    }

    fn next_state(&self) -> Option<StateId> {
        self.core().next().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_mapping() {
        use CommandStatus::*;
        for s in [Success, Ignored, Rejected] {
            assert_eq!(StateResult::from_command_status(s), StateResult::Completed);
        }
        for s in [Error, Timeout, Failed] {
            assert_eq!(StateResult::from_command_status(s), StateResult::Error);
        }
        assert_eq!(StateResult::try_from_command_status(Pending), None);
        assert_eq!(StateResult::try_from_command_status(Active), None);
    }

    #[test]
    #[should_panic(expected = "non-terminal")]
    fn test_result_mapping_panics_on_active() {
        StateResult::from_command_status(CommandStatus::Active);
    }

    #[test]
    fn test_idle_period_sentinels() {
        assert_eq!(IdlePeriod::from_ms(-1), IdlePeriod::Infinite);
        assert_eq!(IdlePeriod::from_ms(-500), IdlePeriod::Infinite);
        assert_eq!(IdlePeriod::from_ms(0), IdlePeriod::Continuous);
        assert_eq!(
            IdlePeriod::from_ms(3),
            IdlePeriod::Watchdog(Duration::from_millis(15))
        );
        assert_eq!(
            IdlePeriod::from_ms(250),
            IdlePeriod::Watchdog(Duration::from_millis(250))
        );
        assert_eq!(IdlePeriod::default().as_ms(), 15);
        assert_eq!(IdlePeriod::Infinite.as_ms(), -1);
    }

    #[test]
    fn test_core_activation_resets() {
        let mut core = StateCore::new(StateId::new("Measure", 10)).with_next(StateId::STOP);
        assert_eq!(core.next(), Some(&StateId::STOP));

        core.fail("sensor unplugged");
        assert_eq!(core.result(), StateResult::Error);
        assert_eq!(core.last_error(), Some("sensor unplugged"));

        core.activate();
        assert_eq!(core.result(), StateResult::Working);
        assert_eq!(core.last_error(), None);

        core.complete_to(StateId::END);
        assert_eq!(core.next(), Some(&StateId::END));
        core.activate();
        assert_eq!(core.next(), Some(&StateId::STOP), "pending next is per activation");
    }
}
