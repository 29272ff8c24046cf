//! 状态回调上下文
//!
//! `enter`/`state_proc`/`exit` 通过 [`StateContext`] 访问当前命令、配置、
//! 硬件句柄和跨状态数据。上下文只在工作线程中、单次回调期间存在。

use crate::command::{Command, CommandStatus};
use crate::engine::Shared;
use crate::error::EngineError;
use crate::identity::StateId;
use crate::idle::IdleOutcome;
use crate::profile::DeviceProfile;
use crate::transition::SequenceFull;
use devfsm_hal::HardwareHandler;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::warn;

/// 最近一次故障（转入错误状态的原因）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFault {
    /// 发生故障的状态
    pub origin: StateId,
    pub message: String,
}

impl fmt::Display for StateFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.origin, self.message)
    }
}

pub struct StateContext<'a, P: DeviceProfile> {
    pub(crate) shared: &'a Shared<P>,
    pub(crate) data: &'a mut P::Data,
    pub(crate) command: Option<&'a Arc<Command<P::Command>>>,
    pub(crate) idle: IdleOutcome,
    pub(crate) fault: Option<&'a StateFault>,
    pub(crate) previous: Option<&'a StateId>,
}

impl<'a, P: DeviceProfile> StateContext<'a, P> {
    pub fn device_name(&self) -> &str {
        &self.shared.name
    }

    pub fn data(&self) -> &P::Data {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut P::Data {
        &mut *self.data
    }

    /// 当前分派的命令（没有则为 `None`）
    pub fn command(&self) -> Option<&Command<P::Command>> {
        self.command.map(|c| c.as_ref())
    }

    /// 以终态结束当前命令
    ///
    /// 返回是否写入成功：没有当前命令、命令已处于终态、或 `status`
    /// 不是终态时返回 false。
    pub fn complete_command(&self, status: CommandStatus) -> bool {
        let Some(cmd) = self.command else {
            return false;
        };
        if !status.is_terminal() {
            warn!(
                "Ignoring non-terminal status {:?} for command {}",
                status,
                cmd.id()
            );
            return false;
        }
        self.shared.settle(cmd, status)
    }

    /// 本次调用的原因
    pub fn idle_outcome(&self) -> IdleOutcome {
        self.idle
    }

    /// 配置副本
    pub fn configuration(&self) -> Result<Option<P::Config>, EngineError> {
        self.shared.config.get().map_err(EngineError::from)
    }

    /// 在配置锁内只读访问，避免整份克隆
    pub fn with_configuration<R>(
        &self,
        f: impl FnOnce(Option<&P::Config>) -> R,
    ) -> Result<R, EngineError> {
        self.shared.config.with(f).map_err(EngineError::from)
    }

    pub fn configuration_is_set(&self) -> Result<bool, EngineError> {
        self.shared.config.is_set().map_err(EngineError::from)
    }

    pub fn hardware(&self) -> Option<&Arc<dyn HardwareHandler>> {
        self.shared.hardware.as_ref()
    }

    pub fn pending_commands(&self) -> usize {
        self.shared.queue.len()
    }

    /// 查看下一条排队命令（不出队）
    pub fn peek_next_command(&self) -> Option<Arc<Command<P::Command>>> {
        self.shared.queue.peek()
    }

    /// 排入后继状态
    ///
    /// 当前状态 Completed 时先按序列逐个转换，序列空了才看声明的后继和
    /// 转换表。序列在故障或停止时清空。
    pub fn queue_state(&self, id: StateId) -> Result<(), SequenceFull> {
        self.shared.sequence.push(id)
    }

    /// 一次排入多个后继状态；容量不足时一个都不排入
    pub fn queue_states(&self, ids: impl IntoIterator<Item = StateId>) -> Result<(), SequenceFull> {
        self.shared.sequence.extend(ids)
    }

    pub fn in_state_sequence(&self) -> bool {
        !self.shared.sequence.is_empty()
    }

    pub fn fault(&self) -> Option<&StateFault> {
        self.fault
    }

    pub fn previous_state(&self) -> Option<&StateId> {
        self.previous
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// 请求停止（当前回调返回后生效）
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }
}
