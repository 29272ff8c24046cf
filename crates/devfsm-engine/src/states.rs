//! 预定义状态
//!
//! 构建引擎时，设备没有注册的预定义状态由 builder 补齐：
//!
//! | 标识                            | 状态           | 行为                                  |
//! |---------------------------------|----------------|---------------------------------------|
//! | Start                           | [`StartState`] | 无限等待，配置就绪后完成              |
//! | Stop                            | [`StopState`]  | 立即完成，转入 End                    |
//! | End                             | [`EndState`]   | 终止状态，执行后工作线程退出          |
//! | GenericError / TransitionError  | [`ErrorState`] | 拒绝普通命令，复位命令使其完成        |
//!
//! 设备可以用相同标识注册自己的实现来替换它们。

use crate::command::{CommandKind, CommandStatus};
use crate::context::StateContext;
use crate::identity::StateId;
use crate::profile::DeviceProfile;
use crate::state::{IdlePeriod, State, StateCore};
use tracing::{debug, error, info, warn};

/// 初始状态
pub struct StartState {
    core: StateCore,
}

impl StartState {
    pub fn new(next: StateId) -> Self {
        Self {
            core: StateCore::new(StateId::START)
                .with_period(IdlePeriod::Infinite)
                .with_next(next),
        }
    }
}

impl<P: DeviceProfile> State<P> for StartState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    fn state_proc(&mut self, ctx: &mut StateContext<'_, P>) {
        match ctx.configuration_is_set() {
            Ok(true) => {
                debug!("Configuration present, leaving {}", StateId::START);
                self.core.complete();
            },
            Ok(false) => {},
            Err(e) => warn!("Start: {}", e),
        }
    }
}

/// 停止状态：直接转入 End
pub struct StopState {
    core: StateCore,
}

impl StopState {
    pub fn new() -> Self {
        Self {
            core: StateCore::new(StateId::STOP)
                .with_period(IdlePeriod::Continuous)
                .with_next(StateId::END),
        }
    }
}

impl Default for StopState {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DeviceProfile> State<P> for StopState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    fn state_proc(&mut self, _ctx: &mut StateContext<'_, P>) {
        self.core.complete();
    }
}

/// 终止状态
pub struct EndState {
    core: StateCore,
}

impl EndState {
    pub fn new() -> Self {
        Self {
            core: StateCore::new(StateId::END).with_period(IdlePeriod::Infinite),
        }
    }
}

impl Default for EndState {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DeviceProfile> State<P> for EndState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    fn enter(&mut self, ctx: &mut StateContext<'_, P>) {
        info!("Device '{}' reached {}", ctx.device_name(), StateId::END);
    }

    fn state_proc(&mut self, _ctx: &mut StateContext<'_, P>) {}
}

/// 错误状态（GenericError / TransitionError）
///
/// 进入时记录故障原因。普通命令以 Failed 结束；复位命令
/// （[`CommandKind::is_reset`](crate::CommandKind::is_reset)）以 Success 结束并使状态完成，
/// 默认转换表把完成的错误状态带回 Start。
pub struct ErrorState {
    core: StateCore,
}

impl ErrorState {
    pub fn new(id: StateId) -> Self {
        Self {
            core: StateCore::new(id).with_period(IdlePeriod::Infinite),
        }
    }

    pub fn generic() -> Self {
        Self::new(StateId::GENERIC_ERROR)
    }

    pub fn transition() -> Self {
        Self::new(StateId::TRANSITION_ERROR)
    }
}

impl<P: DeviceProfile> State<P> for ErrorState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    fn enter(&mut self, ctx: &mut StateContext<'_, P>) {
        match ctx.fault() {
            Some(fault) => error!("Entered {} after fault in {}", self.core.id(), fault),
            None => warn!("Entered {} without a recorded fault", self.core.id()),
        }
    }

    fn state_proc(&mut self, ctx: &mut StateContext<'_, P>) {
        let Some(cmd) = ctx.command() else {
            return;
        };
        if cmd.kind().is_reset() {
            info!("Reset command {} received in {}", cmd.id(), self.core.id());
            ctx.complete_command(CommandStatus::Success);
            self.core.complete();
        } else {
            warn!(
                "Command {} ({:?}) failed: device is in {}",
                cmd.id(),
                cmd.kind(),
                self.core.id()
            );
            ctx.complete_command(CommandStatus::Failed);
        }
    }
}
