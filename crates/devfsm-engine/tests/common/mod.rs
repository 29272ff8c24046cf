//! 集成测试共用的模拟仪器
//!
//! - Loaded：无限等待；Open 打开硬件后进入 Operating，HoldConfig 长时间占用配置锁
//! - Operating：20ms 看门狗；Measure 记录读数，Close 关闭硬件回到 Loaded，
//!   Panic 模拟状态逻辑 bug，Jump 请求转到未注册的状态，
//!   Calibrate 排入 Calibrating → Verifying → Loaded 状态序列（载荷可指定其他路线）
//! - Calibrating / Verifying（需测试自行注册）：进入后立即完成
//!
//! 工作线程独占的数据通过 `Arc<Journal>` 暴露给测试线程。

#![allow(dead_code)]

use devfsm_engine::hal::{HardwareHandler, MockHandler};
use devfsm_engine::{
    CommandKind, CommandStatus, ConfigError, Configuration, DeviceProfile, EngineBuilder, IdleOutcome,
    IdlePeriod, State, StateContext, StateCore, StateId, StateMachineEngine,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const OPERATING: StateId = StateId::new_static("Operating", 100);
pub const NOWHERE: StateId = StateId::new_static("Nowhere", 999);
pub const CALIBRATING: StateId = StateId::new_static("Calibrating", 101);
pub const VERIFYING: StateId = StateId::new_static("Verifying", 102);

/// HoldConfig 占用配置锁的时间
pub const CONFIG_HOLD: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub rate_hz: u32,
    pub channels: Vec<u8>,
}

impl Configuration for SimConfig {
    /// 采样率为 0 的配置不能合并
    fn copy_from(&mut self, other: &Self) -> Result<(), ConfigError> {
        if other.rate_hz == 0 {
            return Err(ConfigError::Invalid("rate_hz must be positive".into()));
        }
        *self = other.clone();
        Ok(())
    }
}

pub fn sim_config() -> SimConfig {
    SimConfig {
        rate_hz: 1000,
        channels: vec![0, 1, 2],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCommand {
    Open,
    Close,
    Measure,
    Reset,
    Panic,
    Jump,
    Calibrate,
    HoldConfig,
}

impl CommandKind for SimCommand {
    fn is_reset(&self) -> bool {
        matches!(self, Self::Reset)
    }
}

/// 测试线程可见的工作线程记录
#[derive(Debug, Default)]
pub struct Journal {
    pub dispatched: Mutex<Vec<u64>>,
    pub readings: Mutex<Vec<u32>>,
    pub outcomes: Mutex<Vec<(StateId, IdleOutcome)>>,
}

pub struct Sim;

impl DeviceProfile for Sim {
    type Config = SimConfig;
    type Command = SimCommand;
    type Data = Arc<Journal>;
}

fn record(ctx: &StateContext<'_, Sim>, id: &StateId) {
    ctx.data()
        .outcomes
        .lock()
        .push((id.clone(), ctx.idle_outcome()));
    if let Some(cmd) = ctx.command() {
        let mut dispatched = ctx.data().dispatched.lock();
        if dispatched.last() != Some(&cmd.id()) {
            dispatched.push(cmd.id());
        }
    }
}

pub struct LoadedState {
    core: StateCore,
}

impl LoadedState {
    pub fn new() -> Self {
        Self {
            core: StateCore::new(StateId::LOADED).with_period(IdlePeriod::Infinite),
        }
    }
}

impl Default for LoadedState {
    fn default() -> Self {
        Self::new()
    }
}

impl State<Sim> for LoadedState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    fn state_proc(&mut self, ctx: &mut StateContext<'_, Sim>) {
        record(ctx, &StateId::LOADED);
        let Some(kind) = ctx.command().map(|c| *c.kind()) else {
            return;
        };
        match kind {
            SimCommand::Open => {
                let result = ctx.hardware().map(|h| h.open());
                match result {
                    Some(Ok(())) | None => {
                        ctx.complete_command(CommandStatus::Success);
                        self.core.complete_to(OPERATING);
                    },
                    Some(Err(e)) => {
                        ctx.complete_command(CommandStatus::Failed);
                        self.core.fail(format!("open failed: {e}"));
                    },
                }
            },
            SimCommand::Close => {
                ctx.complete_command(CommandStatus::Success);
            },
            SimCommand::HoldConfig => {
                let held = ctx.with_configuration(|_| std::thread::sleep(CONFIG_HOLD));
                let status = if held.is_ok() {
                    CommandStatus::Success
                } else {
                    CommandStatus::Failed
                };
                ctx.complete_command(status);
            },
            _ => {
                ctx.complete_command(CommandStatus::Rejected);
            },
        }
    }
}

pub struct OperatingState {
    core: StateCore,
}

/// Operating 的看门狗周期
pub const OPERATING_PERIOD: Duration = Duration::from_millis(20);

impl OperatingState {
    pub fn new() -> Self {
        Self::with_period(OPERATING_PERIOD)
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            core: StateCore::new(OPERATING).with_period(IdlePeriod::watchdog(period)),
        }
    }
}

impl Default for OperatingState {
    fn default() -> Self {
        Self::new()
    }
}

impl State<Sim> for OperatingState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    fn state_proc(&mut self, ctx: &mut StateContext<'_, Sim>) {
        record(ctx, &OPERATING);
        let Some(kind) = ctx.command().map(|c| *c.kind()) else {
            return;
        };
        match kind {
            SimCommand::Measure => {
                let rate = ctx
                    .with_configuration(|cfg| cfg.map(|c| c.rate_hz).unwrap_or(0))
                    .unwrap_or(0);
                ctx.data().readings.lock().push(rate);
                ctx.complete_command(CommandStatus::Success);
            },
            SimCommand::Close => {
                if let Some(h) = ctx.hardware() {
                    let _ = h.close();
                }
                ctx.complete_command(CommandStatus::Success);
                self.core.complete_to(StateId::LOADED);
            },
            SimCommand::Panic => panic!("simulated state bug"),
            SimCommand::Jump => {
                ctx.complete_command(CommandStatus::Success);
                self.core.complete_to(NOWHERE);
            },
            SimCommand::Calibrate => {
                // 载荷可以指定其他路线
                let route = ctx
                    .command()
                    .and_then(|c| c.payload::<Vec<StateId>>().cloned())
                    .unwrap_or_else(|| vec![CALIBRATING, VERIFYING, StateId::LOADED]);
                match ctx.queue_states(route) {
                    Ok(()) => {
                        ctx.complete_command(CommandStatus::Success);
                        self.core.complete();
                    },
                    Err(_) => {
                        ctx.complete_command(CommandStatus::Rejected);
                    },
                }
            },
            SimCommand::Open | SimCommand::Reset | SimCommand::HoldConfig => {
                ctx.complete_command(CommandStatus::Ignored);
            },
        }
    }
}

/// 进入后立即完成的过渡状态
pub struct StepState {
    core: StateCore,
}

impl StepState {
    pub fn new(id: StateId) -> Self {
        Self {
            core: StateCore::new(id).with_period(IdlePeriod::Continuous),
        }
    }
}

impl State<Sim> for StepState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    fn state_proc(&mut self, ctx: &mut StateContext<'_, Sim>) {
        let id = self.core.id().clone();
        record(ctx, &id);
        self.core.complete();
    }
}

pub struct Rig {
    pub engine: StateMachineEngine<Sim>,
    pub journal: Arc<Journal>,
    pub hardware: Arc<MockHandler>,
}

pub fn builder(
    journal: Arc<Journal>,
    hardware: Arc<MockHandler>,
    operating_period: Duration,
) -> EngineBuilder<Sim> {
    let hw: Arc<dyn HardwareHandler> = hardware;
    StateMachineEngine::builder("sim", journal)
        .state(LoadedState::default())
        .state(OperatingState::with_period(operating_period))
        .hardware(hw)
        .join_timeout(Duration::from_secs(2))
}

pub fn rig() -> Rig {
    rig_with(|b| b)
}

pub fn rig_with(f: impl FnOnce(EngineBuilder<Sim>) -> EngineBuilder<Sim>) -> Rig {
    rig_with_period(OPERATING_PERIOD, f)
}

/// Operating 使用指定看门狗周期
pub fn rig_with_period(
    operating_period: Duration,
    f: impl FnOnce(EngineBuilder<Sim>) -> EngineBuilder<Sim>,
) -> Rig {
    let journal = Arc::new(Journal::default());
    let hardware = Arc::new(MockHandler::new("sim-hw"));
    let engine = f(builder(journal.clone(), hardware.clone(), operating_period))
        .build()
        .expect("engine builds");
    Rig {
        engine,
        journal,
        hardware,
    }
}

/// 轮询直到条件成立或超时
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

pub const WAIT: Duration = Duration::from_secs(3);
