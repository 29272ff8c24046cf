//! # devfsm 设备状态机引擎
//!
//! 每台设备一个专用工作线程，按协作式有限状态机运行：
//! - 调用方线程通过有界命令队列提交命令（满时明确拒绝为 Ignored，不丢弃旧命令）
//! - 配置槽由有界等待锁保护，只允许在 Start/Loaded 阶段替换
//! - 工作线程按状态的空闲策略（无限等待 / 连续 / 看门狗周期）调度 `state_proc`
//! - 状态回调中的 panic 被捕获并转入 GenericError，工作线程不会静默退出
//!
//! # 模块
//!
//! - [`identity`]：状态标识
//! - [`state`] / [`states`]：状态 trait 与预定义状态
//! - [`command`] / [`queue`]：命令生命周期与有界队列
//! - [`config`]：配置槽
//! - [`engine`] / [`builder`]：引擎与构建器
//! - [`hooks`] / [`metrics`]：监听器与运行指标

pub mod builder;
pub mod command;
pub mod config;
mod context;
pub mod engine;
mod error;
pub mod hooks;
pub mod identity;
mod idle;
pub mod metrics;
mod profile;
pub mod queue;
pub mod registry;
pub mod state;
pub mod states;
pub mod transition;
mod worker;

pub use builder::EngineBuilder;
pub use command::{AtomicCommandStatus, Command, CommandKind, CommandSequence, CommandStatus, Payload};
pub use config::{ConfigError, Configuration, ConfigurationSlot, SlotTimeout};
pub use context::{StateContext, StateFault};
pub use engine::{ConfigUpdate, EngineOptions, StateMachineEngine};
pub use error::{EngineError, RegistryError};
pub use hooks::{CommandEvent, CommandListener, HookManager, StateChangeEvent, StateChangeListener};
pub use identity::StateId;
pub use idle::IdleOutcome;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use profile::DeviceProfile;
pub use queue::{CommandQueue, QueueFull};
pub use registry::StateRegistry;
pub use state::{IdlePeriod, State, StateCore, StateResult};
pub use states::{EndState, ErrorState, StartState, StopState};
pub use transition::{DEFAULT_SEQUENCE_CAPACITY, SequenceFull, StateSequence, TransitionTable};

pub use devfsm_hal as hal;
