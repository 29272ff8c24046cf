//! Builder 模式实现
//!
//! 提供链式构造 [`StateMachineEngine`] 的便捷方式。构建时：
//!
//! 1. 按顺序注册设备状态（标识冲突即报错）
//! 2. 补齐设备没有注册的预定义状态（Start/Stop/End/GenericError/TransitionError）
//! 3. 校验转换表和声明的后继状态都已注册
//! 4. 为两个错误状态补上默认的 (错误状态, Completed) → Start

use crate::engine::{EngineOptions, Shared, StateMachineEngine};
use crate::error::{EngineError, RegistryError};
use crate::identity::StateId;
use crate::profile::DeviceProfile;
use crate::registry::StateRegistry;
use crate::state::{State, StateResult};
use crate::states::{EndState, ErrorState, StartState, StopState};
use crate::transition::TransitionTable;
use crate::worker::Worker;
use devfsm_hal::HardwareHandler;
use std::sync::Arc;
use std::time::Duration;

/// 引擎 Builder
///
/// # Example
///
/// ```
/// use devfsm_engine::{
///     CommandKind, Configuration, DeviceProfile, EngineBuilder, StateId, StateResult,
/// };
/// use std::time::Duration;
///
/// #[derive(Debug, Clone)]
/// struct Cfg;
/// impl Configuration for Cfg {}
/// #[derive(Debug)]
/// struct Cmd;
/// impl CommandKind for Cmd {}
/// struct Dev;
/// impl DeviceProfile for Dev {
///     type Config = Cfg;
///     type Command = Cmd;
///     type Data = ();
/// }
///
/// let engine = EngineBuilder::<Dev>::new("plc-1", ())
///     .start_next(StateId::STOP)
///     .transition(StateId::GENERIC_ERROR, StateResult::Completed, StateId::STOP)
///     .queue_capacity(16)
///     .config_lock_timeout(Duration::from_millis(500))
///     .build()
///     .unwrap();
/// assert_eq!(engine.options().queue_capacity, 16);
/// assert!(engine.registered_states().contains(&StateId::END));
/// ```
pub struct EngineBuilder<P: DeviceProfile> {
    name: String,
    data: P::Data,
    states: Vec<Box<dyn State<P>>>,
    transitions: Vec<(StateId, StateResult, StateId)>,
    start_next: StateId,
    hardware: Option<Arc<dyn HardwareHandler>>,
    initial_configuration: Option<P::Config>,
    options: EngineOptions,
}

impl<P: DeviceProfile> EngineBuilder<P> {
    pub fn new(name: impl Into<String>, data: P::Data) -> Self {
        Self {
            name: name.into(),
            data,
            states: Vec::new(),
            transitions: Vec::new(),
            start_next: StateId::LOADED,
            hardware: None,
            initial_configuration: None,
            options: EngineOptions::default(),
        }
    }

    /// 注册设备状态（与预定义状态同标识时替换预定义实现）
    pub fn state(self, state: impl State<P> + 'static) -> Self {
        self.boxed_state(Box::new(state))
    }

    pub fn boxed_state(mut self, state: Box<dyn State<P>>) -> Self {
        self.states.push(state);
        self
    }

    /// 添加转换表项
    pub fn transition(mut self, from: StateId, result: StateResult, to: StateId) -> Self {
        self.transitions.push((from, result, to));
        self
    }

    /// 默认 Start 状态的后继（默认 Loaded，必须已注册）
    pub fn start_next(mut self, next: StateId) -> Self {
        self.start_next = next;
        self
    }

    pub fn hardware(mut self, handler: Arc<dyn HardwareHandler>) -> Self {
        self.hardware = Some(handler);
        self
    }

    /// 构建时即写入的配置（Start 状态第一次执行就会完成）
    pub fn initial_configuration(mut self, config: P::Config) -> Self {
        self.initial_configuration = Some(config);
        self
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.options.queue_capacity = capacity.max(1);
        self
    }

    pub fn config_lock_timeout(mut self, timeout: Duration) -> Self {
        self.options.config_lock_timeout = timeout;
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.options.join_timeout = timeout;
        self
    }

    pub fn log_transitions(mut self, enabled: bool) -> Self {
        self.options.log_transitions = enabled;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.options.thread_name = Some(name.into());
        self
    }

    pub fn realtime_priority(mut self, enabled: bool) -> Self {
        self.options.realtime_priority = enabled;
        self
    }

    pub fn build(self) -> Result<StateMachineEngine<P>, EngineError> {
        let mut registry = StateRegistry::new();
        for state in self.states {
            registry.add(state)?;
        }

        let default_start = !registry.contains(&StateId::START);
        if default_start {
            registry.add(Box::new(StartState::new(self.start_next.clone())))?;
        }
        if !registry.contains(&StateId::STOP) {
            registry.add(Box::new(StopState::new()))?;
        }
        if !registry.contains(&StateId::END) {
            registry.add(Box::new(EndState::new()))?;
        }
        for error_state in [StateId::GENERIC_ERROR, StateId::TRANSITION_ERROR] {
            if !registry.contains(&error_state) {
                registry.add(Box::new(ErrorState::new(error_state)))?;
            }
        }

        // 声明的后继必须存在；运行时 complete_to 指定的未知目标才走 TransitionError
        for id in registry.ids() {
            let declared = registry
                .index_of(&id)
                .and_then(|idx| registry.get(idx).next_state());
            if let Some(next) = declared
                && !registry.contains(&next)
            {
                return Err(RegistryError::UnknownState(next).into());
            }
        }

        let mut table = TransitionTable::new();
        for (from, result, to) in self.transitions {
            for id in [&from, &to] {
                if !registry.contains(id) {
                    return Err(RegistryError::UnknownState(id.clone()).into());
                }
            }
            table.add(from, result, to)?;
        }
        for error_state in [StateId::GENERIC_ERROR, StateId::TRANSITION_ERROR] {
            if !table.contains(&error_state, StateResult::Completed) {
                table.add(error_state, StateResult::Completed, StateId::START)?;
            }
        }

        let catalog = registry.ids();
        let shared = Arc::new(Shared::new(
            &self.name,
            self.options,
            self.hardware,
            self.initial_configuration,
        ));
        let worker = Worker::new(shared.clone(), registry, table, self.data);
        Ok(StateMachineEngine::from_parts(shared, worker, catalog))
    }
}
