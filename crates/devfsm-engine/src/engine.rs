//! 状态机引擎（对外 API）
//!
//! [`StateMachineEngine`] 拥有工作线程、命令队列和配置槽。
//! 除构建外的所有方法都可以从任意线程并发调用。

use crate::builder::EngineBuilder;
use crate::command::{Command, CommandSequence, CommandStatus};
use crate::config::{ConfigurationSlot, DEFAULT_LOCK_TIMEOUT};
use crate::error::EngineError;
use crate::hooks::{CommandEvent, CommandListener, HookManager, StateChangeListener};
use crate::identity::StateId;
use crate::idle::WakeSignal;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::profile::DeviceProfile;
use crate::queue::{CommandQueue, DEFAULT_QUEUE_CAPACITY, QueueFull};
use crate::transition::StateSequence;
use crate::worker::Worker;
use arc_swap::ArcSwapOption;
use devfsm_hal::HardwareHandler;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 引擎参数
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineOptions {
    /// 命令队列容量（默认 128）
    pub queue_capacity: usize,
    /// 配置锁等待时间（默认 2000ms）
    pub config_lock_timeout: Duration,
    /// Drop 时等待工作线程退出的时间（默认 10s）
    pub join_timeout: Duration,
    /// 状态转换以 info 级别记录（否则 debug）
    pub log_transitions: bool,
    /// 工作线程名称，默认 `fsm-<设备名>`
    pub thread_name: Option<String>,
    /// 提升工作线程优先级（需要 `realtime` feature）
    pub realtime_priority: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            config_lock_timeout: DEFAULT_LOCK_TIMEOUT,
            join_timeout: Duration::from_secs(10),
            log_transitions: false,
            thread_name: None,
            realtime_priority: false,
        }
    }
}

/// 配置更新结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdate {
    Applied,
    /// 当前阶段不允许修改配置（只有 Start/Loaded 阶段允许），原配置不变
    IncompatibleState { current: StateId },
}

impl ConfigUpdate {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// 工作线程与调用方线程共享的部分
pub(crate) struct Shared<P: DeviceProfile> {
    pub(crate) name: Arc<str>,
    pub(crate) queue: CommandQueue<P::Command>,
    pub(crate) config: ConfigurationSlot<P::Config>,
    pub(crate) hardware: Option<Arc<dyn HardwareHandler>>,
    pub(crate) wake: WakeSignal,
    /// 状态排入的后继序列
    pub(crate) sequence: StateSequence,
    pub(crate) current_state: ArcSwapOption<StateId>,
    pub(crate) previous_state: ArcSwapOption<StateId>,
    /// 工作线程写，其他线程读快照
    pub(crate) current_command: ArcSwapOption<Command<P::Command>>,
    pub(crate) stop_requested: AtomicBool,
    pub(crate) running: AtomicBool,
    /// 工作线程已退出（之后入队的命令直接 Rejected）
    pub(crate) finished: AtomicBool,
    pub(crate) metrics: Arc<EngineMetrics>,
    pub(crate) hooks: RwLock<HookManager<P::Command>>,
    pub(crate) options: EngineOptions,
}

impl<P: DeviceProfile> Shared<P> {
    pub(crate) fn new(
        name: &str,
        options: EngineOptions,
        hardware: Option<Arc<dyn HardwareHandler>>,
        initial_config: Option<P::Config>,
    ) -> Self {
        let config = match initial_config {
            Some(cfg) => ConfigurationSlot::with_value(cfg, options.config_lock_timeout),
            None => ConfigurationSlot::new(options.config_lock_timeout),
        };
        Self {
            name: Arc::from(name),
            queue: CommandQueue::new(options.queue_capacity),
            config,
            hardware,
            wake: WakeSignal::new(),
            sequence: StateSequence::default(),
            current_state: ArcSwapOption::empty(),
            previous_state: ArcSwapOption::empty(),
            current_command: ArcSwapOption::empty(),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            metrics: Arc::new(EngineMetrics::new()),
            hooks: RwLock::new(HookManager::new()),
            options,
        }
    }

    /// 写入终态并计数
    pub(crate) fn settle(&self, cmd: &Command<P::Command>, status: CommandStatus) -> bool {
        let settled = cmd.settle(status);
        if settled {
            EngineMetrics::incr(&self.metrics.commands_settled);
        }
        settled
    }

    /// 清空队列，全部置为 `status`
    pub(crate) fn purge(&self, status: CommandStatus) -> usize {
        self.queue
            .drain()
            .iter()
            .filter(|cmd| self.settle(cmd, status))
            .count()
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake.notify();
    }

    pub(crate) fn publish_state(&self, previous: Option<&StateId>, current: &StateId) {
        self.previous_state.store(previous.cloned().map(Arc::new));
        self.current_state.store(Some(Arc::new(current.clone())));
    }
}

/// 线程 join 失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinError {
    Timeout,
    Panicked,
}

/// 带超时的 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> Result<(), JoinError>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Result<(), JoinError> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // 看门狗线程负责 join，超时后它会继续等待，进程退出时由系统回收
        spawn(move || {
            let _ = tx.send(self.join().is_ok());
        });

        match rx.recv_timeout(timeout) {
            Ok(true) => Ok(()),
            Ok(false) => Err(JoinError::Panicked),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(JoinError::Timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(JoinError::Panicked),
        }
    }
}

/// 设备状态机引擎
///
/// # Example
///
/// ```
/// use devfsm_engine::{CommandKind, Configuration, DeviceProfile, StateId, StateMachineEngine};
/// use std::time::Duration;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Cfg { rate: u32 }
/// impl Configuration for Cfg {}
///
/// #[derive(Debug)]
/// enum Cmd { Ping }
/// impl CommandKind for Cmd {}
///
/// struct Dev;
/// impl DeviceProfile for Dev {
///     type Config = Cfg;
///     type Command = Cmd;
///     type Data = ();
/// }
///
/// // 没有注册 Loaded 状态时，让 Start 完成后直接停机
/// let engine = StateMachineEngine::<Dev>::builder("demo", ())
///     .start_next(StateId::STOP)
///     .build()
///     .unwrap();
/// engine.start().unwrap();
/// assert!(engine.set_configuration(&Cfg { rate: 10 }).unwrap().is_applied());
/// engine.join(Duration::from_secs(2)).unwrap();
/// assert_eq!(engine.current_state(), Some(StateId::END));
/// ```
pub struct StateMachineEngine<P: DeviceProfile> {
    shared: Arc<Shared<P>>,
    /// `start()` 时取出
    worker: Mutex<Option<Worker<P>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    sequence: CommandSequence,
    catalog: Vec<StateId>,
}

impl<P: DeviceProfile> StateMachineEngine<P> {
    pub fn builder(name: impl Into<String>, data: P::Data) -> EngineBuilder<P> {
        EngineBuilder::new(name, data)
    }

    pub(crate) fn from_parts(shared: Arc<Shared<P>>, worker: Worker<P>, catalog: Vec<StateId>) -> Self {
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
            handle: Mutex::new(None),
            sequence: CommandSequence::new(),
            catalog,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 启动工作线程（从 Start 状态开始）
    pub fn start(&self) -> Result<(), EngineError> {
        let Some(worker) = self.worker.lock().take() else {
            return Err(EngineError::AlreadyRunning);
        };

        let thread_name = self
            .shared
            .options
            .thread_name
            .clone()
            .unwrap_or_else(|| format!("fsm-{}", self.shared.name));

        self.shared.running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                EngineError::WorkerSpawn(e)
            })?;

        *self.handle.lock() = Some(handle);
        info!("Engine '{}' started", self.shared.name);
        Ok(())
    }

    /// 请求协作式停止
    ///
    /// 当前 `state_proc` 返回后生效：转入 End，执行其 `exit` 后工作线程退出。
    pub fn stop(&self) {
        debug!("Stop requested for engine '{}'", self.shared.name);
        self.shared.request_stop();
    }

    /// 唤醒空闲中的工作线程（`IdleOutcome::Woken`）
    pub fn resume(&self) {
        self.shared.wake.notify();
    }

    /// 等待工作线程退出
    ///
    /// 未启动或已经 join 过时立即返回 `Ok`。
    pub fn join(&self, timeout: Duration) -> Result<(), EngineError> {
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        handle.join_timeout(timeout).map_err(|e| match e {
            JoinError::Timeout => EngineError::JoinTimeout(timeout),
            JoinError::Panicked => EngineError::WorkerPanicked,
        })
    }

    /// 创建命令（id 来自本引擎的序列）
    pub fn new_command(&self, kind: P::Command) -> Command<P::Command> {
        Command::new(self.sequence.next_id(), kind)
    }

    /// 创建并入队，返回命令句柄供调用方轮询
    pub fn submit(&self, kind: P::Command) -> Arc<Command<P::Command>> {
        let cmd = Arc::new(self.new_command(kind));
        self.enqueue_command(cmd.clone());
        cmd
    }

    /// 命令入队
    ///
    /// 返回值：
    /// - `Pending`：已入队，工作线程已被唤醒（返回时命令可能已被执行，
    ///   以 [`Command::status`] 为准）
    /// - `Ignored`：队列已满，命令被置为 Ignored，不唤醒工作线程
    /// - `Rejected`：工作线程已退出
    /// - 其他：命令不是 Pending，原样返回其状态，不做任何修改
    pub fn enqueue_command(&self, cmd: Arc<Command<P::Command>>) -> CommandStatus {
        let status = cmd.status();
        if status != CommandStatus::Pending {
            warn!(
                "Command {} ({:?}) is {:?}, not enqueued",
                cmd.id(),
                cmd.kind(),
                status
            );
            return status;
        }

        let shared = &self.shared;
        let status = if shared.finished.load(Ordering::SeqCst) {
            shared.settle(&cmd, CommandStatus::Rejected);
            debug!("Command {} rejected: worker has exited", cmd.id());
            CommandStatus::Rejected
        } else {
            match shared.queue.push(cmd.clone(), false) {
                Ok(_) => {
                    EngineMetrics::incr(&shared.metrics.commands_enqueued);
                    // 与工作线程的收尾竞争：它可能在 push 之前已经清空过队列
                    if shared.finished.load(Ordering::SeqCst) {
                        shared.purge(CommandStatus::Rejected);
                        CommandStatus::Rejected
                    } else {
                        shared.wake.notify();
                        CommandStatus::Pending
                    }
                },
                Err(QueueFull { capacity }) => {
                    shared.settle(&cmd, CommandStatus::Ignored);
                    EngineMetrics::incr(&shared.metrics.commands_ignored);
                    warn!(
                        "Command queue at capacity ({}), command {} ({:?}) ignored",
                        capacity,
                        cmd.id(),
                        cmd.kind()
                    );
                    CommandStatus::Ignored
                },
            }
        };

        let event = CommandEvent {
            device: shared.name.clone(),
            command: cmd,
            status,
        };
        shared.hooks.read().fire_command(&event, &shared.metrics);
        status
    }

    /// 清空队列，全部命令以 `target` 结束（不执行）
    ///
    /// `target` 必须是终态；传入非终态时按 Ignored 处理。返回被清除的命令数。
    pub fn purge_command_queue(&self, target: CommandStatus) -> usize {
        let target = if target.is_terminal() {
            target
        } else {
            warn!("Purge target {:?} is not terminal, using Ignored", target);
            CommandStatus::Ignored
        };
        let n = self.shared.purge(target);
        if n > 0 {
            debug!("Purged {} queued commands as {:?}", n, target);
        }
        n
    }

    /// 只有尚未启动、或处于 Start/Loaded 时允许修改配置
    fn configuration_gate(&self) -> Option<StateId> {
        match self.shared.current_state.load_full() {
            None => None,
            Some(id) if *id == StateId::START || *id == StateId::LOADED => None,
            Some(id) => Some((*id).clone()),
        }
    }

    /// 替换配置（存储副本）
    ///
    /// 阶段检查在配置锁内重复一次；检查之后工作线程仍可能离开
    /// Start/Loaded，新配置在它下一次读取时可见。成功后唤醒工作线程；
    /// 锁超时返回 `ConfigurationAccess`，不会重试。
    pub fn set_configuration(&self, config: &P::Config) -> Result<ConfigUpdate, EngineError> {
        if let Some(current) = self.configuration_gate() {
            debug!("Configuration change refused in state {}", current);
            return Ok(ConfigUpdate::IncompatibleState { current });
        }
        let mut refused = None;
        let applied = self.shared.config.set_if(config, || {
            refused = self.configuration_gate();
            refused.is_none()
        })?;
        if !applied {
            return Ok(self.refusal(refused));
        }
        self.shared.wake.notify();
        debug!("Configuration replaced for '{}'", self.shared.name);
        Ok(ConfigUpdate::Applied)
    }

    /// 合并配置（`Configuration::copy_from`），失败时原配置不变
    ///
    /// 阶段检查与 [`set_configuration`](Self::set_configuration) 相同。
    pub fn merge_configuration(&self, config: &P::Config) -> Result<ConfigUpdate, EngineError> {
        if let Some(current) = self.configuration_gate() {
            debug!("Configuration merge refused in state {}", current);
            return Ok(ConfigUpdate::IncompatibleState { current });
        }
        let mut refused = None;
        let applied = self.shared.config.merge_if(config, || {
            refused = self.configuration_gate();
            refused.is_none()
        })??;
        if !applied {
            return Ok(self.refusal(refused));
        }
        self.shared.wake.notify();
        debug!("Configuration merged for '{}'", self.shared.name);
        Ok(ConfigUpdate::Applied)
    }

    fn refusal(&self, current: Option<StateId>) -> ConfigUpdate {
        let current = current.or_else(|| self.current_state()).unwrap_or(StateId::END);
        debug!("Configuration change refused in state {}", current);
        ConfigUpdate::IncompatibleState { current }
    }

    /// 配置副本
    pub fn get_configuration(&self) -> Result<Option<P::Config>, EngineError> {
        Ok(self.shared.config.get()?)
    }

    pub fn configuration_is_set(&self) -> Result<bool, EngineError> {
        Ok(self.shared.config.is_set()?)
    }

    pub fn add_command_listener(&self, listener: Arc<dyn CommandListener<P::Command>>) {
        self.shared.hooks.write().add_command_listener(listener);
    }

    pub fn add_state_change_listener(&self, listener: Arc<dyn StateChangeListener>) {
        self.shared.hooks.write().add_state_change_listener(listener);
    }

    /// 当前状态（启动前为 `None`）
    pub fn current_state(&self) -> Option<StateId> {
        self.shared.current_state.load_full().map(|id| (*id).clone())
    }

    pub fn previous_state(&self) -> Option<StateId> {
        self.shared.previous_state.load_full().map(|id| (*id).clone())
    }

    /// 正在执行的命令快照
    pub fn current_command(&self) -> Option<Arc<Command<P::Command>>> {
        self.shared.current_command.load_full()
    }

    pub fn pending_commands(&self) -> usize {
        self.shared.queue.len()
    }

    /// 是否还有排队的后继状态
    pub fn in_state_sequence(&self) -> bool {
        !self.shared.sequence.is_empty()
    }

    pub fn can_add_command(&self) -> bool {
        !self.shared.finished.load(Ordering::Acquire) && !self.shared.queue.is_full()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// 硬件句柄是否已打开（没有句柄时为 false）
    pub fn is_open(&self) -> bool {
        self.shared.hardware.as_ref().is_some_and(|h| h.is_open())
    }

    pub fn registered_states(&self) -> &[StateId] {
        &self.catalog
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.shared.options
    }

    /// 轮询等待进入指定状态
    pub fn wait_for_state(&self, state: &StateId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.current_state().as_ref() == Some(state) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl<P: DeviceProfile> std::fmt::Debug for StateMachineEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachineEngine")
            .field("name", &self.shared.name)
            .field("current_state", &self.current_state())
            .field("pending_commands", &self.pending_commands())
            .field("running", &self.is_running())
            .finish()
    }
}

impl<P: DeviceProfile> Drop for StateMachineEngine<P> {
    fn drop(&mut self) {
        self.shared.request_stop();

        let timeout = self.shared.options.join_timeout;
        if let Some(handle) = self.handle.get_mut().take() {
            match handle.join_timeout(timeout) {
                Ok(()) => {},
                Err(JoinError::Timeout) => error!(
                    "Worker thread of '{}' failed to shut down within {:?}",
                    self.shared.name, timeout
                ),
                Err(JoinError::Panicked) => {
                    error!("Worker thread of '{}' panicked", self.shared.name)
                },
            }
        }
    }
}
