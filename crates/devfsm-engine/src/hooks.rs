//! 监听器（Hook）系统
//!
//! 两类事件：
//! - [`CommandEvent`]：每次 `enqueue_command` 之后（无论是否被接收）
//! - [`StateChangeEvent`]：每次状态转换之后
//!
//! # 调度方式
//!
//! 每个监听器在自己的短生命周期线程中执行，互不影响，也不阻塞调用方或
//! 工作线程。监听器 panic 会被单独捕获、记录日志并计入
//! `listener_failures`，其他监听器照常执行。
//!
//! # 示例
//!
//! ```rust
//! use devfsm_engine::hooks::{CommandEvent, CommandListener, HookManager};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! enum Cmd { Open }
//! impl devfsm_engine::CommandKind for Cmd {}
//!
//! let mut hooks = HookManager::<Cmd>::new();
//! hooks.add_command_listener(Arc::new(|e: &CommandEvent<Cmd>| {
//!     println!("{} -> {:?}", e.command.id(), e.status);
//! }));
//! assert_eq!(hooks.command_listener_count(), 1);
//! ```

use crate::command::{Command, CommandStatus};
use crate::identity::StateId;
use crate::metrics::EngineMetrics;
use crate::state::StateResult;
use smallvec::SmallVec;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::error;

/// 命令入队事件
pub struct CommandEvent<K> {
    pub device: Arc<str>,
    pub command: Arc<Command<K>>,
    /// `enqueue_command` 的返回值（Pending 表示已接收）
    pub status: CommandStatus,
}

impl<K> Clone for CommandEvent<K> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            command: self.command.clone(),
            status: self.status,
        }
    }
}

/// 状态转换事件
#[derive(Debug, Clone)]
pub struct StateChangeEvent {
    pub device: Arc<str>,
    pub previous: StateId,
    pub current: StateId,
    /// 触发转换的结果（Working 表示由 stop/启动等引擎动作触发）
    pub trigger: StateResult,
}

pub trait CommandListener<K>: Send + Sync {
    fn on_command_added(&self, event: &CommandEvent<K>);
}

pub trait StateChangeListener: Send + Sync {
    fn on_state_changed(&self, event: &StateChangeEvent);
}

impl<K, F> CommandListener<K> for F
where
    F: Fn(&CommandEvent<K>) + Send + Sync,
{
    fn on_command_added(&self, event: &CommandEvent<K>) {
        self(event)
    }
}

impl<F> StateChangeListener for F
where
    F: Fn(&StateChangeEvent) + Send + Sync,
{
    fn on_state_changed(&self, event: &StateChangeEvent) {
        self(event)
    }
}

/// 监听器列表
///
/// 本身不是线程安全的，引擎内部用 `RwLock<HookManager>` 包装。
pub struct HookManager<K> {
    command_listeners: SmallVec<[Arc<dyn CommandListener<K>>; 2]>,
    state_listeners: SmallVec<[Arc<dyn StateChangeListener>; 2]>,
}

impl<K: Send + Sync + 'static> HookManager<K> {
    pub fn new() -> Self {
        Self {
            command_listeners: SmallVec::new(),
            state_listeners: SmallVec::new(),
        }
    }

    pub fn add_command_listener(&mut self, listener: Arc<dyn CommandListener<K>>) {
        self.command_listeners.push(listener);
    }

    pub fn add_state_change_listener(&mut self, listener: Arc<dyn StateChangeListener>) {
        self.state_listeners.push(listener);
    }

    pub fn command_listener_count(&self) -> usize {
        self.command_listeners.len()
    }

    pub fn state_change_listener_count(&self) -> usize {
        self.state_listeners.len()
    }

    pub fn clear(&mut self) {
        self.command_listeners.clear();
        self.state_listeners.clear();
    }

    pub(crate) fn fire_command(&self, event: &CommandEvent<K>, metrics: &Arc<EngineMetrics>) {
        for listener in &self.command_listeners {
            let listener = listener.clone();
            let event = event.clone();
            spawn_listener("command", metrics, move || listener.on_command_added(&event));
        }
    }

    pub(crate) fn fire_state_change(&self, event: &StateChangeEvent, metrics: &Arc<EngineMetrics>) {
        for listener in &self.state_listeners {
            let listener = listener.clone();
            let event = event.clone();
            spawn_listener("state", metrics, move || listener.on_state_changed(&event));
        }
    }
}

impl<K: Send + Sync + 'static> Default for HookManager<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_listener(kind: &'static str, metrics: &Arc<EngineMetrics>, f: impl FnOnce() + Send + 'static) {
    let thread_metrics = metrics.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("devfsm-{kind}-listener"))
        .spawn(move || {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
                error!(
                    "{} listener panicked: {}",
                    kind,
                    crate::worker::panic_message(panic.as_ref())
                );
                thread_metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
            }
        });
    if let Err(e) = spawned {
        error!("Failed to spawn {} listener thread: {}", kind, e);
        metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
    }
}
