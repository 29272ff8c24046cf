//! 引擎层错误类型定义

use crate::config::{ConfigError, SlotTimeout};
use crate::identity::StateId;
use crate::state::StateResult;
use std::time::Duration;
use thiserror::Error;

/// 引擎层错误类型
///
/// 只有"调用方必须处理"的情况才是 `Err`：配置锁超时、注册错误、线程管理错误。
/// 队列已满、阶段不允许修改配置等运行结果都通过返回值表达。
#[derive(Error, Debug)]
pub enum EngineError {
    /// `start()` 被调用了第二次
    #[error("Engine already running")]
    AlreadyRunning,

    /// 配置锁在限定时间内未获取到（不会在内部重试）
    #[error("Configuration lock not acquired within {timeout:?}")]
    ConfigurationAccess { timeout: Duration },

    /// 配置合并失败
    #[error("Configuration update failed: {0}")]
    ConfigurationUpdate(#[from] ConfigError),

    /// 状态/转换表注册错误
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// 工作线程创建失败
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// 工作线程未在限定时间内退出
    #[error("Worker thread did not exit within {0:?}")]
    JoinTimeout(Duration),

    #[error("Worker thread panicked")]
    WorkerPanicked,
}

impl From<SlotTimeout> for EngineError {
    fn from(SlotTimeout(timeout): SlotTimeout) -> Self {
        Self::ConfigurationAccess { timeout }
    }
}

/// 状态注册与转换表错误（构建期）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// id 或名称（不区分大小写）已被占用
    #[error("State {new} clashes with registered state {existing}")]
    Duplicate { existing: StateId, new: StateId },

    #[error("Unknown state: {0}")]
    UnknownState(StateId),

    /// 同一 (源状态, 结果) 指向了两个不同的目标
    #[error("Conflicting transition from {from} on {result:?}: {existing} vs {new}")]
    ConflictingTransition {
        from: StateId,
        result: StateResult,
        existing: StateId,
        new: StateId,
    },

    /// Working 不是转换触发条件
    #[error("Invalid transition trigger {result:?} from {from}")]
    InvalidTrigger { from: StateId, result: StateResult },
}
