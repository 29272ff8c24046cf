//! 配置槽
//!
//! 设备的运行参数保存在一个受有界等待锁保护的槽里：
//! - 读取返回副本，调用方拿到的永远是完整的旧快照或完整的新快照
//! - 写入存储私有副本，不在原处修改
//! - 锁等待超时返回 [`SlotTimeout`]，由引擎映射为 `ConfigurationAccess`

use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;

/// 默认锁等待时间
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2000);

/// 配置合并错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// 新旧配置不是同一类设备/版本，不能合并
    #[error("Incompatible configuration: {0}")]
    Incompatible(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 设备配置能力
///
/// 引擎只负责"何时允许替换"，不校验内容。
pub trait Configuration: Clone + Send + Sync + 'static {
    /// 把 `other` 合并到 `self`
    ///
    /// 默认整体替换。失败时 `self` 的内容由实现决定，引擎会丢弃失败的副本。
    fn copy_from(&mut self, other: &Self) -> Result<(), ConfigError> {
        *self = other.clone();
        Ok(())
    }
}

/// 锁等待超时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTimeout(pub Duration);

pub struct ConfigurationSlot<C> {
    inner: Mutex<Option<C>>,
    lock_timeout: Duration,
}

impl<C: Configuration> ConfigurationSlot<C> {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(None),
            lock_timeout,
        }
    }

    pub fn with_value(value: C, lock_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Some(value)),
            lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, Option<C>>, SlotTimeout> {
        self.inner
            .try_lock_for(self.lock_timeout)
            .ok_or(SlotTimeout(self.lock_timeout))
    }

    /// 读取副本
    pub fn get(&self) -> Result<Option<C>, SlotTimeout> {
        Ok(self.lock()?.clone())
    }

    /// 存储 `value` 的副本
    pub fn set(&self, value: &C) -> Result<(), SlotTimeout> {
        self.set_if(value, || true).map(|_| ())
    }

    /// 持锁检查 `allow`，通过后才存储副本；返回是否写入
    pub fn set_if(&self, value: &C, allow: impl FnOnce() -> bool) -> Result<bool, SlotTimeout> {
        let copy = value.clone();
        let mut guard = self.lock()?;
        if !allow() {
            return Ok(false);
        }
        *guard = Some(copy);
        Ok(true)
    }

    /// 合并到现有配置（为空时直接存储）
    ///
    /// 在副本上执行 `copy_from`，成功后才替换，失败时原配置不变。
    pub fn merge(&self, value: &C) -> Result<Result<(), ConfigError>, SlotTimeout> {
        Ok(self.merge_if(value, || true)?.map(|_| ()))
    }

    /// 持锁检查 `allow` 后合并；返回是否写入
    pub fn merge_if(
        &self,
        value: &C,
        allow: impl FnOnce() -> bool,
    ) -> Result<Result<bool, ConfigError>, SlotTimeout> {
        let mut guard = self.lock()?;
        if !allow() {
            return Ok(Ok(false));
        }
        let merged = match guard.as_ref() {
            Some(current) => {
                let mut next = current.clone();
                if let Err(e) = next.copy_from(value) {
                    return Ok(Err(e));
                }
                next
            },
            None => value.clone(),
        };
        *guard = Some(merged);
        Ok(Ok(true))
    }

    pub fn is_set(&self) -> Result<bool, SlotTimeout> {
        Ok(self.lock()?.is_some())
    }

    pub fn clear(&self) -> Result<(), SlotTimeout> {
        *self.lock()? = None;
        Ok(())
    }

    /// 在锁内只读访问（避免整份克隆）
    pub(crate) fn with<R>(&self, f: impl FnOnce(Option<&C>) -> R) -> Result<R, SlotTimeout> {
        let guard = self.lock()?;
        Ok(f(guard.as_ref()))
    }
}

impl<C: Configuration> Default for ConfigurationSlot<C> {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}
