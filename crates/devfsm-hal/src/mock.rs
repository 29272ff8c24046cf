//! 模拟硬件句柄
//!
//! 不依赖任何硬件，用于测试和演示。可以通过开关注入 `open` 失败或延迟。

use crate::{HalDeviceError, HalDeviceErrorKind, HalError, HardwareHandler};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MockHandler {
    name: String,
    is_open: AtomicBool,
    fail_open: AtomicBool,
    open_delay_ms: AtomicU64,
    open_calls: AtomicU32,
    close_calls: AtomicU32,
}

impl MockHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 下一次起所有 `open` 调用都返回设备错误
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Relaxed);
    }

    /// 模拟慢速设备
    pub fn set_open_delay(&self, delay: Duration) {
        self.open_delay_ms.store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::Relaxed)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::Relaxed)
    }
}

impl HardwareHandler for MockHandler {
    fn open(&self) -> Result<(), HalError> {
        self.open_calls.fetch_add(1, Ordering::Relaxed);

        let delay = self.open_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        if self.fail_open.load(Ordering::Relaxed) {
            return Err(HalError::Device(HalDeviceError::new(
                HalDeviceErrorKind::NotFound,
                format!("{}: simulated open failure", self.name),
            )));
        }

        self.is_open.store(true, Ordering::Release);
        debug!("Mock handler '{}' opened", self.name);
        Ok(())
    }

    fn close(&self) -> Result<(), HalError> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        self.is_open.store(false, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
