//! # devfsm 硬件抽象层
//!
//! 设备引擎与具体硬件（PLC、DAQ 板卡、串口/网络仪器）之间的最小接口。
//!
//! 引擎本身只关心 [`HardwareHandler::is_open`]；`open`/`close` 由具体设备的
//! 状态逻辑在工作线程中调用。

use thiserror::Error;

pub mod settings;

#[cfg(feature = "mock")]
pub mod mock;

pub use settings::{Parity, SerialSettings, SettingsError, StopBits, TcpSettings};

#[cfg(feature = "mock")]
pub use mock::MockHandler;

/// 硬件层统一错误类型
#[derive(Error, Debug)]
pub enum HalError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] HalDeviceError),
    #[error("Operation timeout")]
    Timeout,
    #[error("Device not open")]
    NotOpen,
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),
}

/// 设备错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalDeviceErrorKind {
    Unknown,
    NotFound,
    AccessDenied,
    Busy,
    InvalidResponse,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct HalDeviceError {
    pub kind: HalDeviceErrorKind,
    pub message: String,
}

impl HalDeviceError {
    pub fn new(kind: HalDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 不可恢复的错误（重试没有意义）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            HalDeviceErrorKind::NotFound | HalDeviceErrorKind::AccessDenied
        )
    }
}

impl From<String> for HalDeviceError {
    fn from(message: String) -> Self {
        Self::new(HalDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for HalDeviceError {
    fn from(message: &str) -> Self {
        Self::new(HalDeviceErrorKind::Unknown, message)
    }
}

/// 硬件句柄能力集
///
/// 句柄在工作线程（状态逻辑）与调用方线程（`is_open` 查询）之间共享，
/// 因此方法只接收 `&self`，实现需要自行保证内部同步。
///
/// # 约束
///
/// `open`/`close` 必须有界返回：引擎不会打断正在执行的状态过程，
/// 一个永久阻塞的 `open` 会让整个设备停摆。
pub trait HardwareHandler: Send + Sync {
    fn open(&self) -> Result<(), HalError>;
    fn close(&self) -> Result<(), HalError>;
    fn is_open(&self) -> bool;

    /// 句柄名称（用于日志）
    fn name(&self) -> &str {
        "hardware"
    }
}

impl<T: HardwareHandler + ?Sized> HardwareHandler for std::sync::Arc<T> {
    fn open(&self) -> Result<(), HalError> {
        (**self).open()
    }

    fn close(&self) -> Result<(), HalError> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
