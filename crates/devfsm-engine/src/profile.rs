//! 设备类型描述
//!
//! 一个具体设备把三种类型绑在一起：配置、命令种类、以及工作线程独占的
//! 跨状态数据。引擎、状态和上下文都以 `P: DeviceProfile` 为参数。
//!
//! ```
//! use devfsm_engine::{CommandKind, Configuration, DeviceProfile};
//!
//! #[derive(Debug, Clone, Default)]
//! struct ScopeConfig {
//!     channel: u8,
//! }
//! impl Configuration for ScopeConfig {}
//!
//! #[derive(Debug)]
//! enum ScopeCommand {
//!     Open,
//!     Acquire,
//! }
//! impl CommandKind for ScopeCommand {}
//!
//! struct Scope;
//! impl DeviceProfile for Scope {
//!     type Config = ScopeConfig;
//!     type Command = ScopeCommand;
//!     type Data = Vec<f64>;
//! }
//! ```

use crate::command::CommandKind;
use crate::config::Configuration;

pub trait DeviceProfile: 'static {
    type Config: Configuration;
    type Command: CommandKind;
    /// 状态之间共享的数据（只在工作线程中访问）
    type Data: Send + 'static;
}
