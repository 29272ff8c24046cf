//! 命令定义和实现

pub mod run;

pub use run::{RunCommand, print_report};
