//! # devfsm CLI
//!
//! 用模拟仪器驱动一个状态机引擎，演示完整的设备生命周期。
//!
//! ```bash
//! # Open → Measure×10 → Close
//! devfsm-cli run --measurements 10
//!
//! # 演示 Open 失败后进入 GenericError
//! devfsm-cli run --fail-open
//!
//! # 查看状态转换
//! RUST_LOG=devfsm=debug devfsm-cli run --log-transitions
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod instrument;

use commands::{RunCommand, print_report};

/// devfsm CLI - 设备状态机演示工具
#[derive(Parser, Debug)]
#[command(name = "devfsm-cli")]
#[command(about = "Drive a simulated instrument through the devfsm engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行模拟仪器
    Run {
        #[command(flatten)]
        args: RunCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("devfsm=info")),
        )
        .init();

    let cli = Cli::parse();

    // Ctrl+C：停止提交命令，由 execute 协作式停止引擎
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal. Stopping...");
        flag.store(true, Ordering::Relaxed);
    })?;

    match cli.command {
        Commands::Run { args } => {
            let report = args.execute(interrupted)?;
            print_report(&report);
            if report.failed() > 0 {
                std::process::exit(1);
            }
            Ok(())
        },
    }
}
