//! run 命令
//!
//! 启动一个模拟仪器引擎，执行 Open → Measure×N → Close，打印结果与指标。

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use devfsm_engine::hal::{HardwareHandler, Parity, SerialSettings, StopBits, TcpSettings};
use devfsm_engine::{Command, CommandStatus, IdlePeriod, MetricsSnapshot, StateId, StateMachineEngine};
use devfsm_hal::MockHandler;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::instrument::{
    ACQUIRING, Acquisition, AcquiringState, Daq, DaqCommand, DaqConfig, Endpoint, LoadedState,
};

/// 串口校验位
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ParityArg {
    #[value(name = "none")]
    Off,
    Odd,
    Even,
}

impl From<ParityArg> for Parity {
    fn from(arg: ParityArg) -> Self {
        match arg {
            ParityArg::Off => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        }
    }
}

/// 模拟运行参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Acquiring 状态的看门狗周期（毫秒，-1 无限等待，0 连续运行）
    #[arg(long, default_value_t = 20, allow_hyphen_values = true)]
    pub period_ms: i64,

    /// Measure 命令数量
    #[arg(short, long, default_value_t = 5)]
    pub measurements: u32,

    /// 通道数
    #[arg(long, default_value_t = 4)]
    pub channels: u8,

    /// 命令队列容量
    #[arg(long, default_value_t = 128)]
    pub queue_capacity: usize,

    /// 仪器地址（只用于配置校验与日志）
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 5025)]
    pub port: u16,

    /// 改用串口连接（如 /dev/ttyUSB0、COM3），忽略 --host/--port
    #[arg(long)]
    pub serial: Option<String>,

    /// 串口波特率
    #[arg(long, default_value_t = SerialSettings::DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// 串口校验位
    #[arg(long, value_enum, default_value_t = ParityArg::Off)]
    pub parity: ParityArg,

    /// 使用 2 个停止位
    #[arg(long)]
    pub two_stop_bits: bool,

    /// 单条命令的等待超时（毫秒）
    #[arg(long, default_value_t = 2000)]
    pub command_timeout_ms: u64,

    /// 模拟 Open 失败（演示 GenericError 路径）
    #[arg(long)]
    pub fail_open: bool,

    /// 以 info 级别记录每次状态转换
    #[arg(long)]
    pub log_transitions: bool,
}

/// 一次运行的结果
#[derive(Debug)]
pub struct RunReport {
    pub statuses: Vec<(u64, DaqCommand, CommandStatus)>,
    /// 停止前所处的状态
    pub final_state: Option<StateId>,
    pub metrics: MetricsSnapshot,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.statuses.iter().filter(|(_, _, s)| !s.is_success()).count()
    }
}

impl RunCommand {
    fn endpoint(&self) -> Endpoint {
        match &self.serial {
            Some(port) => {
                let mut serial = SerialSettings::new(port.clone()).with_baud_rate(self.baud);
                serial.parity = self.parity.into();
                serial.stop_bits = if self.two_stop_bits {
                    StopBits::Two
                } else {
                    StopBits::One
                };
                Endpoint::Serial(serial)
            },
            None => Endpoint::Tcp(TcpSettings::new(self.host.clone(), self.port)),
        }
    }

    fn config(&self) -> DaqConfig {
        DaqConfig {
            endpoint: self.endpoint(),
            channels: self.channels,
            amplitude: 1.0,
        }
    }

    fn build_engine(
        &self,
        acquisition: Arc<Acquisition>,
        hardware: Arc<MockHandler>,
    ) -> Result<StateMachineEngine<Daq>> {
        let hw: Arc<dyn HardwareHandler> = hardware;
        let engine = StateMachineEngine::builder("daq-sim", acquisition)
            .state(LoadedState::default())
            .state(AcquiringState::new(IdlePeriod::from_ms(self.period_ms)))
            .hardware(hw)
            .queue_capacity(self.queue_capacity)
            .log_transitions(self.log_transitions)
            .join_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build engine")?;
        Ok(engine)
    }

    /// 执行模拟运行
    ///
    /// `interrupted` 置位后不再提交新命令，直接停止引擎。
    pub fn execute(&self, interrupted: Arc<AtomicBool>) -> Result<RunReport> {
        if self.channels == 0 {
            bail!("--channels must be at least 1");
        }
        let config = self.config();
        config
            .endpoint
            .validate()
            .with_context(|| format!("invalid endpoint {}", config.endpoint))?;

        let acquisition = Arc::new(Acquisition::default());
        let hardware = Arc::new(MockHandler::new(config.endpoint.to_string()));
        hardware.set_fail_open(self.fail_open);

        let engine = self.build_engine(acquisition.clone(), hardware)?;
        engine.start()?;

        let update = engine.set_configuration(&config)?;
        if !update.is_applied() {
            bail!("configuration refused: {:?}", update);
        }

        let timeout = Duration::from_millis(self.command_timeout_ms);
        let mut plan = vec![engine.new_command(DaqCommand::Open)];
        for i in 0..self.measurements {
            let channel = (i % u32::from(self.channels)) as u8;
            plan.push(engine.new_command(DaqCommand::Measure).with_payload(channel));
        }
        plan.push(engine.new_command(DaqCommand::Close));

        let mut statuses = Vec::with_capacity(plan.len());
        for cmd in plan {
            if interrupted.load(Ordering::Relaxed) {
                warn!("Interrupted, skipping remaining commands");
                break;
            }
            let cmd: Arc<Command<DaqCommand>> = Arc::new(cmd.with_timeout(timeout));
            engine.enqueue_command(cmd.clone());
            let status = cmd.wait(timeout);
            info!("Command {} {:?} -> {}", cmd.id(), cmd.kind(), status);
            statuses.push((cmd.id(), *cmd.kind(), status));

            // Open 失败后设备停在错误状态，后续命令没有意义
            if *cmd.kind() == DaqCommand::Open && !status.is_success() {
                warn!("Open failed, device is in {:?}", engine.current_state());
                break;
            }
        }

        engine.stop();
        engine.join(Duration::from_secs(5))?;
        // 停止后当前状态是 End，前一个状态就是停止时所处的状态
        let final_state = engine.previous_state();

        for r in acquisition.readings.lock().iter() {
            println!("  #{:<4} ch{} = {:+.4}", r.command_id, r.channel, r.value);
        }
        println!("  samples taken: {}", *acquisition.samples.lock());

        Ok(RunReport {
            statuses,
            final_state,
            metrics: engine.metrics(),
        })
    }
}

/// 打印运行结果
pub fn print_report(report: &RunReport) {
    println!();
    println!("📊 运行结果:");
    for (id, kind, status) in &report.statuses {
        println!("  #{:<4} {:<8} {}", id, format!("{:?}", kind), status);
    }
    match &report.final_state {
        Some(state) if *state == ACQUIRING || *state == StateId::LOADED => {
            println!("  最终状态: {}", state)
        },
        Some(state) => println!("  ⚠️ 最终状态: {}", state),
        None => println!("  最终状态: <none>"),
    }
    println!("  失败命令: {}", report.failed());

    let m = &report.metrics;
    println!();
    println!("📈 指标:");
    println!("  state_proc 调用: {}", m.state_proc_calls);
    println!("  状态转换: {}", m.transitions);
    println!("  故障: {}", m.faults);
    println!(
        "  命令: 入队 {} / 忽略 {} / 结束 {} / 超时 {}",
        m.commands_enqueued, m.commands_ignored, m.commands_settled, m.commands_timed_out
    );
    println!(
        "  看门狗超时: {}，最长 state_proc: {}us",
        m.watchdog_overruns, m.max_state_proc_us
    );
}
