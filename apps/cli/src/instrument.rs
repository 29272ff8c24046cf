//! 模拟 DAQ 仪器
//!
//! 状态：
//! - Start → Loaded：配置就绪后自动进入
//! - Loaded：无限等待；Open 打开硬件后进入 Acquiring
//! - Acquiring：按看门狗周期采样；Measure 读取最新样本，Close 关闭硬件回到 Loaded

use devfsm_engine::hal::{
    HardwareHandler, Parity, SerialSettings, SettingsError, StopBits, TcpSettings,
};
use devfsm_engine::{
    CommandKind, CommandStatus, ConfigError, Configuration, DeviceProfile, IdleOutcome,
    IdlePeriod, State, StateContext, StateCore, StateId,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ACQUIRING: StateId = StateId::new_static("Acquiring", 100);

/// 仪器连接方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(TcpSettings),
    Serial(SerialSettings),
}

impl Endpoint {
    pub fn validate(&self) -> Result<(), SettingsError> {
        match self {
            Self::Tcp(tcp) => tcp.validate(),
            Self::Serial(serial) => serial.validate(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(tcp) => write!(f, "tcp://{}:{}", tcp.host, tcp.port),
            Self::Serial(serial) => {
                let parity = match serial.parity {
                    Parity::None => 'N',
                    Parity::Odd => 'O',
                    Parity::Even => 'E',
                };
                let stop = match serial.stop_bits {
                    StopBits::One => 1,
                    StopBits::Two => 2,
                };
                write!(
                    f,
                    "serial://{}@{} {}{}{}",
                    serial.port, serial.baud_rate, serial.data_bits, parity, stop
                )
            },
        }
    }
}

/// 仪器配置
#[derive(Debug, Clone, PartialEq)]
pub struct DaqConfig {
    pub endpoint: Endpoint,
    pub channels: u8,
    pub amplitude: f64,
}

impl Configuration for DaqConfig {
    fn copy_from(&mut self, other: &Self) -> Result<(), ConfigError> {
        other
            .endpoint
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if other.channels == 0 {
            return Err(ConfigError::Invalid("at least one channel required".into()));
        }
        *self = other.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaqCommand {
    Open,
    /// 载荷：通道号（`u8`），缺省为 0
    Measure,
    Close,
    Reset,
}

impl CommandKind for DaqCommand {
    fn is_reset(&self) -> bool {
        matches!(self, Self::Reset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub command_id: u64,
    pub channel: u8,
    pub value: f64,
}

/// 工作线程写入、主线程读取的采集结果
#[derive(Debug, Default)]
pub struct Acquisition {
    pub readings: Mutex<Vec<Reading>>,
    pub samples: Mutex<u64>,
}

pub struct Daq;

impl DeviceProfile for Daq {
    type Config = DaqConfig;
    type Command = DaqCommand;
    type Data = Arc<Acquisition>;
}

pub struct LoadedState {
    core: StateCore,
}

impl LoadedState {
    pub fn new() -> Self {
        Self {
            core: StateCore::new(StateId::LOADED).with_period(IdlePeriod::Infinite),
        }
    }
}

impl Default for LoadedState {
    fn default() -> Self {
        Self::new()
    }
}

impl State<Daq> for LoadedState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    fn state_proc(&mut self, ctx: &mut StateContext<'_, Daq>) {
        let Some(kind) = ctx.command().map(|c| *c.kind()) else {
            return;
        };
        match kind {
            DaqCommand::Open => {
                let opened = match ctx.hardware() {
                    Some(hw) => hw.open().map_err(|e| e.to_string()),
                    None => Err("no hardware handler".to_string()),
                };
                match opened {
                    Ok(()) => {
                        let endpoint = ctx
                            .with_configuration(|cfg| cfg.map(|c| c.endpoint.to_string()))
                            .ok()
                            .flatten()
                            .unwrap_or_default();
                        info!("Instrument opened at {}", endpoint);
                        ctx.complete_command(CommandStatus::Success);
                        self.core.complete_to(ACQUIRING);
                    },
                    Err(e) => {
                        ctx.complete_command(CommandStatus::Failed);
                        self.core.fail(format!("open failed: {e}"));
                    },
                }
            },
            DaqCommand::Close => {
                ctx.complete_command(CommandStatus::Success);
            },
            DaqCommand::Measure | DaqCommand::Reset => {
                warn!("{:?} refused: instrument not open", kind);
                ctx.complete_command(CommandStatus::Rejected);
            },
        }
    }
}

pub struct AcquiringState {
    core: StateCore,
    phase: f64,
}

impl AcquiringState {
    pub fn new(period: IdlePeriod) -> Self {
        Self {
            core: StateCore::new(ACQUIRING).with_period(period),
            phase: 0.0,
        }
    }

    fn sample(&self, channel: u8, amplitude: f64) -> f64 {
        amplitude * (self.phase + f64::from(channel)).sin()
    }
}

impl State<Daq> for AcquiringState {
    fn core(&self) -> &StateCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    fn enter(&mut self, _ctx: &mut StateContext<'_, Daq>) {
        self.phase = 0.0;
    }

    fn state_proc(&mut self, ctx: &mut StateContext<'_, Daq>) {
        if matches!(ctx.idle_outcome(), IdleOutcome::Tick | IdleOutcome::Entered) {
            self.phase += 0.1;
            *ctx.data().samples.lock() += 1;
        }

        let Some(cmd) = ctx.command() else {
            return;
        };
        let (id, kind) = (cmd.id(), *cmd.kind());
        let channel = cmd.payload::<u8>().copied().unwrap_or(0);

        match kind {
            DaqCommand::Measure => {
                let config = ctx.configuration().ok().flatten();
                match config {
                    Some(cfg) if channel < cfg.channels => {
                        let value = self.sample(channel, cfg.amplitude);
                        debug!("Measured channel {}: {:.4}", channel, value);
                        ctx.data().readings.lock().push(Reading {
                            command_id: id,
                            channel,
                            value,
                        });
                        ctx.complete_command(CommandStatus::Success);
                    },
                    Some(cfg) => {
                        warn!("Channel {} out of range (0..{})", channel, cfg.channels);
                        ctx.complete_command(CommandStatus::Error);
                    },
                    None => {
                        ctx.complete_command(CommandStatus::Error);
                    },
                }
            },
            DaqCommand::Close => {
                if let Some(hw) = ctx.hardware()
                    && let Err(e) = hw.close()
                {
                    warn!("Close failed: {}", e);
                }
                info!("Instrument closed");
                ctx.complete_command(CommandStatus::Success);
                self.core.complete_to(StateId::LOADED);
            },
            DaqCommand::Open | DaqCommand::Reset => {
                ctx.complete_command(CommandStatus::Ignored);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DaqConfig {
        DaqConfig {
            endpoint: Endpoint::Tcp(TcpSettings::new("127.0.0.1", 5025)),
            channels: 4,
            amplitude: 2.5,
        }
    }

    #[test]
    fn test_config_merge_validates_endpoint() {
        let mut current = config();
        let mut bad = config();
        bad.endpoint = Endpoint::Tcp(TcpSettings::new("127.0.0.1", 0));
        assert!(matches!(
            current.copy_from(&bad),
            Err(ConfigError::Invalid(_))
        ));

        // 串口参数同样在合并前校验
        bad.endpoint = Endpoint::Serial(SerialSettings::new("/dev/ttyUSB0").with_baud_rate(1234));
        assert!(matches!(
            current.copy_from(&bad),
            Err(ConfigError::Invalid(msg)) if msg.contains("1234")
        ));

        let mut other = config();
        other.channels = 8;
        current.copy_from(&other).unwrap();
        assert_eq!(current.channels, 8);
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(config().endpoint.to_string(), "tcp://127.0.0.1:5025");

        let mut serial = SerialSettings::new("COM3").with_baud_rate(115200);
        serial.parity = Parity::Even;
        serial.stop_bits = StopBits::Two;
        assert_eq!(
            Endpoint::Serial(serial).to_string(),
            "serial://COM3@115200 8E2"
        );
    }

    #[test]
    fn test_reset_kind() {
        assert!(DaqCommand::Reset.is_reset());
        assert!(!DaqCommand::Measure.is_reset());
    }

    #[test]
    fn test_sample_is_bounded_by_amplitude() {
        let mut state = AcquiringState::new(IdlePeriod::from_ms(20));
        for _ in 0..50 {
            state.phase += 0.1;
            assert!(state.sample(3, 2.5).abs() <= 2.5);
        }
    }
}
