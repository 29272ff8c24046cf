//! 连接参数
//!
//! 串口与 TCP 仪器的连接参数值类型。它们只描述"如何连接"，
//! 不负责打开连接；具体句柄在 `open()` 时读取并校验。

use std::time::Duration;
use thiserror::Error;

/// 参数校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Port name is not set")]
    PortNotSet,
    #[error("Unsupported baud rate: {0}")]
    BaudRate(u32),
    #[error("Unsupported data bits: {0} (expected 5-8)")]
    DataBits(u8),
    #[error("Host is empty")]
    EmptyHost,
    #[error("Port must be non-zero")]
    ZeroPort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// 串口参数
///
/// 默认值：9600 8N1，读写超时 200ms，事务间隔 100ms。
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// 两次事务之间的最小间隔（部分仪器需要）
    pub min_transaction_gap_ms: u64,
    pub tx_terminator: Option<String>,
    pub rx_terminator: Option<String>,
}

impl SerialSettings {
    pub const DEFAULT_BAUD_RATE: u32 = 9600;
    const SUPPORTED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.port.trim().is_empty() {
            return Err(SettingsError::PortNotSet);
        }
        if !Self::SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(SettingsError::BaudRate(self.baud_rate));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(SettingsError::DataBits(self.data_bits));
        }
        Ok(())
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: Self::DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout_ms: 200,
            write_timeout_ms: 200,
            min_transaction_gap_ms: 100,
            tx_terminator: None,
            rx_terminator: None,
        }
    }
}

/// TCP 仪器连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TcpSettings {
    pub host: String,
    pub port: u16,
    /// 部分仪器使用独立的数据/消息端口，0 表示与 `port` 相同
    pub data_port: u16,
    pub timeout_ms: u64,
}

impl TcpSettings {
    pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            data_port: 0,
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn effective_data_port(&self) -> u16 {
        if self.data_port == 0 { self.port } else { self.data_port }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.host.trim().is_empty() {
            return Err(SettingsError::EmptyHost);
        }
        if self.port == 0 {
            return Err(SettingsError::ZeroPort);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_defaults() {
        let s = SerialSettings::new("/dev/ttyUSB0");
        assert_eq!(s.baud_rate, 9600);
        assert_eq!(s.data_bits, 8);
        assert_eq!(s.parity, Parity::None);
        assert_eq!(s.read_timeout(), Duration::from_millis(200));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_serial_validation() {
        assert_eq!(
            SerialSettings::default().validate(),
            Err(SettingsError::PortNotSet)
        );
        assert_eq!(
            SerialSettings::new("COM3").with_baud_rate(12345).validate(),
            Err(SettingsError::BaudRate(12345))
        );
        let mut s = SerialSettings::new("COM3");
        s.data_bits = 9;
        assert_eq!(s.validate(), Err(SettingsError::DataBits(9)));
    }

    #[test]
    fn test_tcp_settings() {
        let mut t = TcpSettings::new("192.168.0.10", 502);
        assert_eq!(t.effective_data_port(), 502);
        t.data_port = 503;
        assert_eq!(t.effective_data_port(), 503);
        assert!(t.validate().is_ok());

        assert_eq!(TcpSettings::new("", 502).validate(), Err(SettingsError::EmptyHost));
        assert_eq!(TcpSettings::new("plc", 0).validate(), Err(SettingsError::ZeroPort));
    }
}
