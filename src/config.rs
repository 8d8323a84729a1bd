//! Deployment settings, loaded from TOML
//!
//! Every field has a default, so an empty or partial file is valid. The
//! defaults are the canonical configuration: byte markers, 64-bit fields,
//! 16-bit checksum, exact-length frame termination, reset on invalid frames.

use crate::frame::FrameCodec;
use crate::protocol::{
    timeouts, ChecksumWidth, FieldWidth, FrameTerminator, InvalidFramePolicy, MarkerScheme,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub protocol: ProtocolConfig,
    pub timeouts: Timeouts,
    pub modem: ModemConfig,
    pub serial: SerialConfig,
    pub receiver: ReceiverConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub markers: MarkerScheme,
    pub field_width: FieldWidth,
    pub checksum_bits: ChecksumWidth,
    pub terminator: FrameTerminator,
    pub on_invalid_frame: InvalidFramePolicy,
}

impl ProtocolConfig {
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.field_width, self.checksum_bits)
    }
}

/// All values in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub message_ms: u64,
    pub attempt_ms: u64,
    pub quiet_ms: u64,
    pub probe_interval_ms: u64,
    pub block_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            message_ms: timeouts::MESSAGE_MS,
            attempt_ms: timeouts::ATTEMPT_MS,
            quiet_ms: timeouts::QUIET_MS,
            probe_interval_ms: timeouts::PROBE_INTERVAL_MS,
            block_ms: timeouts::BLOCK_MS,
        }
    }
}

impl Timeouts {
    pub fn message(&self) -> Duration {
        Duration::from_millis(self.message_ms)
    }
    pub fn attempt(&self) -> Duration {
        Duration::from_millis(self.attempt_ms)
    }
    pub fn quiet(&self) -> Duration {
        Duration::from_millis(self.quiet_ms)
    }
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Drive the AT dialog; off for null-modem cables and TCP
    pub enabled: bool,
    pub dial_prefix: String,
    pub dial_number: String,
    pub clear_command: String,
    pub line_ending: String,
    pub min_signal: u8,
    pub signal_poll_ms: u64,
    /// Quiet time before the guard escape
    pub escape_settle_ms: u64,
    /// Quiet time after the guard escape
    pub escape_guard_ms: u64,
    /// Quiet time after hang-up so the line is usable again
    pub hangup_settle_ms: u64,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dial_prefix: "ATDT".to_string(),
            dial_number: "00881600005478".to_string(),
            clear_command: "AT+SBDC".to_string(),
            line_ending: "\r".to_string(),
            min_signal: 3,
            signal_poll_ms: 3_000,
            escape_settle_ms: 2_000,
            escape_guard_ms: 1_000,
            hangup_settle_ms: 1_000,
        }
    }
}

impl ModemConfig {
    /// Zero every settle delay; for scripted modems.
    pub fn without_delays(mut self) -> Self {
        self.signal_poll_ms = 0;
        self.escape_settle_ms = 0;
        self.escape_guard_ms = 0;
        self.hangup_settle_ms = 0;
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud: u32,
    /// RTS/CTS, needed by virtual ports
    pub hardware_flow: bool,
    pub write_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 9600,
            hardware_flow: false,
            write_timeout_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Block retry budget for the receiving side of the transfer
    pub block_retries: usize,
    /// Pause before re-opening a serial device that went away (ms)
    pub reopen_delay_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            block_retries: 100,
            reopen_delay_ms: 1_000,
        }
    }
}

impl Settings {
    /// Read `path` if it exists, else fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(p) = path else {
            return Ok(Self::default());
        };
        if !p.exists() {
            log::warn!("config {} not found, using defaults", p.display());
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read config {}", p.display()))?;
        let s: Settings = toml::from_str(&data)
            .with_context(|| format!("Failed to parse config {}", p.display()))?;
        Ok(s)
    }
}
