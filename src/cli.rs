//! Shared CLI helpers and small reusable Clap fragments

use crate::config::{ProtocolConfig, Settings};
use crate::protocol::{ChecksumWidth, FieldWidth, FrameTerminator, InvalidFramePolicy, MarkerScheme};
use anyhow::Result;
use clap::{Args, Parser};
use std::path::PathBuf;

fn parse_checksum_bits(s: &str) -> std::result::Result<ChecksumWidth, String> {
    let bits: u8 = s.parse().map_err(|_| format!("not a number: {}", s))?;
    ChecksumWidth::try_from(bits)
}

/// Overrides for the `[protocol]` config section
#[derive(Clone, Debug, Default, Args)]
pub struct ProtocolArgs {
    /// Wire token set
    #[arg(long, value_enum)]
    pub markers: Option<MarkerScheme>,

    /// Width of the length and chunk fields
    #[arg(long, value_enum)]
    pub field_width: Option<FieldWidth>,

    /// Significant checksum bits (16 or 32)
    #[arg(long, value_parser = parse_checksum_bits)]
    pub checksum_bits: Option<ChecksumWidth>,

    /// How the receiver detects the end of a metadata frame
    #[arg(long, value_enum)]
    pub terminator: Option<FrameTerminator>,

    /// What the receiver does with an invalid metadata frame
    #[arg(long, value_enum)]
    pub on_invalid_frame: Option<InvalidFramePolicy>,
}

impl ProtocolArgs {
    pub fn apply(&self, p: &mut ProtocolConfig) {
        if let Some(v) = self.markers {
            p.markers = v;
        }
        if let Some(v) = self.field_width {
            p.field_width = v;
        }
        if let Some(v) = self.checksum_bits {
            p.checksum_bits = v;
        }
        if let Some(v) = self.terminator {
            p.terminator = v;
        }
        if let Some(v) = self.on_invalid_frame {
            p.on_invalid_frame = v;
        }
    }
}

/// Options both binaries take
#[derive(Clone, Debug, Args)]
pub struct CommonArgs {
    /// TOML settings file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,

    /// Show a block progress spinner
    #[arg(short, long)]
    pub progress: bool,

    /// Append a JSON line per transfer outcome to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Write a text+hex dump of all link traffic into this directory
    #[arg(long = "debug-tee")]
    pub debug_tee: Option<PathBuf>,

    /// Serial baud rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// RTS/CTS flow control, for virtual serial ports
    #[arg(long)]
    pub hardware_flow: bool,

    #[command(flatten)]
    pub protocol: ProtocolArgs,
}

impl CommonArgs {
    /// Load the config file, then apply command-line overrides.
    pub fn settings(&self) -> Result<Settings> {
        let mut s = Settings::load(self.config.as_deref())?;
        self.protocol.apply(&mut s.protocol);
        if let Some(b) = self.baud {
            s.serial.baud = b;
        }
        if self.hardware_flow {
            s.serial.hardware_flow = true;
        }
        Ok(s)
    }
}

/// Sender options (rmxfer)
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Send files over a modem, serial line or TCP")]
pub struct SendOpts {
    /// Serial device carrying the modem or cable
    #[arg(long, conflicts_with = "tcp", required_unless_present = "tcp")]
    pub port: Option<String>,

    /// Connect to a receiver over TCP instead (host:port)
    #[arg(long)]
    pub tcp: Option<String>,

    /// No modem on the line: skip the AT dialog
    #[arg(long)]
    pub no_modem: bool,

    /// Line test: send N probe bytes (0 = forever) instead of files
    #[arg(long, value_name = "N")]
    pub ping: Option<u64>,

    /// Files to send
    #[arg(required_unless_present = "ping")]
    pub files: Vec<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Receiver options (rmxferd)
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Receive files over a serial line or TCP")]
pub struct ReceiveOpts {
    /// Listen for TCP clients on this address (host:port)
    #[arg(long, conflicts_with = "port", required_unless_present = "port")]
    pub bind: Option<String>,

    /// Serve this serial device, re-opening it when it goes away
    #[arg(long)]
    pub port: Option<String>,

    /// Directory received files are written to; must exist
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// One worker thread per TCP client
    #[arg(long)]
    pub concurrent: bool,

    /// Append every raw byte of each block transfer to this file
    #[arg(long)]
    pub capture: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Initialise env_logger at `info`, or `debug` when verbose.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init();
}
