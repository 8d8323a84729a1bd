//! Shared protocol constants for the rmxfer handshake

use serde::{Deserialize, Serialize};

/// Probe byte written by the sender until the receiver answers
pub const PROBE: u8 = b'@';

/// Answer to a probe byte
pub const PROBE_ACK: u8 = b'A';

/// Metadata frame sentinels
pub const LEAD_MARKER: u8 = 0x1a;
pub const TAIL_MARKER: u8 = 0x1b;

/// Longest filename the one-byte length field can carry
pub const MAX_FILENAME_LEN: usize = 255;

/// Text tokens used by the line-oriented receivers
pub mod text {
    pub const FILENAME: &[u8] = b"FILENAME";
    pub const GOFORIT: &[u8] = b"GOFORIT\r\n";
    pub const NAMERECV: &[u8] = b"NAMERECV\r\n";
}

/// Single-byte tokens used by the modem sender
pub mod byte {
    pub const FILENAME: u8 = 0x1c;
    pub const GOFORIT: u8 = 0x1d;
    pub const STARTXFER: u8 = 0x1e;
    pub const NAMERECV: u8 = 0x1f;
}

// Centralised timeout defaults, overridable through config::Timeouts
pub mod timeouts {
    // No bytes at all for this long ends a wait (ms)
    pub const MESSAGE_MS: u64 = 30_000;

    // Upper bound for a whole handshake attempt (ms)
    pub const ATTEMPT_MS: u64 = 120_000;

    // A reply is complete once the line stays quiet this long (ms)
    pub const QUIET_MS: u64 = 100;

    // Gap between probe bytes during INIT (ms)
    pub const PROBE_INTERVAL_MS: u64 = 1_000;

    // Per-call timeout handed to the block transfer (ms)
    pub const BLOCK_MS: u64 = 10_000;
}

/// Which token set a deployment speaks. Both ends must agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MarkerScheme {
    /// `FILENAME` / `GOFORIT\r\n` / `NAMERECV\r\n`
    Text,
    /// `0x1C` / `0x1D` / `0x1F`
    Byte,
}

impl Default for MarkerScheme {
    fn default() -> Self {
        Self::Byte
    }
}

impl MarkerScheme {
    pub fn filename(&self) -> &'static [u8] {
        match self {
            Self::Text => text::FILENAME,
            Self::Byte => &[byte::FILENAME],
        }
    }

    pub fn goforit(&self) -> &'static [u8] {
        match self {
            Self::Text => text::GOFORIT,
            Self::Byte => &[byte::GOFORIT],
        }
    }

    pub fn namerecv(&self) -> &'static [u8] {
        match self {
            Self::Text => text::NAMERECV,
            Self::Byte => &[byte::NAMERECV],
        }
    }

    /// START carries no text form; both schemes use the STARTXFER byte.
    pub fn start(&self) -> u8 {
        byte::STARTXFER
    }

    /// Text replies end in a terminal token and can use the modem completion
    /// rule. Single-byte replies complete as soon as the line goes quiet.
    pub fn replies_are_terminal(&self) -> bool {
        matches!(self, Self::Text)
    }
}

/// Width of the length and chunk fields in the metadata frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FieldWidth {
    U32,
    U64,
}

impl Default for FieldWidth {
    fn default() -> Self {
        Self::U64
    }
}

impl FieldWidth {
    pub fn bytes(&self) -> usize {
        match self {
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }

    pub fn max_value(&self) -> u64 {
        match self {
            Self::U32 => u32::MAX as u64,
            Self::U64 => u64::MAX,
        }
    }
}

/// Number of CRC32 bits kept in the checksum field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChecksumWidth {
    Bits16,
    Bits32,
}

impl Default for ChecksumWidth {
    fn default() -> Self {
        Self::Bits16
    }
}

impl ChecksumWidth {
    pub fn mask(&self) -> u32 {
        match self {
            Self::Bits16 => 0xffff,
            Self::Bits32 => 0xffff_ffff,
        }
    }
}

impl TryFrom<u8> for ChecksumWidth {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            16 => Ok(Self::Bits16),
            32 => Ok(Self::Bits32),
            _ => Err(format!("checksum width must be 16 or 32 bits, got {}", bits)),
        }
    }
}

impl From<ChecksumWidth> for u8 {
    fn from(w: ChecksumWidth) -> u8 {
        match w {
            ChecksumWidth::Bits16 => 16,
            ChecksumWidth::Bits32 => 32,
        }
    }
}

/// How the receiver decides a metadata frame has fully arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FrameTerminator {
    /// Stop at the first tail marker byte after the length field
    TailMarker,
    /// Stop once the length implied by the filename-length byte has arrived
    ExactLength,
}

impl Default for FrameTerminator {
    fn default() -> Self {
        Self::ExactLength
    }
}

/// What the receiver does with a frame that fails decoding or validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InvalidFramePolicy {
    /// Disconnect the peer
    Drop,
    /// Discard the attempt and listen for a new probe on the same link
    Reset,
}

impl Default for InvalidFramePolicy {
    fn default() -> Self {
        Self::Reset
    }
}
