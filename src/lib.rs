//! rmxfer library
//!
//! Unattended file transfer over half-duplex modem, serial and TCP links:
//! a probe / FILENAME / metadata / START handshake followed by an XMODEM
//! block transfer.

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod journal;
pub mod link;
pub mod logger;
pub mod modem;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod response;
pub mod scripted;
pub mod sender;
pub mod xmodem;

pub use error::{Error, ErrorKind, Result, TransferOutcome};
