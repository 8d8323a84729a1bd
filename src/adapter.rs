//! The link as seen by the block transfer
//!
//! Block protocols want a byte get/put pair with per-call timeouts and no
//! surprises; [`BulkTransferAdapter`] provides that over any
//! [`TransportLink`] without adding framing of its own.

use crate::error::{Error, Result};
use crate::link::TransportLink;
use log::{trace, warn};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Running totals reported to progress callbacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub total_blocks: usize,
    pub success_count: usize,
    pub error_count: usize,
}

/// Byte get/put capability consumed by a [`BlockTransfer`].
pub trait ByteChannel {
    /// Up to `size` bytes, or `None` if nothing arrived within `timeout`.
    fn get(&mut self, size: usize, timeout: Duration) -> Option<Vec<u8>>;
    /// Write and flush; `None` if the write failed.
    fn put(&mut self, data: &[u8], timeout: Duration) -> Option<usize>;
}

/// A block-oriented file transfer protocol.
pub trait BlockTransfer {
    /// Stream `src` to the peer. Returns the payload bytes sent.
    fn send(
        &mut self,
        io: &mut dyn ByteChannel,
        src: &mut dyn Read,
        progress: &mut dyn FnMut(TransferStats),
    ) -> Result<u64>;

    /// Receive from the peer into `dst`, writing each block as it is accepted.
    /// Returns the payload bytes written, padding included.
    fn recv(
        &mut self,
        io: &mut dyn ByteChannel,
        dst: &mut dyn Write,
        progress: &mut dyn FnMut(TransferStats),
    ) -> Result<u64>;
}

pub struct BulkTransferAdapter<'a, L: TransportLink + ?Sized> {
    link: &'a mut L,
    capture: Option<&'a mut dyn Write>,
    link_error: Option<Error>,
    bytes_in: u64,
    bytes_out: u64,
}

impl<'a, L: TransportLink + ?Sized> BulkTransferAdapter<'a, L> {
    pub fn new(link: &'a mut L) -> Self {
        Self {
            link,
            capture: None,
            link_error: None,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Also append every byte read to `sink`.
    pub fn with_capture(mut self, sink: &'a mut dyn Write) -> Self {
        self.capture = Some(sink);
        self
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// The first link failure seen, if the link died under the transfer.
    pub fn take_link_error(&mut self) -> Option<Error> {
        self.link_error.take()
    }

    fn note_error(&mut self, e: Error) {
        warn!("bulk transfer link error: {}", e);
        if self.link_error.is_none() {
            self.link_error = Some(e);
        }
    }
}

impl<'a, L: TransportLink + ?Sized> ByteChannel for BulkTransferAdapter<'a, L> {
    fn get(&mut self, size: usize, timeout: Duration) -> Option<Vec<u8>> {
        if self.link_error.is_some() {
            return None;
        }
        let deadline = Instant::now() + timeout;
        let mut buf = Vec::with_capacity(size);
        while buf.len() < size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.link.read(size - buf.len(), remaining) {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(e) => {
                    self.note_error(e);
                    break;
                }
            }
        }
        if buf.is_empty() {
            return None;
        }
        self.bytes_in += buf.len() as u64;
        if let Some(sink) = self.capture.as_mut() {
            if let Err(e) = sink.write_all(&buf) {
                warn!("capture write failed: {}", e);
            }
        }
        trace!("get {} of {} bytes", buf.len(), size);
        Some(buf)
    }

    fn put(&mut self, data: &[u8], _timeout: Duration) -> Option<usize> {
        if self.link_error.is_some() {
            return None;
        }
        match self.link.write(data).and_then(|n| self.link.flush().map(|_| n)) {
            Ok(n) => {
                self.bytes_out += n as u64;
                trace!("put {} bytes", n);
                Some(n)
            }
            Err(e) => {
                self.note_error(e);
                None
            }
        }
    }
}
