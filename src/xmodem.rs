//! XMODEM block transfer
//!
//! Sender: waits for NAK (8-bit checksum) or `C` (CRC-16), sends 128-byte SOH
//! blocks padded with SUB, resends on NAK or silence, ends with EOT.
//! Receiver: asks for CRC mode and falls back to checksum mode, accepts SOH and
//! STX blocks, ACKs duplicates, NAKs damaged blocks.

use crate::adapter::{BlockTransfer, ByteChannel, TransferStats};
use crate::error::{Error, Result};
use log::{debug, info, warn};
use std::io::{Read, Write};
use std::time::Duration;

const SOH: u8 = 0x01;
const STX: u8 = 0x02;
const EOT: u8 = 0x04;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CAN: u8 = 0x18;
const CRC: u8 = b'C';
const SUB: u8 = 0x1a;

const BLOCK: usize = 128;
const BLOCK_1K: usize = 1024;
const PURGE_WAIT: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Checksum,
    Crc,
}

impl Mode {
    fn trailer_len(&self) -> usize {
        match self {
            Mode::Checksum => 1,
            Mode::Crc => 2,
        }
    }
}

/// CRC-16/XMODEM (poly 0x1021, init 0)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

pub fn checksum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn trailer(data: &[u8], mode: Mode) -> Vec<u8> {
    match mode {
        Mode::Checksum => vec![checksum8(data)],
        Mode::Crc => crc16(data).to_be_bytes().to_vec(),
    }
}

fn aborted(msg: &str) -> Error {
    Error::TransferAborted(msg.to_string())
}

#[derive(Clone, Debug)]
pub struct Xmodem {
    retry: usize,
    timeout: Duration,
}

impl Xmodem {
    pub fn new(timeout: Duration) -> Self {
        Self { retry: 16, timeout }
    }

    pub fn with_retry(mut self, retry: usize) -> Self {
        self.retry = retry.max(1);
        self
    }

    fn wait_for_start(&self, io: &mut dyn ByteChannel) -> Result<Mode> {
        let mut errors = 0;
        let mut cancelled = false;
        loop {
            match io.get(1, self.timeout).as_deref() {
                Some([NAK]) => return Ok(Mode::Checksum),
                Some([CRC]) => return Ok(Mode::Crc),
                Some([CAN]) if cancelled => return Err(aborted("receiver cancelled")),
                Some([CAN]) => cancelled = true,
                Some(other) => {
                    debug!("ignoring {:02x?} while waiting for receiver", other);
                    errors += 1;
                }
                None => errors += 1,
            }
            if errors > self.retry {
                return Err(aborted("receiver never requested the transfer"));
            }
        }
    }

    fn send_until_acked(
        &self,
        io: &mut dyn ByteChannel,
        packet: &[u8],
        stats: &mut TransferStats,
        progress: &mut dyn FnMut(TransferStats),
    ) -> Result<()> {
        let mut attempts = 0;
        let mut cancelled = false;
        loop {
            if io.put(packet, self.timeout).is_none() {
                return Err(aborted("write to link failed"));
            }
            match io.get(1, self.timeout).as_deref() {
                Some([ACK]) => return Ok(()),
                Some([CAN]) if cancelled => return Err(aborted("receiver cancelled")),
                Some([CAN]) => cancelled = true,
                Some(reply) => debug!("block not acknowledged: {:02x?}", reply),
                None => debug!("no acknowledgement within {:?}", self.timeout),
            }
            stats.error_count += 1;
            progress(*stats);
            attempts += 1;
            if attempts > self.retry {
                return Err(aborted("block retry limit reached"));
            }
        }
    }

    fn get_exact(&self, io: &mut dyn ByteChannel, n: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::with_capacity(n);
        while buf.len() < n {
            let chunk = io.get(n - buf.len(), self.timeout)?;
            buf.extend_from_slice(&chunk);
        }
        Some(buf)
    }

    fn purge(io: &mut dyn ByteChannel) {
        while io.get(BLOCK_1K, PURGE_WAIT).is_some() {}
    }
}

fn fill_block(src: &mut dyn Read, block: &mut [u8]) -> std::io::Result<usize> {
    let mut n = 0;
    while n < block.len() {
        match src.read(&mut block[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}

impl BlockTransfer for Xmodem {
    fn send(
        &mut self,
        io: &mut dyn ByteChannel,
        src: &mut dyn Read,
        progress: &mut dyn FnMut(TransferStats),
    ) -> Result<u64> {
        let mode = self.wait_for_start(io)?;
        debug!("receiver requested {:?} mode", mode);

        let mut stats = TransferStats::default();
        let mut seq: u8 = 1;
        let mut sent = 0u64;
        let mut data = [0u8; BLOCK];
        loop {
            let n = fill_block(src, &mut data)?;
            if n == 0 {
                break;
            }
            data[n..].fill(SUB);

            let mut packet = Vec::with_capacity(3 + BLOCK + 2);
            packet.extend_from_slice(&[SOH, seq, 0xff - seq]);
            packet.extend_from_slice(&data);
            packet.extend_from_slice(&trailer(&data, mode));

            self.send_until_acked(io, &packet, &mut stats, progress)?;
            stats.total_blocks += 1;
            stats.success_count += 1;
            progress(stats);

            sent += n as u64;
            seq = seq.wrapping_add(1);
        }

        let mut attempts = 0;
        loop {
            if io.put(&[EOT], self.timeout).is_none() {
                return Err(aborted("write to link failed"));
            }
            if let Some([ACK]) = io.get(1, self.timeout).as_deref() {
                break;
            }
            attempts += 1;
            if attempts > self.retry {
                return Err(aborted("end of transmission not acknowledged"));
            }
        }
        info!(
            "sent {} bytes in {} blocks ({} errors)",
            sent, stats.total_blocks, stats.error_count
        );
        Ok(sent)
    }

    fn recv(
        &mut self,
        io: &mut dyn ByteChannel,
        dst: &mut dyn Write,
        progress: &mut dyn FnMut(TransferStats),
    ) -> Result<u64> {
        let mut mode = Mode::Crc;
        let mut stats = TransferStats::default();
        let mut errors = 0;
        let mut cancels = 0;
        let mut started = false;
        let mut request = true;
        let mut expected: u8 = 1;
        let mut written = 0u64;

        loop {
            if errors > self.retry {
                let _ = io.put(&[CAN, CAN], self.timeout);
                return Err(aborted("receive retry limit reached"));
            }
            if !started && request {
                if errors >= self.retry / 2 {
                    mode = Mode::Checksum;
                }
                let ask = if mode == Mode::Crc { CRC } else { NAK };
                if io.put(&[ask], self.timeout).is_none() {
                    return Err(aborted("write to link failed"));
                }
                request = false;
            }

            let size = match io.get(1, self.timeout).as_deref() {
                Some([SOH]) => BLOCK,
                Some([STX]) => BLOCK_1K,
                Some([EOT]) => {
                    io.put(&[ACK], self.timeout);
                    break;
                }
                Some([CAN]) => {
                    cancels += 1;
                    if cancels >= 2 {
                        return Err(aborted("sender cancelled"));
                    }
                    continue;
                }
                Some(other) => {
                    debug!("ignoring {:02x?} while waiting for a block", other);
                    errors += 1;
                    continue;
                }
                None => {
                    errors += 1;
                    if started {
                        io.put(&[NAK], self.timeout);
                    } else {
                        request = true;
                    }
                    continue;
                }
            };
            started = true;
            cancels = 0;

            let body_len = 2 + size + mode.trailer_len();
            let Some(body) = self.get_exact(io, body_len) else {
                warn!("short block, requesting resend");
                errors += 1;
                stats.error_count += 1;
                progress(stats);
                Self::purge(io);
                io.put(&[NAK], self.timeout);
                continue;
            };

            let (seq, inv) = (body[0], body[1]);
            let data = &body[2..2 + size];
            let good = seq == 0xff - inv && body[2 + size..] == trailer(data, mode)[..];
            if !good {
                warn!("damaged block {}, requesting resend", seq);
                errors += 1;
                stats.error_count += 1;
                progress(stats);
                Self::purge(io);
                io.put(&[NAK], self.timeout);
                continue;
            }

            if seq == expected {
                dst.write_all(data)?;
                dst.flush()?;
                written += size as u64;
                expected = expected.wrapping_add(1);
                stats.total_blocks += 1;
                stats.success_count += 1;
                errors = 0;
                io.put(&[ACK], self.timeout);
            } else if seq == expected.wrapping_sub(1) {
                debug!("duplicate block {}", seq);
                io.put(&[ACK], self.timeout);
            } else {
                warn!("expected block {}, got {}", expected, seq);
                errors += 1;
                stats.error_count += 1;
                Self::purge(io);
                io.put(&[NAK], self.timeout);
            }
            progress(stats);
        }

        dst.flush()?;
        info!(
            "received {} bytes in {} blocks ({} errors)",
            written, stats.total_blocks, stats.error_count
        );
        Ok(written)
    }
}
