//! In-memory link driven by a script of replies
//!
//! Every `write` pops the next scripted reply (if any) and makes it readable
//! after the configured latency. Bytes queued with
//! [`ScriptedLink::push_incoming`] are readable straight away. Reads with
//! nothing due sleep for the full timeout, like a silent line.

use crate::error::{Error, Result};
use crate::link::TransportLink;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct ScriptedLink {
    incoming: VecDeque<(Instant, Vec<u8>)>,
    latency: Duration,
    replies: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    writes: Vec<Vec<u8>>,
    hang_up_when_drained: bool,
    closed: bool,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes the peer has already sent. Each call is delivered by a
    /// separate read.
    pub fn push_incoming(&mut self, data: &[u8]) -> &mut Self {
        self.incoming.push_back((Instant::now(), data.to_vec()));
        self
    }

    /// Delay every scripted reply by `latency` after the write it answers.
    pub fn with_latency(&mut self, latency: Duration) -> &mut Self {
        self.latency = latency;
        self
    }

    /// Queue the reply to the next not-yet-answered write. An empty reply
    /// answers the write with silence.
    pub fn reply(&mut self, data: &[u8]) -> &mut Self {
        self.replies.push_back(data.to_vec());
        self
    }

    /// Report the peer as gone once every queued byte has been read.
    pub fn hang_up_when_drained(&mut self) -> &mut Self {
        self.hang_up_when_drained = true;
        self
    }

    /// Everything written so far, concatenated
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Everything written so far, one entry per `write` call
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }
}

impl TransportLink for ScriptedLink {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::LinkUnavailable("scripted link closed".into()));
        }
        if let Some(&(due, _)) = self.incoming.front() {
            let wait = due.saturating_duration_since(Instant::now());
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(Vec::new());
            }
            std::thread::sleep(wait);
        }
        match self.incoming.pop_front() {
            Some((due, mut chunk)) => {
                if chunk.len() > max_bytes {
                    let rest = chunk.split_off(max_bytes);
                    self.incoming.push_front((due, rest));
                }
                Ok(chunk)
            }
            None if self.hang_up_when_drained && self.replies.is_empty() => {
                Err(Error::LinkUnavailable("scripted peer hung up".into()))
            }
            None => {
                std::thread::sleep(timeout);
                Ok(Vec::new())
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::LinkUnavailable("scripted link closed".into()));
        }
        self.written.extend_from_slice(data);
        self.writes.push(data.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            if !reply.is_empty() {
                self.incoming.push_back((Instant::now() + self.latency, reply));
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
