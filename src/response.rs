//! Reply collection over a half-duplex line
//!
//! A reply is gathered until the line has been quiet for one quiet period and,
//! for modem-style replies, the buffer ends in a terminal token. A wait that
//! sees no bytes at all for the whole deadline is a [`Error::ResponseTimeout`].

use crate::config::Timeouts;
use crate::error::{Error, Result};
use crate::link::TransportLink;
use lazy_static::lazy_static;
use log::{trace, warn};
use regex::bytes::Regex;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 4096;

lazy_static! {
    static ref TERMINAL: Regex = Regex::new(
        r"(?x)
        (OK
        |ERROR
        |BUSY
        |NO\ DIALTONE
        |NO\ CARRIER
        |RING
        |NO\ ANSWER
        |READY
        |GOFORIT
        |NAMERECV
        |CONNECT(?:\s+\d+)?)
        [\r\n]*$"
    )
    .unwrap();
}

/// Strip surrounding whitespace and NUL bytes.
pub fn trim_reply(reply: &[u8]) -> &[u8] {
    let junk = |b: &u8| b.is_ascii_whitespace() || *b == 0;
    let start = reply.iter().position(|b| !junk(b)).unwrap_or(reply.len());
    let end = reply.iter().rposition(|b| !junk(b)).map_or(start, |i| i + 1);
    &reply[start..end]
}

/// Whether `reply` ends in one of the terminal tokens.
pub fn is_terminal(reply: &[u8]) -> bool {
    TERMINAL.is_match(trim_reply(reply))
}

/// Whether a (possibly noisy) reply carries `token` at its end, ignoring
/// trailing CR/LF and stray leading bytes.
pub fn token_matches(reply: &[u8], token: &[u8]) -> bool {
    let token = trim_reply(token);
    !token.is_empty() && trim_reply(reply).ends_with(token)
}

/// Last non-blank line of a textual reply.
pub fn last_line(reply: &str) -> &str {
    reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Done once quiet and ending in a terminal token
    Terminal,
    /// Done once any bytes arrived and the line went quiet
    AnyBytes,
}

#[derive(Clone, Copy, Debug)]
pub struct ResponseReader {
    timeout: Duration,
    quiet: Duration,
}

impl ResponseReader {
    pub fn new(timeout: Duration, quiet: Duration) -> Self {
        Self { timeout, quiet }
    }

    pub fn from_timeouts(t: &Timeouts) -> Self {
        Self::new(t.message(), t.quiet())
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            quiet: self.quiet,
        }
    }

    pub fn read<L: TransportLink + ?Sized>(&self, link: &mut L, completion: Completion) -> Result<Vec<u8>> {
        let mut reply = Vec::new();
        let mut last_rx = Instant::now();
        loop {
            let chunk = link.read(READ_CHUNK, self.quiet)?;
            if !chunk.is_empty() {
                trace!("read {} bytes", chunk.len());
                reply.extend_from_slice(&chunk);
                last_rx = Instant::now();
                continue;
            }
            if !reply.is_empty() {
                let done = match completion {
                    Completion::AnyBytes => true,
                    Completion::Terminal => is_terminal(&reply),
                };
                if done {
                    return Ok(reply);
                }
            }
            if last_rx.elapsed() >= self.timeout {
                if !reply.is_empty() {
                    warn!(
                        "abandoning incomplete reply after {:?}: {:?}",
                        self.timeout,
                        String::from_utf8_lossy(&reply)
                    );
                }
                return Err(Error::ResponseTimeout(self.timeout));
            }
        }
    }
}
