//! AT-command dialog around a modem line
//!
//! A [`ModemSession`] covers one dial-to-hangup cycle over a borrowed link:
//! reset and echo-off, session clear, signal gate, dial, then guard escape and
//! hang-up. Every read uses the terminal-token completion rule.

use crate::config::{ModemConfig, Timeouts};
use crate::error::{Error, Result};
use crate::link::TransportLink;
use crate::response::{is_terminal, last_line, Completion, ResponseReader};
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use std::thread;
use std::time::Duration;

lazy_static! {
    static ref SIGNAL: Regex = Regex::new(r"(?m)^\+CSQ:(\d)").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModemState {
    Idle,
    EchoOff,
    Clear,
    SignalGate,
    Dialing,
    Connected,
    Escape,
    Hangup,
}

/// Signal level out of a `+CSQ:<d>` reply.
pub fn parse_signal(reply: &str) -> Option<u8> {
    SIGNAL
        .captures(reply)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub struct ModemSession<'a, L: TransportLink + ?Sized> {
    link: &'a mut L,
    config: ModemConfig,
    reader: ResponseReader,
    state: ModemState,
    last_signal_level: Option<u8>,
    last_response: String,
}

impl<'a, L: TransportLink + ?Sized> ModemSession<'a, L> {
    pub fn new(link: &'a mut L, config: &ModemConfig, timeouts: &Timeouts) -> Self {
        Self {
            link,
            config: config.clone(),
            reader: ResponseReader::from_timeouts(timeouts),
            state: ModemState::Idle,
            last_signal_level: None,
            last_response: String::new(),
        }
    }

    pub fn state(&self) -> ModemState {
        self.state
    }

    pub fn last_signal_level(&self) -> Option<u8> {
        self.last_signal_level
    }

    pub fn last_response(&self) -> &str {
        &self.last_response
    }

    /// The line, for the handshake once connected.
    pub fn link_mut(&mut self) -> &mut L {
        &mut *self.link
    }

    fn enter(&mut self, next: ModemState) {
        debug!("modem: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.link.write(data)?;
        self.link.flush()
    }

    /// Send `data` as-is and collect the modem's reply.
    fn exchange(&mut self, data: &[u8]) -> Result<String> {
        self.write_raw(data)?;
        let reply = self.reader.read(&mut *self.link, Completion::Terminal)?;
        let text = String::from_utf8_lossy(&reply).trim().to_string();
        debug!("modem replied {:?}", text);
        self.last_response = text.clone();
        Ok(text)
    }

    /// Send an AT command followed by the configured line ending.
    pub fn command(&mut self, cmd: &str) -> Result<String> {
        info!("modem <- {}", cmd);
        let line = format!("{}{}", cmd.trim(), self.config.line_ending);
        self.exchange(line.as_bytes())
    }

    fn expect_terminal(&mut self, cmd: &str) -> Result<String> {
        match self.command(cmd) {
            Ok(reply) if is_terminal(reply.as_bytes()) => Ok(reply),
            Ok(reply) => Err(Error::ModemDialFailure(format!("{}: unexpected reply {:?}", cmd, reply))),
            Err(Error::ResponseTimeout(d)) => Err(Error::ModemDialFailure(format!(
                "{}: no reply within {:?}",
                cmd, d
            ))),
            Err(e) => Err(e),
        }
    }

    /// Query the signal level once.
    pub fn signal_level(&mut self) -> Result<u8> {
        let reply = self.expect_terminal("AT+CSQ?")?;
        let level = parse_signal(&reply).ok_or_else(|| {
            Error::ModemDialFailure(format!("could not interpret signal from {:?}", reply))
        })?;
        debug!("signal level {}", level);
        self.last_signal_level = Some(level);
        Ok(level)
    }

    /// Bring the modem up and place the call. Returns once CONNECT is seen.
    pub fn dial(&mut self) -> Result<()> {
        self.enter(ModemState::EchoOff);
        self.expect_terminal("AT")?;
        self.expect_terminal("ATE0")?;

        self.enter(ModemState::Clear);
        let clear = self.config.clear_command.clone();
        if !clear.is_empty() {
            self.expect_terminal(&clear)?;
        }

        self.enter(ModemState::SignalGate);
        // Polls until the signal is good enough, however long that takes
        loop {
            let level = self.signal_level()?;
            if level >= self.config.min_signal {
                break;
            }
            info!(
                "signal {} below {}, retrying in {}ms",
                level, self.config.min_signal, self.config.signal_poll_ms
            );
            thread::sleep(Duration::from_millis(self.config.signal_poll_ms));
        }

        self.enter(ModemState::Dialing);
        let dial = format!("{}{}", self.config.dial_prefix, self.config.dial_number);
        let reply = self.expect_terminal(&dial)?;
        let line = last_line(&reply);
        if !line.starts_with("CONNECT") {
            return Err(Error::ModemDialFailure(format!("call not opened: {:?}", line)));
        }
        self.enter(ModemState::Connected);
        info!("connected: {}", line);
        Ok(())
    }

    /// Escape to command mode and hang up.
    pub fn hang_up(&mut self) -> Result<()> {
        self.enter(ModemState::Escape);
        thread::sleep(Duration::from_millis(self.config.escape_settle_ms));
        let reply = match self.exchange(b"+++") {
            Ok(r) => r,
            Err(Error::ResponseTimeout(_)) => String::new(),
            Err(e) => return Err(e),
        };
        thread::sleep(Duration::from_millis(self.config.escape_guard_ms));
        if last_line(&reply) != "OK" {
            return Err(Error::ModemDialFailure("did not switch to command mode".into()));
        }

        self.enter(ModemState::Hangup);
        let reply = match self.command("ATH0") {
            Ok(r) => r,
            Err(Error::ResponseTimeout(_)) => String::new(),
            Err(e) => return Err(e),
        };
        if last_line(&reply) != "OK" {
            return Err(Error::ModemDialFailure("did not hang up".into()));
        }
        thread::sleep(Duration::from_millis(self.config.hangup_settle_ms));
        self.enter(ModemState::Idle);
        info!("call ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scripted::ScriptedLink;
    use std::time::Instant;

    fn timeouts() -> Timeouts {
        Timeouts {
            message_ms: 200,
            quiet_ms: 5,
            ..Default::default()
        }
    }

    fn csq(level: u8) -> Vec<u8> {
        format!("\r\n+CSQ:{}\r\n\r\nOK\r\n", level).into_bytes()
    }

    #[test]
    fn parse_signal_reads_first_digit() {
        assert_eq!(parse_signal("+CSQ:4\r\n\r\nOK"), Some(4));
        assert_eq!(parse_signal("\r\n+CSQ:0\r\nOK"), Some(0));
        assert_eq!(parse_signal("OK"), None);
    }

    #[test]
    fn dial_reaches_connected_without_waiting_on_a_good_signal() {
        let mut link = ScriptedLink::new();
        link.reply(b"\r\nOK\r\n")
            .reply(b"\r\nOK\r\n")
            .reply(b"\r\nOK\r\n")
            .reply(&csq(4))
            .reply(b"\r\nCONNECT 9600\r\n");
        let config = ModemConfig {
            signal_poll_ms: 10_000,
            ..Default::default()
        };
        let start = Instant::now();
        let mut modem = ModemSession::new(&mut link, &config, &timeouts());
        modem.dial().unwrap();
        assert_eq!(modem.state(), ModemState::Connected);
        assert_eq!(modem.last_signal_level(), Some(4));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(
            link.writes(),
            &[
                b"AT\r".to_vec(),
                b"ATE0\r".to_vec(),
                b"AT+SBDC\r".to_vec(),
                b"AT+CSQ?\r".to_vec(),
                b"ATDT00881600005478\r".to_vec(),
            ]
        );
    }

    #[test]
    fn signal_gate_polls_until_level_three() {
        let mut link = ScriptedLink::new();
        link.reply(b"OK\r\n")
            .reply(b"OK\r\n")
            .reply(b"OK\r\n")
            .reply(&csq(1))
            .reply(&csq(2))
            .reply(&csq(4))
            .reply(b"CONNECT 2400\r\n");
        let config = ModemConfig::default().without_delays();
        let mut modem = ModemSession::new(&mut link, &config, &timeouts());
        modem.dial().unwrap();
        let queries = link.writes().iter().filter(|w| w.as_slice() == b"AT+CSQ?\r").count();
        assert_eq!(queries, 3);
    }

    #[test]
    fn busy_line_is_a_dial_failure() {
        let mut link = ScriptedLink::new();
        link.reply(b"OK\r\n")
            .reply(b"OK\r\n")
            .reply(b"OK\r\n")
            .reply(&csq(5))
            .reply(b"\r\nBUSY\r\n");
        let config = ModemConfig::default().without_delays();
        let mut modem = ModemSession::new(&mut link, &config, &timeouts());
        let err = modem.dial().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModemDialFailure);
        assert_eq!(modem.state(), ModemState::Dialing);
        assert_eq!(modem.last_response(), "BUSY");
    }

    #[test]
    fn silent_modem_is_a_dial_failure() {
        let mut link = ScriptedLink::new();
        let config = ModemConfig::default().without_delays();
        let mut modem = ModemSession::new(&mut link, &config, &timeouts());
        let err = modem.dial().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModemDialFailure);
    }

    #[test]
    fn hang_up_escapes_then_hangs_up() {
        let mut link = ScriptedLink::new();
        link.reply(b"\r\nOK\r\n").reply(b"\r\nOK\r\n");
        let config = ModemConfig::default().without_delays();
        let mut modem = ModemSession::new(&mut link, &config, &timeouts());
        modem.hang_up().unwrap();
        assert_eq!(modem.state(), ModemState::Idle);
        assert_eq!(link.writes(), &[b"+++".to_vec(), b"ATH0\r".to_vec()]);
    }

    #[test]
    fn hang_up_reports_which_step_failed() {
        let config = ModemConfig::default().without_delays();

        let mut link = ScriptedLink::new();
        link.reply(b"ERROR\r\n");
        let err = ModemSession::new(&mut link, &config, &timeouts()).hang_up().unwrap_err();
        assert!(err.to_string().contains("did not switch to command mode"));

        let mut link = ScriptedLink::new();
        link.reply(b"OK\r\n").reply(b"NO CARRIER\r\n");
        let err = ModemSession::new(&mut link, &config, &timeouts()).hang_up().unwrap_err();
        assert!(err.to_string().contains("did not hang up"));
    }
}
