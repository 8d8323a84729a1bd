//! Transport links: the byte pipe every session runs over
//!
//! A link is owned by exactly one session at a time. Reads block for at most
//! the given timeout and return an empty buffer when nothing arrived; only a
//! dead or closed transport is an error.

use crate::config::SerialConfig;
use crate::error::{Error, Result};
use crate::logger::Logger;
use log::debug;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

pub trait TransportLink: Send {
    /// Read up to `max_bytes`, waiting at most `timeout` for the first byte.
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>>;
    /// Write all of `data`, returning the count written.
    fn write(&mut self, data: &[u8]) -> Result<usize>;
    fn flush(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;
    /// Human-readable peer or device name for logs
    fn describe(&self) -> String;
}

impl<L: TransportLink + ?Sized> TransportLink for Box<L> {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read(max_bytes, timeout)
    }
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
    fn is_open(&self) -> bool {
        (**self).is_open()
    }
    fn describe(&self) -> String {
        (**self).describe()
    }
}

fn closed(what: &str) -> Error {
    Error::LinkUnavailable(format!("{} is not open", what))
}

/// A serial device: a modem, a null-modem cable or a virtual pty.
pub struct SerialLink {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    /// Open `path` as 8N1 at the configured baud rate, discarding stale input.
    pub fn open(path: &str, cfg: &SerialConfig) -> Result<Self> {
        let flow = if cfg.hardware_flow {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        let port = serialport::new(path, cfg.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow)
            .timeout(Duration::from_millis(cfg.write_timeout_ms))
            .open()?;
        port.clear(ClearBuffer::Input)?;
        debug!("opened {} at {} baud (flow {:?})", path, cfg.baud, flow);
        Ok(Self {
            name: path.to_string(),
            port: Some(port),
        })
    }
}

impl TransportLink for SerialLink {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or_else(|| closed("serial port"))?;
        port.set_timeout(timeout)?;
        let mut buf = vec![0u8; max_bytes.max(1)];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or_else(|| closed("serial port"))?;
        port.write_all(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| closed("serial port"))?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("closed {}", self.name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// A TCP socket standing in for a modem line.
pub struct TcpLink {
    peer: String,
    stream: Option<TcpStream>,
}

impl TcpLink {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let sa = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::LinkUnavailable(format!("cannot resolve {}", addr)))?;
        let stream = TcpStream::connect_timeout(&sa, timeout)
            .map_err(|e| Error::LinkUnavailable(format!("connect {}: {}", addr, e)))?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an accepted or connected stream, tuning it for dead-peer detection.
    pub fn from_stream(stream: TcpStream) -> Self {
        tune_socket(&stream);
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            peer,
            stream: Some(stream),
        }
    }
}

impl TransportLink for TcpLink {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or_else(|| closed("socket"))?;
        // A zero read timeout means "block forever" to std
        stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut buf = vec![0u8; max_bytes.max(1)];
        match stream.read(&mut buf) {
            Ok(0) => {
                self.stream = None;
                Err(Error::LinkUnavailable(format!("{} closed the connection", self.peer)))
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(|| closed("socket"))?;
        stream.write_all(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| closed("socket"))?;
        stream.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(s) = self.stream.take() {
            let _ = s.shutdown(std::net::Shutdown::Both);
            debug!("disconnected {}", self.peer);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        self.peer.clone()
    }
}

#[cfg(target_os = "linux")]
const KEEPALIVE_IDLE_SECS: i32 = 1;
#[cfg(target_os = "linux")]
const KEEPALIVE_INTERVAL_SECS: i32 = 1;
#[cfg(target_os = "linux")]
const KEEPALIVE_PROBES: i32 = 3;

/// Short keep-alive timers so a vanished peer surfaces as a read error.
/// No Nagle.
fn tune_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    #[cfg(unix)]
    {
        use std::os::fd::AsRawFd;
        let fd = stream.as_raw_fd();
        #[allow(unused_mut)]
        let mut opts = vec![(libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)];
        #[cfg(target_os = "linux")]
        opts.extend([
            (libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, KEEPALIVE_IDLE_SECS),
            (libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, KEEPALIVE_INTERVAL_SECS),
            (libc::IPPROTO_TCP, libc::TCP_KEEPCNT, KEEPALIVE_PROBES),
        ]);
        for (level, name, value) in opts {
            if let Err(e) = set_int_opt(fd, level, name, value) {
                debug!("setsockopt({}, {}) failed: {}", level, name, e);
            }
        }
    }
}

#[cfg(unix)]
fn set_int_opt(fd: libc::c_int, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> std::io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Tees every byte crossing `inner` into a [`Logger`].
pub struct DebugLink<L, G> {
    inner: L,
    logger: G,
}

impl<L: TransportLink, G: Logger> DebugLink<L, G> {
    pub fn new(inner: L, logger: G) -> Self {
        Self { inner, logger }
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: TransportLink, G: Logger> TransportLink for DebugLink<L, G> {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        let data = self.inner.read(max_bytes, timeout)?;
        if !data.is_empty() {
            self.logger.received(&data);
        }
        Ok(data)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let n = self.inner.write(data)?;
        self.logger.sent(data);
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}
