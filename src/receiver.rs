//! Receiving side: accept links, run handshakes, store files
//!
//! A [`Receiver`] serves either a TCP listener (one link per client,
//! optionally one worker thread each) or a single serial device that is
//! re-opened whenever it goes away. Every attempt ends in a logged
//! [`TransferOutcome`]; one bad peer never stops the loop.

use crate::adapter::{BlockTransfer, BulkTransferAdapter};
use crate::config::Settings;
use crate::error::{Error, ErrorKind, Result, TransferOutcome};
use crate::frame::MetadataFrame;
use crate::handshake::Handshake;
use crate::journal::{self, JournalEntry, TransferJournal, TransferRole};
use crate::link::{DebugLink, SerialLink, TcpLink, TransportLink};
use crate::logger::TextLogger;
use crate::progress::BlockProgress;
use crate::protocol::InvalidFramePolicy;
use crate::xmodem::Xmodem;
use log::{debug, error, info, warn};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::TcpListener;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Filename bytes from the frame as a local name.
fn local_name(name: &[u8]) -> OsString {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        std::ffi::OsStr::from_bytes(name).to_os_string()
    }
    #[cfg(not(unix))]
    {
        name.iter().map(|&b| b as char).collect::<String>().into()
    }
}

/// Where a received file lands: a single normal path component under `dir`.
pub fn destination(dir: &Path, name: &[u8]) -> Result<PathBuf> {
    let refuse = || {
        Error::ProtocolViolation(format!(
            "refusing filename {:?}",
            String::from_utf8_lossy(name)
        ))
    };
    if name.contains(&0) {
        return Err(refuse());
    }
    let local = local_name(name);
    let mut parts = Path::new(&local).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(part)), None) => Ok(dir.join(part)),
        _ => Err(refuse()),
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut s = dest.as_os_str().to_os_string();
    s.push(".part");
    PathBuf::from(s)
}

/// What one attempt on a link came to.
struct Attempt {
    file: Option<String>,
    engaged: bool,
    result: Result<u64>,
}

pub struct Receiver {
    settings: Settings,
    output_dir: PathBuf,
    journal: Option<TransferJournal>,
    capture: Option<PathBuf>,
    debug_tee: Option<PathBuf>,
    show_progress: bool,
}

impl Receiver {
    /// Fails unless `output_dir` is an existing directory.
    pub fn new(settings: Settings, output_dir: &Path) -> anyhow::Result<Self> {
        if !output_dir.is_dir() {
            anyhow::bail!("output directory {} does not exist", output_dir.display());
        }
        Ok(Self {
            settings,
            output_dir: output_dir.to_path_buf(),
            journal: None,
            capture: None,
            debug_tee: None,
            show_progress: false,
        })
    }

    pub fn with_journal(mut self, path: &Path) -> Self {
        self.journal = Some(TransferJournal::new(path));
        self
    }

    /// Append every byte the block transfer reads to `path`.
    pub fn with_capture(mut self, path: &Path) -> Self {
        self.capture = Some(path.to_path_buf());
        self
    }

    /// Tee each link's traffic into a timestamped file in `dir`.
    pub fn with_debug_tee(mut self, dir: &Path) -> Self {
        self.debug_tee = Some(dir.to_path_buf());
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn wrap<L: TransportLink + 'static>(&self, link: L) -> Box<dyn TransportLink> {
        if let Some(dir) = &self.debug_tee {
            match TextLogger::timestamped(dir) {
                Ok(logger) => {
                    info!("debug tee for {} in {}", link.describe(), logger.path().display());
                    return Box::new(DebugLink::new(link, logger));
                }
                Err(e) => warn!("debug tee unavailable: {:#}", e),
            }
        }
        Box::new(link)
    }

    /// Accept clients forever. With `concurrent` each client gets its own
    /// worker thread; otherwise clients are served one after another.
    pub fn serve_tcp(self: Arc<Self>, listener: TcpListener, concurrent: bool) -> Result<()> {
        info!("listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };
            let link = TcpLink::from_stream(stream);
            info!("connection from {}", link.describe());
            if concurrent {
                let me = Arc::clone(&self);
                thread::spawn(move || me.serve_connection(link));
            } else {
                self.serve_connection(link);
            }
        }
        Ok(())
    }

    fn serve_connection(&self, link: TcpLink) {
        let peer = link.describe();
        let mut link = self.wrap(link);
        let files = self.serve_link(&mut link, true);
        let _ = link.close();
        info!("{} disconnected after {} file(s)", peer, files);
    }

    /// Keep `device` open and serve it forever, re-opening it whenever it
    /// fails.
    pub fn serve_serial(&self, device: &str) -> Result<()> {
        let delay = Duration::from_millis(self.settings.receiver.reopen_delay_ms);
        loop {
            match SerialLink::open(device, &self.settings.serial) {
                Ok(link) => {
                    info!("serving {}", device);
                    let mut link = self.wrap(link);
                    let files = self.serve_link(&mut link, false);
                    let _ = link.close();
                    info!("{} closed after {} file(s)", device, files);
                }
                Err(e) => warn!("cannot open {}: {}", device, e),
            }
            thread::sleep(delay);
        }
    }

    /// Run handshakes on `link` until it dies. An idle timeout ends the
    /// session when `drop_when_idle` is set and is ignored otherwise.
    /// Returns the number of files received.
    pub fn serve_link<L: TransportLink + ?Sized>(&self, link: &mut L, drop_when_idle: bool) -> usize {
        let peer = link.describe();
        let mut files = 0;
        while link.is_open() {
            let attempt = self.receive_one(&mut *link);
            let engaged = attempt.engaged;
            let kind = attempt.result.as_ref().err().map(Error::kind);

            if engaged || attempt.result.is_ok() {
                self.report(&peer, &attempt);
            }
            match kind {
                None => files += 1,
                Some(ErrorKind::LinkUnavailable) => break,
                Some(ErrorKind::ResponseTimeout) if !engaged => {
                    if drop_when_idle {
                        info!("{} idle, disconnecting", peer);
                        break;
                    }
                    debug!("{} idle", peer);
                }
                Some(ErrorKind::ProtocolViolation) => match self.settings.protocol.on_invalid_frame {
                    InvalidFramePolicy::Reset => info!("resetting handshake with {}", peer),
                    InvalidFramePolicy::Drop => {
                        warn!("dropping {}", peer);
                        break;
                    }
                },
                Some(ErrorKind::ResponseTimeout) if drop_when_idle => {
                    warn!("{} stalled, disconnecting", peer);
                    break;
                }
                Some(_) => {}
            }
        }
        files
    }

    fn report(&self, peer: &str, attempt: &Attempt) {
        let file = attempt.file.as_deref();
        let entry = match &attempt.result {
            Ok(n) => {
                info!("received {} ({} bytes) from {}", file.unwrap_or("?"), n, peer);
                JournalEntry::new(TransferRole::Receiver, peer, file, &TransferOutcome::completed(*n))
            }
            Err(e) => {
                error!("transfer from {} failed: {}", peer, e);
                JournalEntry::new(TransferRole::Receiver, peer, file, &TransferOutcome::failed(e))
                    .with_error(e)
            }
        };
        journal::record(self.journal.as_ref(), entry);
    }

    fn receive_one<L: TransportLink + ?Sized>(&self, link: &mut L) -> Attempt {
        let s = &self.settings;
        let mut hs = Handshake::receiver(link, &s.protocol, &s.timeouts);
        let dir = &self.output_dir;
        let frame = match hs.accept_with(|f| destination(dir, &f.filename).map(drop)) {
            Ok(f) => f,
            Err(e) => {
                return Attempt {
                    file: None,
                    engaged: hs.engaged(),
                    result: Err(e),
                }
            }
        };
        let result = self.store(hs.link_mut(), &frame);
        hs.finish(result.is_ok());
        Attempt {
            file: Some(frame.filename_lossy()),
            engaged: true,
            result,
        }
    }

    /// Receive the file body into `<name>.part`, cut it to the length the
    /// frame announced and move it into place.
    fn store<L: TransportLink + ?Sized>(&self, link: &mut L, frame: &MetadataFrame) -> Result<u64> {
        let dest = destination(&self.output_dir, &frame.filename)?;
        let part = part_path(&dest);
        let result = self.receive_into(link, &part, &frame.filename_lossy());
        match result {
            Ok(received) if received >= frame.file_length => {
                let f = OpenOptions::new().write(true).open(&part)?;
                f.set_len(frame.file_length)?;
                f.sync_all()?;
                fs::rename(&part, &dest)?;
                debug!("stored {}", dest.display());
                Ok(frame.file_length)
            }
            Ok(received) => {
                let _ = fs::remove_file(&part);
                Err(Error::TransferAborted(format!(
                    "got {} of {} bytes",
                    received, frame.file_length
                )))
            }
            Err(e) => {
                let _ = fs::remove_file(&part);
                Err(e)
            }
        }
    }

    fn receive_into<L: TransportLink + ?Sized>(&self, link: &mut L, part: &Path, label: &str) -> Result<u64> {
        let mut out = BufWriter::new(File::create(part)?);
        let mut capture = match &self.capture {
            Some(p) => Some(OpenOptions::new().create(true).append(true).open(p)?),
            None => None,
        };
        let mut adapter = BulkTransferAdapter::new(link);
        if let Some(c) = capture.as_mut() {
            adapter = adapter.with_capture(c);
        }
        let mut engine = Xmodem::new(self.settings.timeouts.block())
            .with_retry(self.settings.receiver.block_retries);
        let bar = BlockProgress::new(label, self.show_progress);
        let received = engine.recv(&mut adapter, &mut out, &mut |s| bar.update(s));
        let received = match (received, adapter.take_link_error()) {
            (Err(_), Some(link_err)) => Err(link_err),
            (r, _) => r,
        };
        match received {
            Ok(n) => {
                out.flush()?;
                bar.finish(n);
                Ok(n)
            }
            Err(e) => {
                bar.fail(&e.to_string());
                Err(e)
            }
        }
    }
}
