//! Sending side: dial, handshake, XMODEM send, hang up

use crate::adapter::{BlockTransfer, BulkTransferAdapter, TransferStats};
use crate::config::Settings;
use crate::error::{Error, Result, TransferOutcome};
use crate::frame::EncodeError;
use crate::handshake::Handshake;
use crate::journal::{self, JournalEntry, TransferJournal, TransferRole};
use crate::link::TransportLink;
use crate::modem::ModemSession;
use crate::progress::BlockProgress;
use crate::protocol::{MAX_FILENAME_LEN, PROBE, PROBE_ACK};
use crate::response::{Completion, ResponseReader};
use crate::xmodem::Xmodem;
use log::{error, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;

/// Basename of `path` as it travels in the metadata frame: raw single-byte
/// text, cut to 255 bytes.
pub fn wire_name(path: &Path) -> Result<Vec<u8>> {
    let name = path.file_name().ok_or(EncodeError::EmptyFilename)?;
    #[cfg(unix)]
    let mut bytes = {
        use std::os::unix::ffi::OsStrExt;
        name.as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let mut bytes: Vec<u8> = name
        .to_string_lossy()
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    bytes.truncate(MAX_FILENAME_LEN);
    Ok(bytes)
}

/// Handshake and block-send one file over an already connected link.
pub fn transfer_file<L: TransportLink + ?Sized>(
    link: &mut L,
    settings: &Settings,
    path: &Path,
    progress: &mut dyn FnMut(TransferStats),
) -> Result<u64> {
    let name = wire_name(path)?;
    let file = File::open(path)?;
    let length = file.metadata()?.len();

    let mut hs = Handshake::sender(link, &settings.protocol, &settings.timeouts);
    hs.offer(&name, length)?;

    let result = {
        let mut adapter = BulkTransferAdapter::new(hs.link_mut());
        let mut engine = Xmodem::new(settings.timeouts.block());
        let sent = engine.send(&mut adapter, &mut BufReader::new(file), progress);
        match (sent, adapter.take_link_error()) {
            (Err(_), Some(link_err)) => Err(link_err),
            (sent, _) => sent,
        }
    };
    hs.finish(result.is_ok());
    result
}

fn transfer_with_progress<L: TransportLink + ?Sized>(
    link: &mut L,
    settings: &Settings,
    path: &Path,
    show_progress: bool,
) -> Result<u64> {
    let bar = BlockProgress::new(&path.display().to_string(), show_progress);
    let result = transfer_file(link, settings, path, &mut |s| bar.update(s));
    match &result {
        Ok(n) => bar.finish(*n),
        Err(e) => bar.fail(&e.to_string()),
    }
    result
}

pub struct SendOptions<'j> {
    pub journal: Option<&'j TransferJournal>,
    pub show_progress: bool,
}

fn report(
    opts: &SendOptions<'_>,
    peer: &str,
    path: &Path,
    result: std::result::Result<u64, &Error>,
) -> TransferOutcome {
    let file = path.display().to_string();
    let (outcome, entry) = match result {
        Ok(n) => {
            info!("sent {} ({} bytes)", file, n);
            let o = TransferOutcome::completed(n);
            let e = JournalEntry::new(TransferRole::Sender, peer, Some(&file), &o);
            (o, e)
        }
        Err(err) => {
            error!("{}: {}", file, err);
            let o = TransferOutcome::failed(err);
            let e = JournalEntry::new(TransferRole::Sender, peer, Some(&file), &o).with_error(err);
            (o, e)
        }
    };
    journal::record(opts.journal, entry);
    outcome
}

/// Send each regular file in `files`. With a modem every file gets its own
/// call; a dial or hang-up failure stops the batch.
pub fn send_files<L: TransportLink + ?Sized>(
    link: &mut L,
    settings: &Settings,
    files: &[PathBuf],
    opts: &SendOptions<'_>,
) -> Result<Vec<TransferOutcome>> {
    let peer = link.describe();
    let mut outcomes = Vec::new();
    for path in files {
        if !path.is_file() {
            warn!("{} is not a regular file, skipping", path.display());
            continue;
        }
        info!("processing {}", path.display());

        if !settings.modem.enabled {
            let result = transfer_with_progress(&mut *link, settings, path, opts.show_progress);
            outcomes.push(report(opts, &peer, path, result.as_ref().copied()));
            continue;
        }

        let mut modem = ModemSession::new(&mut *link, &settings.modem, &settings.timeouts);
        if let Err(e) = modem.dial() {
            report(opts, &peer, path, Err(&e));
            return Err(e);
        }
        let result = transfer_with_progress(modem.link_mut(), settings, path, opts.show_progress);
        outcomes.push(report(opts, &peer, path, result.as_ref().copied()));
        modem.hang_up()?;
    }
    Ok(outcomes)
}

/// Line test: write `count` probes (0 = until interrupted) at the probe
/// interval and log what comes back. Returns how many were answered.
pub fn ping<L: TransportLink + ?Sized>(link: &mut L, settings: &Settings, count: u64) -> Result<u64> {
    warn!("ping mode: only sending single probe bytes");
    let interval = settings.timeouts.probe_interval();
    let reader = ResponseReader::from_timeouts(&settings.timeouts).with_timeout(interval);
    let mut answered = 0;
    let mut sent = 0u64;
    while count == 0 || sent < count {
        link.write(&[PROBE])?;
        link.flush()?;
        sent += 1;
        match reader.read(&mut *link, Completion::AnyBytes) {
            Ok(reply) => {
                info!("ping {}: {:?}", sent, String::from_utf8_lossy(&reply));
                if reply.last() == Some(&PROBE_ACK) {
                    answered += 1;
                }
                thread::sleep(interval);
            }
            Err(Error::ResponseTimeout(_)) => info!("ping {}: no reply", sent),
            Err(e) => return Err(e),
        }
    }
    Ok(answered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::error::ErrorKind;
    use crate::protocol::byte;
    use crate::scripted::ScriptedLink;

    fn settings(modem: bool) -> Settings {
        let mut s = Settings::default();
        s.modem.enabled = modem;
        s.modem = s.modem.without_delays();
        s.timeouts = Timeouts {
            message_ms: 200,
            attempt_ms: 1_000,
            quiet_ms: 5,
            probe_interval_ms: 20,
            block_ms: 100,
        };
        s
    }

    fn opts() -> SendOptions<'static> {
        SendOptions {
            journal: None,
            show_progress: false,
        }
    }

    #[test]
    fn wire_name_is_the_truncated_basename() {
        assert_eq!(wire_name(Path::new("/var/data/test.txt")).unwrap(), b"test.txt");
        let long = format!("/tmp/{}", "n".repeat(300));
        assert_eq!(wire_name(Path::new(&long)).unwrap().len(), 255);
        assert!(wire_name(Path::new("/")).is_err());
    }

    #[test]
    fn non_regular_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut link = ScriptedLink::new();
        let files = vec![dir.path().to_path_buf(), dir.path().join("missing")];
        let outcomes = send_files(&mut link, &settings(true), &files, &opts()).unwrap();
        assert!(outcomes.is_empty());
        assert!(link.written().is_empty());
    }

    #[test]
    fn silent_modem_stops_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.bin");
        std::fs::write(&f, b"abc").unwrap();
        let mut link = ScriptedLink::new();
        let err = send_files(&mut link, &settings(true), &[f], &opts()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModemDialFailure);
    }

    #[test]
    fn call_is_hung_up_after_a_failed_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.bin");
        std::fs::write(&f, b"abc").unwrap();

        let mut link = ScriptedLink::new();
        link.reply(b"OK\r\n")
            .reply(b"OK\r\n")
            .reply(b"OK\r\n")
            .reply(b"+CSQ:5\r\nOK\r\n")
            .reply(b"CONNECT 9600\r\n")
            .reply(b"A")
            .reply(b"\x00")
            .reply(b"\r\nOK\r\n")
            .reply(b"\r\nOK\r\n");
        let outcomes = send_files(&mut link, &settings(true), &[f], &opts()).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].error_kind, Some(ErrorKind::ProtocolViolation));

        let w = link.writes();
        assert_eq!(w[6], vec![byte::FILENAME]);
        assert_eq!(w[7], b"+++");
        assert_eq!(w[8], b"ATH0\r");
    }

    #[test]
    fn ping_counts_answers() {
        let mut link = ScriptedLink::new();
        link.reply(b"A").reply(b"").reply(b"xA");
        assert_eq!(ping(&mut link, &settings(false), 3).unwrap(), 2);
        assert_eq!(link.writes().len(), 3);
    }
}
