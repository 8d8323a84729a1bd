//! The probe / FILENAME / metadata / START handshake
//!
//! One [`Handshake`] is one attempt over a borrowed link. The sender calls
//! [`Handshake::offer`], the receiver [`Handshake::accept`]; both leave the
//! session in [`HandshakeState::Transferring`] with the link ready for the
//! block transfer, and [`Handshake::finish`] records how that went.

use crate::config::{ProtocolConfig, Timeouts};
use crate::error::{Error, Result};
use crate::frame::{FrameCodec, MetadataFrame};
use crate::link::TransportLink;
use crate::protocol::{FrameTerminator, PROBE, PROBE_ACK, TAIL_MARKER};
use crate::response::{token_matches, trim_reply, Completion, ResponseReader};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 512;

// A FILENAME token never needs this much buffered noise in front of it
const MAX_TOKEN_BUFFER: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// Sender probing; receiver waiting for a probe
    Init,
    /// Sender waiting for the probe answer
    AwaitAck,
    /// Sender waiting for GOFORIT; receiver waiting for FILENAME
    AwaitFilenameGo,
    SendMetadata,
    AwaitMetadata,
    AwaitNameRecv,
    AwaitStartXfer,
    Transferring,
    Done,
    Failed,
}

pub struct Handshake<'a, L: TransportLink + ?Sized> {
    link: &'a mut L,
    role: Role,
    protocol: ProtocolConfig,
    codec: FrameCodec,
    timeouts: Timeouts,
    reader: ResponseReader,
    state: HandshakeState,
    attempt_deadline: Option<Instant>,
    // Bounds a receiver that hears bytes but never a probe
    noise_deadline: Option<Instant>,
}

impl<'a, L: TransportLink + ?Sized> Handshake<'a, L> {
    pub fn new(link: &'a mut L, role: Role, protocol: &ProtocolConfig, timeouts: &Timeouts) -> Self {
        Self {
            link,
            role,
            protocol: protocol.clone(),
            codec: protocol.codec(),
            timeouts: timeouts.clone(),
            reader: ResponseReader::from_timeouts(timeouts),
            state: HandshakeState::Init,
            attempt_deadline: None,
            noise_deadline: None,
        }
    }

    pub fn sender(link: &'a mut L, protocol: &ProtocolConfig, timeouts: &Timeouts) -> Self {
        Self::new(link, Role::Sender, protocol, timeouts)
    }

    pub fn receiver(link: &'a mut L, protocol: &ProtocolConfig, timeouts: &Timeouts) -> Self {
        Self::new(link, Role::Receiver, protocol, timeouts)
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the peer got past the probe, starting the attempt clock.
    pub fn engaged(&self) -> bool {
        self.attempt_deadline.is_some()
    }

    /// The link, for the block transfer once the handshake is done.
    pub fn link_mut(&mut self) -> &mut L {
        &mut *self.link
    }

    /// Record the end of the block transfer.
    pub fn finish(&mut self, success: bool) {
        self.enter(if success {
            HandshakeState::Done
        } else {
            HandshakeState::Failed
        });
    }

    fn enter(&mut self, next: HandshakeState) {
        if next != self.state {
            debug!("{:?} handshake: {:?} -> {:?}", self.role, self.state, next);
            self.state = next;
        }
    }

    fn start_attempt_clock(&mut self) {
        self.attempt_deadline = Some(Instant::now() + self.timeouts.attempt());
    }

    /// Longest the next wait may block: one message timeout, cut short by
    /// the attempt deadline once it is running.
    fn wait_budget(&self) -> Result<Duration> {
        let message = self.timeouts.message();
        match self.attempt_deadline.or(self.noise_deadline) {
            None => Ok(message),
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    Err(Error::ResponseTimeout(self.timeouts.attempt()))
                } else {
                    Ok(left.min(message))
                }
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.link.write(data)?;
        self.link.flush()
    }

    fn completion(&self) -> Completion {
        if self.protocol.markers.replies_are_terminal() {
            Completion::Terminal
        } else {
            Completion::AnyBytes
        }
    }

    /// Wait for `token`. Answers to probes that crossed on a slow line may
    /// arrive first and are skipped.
    fn await_token(&mut self, token: &[u8], what: &str) -> Result<()> {
        let wait = self.wait_budget()?;
        let deadline = Instant::now() + wait;
        let completion = self.completion();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(Error::ResponseTimeout(wait));
            }
            let reply = self.reader.with_timeout(left).read(&mut *self.link, completion)?;
            if token_matches(&reply, token) {
                return Ok(());
            }
            if only(&reply, PROBE_ACK) {
                debug!("skipping late probe answer {:02x?}", reply);
                continue;
            }
            return Err(Error::ProtocolViolation(format!(
                "expected {}, got {:?}",
                what,
                String::from_utf8_lossy(&reply)
            )));
        }
    }

    // ---- sender ----

    /// Offer `filename` (`file_length` bytes) as chunk 1 of 1 and wait until
    /// the receiver is ready for the block transfer.
    pub fn offer(&mut self, filename: &[u8], file_length: u64) -> Result<()> {
        let result = self.run_sender(filename, file_length);
        if let Err(e) = &result {
            warn!("sender handshake failed in {:?}: {}", self.state, e);
            self.enter(HandshakeState::Failed);
        }
        result
    }

    fn run_sender(&mut self, filename: &[u8], file_length: u64) -> Result<()> {
        let frame = self.codec.encode(filename, file_length, 1, 1)?;
        self.start_attempt_clock();

        self.enter(HandshakeState::Init);
        self.probe()?;

        let scheme = self.protocol.markers;
        self.send(scheme.filename())?;
        self.enter(HandshakeState::AwaitFilenameGo);
        self.await_token(scheme.goforit(), "GOFORIT")?;

        self.enter(HandshakeState::SendMetadata);
        self.send(&frame)?;
        self.enter(HandshakeState::AwaitNameRecv);
        self.await_token(scheme.namerecv(), "NAMERECV")?;

        self.send(&[scheme.start()])?;
        self.enter(HandshakeState::Transferring);
        info!(
            "receiver accepted {} ({} bytes)",
            String::from_utf8_lossy(filename),
            file_length
        );
        Ok(())
    }

    /// Write probes until an answer ends in the ack byte.
    fn probe(&mut self) -> Result<()> {
        let mut probes = 0u32;
        loop {
            let wait = self.wait_budget()?.min(self.timeouts.probe_interval());
            self.send(&[PROBE])?;
            probes += 1;
            self.enter(HandshakeState::AwaitAck);
            match self.reader.with_timeout(wait).read(&mut *self.link, Completion::AnyBytes) {
                Ok(reply) if reply.last() == Some(&PROBE_ACK) => {
                    debug!("probe answered after {} tries", probes);
                    return Ok(());
                }
                Ok(reply) => debug!("ignoring probe reply {:02x?}", reply),
                Err(Error::ResponseTimeout(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }

    // ---- receiver ----

    /// Serve one handshake and return the accepted frame. Invalid frames are
    /// returned as errors; what happens next is the caller's policy.
    pub fn accept(&mut self) -> Result<MetadataFrame> {
        self.accept_with(|_| Ok(()))
    }

    /// Like [`Handshake::accept`], but `check` may still refuse a valid frame
    /// before NAMERECV goes out.
    pub fn accept_with<F>(&mut self, check: F) -> Result<MetadataFrame>
    where
        F: FnOnce(&MetadataFrame) -> Result<()>,
    {
        let result = self.run_receiver(check);
        if let Err(e) = &result {
            debug!("receiver handshake ended in {:?}: {}", self.state, e);
            self.enter(HandshakeState::Failed);
        }
        result
    }

    fn next_bytes(&mut self) -> Result<Vec<u8>> {
        let wait = self.wait_budget()?;
        let chunk = self.link.read(READ_CHUNK, wait)?;
        if chunk.is_empty() {
            return Err(Error::ResponseTimeout(wait));
        }
        Ok(chunk)
    }

    fn run_receiver<F>(&mut self, check: F) -> Result<MetadataFrame>
    where
        F: FnOnce(&MetadataFrame) -> Result<()>,
    {
        let scheme = self.protocol.markers;
        self.enter(HandshakeState::Init);
        let mut buf = Vec::new();

        loop {
            buf.extend_from_slice(&self.next_bytes()?);
            if only(&buf, PROBE) {
                self.send(&[PROBE_ACK])?;
                buf.clear();
                self.start_attempt_clock();
                self.enter(HandshakeState::AwaitFilenameGo);
                break;
            }
            debug!("discarding {:02x?} while waiting for a probe", buf);
            buf.clear();
            if self.noise_deadline.is_none() {
                self.noise_deadline = Some(Instant::now() + self.timeouts.attempt());
            }
        }

        loop {
            buf.extend_from_slice(&self.next_bytes()?);
            if token_matches(&buf, scheme.filename()) {
                self.send(scheme.goforit())?;
                buf.clear();
                break;
            }
            if only(&buf, PROBE) {
                self.send(&[PROBE_ACK])?;
                buf.clear();
            } else if buf.len() > MAX_TOKEN_BUFFER || buf.contains(&b'\n') {
                debug!("discarding {:?} while waiting for FILENAME", String::from_utf8_lossy(&buf));
                buf.clear();
            }
        }

        self.enter(HandshakeState::AwaitMetadata);
        let frame = loop {
            buf.extend_from_slice(&self.next_bytes()?);
            let skip = buf
                .iter()
                .position(|&b| !matches!(b, b'\r' | b'\n' | 0 | PROBE))
                .unwrap_or(buf.len());
            buf.drain(..skip);
            if let Some(end) = self.frame_end(&buf) {
                let frame = self.codec.decode(&buf[..end])?;
                self.codec.validate(&frame)?;
                check(&frame)?;
                buf.drain(..end);
                break frame;
            }
        };

        self.send(scheme.namerecv())?;
        self.enter(HandshakeState::AwaitStartXfer);
        let start = scheme.start();
        while !buf.contains(&start) {
            buf = self.next_bytes()?;
        }

        self.enter(HandshakeState::Transferring);
        info!(
            "accepted {} ({} bytes) from {}",
            frame.filename_lossy(),
            frame.file_length,
            self.link.describe()
        );
        Ok(frame)
    }

    /// Length of the frame at the front of `buf`, once it is complete.
    fn frame_end(&self, buf: &[u8]) -> Option<usize> {
        match self.protocol.terminator {
            FrameTerminator::ExactLength => self
                .codec
                .expected_len(buf)
                .filter(|&n| buf.len() >= n),
            FrameTerminator::TailMarker => buf
                .iter()
                .skip(2)
                .position(|&b| b == TAIL_MARKER)
                .map(|i| i + 3),
        }
    }
}

/// Whether `buf` holds nothing but `byte`, ignoring line noise around it.
fn only(buf: &[u8], byte: u8) -> bool {
    let t = trim_reply(buf);
    !t.is_empty() && t.iter().all(|&b| b == byte)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::frame::filename_checksum;
    use crate::protocol::{byte, FieldWidth, MarkerScheme, LEAD_MARKER};
    use crate::scripted::ScriptedLink;

    /// A line that never goes quiet: one junk byte every 10ms.
    #[derive(Default)]
    struct Chatter {
        writes: usize,
    }

    impl TransportLink for Chatter {
        fn read(&mut self, _max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
            std::thread::sleep(timeout.min(Duration::from_millis(10)));
            Ok(b"x".to_vec())
        }
        fn write(&mut self, data: &[u8]) -> Result<usize> {
            self.writes += 1;
            Ok(data.len())
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
        fn is_open(&self) -> bool {
            true
        }
        fn describe(&self) -> String {
            "chatter".to_string()
        }
    }

    /// Wire bytes for a u64 frame with a correct checksum, skipping the
    /// encoder's own field checks.
    fn raw_frame(name: &[u8], len: u64, chunk: u64, total: u64) -> Vec<u8> {
        let mut buf = vec![LEAD_MARKER, name.len() as u8];
        buf.extend_from_slice(name);
        for v in [len, chunk, total] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&filename_checksum(name, Default::default()).to_le_bytes());
        buf.push(TAIL_MARKER);
        buf
    }

    fn fast() -> Timeouts {
        Timeouts {
            message_ms: 500,
            attempt_ms: 2_000,
            quiet_ms: 5,
            probe_interval_ms: 50,
            block_ms: 500,
        }
    }

    fn frame_bytes(name: &[u8], len: u64) -> Vec<u8> {
        ProtocolConfig::default().codec().encode(name, len, 1, 1).unwrap()
    }

    #[test]
    fn probing_a_silent_link_times_out_at_the_deadline() {
        let mut link = ScriptedLink::new();
        let timeouts = Timeouts {
            attempt_ms: 300,
            ..fast()
        };
        let start = Instant::now();
        let mut hs = Handshake::sender(&mut link, &ProtocolConfig::default(), &timeouts);
        let err = hs.offer(b"test.txt", 100).unwrap_err();
        assert!(matches!(err, Error::ResponseTimeout(_)));
        assert_eq!(hs.state(), HandshakeState::Failed);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
        assert!(link.writes().len() >= 2);
        assert!(link.writes().iter().all(|w| w == &[PROBE]));
    }

    #[test]
    fn sender_walks_byte_scheme_handshake() {
        let mut link = ScriptedLink::new();
        link.reply(b"")
            .reply(b"A")
            .reply(&[byte::GOFORIT])
            .reply(&[byte::NAMERECV]);
        let mut hs = Handshake::sender(&mut link, &ProtocolConfig::default(), &fast());
        hs.offer(b"test.txt", 100).unwrap();
        assert_eq!(hs.state(), HandshakeState::Transferring);
        hs.finish(true);
        assert_eq!(hs.state(), HandshakeState::Done);

        let w = link.writes();
        assert_eq!(w.len(), 5);
        assert_eq!(w[0], b"@");
        assert_eq!(w[1], b"@");
        assert_eq!(w[2], vec![byte::FILENAME]);
        assert_eq!(w[3], frame_bytes(b"test.txt", 100));
        assert_eq!(w[4], vec![byte::STARTXFER]);
    }

    #[test]
    fn sender_tolerates_noisy_text_replies() {
        let protocol = ProtocolConfig {
            markers: MarkerScheme::Text,
            ..Default::default()
        };
        let mut link = ScriptedLink::new();
        link.reply(b"AA").reply(b"\x00AGOFORIT\r\n").reply(b"NAMERECV\r\n");
        let mut hs = Handshake::sender(&mut link, &protocol, &fast());
        hs.offer(b"report.csv", 12).unwrap();
        assert_eq!(link.writes()[1], b"FILENAME");
    }

    #[test]
    fn sender_rejects_wrong_go_token() {
        let protocol = ProtocolConfig {
            markers: MarkerScheme::Text,
            ..Default::default()
        };
        let mut link = ScriptedLink::new();
        link.reply(b"A").reply(b"ERROR\r\n");
        let mut hs = Handshake::sender(&mut link, &protocol, &fast());
        let err = hs.offer(b"a", 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(hs.state(), HandshakeState::Failed);
        assert_eq!(link.writes().len(), 2);
    }

    #[test]
    fn receiver_accepts_valid_frame() {
        let mut link = ScriptedLink::new();
        link.push_incoming(b"@")
            .push_incoming(&[byte::FILENAME])
            .push_incoming(&frame_bytes(b"test.txt", 100))
            .push_incoming(&[byte::STARTXFER]);
        let mut hs = Handshake::receiver(&mut link, &ProtocolConfig::default(), &fast());
        let frame = hs.accept().unwrap();
        assert_eq!(hs.state(), HandshakeState::Transferring);
        assert_eq!(frame.filename, b"test.txt");
        assert_eq!(frame.file_length, 100);
        assert_eq!((frame.chunk_index, frame.total_chunks), (1, 1));
        assert_eq!(
            link.writes(),
            &[vec![PROBE_ACK], vec![byte::GOFORIT], vec![byte::NAMERECV]]
        );
    }

    #[test]
    fn receiver_refuses_zero_checksum() {
        let protocol = ProtocolConfig::default();
        let mut frame = MetadataFrame::whole_file(b"test.txt", 100, protocol.checksum_bits);
        assert_ne!(frame.checksum, 0);
        frame.checksum = 0;
        let bad = protocol.codec().encode_frame(&frame).unwrap();

        let mut link = ScriptedLink::new();
        link.push_incoming(b"@")
            .push_incoming(&[byte::FILENAME])
            .push_incoming(&bad);
        let mut hs = Handshake::receiver(&mut link, &protocol, &fast());
        let err = hs.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(hs.state(), HandshakeState::Failed);
        assert!(!link.written().contains(&byte::NAMERECV));
    }

    #[test]
    fn receiver_rides_out_noise_and_fragments() {
        let frame = frame_bytes(b"test.txt", 100);
        let mut link = ScriptedLink::new();
        link.push_incoming(b"\x00zz")
            .push_incoming(b"@@")
            .push_incoming(b"@")
            .push_incoming(b"hello")
            .push_incoming(&[byte::FILENAME])
            .push_incoming(b"\r\n")
            .push_incoming(&frame[..5])
            .push_incoming(&frame[5..])
            .push_incoming(b"@")
            .push_incoming(&[byte::STARTXFER]);
        let mut hs = Handshake::receiver(&mut link, &ProtocolConfig::default(), &fast());
        let accepted = hs.accept().unwrap();
        assert_eq!(accepted.checksum, filename_checksum(b"test.txt", Default::default()));
        assert_eq!(
            link.writes(),
            &[
                vec![PROBE_ACK],
                vec![PROBE_ACK],
                vec![byte::GOFORIT],
                vec![byte::NAMERECV]
            ]
        );
    }

    #[test]
    fn receiver_times_out_without_probe() {
        let mut link = ScriptedLink::new();
        let timeouts = Timeouts {
            message_ms: 50,
            ..fast()
        };
        let mut hs = Handshake::receiver(&mut link, &ProtocolConfig::default(), &timeouts);
        assert!(matches!(hs.accept(), Err(Error::ResponseTimeout(_))));
    }

    #[test]
    fn tail_marker_terminator_stops_at_first_tail_byte() {
        let protocol = ProtocolConfig {
            terminator: FrameTerminator::TailMarker,
            ..Default::default()
        };
        // crc32("a") & 0xffff = 0xbe43, so no stray tail byte before the end
        let good = protocol.codec().encode(b"a", 100, 1, 1).unwrap();
        let mut link = ScriptedLink::new();
        link.push_incoming(b"@")
            .push_incoming(&[byte::FILENAME])
            .push_incoming(&good)
            .push_incoming(&[byte::STARTXFER]);
        let mut hs = Handshake::receiver(&mut link, &protocol, &fast());
        assert_eq!(hs.accept().unwrap().filename, b"a");

        // A length of 27 puts a tail byte inside the length field
        let early = protocol.codec().encode(b"a", 27, 1, 1).unwrap();
        let mut link = ScriptedLink::new();
        link.push_incoming(b"@")
            .push_incoming(&[byte::FILENAME])
            .push_incoming(&early);
        let mut hs = Handshake::receiver(&mut link, &protocol, &fast());
        let err = hs.accept().unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn receiver_gives_up_on_endless_noise() {
        let mut link = Chatter::default();
        let timeouts = Timeouts {
            message_ms: 200,
            attempt_ms: 500,
            ..fast()
        };
        let start = Instant::now();
        let mut hs = Handshake::receiver(&mut link, &ProtocolConfig::default(), &timeouts);
        let err = hs.accept().unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, Error::ResponseTimeout(_)), "{}", err);
        assert!(!hs.engaged());
        assert!(elapsed >= Duration::from_millis(500), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
        assert_eq!(link.writes, 0);
    }

    #[test]
    fn receiver_ignores_mixed_buffer_in_init() {
        let mut link = ScriptedLink::new();
        link.push_incoming(b"x@").push_incoming(&[byte::FILENAME]);
        let timeouts = Timeouts {
            message_ms: 50,
            ..fast()
        };
        let mut hs = Handshake::receiver(&mut link, &ProtocolConfig::default(), &timeouts);
        assert!(matches!(hs.accept(), Err(Error::ResponseTimeout(_))));
        assert!(!hs.engaged());
        assert!(link.writes().is_empty());
    }

    #[test]
    fn sender_skips_late_probe_answers_on_a_slow_line() {
        let timeouts = Timeouts {
            probe_interval_ms: 100,
            ..fast()
        };
        let mut link = ScriptedLink::new();
        link.with_latency(Duration::from_millis(120))
            .reply(b"A")
            .reply(b"A")
            .reply(&[byte::GOFORIT])
            .reply(&[byte::NAMERECV]);
        let mut hs = Handshake::sender(&mut link, &ProtocolConfig::default(), &timeouts);
        hs.offer(b"test.txt", 100).unwrap();
        assert_eq!(hs.state(), HandshakeState::Transferring);

        let w = link.writes();
        assert_eq!(w.len(), 5);
        assert_eq!(w[..2], [b"@".to_vec(), b"@".to_vec()]);
        assert_eq!(w[2], vec![byte::FILENAME]);
        assert_eq!(w[4], vec![byte::STARTXFER]);
    }

    #[test]
    fn receiver_refuses_frames_outside_the_data_model() {
        for frame in [raw_frame(b"", 10, 1, 1), raw_frame(b"test.txt", 10, 5, 2), raw_frame(b"test.txt", 10, 0, 1)] {
            let mut link = ScriptedLink::new();
            link.push_incoming(b"@")
                .push_incoming(&[byte::FILENAME])
                .push_incoming(&frame);
            let mut hs = Handshake::receiver(&mut link, &ProtocolConfig::default(), &fast());
            let err = hs.accept().unwrap_err();
            assert!(matches!(err, Error::Invalid(_)), "{}", err);
            assert!(!link.written().contains(&byte::NAMERECV));
        }
    }

    #[test]
    fn acceptance_check_runs_before_namerecv() {
        let mut link = ScriptedLink::new();
        link.push_incoming(b"@")
            .push_incoming(&[byte::FILENAME])
            .push_incoming(&frame_bytes(b"../evil", 100));
        let mut hs = Handshake::receiver(&mut link, &ProtocolConfig::default(), &fast());
        let err = hs
            .accept_with(|f| {
                if f.filename.contains(&b'/') {
                    Err(Error::ProtocolViolation("no paths".into()))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(hs.state(), HandshakeState::Failed);
        assert_eq!(link.writes(), &[vec![PROBE_ACK], vec![byte::GOFORIT]]);
    }

    #[test]
    fn text_scheme_receiver_collects_filename_token() {
        let protocol = ProtocolConfig {
            markers: MarkerScheme::Text,
            ..Default::default()
        };
        let mut link = ScriptedLink::new();
        link.push_incoming(b"@")
            .push_incoming(b"FILE")
            .push_incoming(b"NAME")
            .push_incoming(&frame_bytes(b"report.csv", 12))
            .push_incoming(&[byte::STARTXFER]);
        let mut hs = Handshake::receiver(&mut link, &protocol, &fast());
        assert_eq!(hs.accept().unwrap().filename, b"report.csv");
        assert_eq!(
            link.writes(),
            &[vec![PROBE_ACK], b"GOFORIT\r\n".to_vec(), b"NAMERECV\r\n".to_vec()]
        );
    }

    #[test]
    fn u32_fields_carry_through_the_handshake() {
        let protocol = ProtocolConfig {
            field_width: FieldWidth::U32,
            ..Default::default()
        };
        let frame = protocol.codec().encode(b"test.txt", 70_000, 1, 1).unwrap();
        assert_eq!(frame.len(), 2 + 8 + 3 * 4 + 4 + 1);

        let mut link = ScriptedLink::new();
        link.reply(b"A").reply(&[byte::GOFORIT]).reply(&[byte::NAMERECV]);
        let mut hs = Handshake::sender(&mut link, &protocol, &fast());
        hs.offer(b"test.txt", 70_000).unwrap();
        assert_eq!(link.writes()[2], frame);

        let mut link = ScriptedLink::new();
        link.push_incoming(b"@")
            .push_incoming(&[byte::FILENAME])
            .push_incoming(&frame)
            .push_incoming(&[byte::STARTXFER]);
        let mut hs = Handshake::receiver(&mut link, &protocol, &fast());
        assert_eq!(hs.accept().unwrap().file_length, 70_000);
    }
}
