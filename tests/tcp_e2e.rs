use anyhow::Result;
use rmxfer::config::{Settings, Timeouts};
use rmxfer::error::ErrorKind;
use rmxfer::journal::{TransferJournal, TransferStatus};
use rmxfer::link::{TcpLink, TransportLink};
use rmxfer::protocol::ChecksumWidth;
use rmxfer::receiver::Receiver;
use rmxfer::sender::{send_files, SendOptions};
use std::io::Write;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn write_file(path: &Path, size: usize) -> Result<()> {
    let mut f = std::fs::File::create(path)?;
    let data: Vec<u8> = (0..size).map(|i| (i * 7 % 251) as u8).collect();
    f.write_all(&data)?;
    Ok(())
}

fn settings() -> Settings {
    let mut s = Settings::default();
    s.modem.enabled = false;
    s.timeouts = Timeouts {
        message_ms: 2_000,
        attempt_ms: 10_000,
        quiet_ms: 20,
        probe_interval_ms: 100,
        block_ms: 2_000,
    };
    s
}

/// Start a receiver on an ephemeral port; returns its address.
fn start_receiver(settings: Settings, out: &Path, journal: &Path, concurrent: bool) -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?.to_string();
    let rx = Arc::new(Receiver::new(settings, out)?.with_journal(journal));
    std::thread::spawn(move || {
        let _ = rx.serve_tcp(listener, concurrent);
    });
    Ok(addr)
}

fn wait_for(path: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn tcp_batch_send_basic() -> Result<()> {
    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let logs = tempfile::tempdir()?;
    let journal = logs.path().join("rx.jsonl");

    let files: Vec<PathBuf> = [("a.txt", 1000usize), ("empty.dat", 0), ("b.bin", 5000)]
        .iter()
        .map(|(name, size)| {
            let p = src.path().join(name);
            write_file(&p, *size).map(|_| p)
        })
        .collect::<Result<_>>()?;

    let addr = start_receiver(settings(), out.path(), &journal, false)?;
    let mut link = TcpLink::connect(&addr, Duration::from_secs(2))?;
    let opts = SendOptions {
        journal: None,
        show_progress: false,
    };
    let outcomes = send_files(&mut link, &settings(), &files, &opts)?;
    link.close()?;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.success), "{:?}", outcomes);
    assert_eq!(outcomes[0].bytes_transferred, 1000);
    assert_eq!(outcomes[2].bytes_transferred, 5000);

    for f in &files {
        let name = f.file_name().unwrap();
        let landed = out.path().join(name);
        assert!(wait_for(&landed, Duration::from_secs(10)), "{:?} missing", name);
        assert_eq!(std::fs::read(&landed)?, std::fs::read(f)?);
    }

    let journal = TransferJournal::new(&journal);
    let start = Instant::now();
    let mut entries = journal.read_entries()?;
    while entries.len() < 3 && start.elapsed() < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(20));
        entries = journal.read_entries()?;
    }
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.status == TransferStatus::Completed));
    Ok(())
}

#[test]
fn tcp_mismatched_checksum_width_is_refused() -> Result<()> {
    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let logs = tempfile::tempdir()?;
    let journal = logs.path().join("rx.jsonl");
    let file = src.path().join("c.txt");
    write_file(&file, 300)?;

    let addr = start_receiver(settings(), out.path(), &journal, false)?;

    let mut sender = settings();
    sender.protocol.checksum_bits = ChecksumWidth::Bits32;
    sender.timeouts.message_ms = 500;
    let mut link = TcpLink::connect(&addr, Duration::from_secs(2))?;
    let opts = SendOptions {
        journal: None,
        show_progress: false,
    };
    let outcomes = send_files(&mut link, &sender, &[file], &opts)?;
    link.close()?;

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].error_kind, Some(ErrorKind::ResponseTimeout));
    assert!(!out.path().join("c.txt").exists());
    Ok(())
}

#[test]
fn tcp_concurrent_receiver_serves_clients_side_by_side() -> Result<()> {
    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let logs = tempfile::tempdir()?;
    let journal = logs.path().join("rx.jsonl");
    let file = src.path().join("d.bin");
    write_file(&file, 700)?;

    let mut rx_settings = settings();
    rx_settings.timeouts.message_ms = 5_000;
    let addr = start_receiver(rx_settings, out.path(), &journal, true)?;

    // Holds its worker in INIT without ever probing
    let mut idle = TcpLink::connect(&addr, Duration::from_secs(2))?;
    std::thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    let mut link = TcpLink::connect(&addr, Duration::from_secs(2))?;
    let opts = SendOptions {
        journal: None,
        show_progress: false,
    };
    let outcomes = send_files(&mut link, &settings(), &[file.clone()], &opts)?;
    link.close()?;
    let elapsed = start.elapsed();

    assert!(outcomes[0].success, "{:?}", outcomes);
    assert!(elapsed < Duration::from_secs(4), "{:?}", elapsed);
    assert!(wait_for(&out.path().join("d.bin"), Duration::from_secs(5)));
    assert_eq!(std::fs::read(out.path().join("d.bin"))?, std::fs::read(&file)?);

    assert!(idle.read(1, Duration::from_millis(10))?.is_empty());
    assert!(idle.is_open());
    idle.close()?;
    Ok(())
}
