//! rmxfer - send files to an rmxferd receiver
//!
//! Over a modem the sender dials, runs the handshake, sends the file with
//! XMODEM and hangs up, once per file. Over a plain serial cable or TCP the
//! AT dialog is skipped.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use rmxfer::cli::{init_logging, SendOpts};
use rmxfer::config::Settings;
use rmxfer::journal::TransferJournal;
use rmxfer::link::{DebugLink, SerialLink, TcpLink, TransportLink};
use rmxfer::logger::TextLogger;
use rmxfer::sender::{self, SendOptions};

fn open_link(opts: &SendOpts, settings: &Settings) -> Result<Box<dyn TransportLink>> {
    let link: Box<dyn TransportLink> = match (&opts.tcp, &opts.port) {
        (Some(addr), _) => Box::new(
            TcpLink::connect(addr, settings.timeouts.message())
                .with_context(|| format!("Failed to connect to {}", addr))?,
        ),
        (None, Some(port)) => Box::new(
            SerialLink::open(port, &settings.serial)
                .with_context(|| format!("Failed to open serial port {}", port))?,
        ),
        (None, None) => anyhow::bail!("Either --port or --tcp is required"),
    };
    if let Some(dir) = &opts.common.debug_tee {
        let logger = TextLogger::timestamped(dir)
            .with_context(|| format!("Failed to open debug tee in {}", dir.display()))?;
        info!("debug tee in {}", logger.path().display());
        return Ok(Box::new(DebugLink::new(link, logger)));
    }
    Ok(link)
}

fn main() -> Result<()> {
    // Set up Ctrl-C handler
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    let opts = SendOpts::parse();
    init_logging(opts.common.verbose);

    let mut settings = opts.common.settings()?;
    if opts.no_modem || opts.tcp.is_some() {
        settings.modem.enabled = false;
    }

    let mut link = open_link(&opts, &settings)?;
    info!("opened {}", link.describe());

    if let Some(count) = opts.ping {
        let answered = sender::ping(&mut link, &settings, count).context("Ping failed")?;
        println!("{} of {} probes answered", answered, count);
        let _ = link.close();
        return Ok(());
    }

    let journal = opts.common.journal.as_deref().map(TransferJournal::new);
    let send_opts = SendOptions {
        journal: journal.as_ref(),
        show_progress: opts.common.progress,
    };
    let result = sender::send_files(&mut link, &settings, &opts.files, &send_opts);
    let _ = link.close();
    let outcomes = result.context("Transfer batch stopped")?;

    let failed = outcomes.iter().filter(|o| !o.success).count();
    let bytes: u64 = outcomes.iter().map(|o| o.bytes_transferred).sum();
    println!(
        "Sent {} of {} file(s), {} bytes",
        outcomes.len() - failed,
        outcomes.len(),
        bytes
    );
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
