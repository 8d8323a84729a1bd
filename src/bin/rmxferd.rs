use anyhow::{Context, Result};
use clap::Parser;
use std::net::TcpListener;
use std::sync::Arc;

use rmxfer::cli::{init_logging, ReceiveOpts};
use rmxfer::receiver::Receiver;

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    let opts = ReceiveOpts::parse();
    init_logging(opts.common.verbose);
    let settings = opts.common.settings()?;

    if !opts.output.is_dir() {
        anyhow::bail!("Error: Output directory does not exist: {}", opts.output.display());
    }
    let output = std::fs::canonicalize(&opts.output)
        .with_context(|| format!("Failed to canonicalize output path: {}", opts.output.display()))?;

    let mut rx = Receiver::new(settings, &output)?.with_progress(opts.common.progress);
    if let Some(p) = &opts.common.journal {
        rx = rx.with_journal(p);
    }
    if let Some(p) = &opts.capture {
        rx = rx.with_capture(p);
    }
    if let Some(dir) = &opts.common.debug_tee {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create debug tee directory {}", dir.display()))?;
        rx = rx.with_debug_tee(dir);
    }

    println!("Starting rmxfer receiver:");
    println!("  Output:  {}", output.display());
    println!("  Markers: {:?}", rx.settings().protocol.markers);
    println!("  Invalid frames: {:?}", rx.settings().protocol.on_invalid_frame);

    match (&opts.bind, &opts.port) {
        (Some(addr), _) => {
            println!("  Bind:    {}", addr);
            let listener =
                TcpListener::bind(addr).with_context(|| format!("Failed to bind {}", addr))?;
            Arc::new(rx)
                .serve_tcp(listener, opts.concurrent)
                .context("Listener failed")
        }
        (None, Some(device)) => {
            println!("  Device:  {} @ {} baud", device, rx.settings().serial.baud);
            rx.serve_serial(device).context("Serial receiver failed")
        }
        (None, None) => anyhow::bail!("Either --bind or --port is required"),
    }
}
